use crate::format::Profile;
use crate::gl::{self, has_extension, ContextGuard, ProcAddress};

const FRAGMENT_PROGRAM_EXTENSION: &str = "GL_ARB_fragment_program";
const NPOT_EXTENSIONS: [&str; 2] = [
    "GL_APPLE_texture_2D_limited_npot",
    "GL_ARB_texture_non_power_of_two",
];

/// Entry points of `GL_ARB_fragment_program`, all resolved or none at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgramEntryPoints {
    pub gen_programs: ProcAddress,
    pub bind_program: ProcAddress,
    pub program_string: ProcAddress,
    pub delete_programs: ProcAddress,
}

impl ProgramEntryPoints {
    fn resolve(guard: &ContextGuard<'_>) -> Option<Self> {
        Some(Self {
            gen_programs: guard.proc_address("glGenProgramsARB")?,
            bind_program: guard.proc_address("glBindProgramARB")?,
            program_string: guard.proc_address("glProgramStringARB")?,
            delete_programs: guard.proc_address("glDeleteProgramsARB")?,
        })
    }
}

/// Optional features found on the active context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capabilities {
    pub fragment_program: Option<ProgramEntryPoints>,
    pub non_power_of_two_textures: bool,
}

impl Capabilities {
    /// Inspects the acquired context. Absent features narrow later choices but
    /// are never an error.
    pub fn probe(guard: &ContextGuard<'_>, profile: Profile) -> Self {
        let extensions = guard.get_string(gl::EXTENSIONS).unwrap_or_default();

        let fragment_program = if has_extension(&extensions, FRAGMENT_PROGRAM_EXTENSION) {
            let entry = ProgramEntryPoints::resolve(guard);
            if entry.is_none() {
                tracing::debug!("fragment program extension advertised but entry points missing");
            }
            entry
        } else {
            None
        };

        let non_power_of_two_textures = match profile {
            Profile::Constrained | Profile::DualTextureDirect => true,
            Profile::Generic => NPOT_EXTENSIONS
                .iter()
                .any(|name| has_extension(&extensions, name)),
        };

        let caps = Self {
            fragment_program,
            non_power_of_two_textures,
        };
        tracing::debug!(
            ?profile,
            fragment_program = caps.supports_fragment_program(),
            npot = caps.non_power_of_two_textures,
            "probed context capabilities"
        );
        caps
    }

    pub fn supports_fragment_program(&self) -> bool {
        self.fragment_program.is_some()
    }
}
