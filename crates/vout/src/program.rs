use crate::caps::ProgramEntryPoints;
use crate::gl::{self, Gl};

/// A linked `GL_ARB_fragment_program` object.
///
/// Only ever constructed from a successful upload, so its id is never 0.
#[derive(Debug)]
pub struct FragmentProgram {
    id: u32,
    entry: ProgramEntryPoints,
}

impl FragmentProgram {
    /// Generates, binds and uploads `source`. An upload rejected by the driver
    /// is logged and the half-built object deleted.
    pub fn build(gl: &dyn Gl, entry: ProgramEntryPoints, source: &str) -> Option<Self> {
        let id = gl.gen_program(&entry);
        if id == 0 {
            tracing::warn!("driver returned no fragment program name");
            return None;
        }
        gl.bind_program(&entry, gl::FRAGMENT_PROGRAM_ARB, id);
        gl.program_string(
            &entry,
            gl::FRAGMENT_PROGRAM_ARB,
            gl::PROGRAM_FORMAT_ASCII_ARB,
            source.as_bytes(),
        );

        if gl.get_error() == gl::INVALID_OPERATION {
            let position = gl.get_integer(gl::PROGRAM_ERROR_POSITION_ARB);
            let message = gl
                .get_string(gl::PROGRAM_ERROR_STRING_ARB)
                .unwrap_or_default();
            tracing::warn!(
                position,
                %message,
                "fragment program rejected, using fixed-function path"
            );
            gl.delete_program(&entry, id);
            return None;
        }

        tracing::debug!(program = id, "fragment program built");
        Some(Self { id, entry })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn delete(self, gl: &dyn Gl) {
        gl.delete_program(&self.entry, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::{ContextGuard, ProcAddress};
    use crate::recording::{Call, RecordingContext};

    fn entry() -> ProgramEntryPoints {
        let address = |n| ProcAddress::new(n).unwrap();
        ProgramEntryPoints {
            gen_programs: address(1),
            bind_program: address(2),
            program_string: address(3),
            delete_programs: address(4),
        }
    }

    #[test]
    fn successful_upload_keeps_the_program() {
        let context = RecordingContext::builder().program_procs().build();
        let guard = ContextGuard::acquire(&context).unwrap();
        let program = FragmentProgram::build(&*guard, entry(), "!!ARBfp1.0\nEND\n").unwrap();
        assert_ne!(program.id(), 0);
        program.delete(&*guard);
        drop(guard);

        let calls = context.calls();
        assert!(calls.contains(&Call::ProgramString {
            source: "!!ARBfp1.0\nEND\n".to_owned()
        }));
        assert!(matches!(calls.last(), Some(Call::Release)));
        assert!(calls.iter().any(|call| matches!(call, Call::DeleteProgram(_))));
    }

    #[test]
    fn rejected_upload_deletes_the_program() {
        let context = RecordingContext::builder()
            .program_procs()
            .reject_programs(12, "unexpected token")
            .build();
        let guard = ContextGuard::acquire(&context).unwrap();
        assert!(FragmentProgram::build(&*guard, entry(), "garbage").is_none());
        drop(guard);

        let calls = context.calls();
        let deleted = calls
            .iter()
            .filter(|call| matches!(call, Call::DeleteProgram(_)))
            .count();
        assert_eq!(deleted, 1);
        assert!(calls.contains(&Call::GetInteger(gl::PROGRAM_ERROR_POSITION_ARB)));
    }
}
