use std::sync::Arc;

use vout::gl;
use vout::recording::{Call, CallLog, RecordingAllocator, RecordingContext};
use vout::{
    BackendError, BackendOptions, Chroma, DisplayBackend, PicturePool, Primitive, Profile,
    StorageHint, VideoFormat,
};

const ARB_SOURCE: &str = "!!ARBfp1.0\nTEX result.color, fragment.texcoord[0], texture[0], 2D;\nEND\n";

struct Harness {
    context: Arc<RecordingContext>,
    allocator: Arc<RecordingAllocator>,
}

impl Harness {
    fn new(context: vout::recording::RecordingContextBuilder) -> Self {
        let log = CallLog::new();
        Self {
            context: Arc::new(context.log(log.clone()).build()),
            allocator: Arc::new(RecordingAllocator::new(log)),
        }
    }

    fn with_allocator(context: vout::recording::RecordingContextBuilder, allocator: RecordingAllocator) -> Self {
        let harness = Self::new(context);
        Self {
            allocator: Arc::new(allocator),
            ..harness
        }
    }

    fn backend(&self, format: &mut VideoFormat, options: BackendOptions) -> Result<DisplayBackend, BackendError> {
        DisplayBackend::with_allocator(
            self.context.clone(),
            format,
            options,
            self.allocator.clone(),
        )
    }
}

fn options(profile: Profile) -> BackendOptions {
    BackendOptions {
        profile: Some(profile),
        ..BackendOptions::default()
    }
}

/// Keeps only the calls that matter for ordering checks.
fn milestones(calls: &[Call]) -> Vec<Call> {
    calls
        .iter()
        .filter(|call| {
            matches!(
                call,
                Call::Acquire
                    | Call::Release
                    | Call::DeleteTextures(_)
                    | Call::DeleteProgram(_)
                    | Call::ReleasePool
                    | Call::FreeBuffer
            )
        })
        .cloned()
        .collect()
}

#[test]
fn construction_rewrites_the_callers_format() {
    let harness = Harness::new(RecordingContext::builder());
    let mut format = VideoFormat::new(Chroma::I420, 720, 576);
    let backend = harness.backend(&mut format, options(Profile::Generic)).unwrap();

    assert_eq!(format.chroma, Chroma::Rv32);
    assert_eq!(&format, backend.format());
    assert_eq!((backend.layout().width, backend.layout().height), (1024, 1024));
    assert_eq!(backend.program_id(), 0);

    let calls = harness.context.calls();
    let state: Vec<Call> = calls
        .iter()
        .skip_while(|call| !matches!(call, Call::Disable(gl::BLEND)))
        .cloned()
        .collect();
    assert_eq!(
        state,
        vec![
            Call::Disable(gl::BLEND),
            Call::Disable(gl::DEPTH_TEST),
            Call::DepthMask(false),
            Call::Disable(gl::CULL_FACE),
            Call::ClearColor([0.0, 0.0, 0.0, 1.0]),
            Call::Clear(gl::COLOR_BUFFER_BIT),
            Call::Release,
        ]
    );
    assert!(!harness.context.is_acquired());
}

#[test]
fn construction_fails_without_a_context() {
    let harness = Harness::new(RecordingContext::builder());
    harness.context.set_fail_acquire(true);
    let mut format = VideoFormat::new(Chroma::Rv32, 320, 240);
    let err = harness.backend(&mut format, options(Profile::Generic)).unwrap_err();

    assert!(matches!(err, BackendError::ContextUnavailable(_)));
    assert_eq!(format.chroma, Chroma::Rv32);
    assert_eq!(harness.context.calls(), vec![Call::AcquireFailed]);
}

#[test]
fn invalid_dimensions_release_the_context() {
    let harness = Harness::new(RecordingContext::builder());
    let mut format = VideoFormat::new(Chroma::Rv32, 320, 0);
    let err = harness.backend(&mut format, options(Profile::Generic)).unwrap_err();

    assert!(matches!(err, BackendError::InvalidFormat(_)));
    assert!(!harness.context.is_acquired());
    assert_eq!(harness.context.calls().last(), Some(&Call::Release));
}

#[test]
fn pool_creation_is_idempotent() {
    let harness = Harness::new(RecordingContext::builder());
    let mut format = VideoFormat::new(Chroma::Rv32, 320, 240);
    let mut backend = harness.backend(&mut format, options(Profile::Generic)).unwrap();

    let first = backend.pool().unwrap();
    let allocated = harness.allocator.buffers_allocated();
    let second = backend.pool().unwrap();

    assert!(PicturePool::ptr_eq(&first, &second));
    assert_eq!(harness.allocator.buffers_allocated(), allocated);
    assert_eq!(harness.allocator.pools_created(), 1);
    let generated = harness
        .context
        .calls()
        .iter()
        .filter(|call| matches!(call, Call::GenTextures(_)))
        .count();
    assert_eq!(generated, 1);
}

#[test]
fn failed_buffer_allocation_rolls_back_everything() {
    let harness = Harness::with_allocator(
        RecordingContext::builder(),
        RecordingAllocator::new(CallLog::new()).fail_buffer_at(1),
    );
    let mut format = VideoFormat::new(Chroma::I420, 640, 360);
    let mut backend = harness
        .backend(&mut format, options(Profile::DualTextureDirect))
        .unwrap();

    let err = backend.pool().unwrap_err();
    assert!(matches!(err, BackendError::Allocation(_)));
    assert_eq!(harness.allocator.live_buffers(), 0);
    assert_eq!(harness.allocator.live_pictures(), 0);
    assert!(backend.texture_names().is_empty());

    let pool = backend.pool().unwrap();
    assert_eq!(pool.len(), 2);
    assert_eq!(harness.allocator.live_buffers(), 2);
}

#[test]
fn failed_picture_or_pool_rolls_back_everything() {
    for allocator in [
        RecordingAllocator::new(CallLog::new()).fail_picture_at(0),
        RecordingAllocator::new(CallLog::new()).fail_picture_at(1),
        RecordingAllocator::new(CallLog::new()).fail_pool(),
    ] {
        let harness = Harness::with_allocator(RecordingContext::builder(), allocator);
        let mut format = VideoFormat::new(Chroma::I420, 64, 64);
        let mut backend = harness
            .backend(&mut format, options(Profile::DualTextureDirect))
            .unwrap();

        assert!(backend.pool().is_err());
        assert_eq!(harness.allocator.live_buffers(), 0);
        assert_eq!(harness.allocator.live_pictures(), 0);
        assert_eq!(harness.allocator.pools_created(), 0);

        drop(backend);
        assert_eq!(harness.allocator.live_buffers(), 0);
    }
}

#[test]
fn teardown_releases_gpu_objects_before_cpu_memory() {
    let harness = Harness::new(
        RecordingContext::builder()
            .extensions("GL_ARB_fragment_program")
            .program_procs(),
    );
    let mut format = VideoFormat::new(Chroma::I420, 640, 360);
    let mut backend = harness
        .backend(
            &mut format,
            BackendOptions {
                profile: Some(Profile::DualTextureDirect),
                fragment_program: Some(ARB_SOURCE.to_owned()),
                storage_hint: StorageHint::Cached,
            },
        )
        .unwrap();
    assert_ne!(backend.program_id(), 0);
    let pool = backend.pool().unwrap();
    drop(pool);
    let textures = backend.texture_names();
    let program = backend.program_id();
    harness.context.clear_calls();

    drop(backend);

    assert_eq!(
        milestones(&harness.context.calls()),
        vec![
            Call::Acquire,
            Call::DeleteTextures(textures),
            Call::DeleteProgram(program),
            Call::Release,
            Call::ReleasePool,
            Call::FreeBuffer,
            Call::FreeBuffer,
        ]
    );
    assert_eq!(harness.allocator.live_buffers(), 0);
    assert_eq!(harness.allocator.live_pictures(), 0);
}

#[test]
fn teardown_without_context_still_frees_memory() {
    let harness = Harness::new(RecordingContext::builder());
    let mut format = VideoFormat::new(Chroma::Rv32, 320, 240);
    let mut backend = harness.backend(&mut format, options(Profile::Generic)).unwrap();
    backend.pool().unwrap();
    harness.context.set_fail_acquire(true);
    harness.context.clear_calls();

    drop(backend);

    let calls = harness.context.calls();
    assert!(!calls.iter().any(|call| matches!(call, Call::DeleteTextures(_))));
    assert_eq!(
        calls,
        vec![Call::AcquireFailed, Call::ReleasePool, Call::FreeBuffer]
    );
    assert_eq!(harness.allocator.live_buffers(), 0);
}

#[test]
fn generic_stage_uploads_exactly_once() {
    let harness = Harness::new(RecordingContext::builder());
    let mut format = VideoFormat::new(Chroma::Rv32, 320, 240);
    let mut backend = harness.backend(&mut format, options(Profile::Generic)).unwrap();
    let pool = backend.pool().unwrap();
    let lease = pool.acquire().unwrap();
    lease.pixels().fill(0x80);
    harness.context.clear_calls();

    backend.prepare(&lease).unwrap();

    let uploads: Vec<Call> = harness
        .context
        .calls()
        .into_iter()
        .filter(|call| matches!(call, Call::TexSubImage2D { .. }))
        .collect();
    assert_eq!(
        uploads,
        vec![Call::TexSubImage2D {
            target: gl::TEXTURE_2D,
            width: 320,
            height: 240,
            format: gl::RGBA,
            ty: gl::UNSIGNED_BYTE,
            len: 320 * 240 * 4,
        }]
    );
}

#[test]
fn dual_stage_only_binds() {
    let harness = Harness::new(RecordingContext::builder());
    let mut format = VideoFormat::new(Chroma::I420, 320, 240);
    let mut backend = harness
        .backend(&mut format, options(Profile::DualTextureDirect))
        .unwrap();
    let pool = backend.pool().unwrap();
    let textures = backend.texture_names();
    let _first = pool.acquire().unwrap();
    let second = pool.acquire().unwrap();
    harness.context.clear_calls();

    backend.prepare(&second).unwrap();

    let calls = harness.context.calls();
    assert!(!calls
        .iter()
        .any(|call| matches!(call, Call::TexSubImage2D { .. } | Call::TexImage2D { .. })));
    assert!(calls.contains(&Call::BindTexture {
        target: gl::TEXTURE_RECTANGLE,
        texture: textures[1],
    }));
}

#[test]
fn dual_stage_rejects_foreign_pictures() {
    let harness = Harness::new(RecordingContext::builder());
    let mut generic_format = VideoFormat::new(Chroma::Rv32, 64, 64);
    let mut generic = harness
        .backend(&mut generic_format, options(Profile::Generic))
        .unwrap();
    let foreign_pool = generic.pool().unwrap();
    let foreign = foreign_pool.acquire().unwrap();

    let mut format = VideoFormat::new(Chroma::I420, 64, 64);
    let mut dual = harness
        .backend(&mut format, options(Profile::DualTextureDirect))
        .unwrap();
    dual.pool().unwrap();

    assert!(matches!(
        dual.prepare(&foreign),
        Err(BackendError::UnboundPicture)
    ));
    assert!(!harness.context.is_acquired());
}

#[test]
fn dual_stage_rejects_pictures_of_another_dual_backend() {
    let harness = Harness::new(RecordingContext::builder());
    let mut other_format = VideoFormat::new(Chroma::I420, 64, 64);
    let mut other = harness
        .backend(&mut other_format, options(Profile::DualTextureDirect))
        .unwrap();
    let other_pool = other.pool().unwrap();
    let borrowed = other_pool.acquire().unwrap();
    assert_eq!(borrowed.texture_unit(), Some(0));

    let mut format = VideoFormat::new(Chroma::I420, 64, 64);
    let mut dual = harness
        .backend(&mut format, options(Profile::DualTextureDirect))
        .unwrap();
    let pool = dual.pool().unwrap();
    harness.context.clear_calls();

    assert!(matches!(
        dual.prepare(&borrowed),
        Err(BackendError::UnboundPicture)
    ));
    assert!(!harness
        .context
        .calls()
        .iter()
        .any(|call| matches!(call, Call::BindTexture { .. })));

    let own = pool.acquire().unwrap();
    dual.prepare(&own).unwrap();
    assert!(!harness.context.is_acquired());
}

#[test]
fn generic_stage_rejects_planes_larger_than_the_texture() {
    use vout::{Picture, Plane, StagingBuffer};

    let harness = Harness::new(RecordingContext::builder());
    let mut format = VideoFormat::new(Chroma::Rv32, 64, 64);
    let mut backend = harness.backend(&mut format, options(Profile::Generic)).unwrap();
    backend.pool().unwrap();

    let overrun = Picture::new(
        format,
        Plane {
            pitch: 4096 * 4,
            lines: 4096,
        },
        Arc::new(StagingBuffer::zeroed(16).unwrap()),
        None,
    );
    let too_wide = Picture::new(
        format,
        Plane {
            pitch: 128 * 4,
            lines: 1,
        },
        Arc::new(StagingBuffer::zeroed(128 * 4).unwrap()),
        None,
    );
    harness.context.clear_calls();

    for picture in [&overrun, &too_wide] {
        assert!(matches!(
            backend.prepare(picture),
            Err(BackendError::InvalidPicture(_))
        ));
    }
    assert!(!harness
        .context
        .calls()
        .iter()
        .any(|call| matches!(call, Call::TexSubImage2D { .. })));
    assert!(!harness.context.is_acquired());
}

#[test]
fn display_rejects_crops_outside_the_frame() {
    let harness = Harness::new(RecordingContext::builder());
    let mut format = VideoFormat::new(Chroma::Rv32, 64, 64);
    let backend = harness.backend(&mut format, options(Profile::Generic)).unwrap();
    harness.context.clear_calls();

    for crop in [
        format.with_crop(u32::MAX, 0, 2, 64),
        format.with_crop(0, u32::MAX, 64, 2),
        format.with_crop(60, 0, 64, 64),
    ] {
        assert!(matches!(
            backend.display(&crop),
            Err(BackendError::InvalidFormat(_))
        ));
    }
    assert!(harness.context.calls().is_empty());

    backend.display(&format.with_crop(8, 8, 56, 56)).unwrap();
    assert!(harness.context.calls().contains(&Call::Swap));
}

#[test]
fn full_frame_display_samples_to_the_texture_edge() {
    let harness = Harness::new(RecordingContext::builder());
    let mut format = VideoFormat::new(Chroma::Rv32, 256, 256);
    let backend = harness.backend(&mut format, options(Profile::Generic)).unwrap();
    harness.context.clear_calls();

    backend.display(&format).unwrap();

    let calls = harness.context.calls();
    let quad = calls
        .iter()
        .find_map(|call| match call {
            Call::DrawQuad(quad) => Some(*quad),
            _ => None,
        })
        .unwrap();
    assert_eq!(quad.primitive, Primitive::Polygon);
    assert_eq!(quad.tex_coords[2], [1.0, 1.0]);
    assert_eq!(
        calls,
        vec![
            Call::Acquire,
            Call::Clear(gl::COLOR_BUFFER_BIT),
            Call::Enable(gl::TEXTURE_2D),
            Call::DrawQuad(quad),
            Call::Disable(gl::TEXTURE_2D),
            Call::Swap,
            Call::Release,
        ]
    );
}

#[test]
fn rejected_program_falls_back_to_fixed_function() {
    let harness = Harness::new(
        RecordingContext::builder()
            .extensions("GL_ARB_fragment_program GL_ARB_texture_non_power_of_two")
            .program_procs()
            .reject_programs(3, "syntax error"),
    );
    let mut format = VideoFormat::new(Chroma::Rv32, 320, 240);
    let backend = harness
        .backend(
            &mut format,
            BackendOptions {
                profile: Some(Profile::Generic),
                fragment_program: Some("not a program".to_owned()),
                ..BackendOptions::default()
            },
        )
        .unwrap();
    assert_eq!(backend.program_id(), 0);
    assert_eq!((backend.layout().width, backend.layout().height), (320, 240));
    harness.context.clear_calls();

    backend.display(&format).unwrap();

    let calls = harness.context.calls();
    assert!(calls.contains(&Call::Enable(gl::TEXTURE_2D)));
    assert!(!calls.contains(&Call::Enable(gl::FRAGMENT_PROGRAM_ARB)));
}

#[test]
fn compiled_program_replaces_the_texture_target() {
    let harness = Harness::new(
        RecordingContext::builder()
            .extensions("GL_ARB_fragment_program")
            .program_procs(),
    );
    let mut format = VideoFormat::new(Chroma::Rv32, 320, 240);
    let backend = harness
        .backend(
            &mut format,
            BackendOptions {
                profile: Some(Profile::Generic),
                fragment_program: Some(ARB_SOURCE.to_owned()),
                ..BackendOptions::default()
            },
        )
        .unwrap();
    harness.context.clear_calls();

    backend.display(&format).unwrap();

    let calls = harness.context.calls();
    assert!(calls.contains(&Call::Enable(gl::FRAGMENT_PROGRAM_ARB)));
    assert!(calls.contains(&Call::Disable(gl::FRAGMENT_PROGRAM_ARB)));
    assert!(!calls.contains(&Call::Enable(gl::TEXTURE_2D)));
}

#[test]
fn display_fails_cleanly_when_the_context_is_lost() {
    let harness = Harness::new(RecordingContext::builder());
    let mut format = VideoFormat::new(Chroma::Rv32, 64, 64);
    let backend = harness.backend(&mut format, options(Profile::Generic)).unwrap();
    harness.context.set_fail_acquire(true);
    harness.context.clear_calls();

    assert!(matches!(
        backend.display(&format),
        Err(BackendError::ContextUnavailable(_))
    ));
    assert_eq!(harness.context.calls(), vec![Call::AcquireFailed]);
}

#[test]
fn texture_creation_is_deferred_until_the_context_returns() {
    let harness = Harness::new(RecordingContext::builder());
    let mut format = VideoFormat::new(Chroma::Rv32, 64, 64);
    let mut backend = harness.backend(&mut format, options(Profile::Generic)).unwrap();

    harness.context.set_fail_acquire(true);
    let pool = backend.pool().unwrap();
    assert!(backend.texture_names().is_empty());

    harness.context.set_fail_acquire(false);
    let lease = pool.acquire().unwrap();
    backend.prepare(&lease).unwrap();
    assert_eq!(backend.texture_names().len(), 1);

    let generated = harness
        .context
        .calls()
        .iter()
        .filter(|call| matches!(call, Call::GenTextures(_)))
        .count();
    assert_eq!(generated, 1);
}

#[test]
fn backend_and_leases_cross_threads() {
    fn assert_send<T: Send>() {}
    fn assert_sync<T: Send + Sync>() {}
    assert_send::<DisplayBackend>();
    assert_send::<vout::PictureLease>();
    assert_sync::<PicturePool>();
}
