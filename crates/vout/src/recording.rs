//! In-memory context and allocator that log every call.
//!
//! Used by this crate's tests and by hosts that want to check how the backend
//! drives a context without a GPU. Both types can share one [`CallLog`] so
//! allocator events interleave with GL commands in issue order.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::alloc::FrameAllocator;
use crate::buffer::StagingBuffer;
use crate::caps::ProgramEntryPoints;
use crate::error::{AllocationError, ContextError};
use crate::format::VideoFormat;
use crate::gl::{self, Gl, GlContext, ProcAddress, Quad};
use crate::picture::{Picture, PictureHooks, PicturePool, Plane};

const PROGRAM_PROCS: [&str; 4] = [
    "glGenProgramsARB",
    "glBindProgramARB",
    "glProgramStringARB",
    "glDeleteProgramsARB",
];

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Acquire,
    AcquireFailed,
    Release,
    Swap,
    GetString(u32),
    GetInteger(u32),
    GetError,
    Enable(u32),
    Disable(u32),
    DepthMask(bool),
    ClearColor([f32; 4]),
    Clear(u32),
    GenTextures(Vec<u32>),
    DeleteTextures(Vec<u32>),
    BindTexture { target: u32, texture: u32 },
    TexParameterI { target: u32, pname: u32, param: i32 },
    TexParameterF { target: u32, pname: u32, param: f32 },
    TexEnvI { target: u32, pname: u32, param: i32 },
    PixelStoreI { pname: u32, param: i32 },
    TexImage2D {
        target: u32,
        width: u32,
        height: u32,
        format: u32,
        ty: u32,
        len: usize,
    },
    TexSubImage2D {
        target: u32,
        width: u32,
        height: u32,
        format: u32,
        ty: u32,
        len: usize,
    },
    DrawQuad(Quad),
    Finish,
    Flush,
    GenProgram(u32),
    BindProgram { target: u32, program: u32 },
    ProgramString { source: String },
    DeleteProgram(u32),
    AllocBuffer(usize),
    FreeBuffer,
    NewPicture { unit: Option<usize> },
    DeletePicture,
    NewPool { pictures: usize, hooks: bool },
    ReleasePool,
}

/// Shared, ordered record of calls.
#[derive(Clone, Debug, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, call: Call) {
        self.0.lock().push(call);
    }

    pub fn snapshot(&self) -> Vec<Call> {
        self.0.lock().clone()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

#[derive(Default)]
pub struct RecordingContextBuilder {
    extensions: Option<String>,
    procs: Vec<String>,
    program_error: Option<(i32, String)>,
    log: Option<CallLog>,
}

impl RecordingContextBuilder {
    pub fn extensions(mut self, extensions: &str) -> Self {
        self.extensions = Some(extensions.to_owned());
        self
    }

    pub fn procs(mut self, names: &[&str]) -> Self {
        self.procs.extend(names.iter().map(|name| (*name).to_owned()));
        self
    }

    /// Resolves every fragment program entry point.
    pub fn program_procs(self) -> Self {
        self.procs(&PROGRAM_PROCS)
    }

    /// Makes every program upload fail with `INVALID_OPERATION`.
    pub fn reject_programs(mut self, position: i32, message: &str) -> Self {
        self.program_error = Some((position, message.to_owned()));
        self
    }

    pub fn log(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn build(self) -> RecordingContext {
        RecordingContext {
            gl: RecordingGl {
                extensions: self.extensions,
                program_error: self.program_error,
                log: self.log.unwrap_or_default(),
                pending_error: AtomicU32::new(gl::NO_ERROR),
                next_name: AtomicU32::new(1),
            },
            procs: self.procs,
            held: Mutex::new(false),
            released: Condvar::new(),
            fail_acquire: AtomicBool::new(false),
        }
    }
}

/// A `GlContext` with no GPU behind it.
pub struct RecordingContext {
    gl: RecordingGl,
    procs: Vec<String>,
    held: Mutex<bool>,
    released: Condvar,
    fail_acquire: AtomicBool,
}

impl RecordingContext {
    pub fn builder() -> RecordingContextBuilder {
        RecordingContextBuilder::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.gl.log.snapshot()
    }

    pub fn log(&self) -> CallLog {
        self.gl.log.clone()
    }

    pub fn clear_calls(&self) {
        self.gl.log.clear();
    }

    /// While set, every `acquire` fails as if the context were lost.
    pub fn set_fail_acquire(&self, fail: bool) {
        self.fail_acquire.store(fail, Ordering::SeqCst);
    }

    pub fn is_acquired(&self) -> bool {
        *self.held.lock()
    }
}

impl GlContext for RecordingContext {
    fn acquire(&self) -> Result<(), ContextError> {
        if self.fail_acquire.load(Ordering::SeqCst) {
            self.gl.log.push(Call::AcquireFailed);
            return Err(ContextError::Unavailable("recording context disabled".into()));
        }
        let mut held = self.held.lock();
        while *held {
            self.released.wait(&mut held);
        }
        *held = true;
        self.gl.log.push(Call::Acquire);
        Ok(())
    }

    fn release(&self) {
        self.gl.log.push(Call::Release);
        *self.held.lock() = false;
        self.released.notify_one();
    }

    fn swap(&self) {
        self.gl.log.push(Call::Swap);
    }

    fn proc_address(&self, name: &str) -> Option<ProcAddress> {
        let index = self.procs.iter().position(|proc| proc == name)?;
        ProcAddress::new(0x1000 + index)
    }

    fn gl(&self) -> &dyn Gl {
        &self.gl
    }
}

struct RecordingGl {
    extensions: Option<String>,
    program_error: Option<(i32, String)>,
    log: CallLog,
    pending_error: AtomicU32,
    next_name: AtomicU32,
}

impl RecordingGl {
    fn next_name(&self) -> u32 {
        self.next_name.fetch_add(1, Ordering::SeqCst)
    }
}

impl Gl for RecordingGl {
    fn get_string(&self, name: u32) -> Option<String> {
        self.log.push(Call::GetString(name));
        match name {
            gl::EXTENSIONS => self.extensions.clone(),
            gl::PROGRAM_ERROR_STRING_ARB => {
                self.program_error.as_ref().map(|(_, message)| message.clone())
            }
            _ => None,
        }
    }

    fn get_integer(&self, pname: u32) -> i32 {
        self.log.push(Call::GetInteger(pname));
        match (pname, &self.program_error) {
            (gl::PROGRAM_ERROR_POSITION_ARB, Some((position, _))) => *position,
            (gl::PROGRAM_ERROR_POSITION_ARB, None) => -1,
            _ => 0,
        }
    }

    fn get_error(&self) -> u32 {
        self.log.push(Call::GetError);
        self.pending_error.swap(gl::NO_ERROR, Ordering::SeqCst)
    }

    fn enable(&self, cap: u32) {
        self.log.push(Call::Enable(cap));
    }

    fn disable(&self, cap: u32) {
        self.log.push(Call::Disable(cap));
    }

    fn depth_mask(&self, flag: bool) {
        self.log.push(Call::DepthMask(flag));
    }

    fn clear_color(&self, red: f32, green: f32, blue: f32, alpha: f32) {
        self.log.push(Call::ClearColor([red, green, blue, alpha]));
    }

    fn clear(&self, mask: u32) {
        self.log.push(Call::Clear(mask));
    }

    fn gen_textures(&self, count: usize) -> Vec<u32> {
        let names: Vec<u32> = (0..count).map(|_| self.next_name()).collect();
        self.log.push(Call::GenTextures(names.clone()));
        names
    }

    fn delete_textures(&self, textures: &[u32]) {
        self.log.push(Call::DeleteTextures(textures.to_vec()));
    }

    fn bind_texture(&self, target: u32, texture: u32) {
        self.log.push(Call::BindTexture { target, texture });
    }

    fn tex_parameter_i(&self, target: u32, pname: u32, param: i32) {
        self.log.push(Call::TexParameterI {
            target,
            pname,
            param,
        });
    }

    fn tex_parameter_f(&self, target: u32, pname: u32, param: f32) {
        self.log.push(Call::TexParameterF {
            target,
            pname,
            param,
        });
    }

    fn tex_env_i(&self, target: u32, pname: u32, param: i32) {
        self.log.push(Call::TexEnvI {
            target,
            pname,
            param,
        });
    }

    fn pixel_store_i(&self, pname: u32, param: i32) {
        self.log.push(Call::PixelStoreI { pname, param });
    }

    fn tex_image_2d(
        &self,
        target: u32,
        _level: i32,
        _internal_format: u32,
        width: u32,
        height: u32,
        format: u32,
        ty: u32,
        pixels: Option<&[u8]>,
    ) {
        self.log.push(Call::TexImage2D {
            target,
            width,
            height,
            format,
            ty,
            len: pixels.map_or(0, <[u8]>::len),
        });
    }

    fn tex_sub_image_2d(
        &self,
        target: u32,
        _level: i32,
        _x_offset: i32,
        _y_offset: i32,
        width: u32,
        height: u32,
        format: u32,
        ty: u32,
        pixels: &[u8],
    ) {
        self.log.push(Call::TexSubImage2D {
            target,
            width,
            height,
            format,
            ty,
            len: pixels.len(),
        });
    }

    fn draw_quad(&self, quad: &Quad) {
        self.log.push(Call::DrawQuad(*quad));
    }

    fn finish(&self) {
        self.log.push(Call::Finish);
    }

    fn flush(&self) {
        self.log.push(Call::Flush);
    }

    fn gen_program(&self, _entry: &ProgramEntryPoints) -> u32 {
        let name = self.next_name();
        self.log.push(Call::GenProgram(name));
        name
    }

    fn bind_program(&self, _entry: &ProgramEntryPoints, target: u32, program: u32) {
        self.log.push(Call::BindProgram { target, program });
    }

    fn program_string(&self, _entry: &ProgramEntryPoints, _target: u32, _format: u32, source: &[u8]) {
        self.log.push(Call::ProgramString {
            source: String::from_utf8_lossy(source).into_owned(),
        });
        if self.program_error.is_some() {
            self.pending_error
                .store(gl::INVALID_OPERATION, Ordering::SeqCst);
        }
    }

    fn delete_program(&self, _entry: &ProgramEntryPoints, program: u32) {
        self.log.push(Call::DeleteProgram(program));
    }
}

/// Which allocator call should fail, counted from zero per call kind.
#[derive(Clone, Copy, Debug, Default)]
struct Failures {
    buffer: Option<usize>,
    picture: Option<usize>,
    pool: bool,
}

/// A `FrameAllocator` that counts live objects and can fail on demand.
#[derive(Debug, Default)]
pub struct RecordingAllocator {
    log: CallLog,
    failures: Mutex<Failures>,
    buffer_attempts: AtomicUsize,
    picture_attempts: AtomicUsize,
    live_buffers: AtomicUsize,
    live_pictures: AtomicUsize,
    pools: AtomicUsize,
}

impl RecordingAllocator {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    /// Fails the `index`-th buffer allocation (once).
    pub fn fail_buffer_at(self, index: usize) -> Self {
        self.failures.lock().buffer = Some(index);
        self
    }

    /// Fails the `index`-th picture construction (once).
    pub fn fail_picture_at(self, index: usize) -> Self {
        self.failures.lock().picture = Some(index);
        self
    }

    /// Fails the next pool assembly (once).
    pub fn fail_pool(self) -> Self {
        self.failures.lock().pool = true;
        self
    }

    pub fn live_buffers(&self) -> usize {
        self.live_buffers.load(Ordering::SeqCst)
    }

    pub fn live_pictures(&self) -> usize {
        self.live_pictures.load(Ordering::SeqCst)
    }

    pub fn buffers_allocated(&self) -> usize {
        self.buffer_attempts.load(Ordering::SeqCst)
    }

    pub fn pools_created(&self) -> usize {
        self.pools.load(Ordering::SeqCst)
    }

    fn take_failure(slot: &mut Option<usize>, attempt: usize) -> bool {
        if *slot == Some(attempt) {
            *slot = None;
            true
        } else {
            false
        }
    }
}

impl FrameAllocator for RecordingAllocator {
    fn alloc_buffer(&self, len: usize) -> Result<Arc<StagingBuffer>, AllocationError> {
        let attempt = self.buffer_attempts.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&mut self.failures.lock().buffer, attempt) {
            return Err(AllocationError::Buffer { len });
        }
        let buffer = StagingBuffer::zeroed(len)?;
        self.live_buffers.fetch_add(1, Ordering::SeqCst);
        self.log.push(Call::AllocBuffer(len));
        Ok(Arc::new(buffer))
    }

    fn free_buffer(&self, buffer: Arc<StagingBuffer>) {
        drop(buffer);
        self.live_buffers.fetch_sub(1, Ordering::SeqCst);
        self.log.push(Call::FreeBuffer);
    }

    fn new_picture(
        &self,
        format: &VideoFormat,
        plane: Plane,
        buffer: Arc<StagingBuffer>,
        unit: Option<usize>,
    ) -> Result<Picture, AllocationError> {
        let attempt = self.picture_attempts.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&mut self.failures.lock().picture, attempt) {
            return Err(AllocationError::Picture);
        }
        self.live_pictures.fetch_add(1, Ordering::SeqCst);
        self.log.push(Call::NewPicture { unit });
        Ok(Picture::new(*format, plane, buffer, unit))
    }

    fn delete_picture(&self, picture: Picture) {
        drop(picture);
        self.live_pictures.fetch_sub(1, Ordering::SeqCst);
        self.log.push(Call::DeletePicture);
    }

    fn new_pool(
        &self,
        pictures: Vec<Picture>,
        hooks: Option<Arc<dyn PictureHooks>>,
    ) -> Result<PicturePool, AllocationError> {
        let fail = std::mem::take(&mut self.failures.lock().pool);
        if fail {
            for picture in pictures {
                self.delete_picture(picture);
            }
            return Err(AllocationError::Pool);
        }
        self.pools.fetch_add(1, Ordering::SeqCst);
        self.log.push(Call::NewPool {
            pictures: pictures.len(),
            hooks: hooks.is_some(),
        });
        Ok(PicturePool::new(pictures, hooks))
    }

    fn release_pool(&self, pool: PicturePool) {
        self.live_pictures.fetch_sub(pool.len(), Ordering::SeqCst);
        self.log.push(Call::ReleasePool);
        drop(pool);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::ContextGuard;

    #[test]
    fn guard_records_acquire_and_release() {
        let context = RecordingContext::builder().build();
        {
            let guard = ContextGuard::acquire(&context).unwrap();
            assert!(context.is_acquired());
            guard.clear(gl::COLOR_BUFFER_BIT);
        }
        assert!(!context.is_acquired());
        assert_eq!(
            context.calls(),
            vec![Call::Acquire, Call::Clear(gl::COLOR_BUFFER_BIT), Call::Release]
        );
    }

    #[test]
    fn disabled_context_refuses_acquisition() {
        let context = RecordingContext::builder().build();
        context.set_fail_acquire(true);
        assert!(ContextGuard::acquire(&context).is_err());
        assert_eq!(context.calls(), vec![Call::AcquireFailed]);
    }

    #[test]
    fn acquisition_is_exclusive_across_threads() {
        let context = Arc::new(RecordingContext::builder().build());
        let guard = ContextGuard::acquire(&*context).unwrap();
        let other = Arc::clone(&context);
        let waiter = std::thread::spawn(move || {
            let _guard = ContextGuard::acquire(&*other).unwrap();
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!waiter.is_finished());
        drop(guard);
        waiter.join().unwrap();
        assert_eq!(
            context.calls(),
            vec![Call::Acquire, Call::Release, Call::Acquire, Call::Release]
        );
    }

    #[test]
    fn allocator_failures_fire_once() {
        let allocator = RecordingAllocator::new(CallLog::new()).fail_buffer_at(1);
        let first = allocator.alloc_buffer(16).unwrap();
        assert!(allocator.alloc_buffer(16).is_err());
        let third = allocator.alloc_buffer(16).unwrap();
        assert_eq!(allocator.live_buffers(), 2);
        allocator.free_buffer(first);
        allocator.free_buffer(third);
        assert_eq!(allocator.live_buffers(), 0);
    }
}
