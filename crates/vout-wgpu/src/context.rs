use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context as AnyhowContext, Result};
use parking_lot::{Condvar, Mutex};
use vout::gl::{self, Gl, GlContext, Primitive, ProcAddress, Quad};
use vout::{ContextError, ProgramEntryPoints};
use wgpu::util::DeviceExt;

use crate::convert::{to_rgba8, Packing};
use crate::device::GpuDevice;
use crate::shader::{QuadPipeline, QuadVertex};

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const EXTENSIONS: &str = "GL_ARB_texture_non_power_of_two";

/// Pixels read back from the render target, rows top to bottom.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RgbaFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

struct TextureImage {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    packing: Packing,
}

struct TextureSlot {
    target: u32,
    filter: u32,
    image: Option<TextureImage>,
}

enum Command {
    Clear(wgpu::Color),
    Draw { texture: u32, quad: Quad },
}

struct GlState {
    next_name: u32,
    slots: HashMap<u32, TextureSlot>,
    bound: HashMap<u32, u32>,
    enabled: HashSet<u32>,
    clear_color: wgpu::Color,
    error: u32,
    commands: Vec<Command>,
}

impl GlState {
    fn new() -> Self {
        Self {
            next_name: 1,
            slots: HashMap::new(),
            bound: HashMap::new(),
            enabled: HashSet::new(),
            clear_color: wgpu::Color::BLACK,
            error: gl::NO_ERROR,
            commands: Vec::new(),
        }
    }

    /// First error wins until read, as in GL.
    fn set_error(&mut self, error: u32) {
        if self.error == gl::NO_ERROR {
            self.error = error;
        }
    }

    fn bound_slot(&mut self, target: u32) -> Option<&mut TextureSlot> {
        let name = *self.bound.get(&target)?;
        self.slots.get_mut(&name)
    }

    fn bound_image(&self, target: u32) -> Option<&TextureImage> {
        let name = self.bound.get(&target)?;
        self.slots.get(name)?.image.as_ref()
    }
}

/// Off-screen render target driven through the `vout` GL command subset.
///
/// Textures are plain RGBA8 wgpu textures; uploads are converted on the CPU.
/// Draws are queued and encoded into one render pass on `swap`.
pub struct WgpuContext {
    gpu: GpuDevice,
    pipeline: QuadPipeline,
    target: wgpu::Texture,
    target_view: wgpu::TextureView,
    width: u32,
    height: u32,
    state: Mutex<GlState>,
    held: Mutex<bool>,
    released: Condvar,
    lost: Arc<AtomicBool>,
}

impl WgpuContext {
    /// Creates a device and a `width` x `height` render target.
    pub fn headless(width: u32, height: u32) -> Result<Self> {
        let lost = Arc::new(AtomicBool::new(false));
        let gpu = GpuDevice::headless(Arc::clone(&lost))?;

        let width = width.max(1);
        let height = height.max(1);
        if width > gpu.max_dimension || height > gpu.max_dimension {
            anyhow::bail!(
                "GPU max texture dimension is {max}, requested target is {width}x{height}",
                max = gpu.max_dimension
            );
        }

        let target = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("vout render target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());
        let pipeline = QuadPipeline::new(&gpu.device, TARGET_FORMAT);

        tracing::debug!(width, height, adapter = %gpu.adapter_info.name, "headless context ready");

        Ok(Self {
            gpu,
            pipeline,
            target,
            target_view,
            width,
            height,
            state: Mutex::new(GlState::new()),
            held: Mutex::new(false),
            released: Condvar::new(),
            lost,
        })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn adapter_name(&self) -> &str {
        &self.gpu.adapter_info.name
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    /// Copies the render target back to the CPU.
    pub fn read_rgba(&self) -> Result<RgbaFrame> {
        let device = &self.gpu.device;
        let row_bytes = self.width * 4;
        let padded_row_bytes = align_to(row_bytes, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("vout readback"),
            size: u64::from(padded_row_bytes) * u64::from(self.height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("vout readback encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row_bytes),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        self.gpu.queue.submit(Some(encoder.finish()));

        let slice = readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });
        device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| anyhow!("wgpu poll failed: {err:?}"))?;
        rx.recv()
            .context("readback channel closed")?
            .map_err(|err| anyhow!("readback map failed: {err:?}"))?;

        let mapped = slice.get_mapped_range();
        let mut pixels = Vec::with_capacity(row_bytes as usize * self.height as usize);
        for row in 0..self.height as usize {
            let start = row * padded_row_bytes as usize;
            pixels.extend_from_slice(&mapped[start..start + row_bytes as usize]);
        }
        drop(mapped);
        readback.unmap();

        Ok(RgbaFrame {
            width: self.width,
            height: self.height,
            pixels,
        })
    }

    fn present(&self) {
        let commands = std::mem::take(&mut self.state.lock().commands);
        let last_clear = commands
            .iter()
            .rposition(|command| matches!(command, Command::Clear(_)));
        let load = match last_clear.map(|index| &commands[index]) {
            Some(Command::Clear(color)) => wgpu::LoadOp::Clear(*color),
            _ => wgpu::LoadOp::Load,
        };
        let pending = &commands[last_clear.map_or(0, |index| index + 1)..];

        let state = self.state.lock();
        let mut vertices = Vec::new();
        let mut bind_groups = Vec::new();
        for command in pending {
            let Command::Draw { texture, quad } = command else {
                continue;
            };
            let Some(slot) = state.slots.get(texture) else {
                continue;
            };
            let Some(image) = &slot.image else {
                continue;
            };
            let scale = if slot.target == gl::TEXTURE_RECTANGLE {
                [image.width as f32, image.height as f32]
            } else {
                [1.0, 1.0]
            };
            vertices.extend(strip_vertices(quad, scale));
            let sampler = if slot.filter == gl::NEAREST {
                &self.pipeline.nearest
            } else {
                &self.pipeline.linear
            };
            bind_groups.push(self.gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("vout frame bind group"),
                layout: &self.pipeline.bind_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&image.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(sampler),
                    },
                ],
            }));
        }
        drop(state);

        let vertex_buffer = (!vertices.is_empty()).then(|| {
            self.gpu
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("vout quad vertices"),
                    contents: bytemuck::cast_slice(&vertices),
                    usage: wgpu::BufferUsages::VERTEX,
                })
        });

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("vout present encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("vout present pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.target_view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            if let Some(buffer) = &vertex_buffer {
                pass.set_pipeline(&self.pipeline.pipeline);
                pass.set_vertex_buffer(0, buffer.slice(..));
                for (index, bind_group) in bind_groups.iter().enumerate() {
                    let first = (index * 4) as u32;
                    pass.set_bind_group(0, bind_group, &[]);
                    pass.draw(first..first + 4, 0..1);
                }
            }
        }
        self.gpu.queue.submit(Some(encoder.finish()));
    }

    fn write_region(
        &self,
        image: &TextureImage,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) {
        let rgba = to_rgba8(image.packing, pixels, width as usize, height as usize);
        self.gpu.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &image.texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x, y, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            &rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }
}

impl GlContext for WgpuContext {
    fn acquire(&self) -> Result<(), ContextError> {
        if self.is_lost() {
            return Err(ContextError::Lost);
        }
        let mut held = self.held.lock();
        while *held {
            self.released.wait(&mut held);
        }
        *held = true;
        Ok(())
    }

    fn release(&self) {
        *self.held.lock() = false;
        self.released.notify_one();
    }

    fn swap(&self) {
        self.present();
    }

    fn proc_address(&self, _name: &str) -> Option<ProcAddress> {
        None
    }

    fn gl(&self) -> &dyn Gl {
        self
    }
}

impl Gl for WgpuContext {
    fn get_string(&self, name: u32) -> Option<String> {
        (name == gl::EXTENSIONS).then(|| EXTENSIONS.to_owned())
    }

    fn get_integer(&self, _pname: u32) -> i32 {
        0
    }

    fn get_error(&self) -> u32 {
        std::mem::replace(&mut self.state.lock().error, gl::NO_ERROR)
    }

    fn enable(&self, cap: u32) {
        self.state.lock().enabled.insert(cap);
    }

    fn disable(&self, cap: u32) {
        self.state.lock().enabled.remove(&cap);
    }

    fn depth_mask(&self, _flag: bool) {}

    fn clear_color(&self, red: f32, green: f32, blue: f32, alpha: f32) {
        self.state.lock().clear_color = wgpu::Color {
            r: f64::from(red),
            g: f64::from(green),
            b: f64::from(blue),
            a: f64::from(alpha),
        };
    }

    fn clear(&self, mask: u32) {
        if mask & gl::COLOR_BUFFER_BIT != 0 {
            let mut state = self.state.lock();
            let color = state.clear_color;
            state.commands.push(Command::Clear(color));
        }
    }

    fn gen_textures(&self, count: usize) -> Vec<u32> {
        let mut state = self.state.lock();
        (0..count)
            .map(|_| {
                let name = state.next_name;
                state.next_name += 1;
                state.slots.insert(
                    name,
                    TextureSlot {
                        target: gl::TEXTURE_2D,
                        filter: gl::LINEAR,
                        image: None,
                    },
                );
                name
            })
            .collect()
    }

    fn delete_textures(&self, textures: &[u32]) {
        let mut state = self.state.lock();
        for name in textures {
            if let Some(TextureSlot {
                image: Some(image), ..
            }) = state.slots.remove(name)
            {
                image.texture.destroy();
            }
            state.bound.retain(|_, bound| *bound != *name);
        }
    }

    fn bind_texture(&self, target: u32, texture: u32) {
        let mut state = self.state.lock();
        match state.slots.get_mut(&texture) {
            Some(slot) => {
                slot.target = target;
                state.bound.insert(target, texture);
            }
            None => state.set_error(gl::INVALID_VALUE),
        }
    }

    fn tex_parameter_i(&self, target: u32, pname: u32, param: i32) {
        let mut state = self.state.lock();
        if matches!(pname, gl::TEXTURE_MIN_FILTER | gl::TEXTURE_MAG_FILTER) {
            if let Some(slot) = state.bound_slot(target) {
                slot.filter = param as u32;
            }
        }
    }

    fn tex_parameter_f(&self, _target: u32, _pname: u32, _param: f32) {}

    fn tex_env_i(&self, _target: u32, _pname: u32, _param: i32) {}

    fn pixel_store_i(&self, _pname: u32, _param: i32) {}

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
        let mut state = self.state.lock();
        let Some(packing) = Packing::from_gl(format, ty) else {
            state.set_error(gl::INVALID_ENUM);
            return;
        };
        if width == 0 || height == 0 || width > self.gpu.max_dimension || height > self.gpu.max_dimension {
            state.set_error(gl::INVALID_VALUE);
            return;
        }
        let texture = self.gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("vout frame texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let image = TextureImage {
            texture,
            view,
            width,
            height,
            packing,
        };
        if let Some(pixels) = pixels {
            if pixels.len() >= packing.region_len(width as usize, height as usize) {
                self.write_region(&image, 0, 0, width, height, pixels);
            } else {
                state.set_error(gl::INVALID_VALUE);
            }
        }

        match state.bound_slot(target) {
            Some(slot) => {
                if let Some(old) = slot.image.replace(image) {
                    old.texture.destroy();
                }
            }
            None => state.set_error(gl::INVALID_OPERATION),
        }
    }

    fn tex_sub_image_2d(
        &self,
        target: u32,
        _level: i32,
        x_offset: i32,
        y_offset: i32,
        width: u32,
        height: u32,
        format: u32,
        ty: u32,
        pixels: &[u8],
    ) {
        let mut state = self.state.lock();
        let error = match state.bound_image(target) {
            None => Some(gl::INVALID_OPERATION),
            Some(image) if Packing::from_gl(format, ty) != Some(image.packing) => {
                Some(gl::INVALID_OPERATION)
            }
            Some(image) => match (u32::try_from(x_offset), u32::try_from(y_offset)) {
                (Ok(x), Ok(y))
                    if x.checked_add(width).is_some_and(|right| right <= image.width)
                        && y.checked_add(height).is_some_and(|bottom| bottom <= image.height)
                        && pixels.len()
                            >= image.packing.region_len(width as usize, height as usize) =>
                {
                    if width > 0 && height > 0 {
                        self.write_region(image, x, y, width, height, pixels);
                    }
                    None
                }
                _ => Some(gl::INVALID_VALUE),
            },
        };
        if let Some(error) = error {
            state.set_error(error);
        }
    }

    fn draw_quad(&self, quad: &Quad) {
        let mut state = self.state.lock();
        let target = [gl::TEXTURE_2D, gl::TEXTURE_RECTANGLE]
            .into_iter()
            .find(|target| state.enabled.contains(target));
        let texture = target.and_then(|target| state.bound.get(&target).copied());
        match texture {
            Some(texture) => state.commands.push(Command::Draw {
                texture,
                quad: *quad,
            }),
            None => tracing::trace!("draw without an enabled texture target skipped"),
        }
    }

    fn finish(&self) {
        if let Err(err) = self.gpu.device.poll(wgpu::PollType::Wait) {
            tracing::warn!(error = ?err, "wgpu poll failed");
        }
    }

    fn flush(&self) {
        self.gpu.queue.submit(std::iter::empty::<wgpu::CommandBuffer>());
    }

    fn gen_program(&self, _entry: &ProgramEntryPoints) -> u32 {
        self.state.lock().set_error(gl::INVALID_OPERATION);
        0
    }

    fn bind_program(&self, _entry: &ProgramEntryPoints, _target: u32, _program: u32) {
        self.state.lock().set_error(gl::INVALID_OPERATION);
    }

    fn program_string(&self, _entry: &ProgramEntryPoints, _target: u32, _format: u32, _source: &[u8]) {
        self.state.lock().set_error(gl::INVALID_OPERATION);
    }

    fn delete_program(&self, _entry: &ProgramEntryPoints, _program: u32) {}
}

fn align_to(value: u32, alignment: u32) -> u32 {
    let mask = alignment - 1;
    (value + mask) & !mask
}

/// Reorders a quad into strip order and scales texel coordinates to 0..1.
pub(crate) fn strip_vertices(quad: &Quad, texel_scale: [f32; 2]) -> [QuadVertex; 4] {
    // Polygon winding (TL, TR, BR, BL) becomes strip order (TL, TR, BL, BR).
    let order = match quad.primitive {
        Primitive::TriangleStrip => [0, 1, 2, 3],
        Primitive::Polygon => [0, 1, 3, 2],
    };
    order.map(|index| QuadVertex {
        position: quad.positions[index],
        uv: [
            quad.tex_coords[index][0] / texel_scale[0],
            quad.tex_coords[index][1] / texel_scale[1],
        ],
    })
}
