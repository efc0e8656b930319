// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The seam between the command core and a native graphics backend.

Everything above this module is backend-agnostic: the executor, the resource
lifecycle, and the work queue speak only in terms of [`Backend`] calls and the
small value types defined here.  Everything below it is mechanical translation
to a concrete API (see [`crate::gl`] for the function-pointer-table backend).

Two invariants are enforced structurally rather than by this trait:

* Only the execution thread ever holds the backend.  The `Box<dyn Backend>` is
  moved into the thread at device construction and never leaves it.
* The native context is made current exactly once, by the execution thread,
  through the [`ContextProvider`] before the first backend call.

Backend calls are therefore `&mut self` and need no internal locking.

Creation calls return `Result` because resource creation can fail in ways the
caller must observe (shader compile errors, exhausted memory).  State-setting
and drawing calls are infallible at the trait level; failures there are
detected through [`Backend::last_error`], which the executor polls after each
call in debug builds only.
*/

use crate::error::Error;

/// An opaque native object name.  `0` is never a valid handle.
pub type NativeHandle = u64;

/// Capabilities reported by a backend.
///
/// Optional fast paths are gated on these; when a flag is false the executor
/// silently falls back to a staged round trip (or skips purely diagnostic
/// work).  Flags never affect observable results, only the route taken.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendFeatures {
    /// Direct copies between buffer objects.
    pub copy_buffer: bool,
    /// Direct image-to-image copies without an intermediate readback.
    pub copy_image: bool,
    /// Framebuffer blit, used for multisample resolve.
    pub framebuffer_blit: bool,
    /// Immutable texture storage allocation.
    pub texture_storage: bool,
    /// Compute pipelines and dispatch.
    pub compute_shaders: bool,
    /// Named debug groups, markers, and object labels.
    pub debug_output: bool,
}

/// How a mapped resource may be accessed through the returned pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapMode {
    Read,
    Write,
    ReadWrite,
}

impl MapMode {
    pub fn can_read(self) -> bool {
        matches!(self, MapMode::Read | MapMode::ReadWrite)
    }
    pub fn can_write(self) -> bool {
        matches!(self, MapMode::Write | MapMode::ReadWrite)
    }
}

/// Buffer usage flags.  Combine with `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferUsage(pub u32);

impl BufferUsage {
    pub const VERTEX: BufferUsage = BufferUsage(1 << 0);
    pub const INDEX: BufferUsage = BufferUsage(1 << 1);
    pub const UNIFORM: BufferUsage = BufferUsage(1 << 2);
    pub const STORAGE: BufferUsage = BufferUsage(1 << 3);
    pub const STAGING: BufferUsage = BufferUsage(1 << 4);

    pub fn contains(self, other: BufferUsage) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for BufferUsage {
    type Output = BufferUsage;
    fn bitor(self, rhs: BufferUsage) -> BufferUsage {
        BufferUsage(self.0 | rhs.0)
    }
}

/// Uncompressed pixel formats understood by the core.
///
/// Full format translation lives with the backend; the core only needs sizes
/// for pitch math and staging allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    R8Unorm,
    Rg8Unorm,
    Rgba8Unorm,
    Bgra8Unorm,
    Rgba32Float,
    Depth32Float,
    Depth24Stencil8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::R8Unorm => 1,
            PixelFormat::Rg8Unorm => 2,
            PixelFormat::Rgba8Unorm | PixelFormat::Bgra8Unorm => 4,
            PixelFormat::Rgba32Float => 16,
            PixelFormat::Depth32Float | PixelFormat::Depth24Stencil8 => 4,
        }
    }

    pub fn has_depth(self) -> bool {
        matches!(
            self,
            PixelFormat::Depth32Float | PixelFormat::Depth24Stencil8
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDescriptor {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub format: PixelFormat,
    pub sample_count: u32,
}

impl TextureDescriptor {
    /// A 2D single-sample texture with one mip and one layer.
    pub fn d2(width: u32, height: u32, format: PixelFormat) -> TextureDescriptor {
        TextureDescriptor {
            width,
            height,
            depth: 1,
            mip_levels: 1,
            array_layers: 1,
            format,
            sample_count: 1,
        }
    }
}

/// A region within one mip level of one array layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureRegion {
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_level: u32,
    pub array_layer: u32,
}

impl TextureRegion {
    /// The full extent of mip level 0, layer 0.
    pub fn full(desc: &TextureDescriptor) -> TextureRegion {
        TextureRegion {
            x: 0,
            y: 0,
            z: 0,
            width: desc.width,
            height: desc.height,
            depth: desc.depth,
            mip_level: 0,
            array_layer: 0,
        }
    }

    pub fn byte_len(&self, format: PixelFormat) -> u64 {
        self.width as u64 * self.height as u64 * self.depth as u64
            * format.bytes_per_pixel() as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    U16,
    U32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    Repeat,
    MirrorRepeat,
    ClampToEdge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerDescriptor {
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    pub address_mode: AddressMode,
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        SamplerDescriptor {
            min_filter: FilterMode::Linear,
            mag_filter: FilterMode::Linear,
            address_mode: AddressMode::ClampToEdge,
        }
    }
}

/// The kind of native object a handle refers to, for label application and
/// destruction dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Buffer,
    Texture,
    Framebuffer,
    Shader,
    Pipeline,
    Sampler,
}

/// The set of native calls the command core issues.
///
/// By construction only the execution thread calls these; implementations need
/// not be internally synchronized, but must be `Send` so the backend can be
/// moved into that thread at device construction.
pub trait Backend: Send {
    fn features(&self) -> BackendFeatures;

    /// Returns and clears the native error flag.  `0` means no error.
    fn last_error(&mut self) -> u32;

    // --- buffers ---

    fn create_buffer(&mut self, size: u64, usage: BufferUsage) -> Result<NativeHandle, Error>;
    fn destroy_buffer(&mut self, handle: NativeHandle);
    fn update_buffer(&mut self, handle: NativeHandle, offset: u64, data: &[u8]);
    fn read_buffer(&mut self, handle: NativeHandle, offset: u64, into: &mut [u8]);
    fn copy_buffer(
        &mut self,
        src: NativeHandle,
        dst: NativeHandle,
        src_offset: u64,
        dst_offset: u64,
        len: u64,
    );
    fn map_buffer(
        &mut self,
        handle: NativeHandle,
        mode: MapMode,
        offset: u64,
        size: u64,
    ) -> Result<*mut u8, Error>;
    /// Returns false if the mapped range was corrupted, per the native API.
    fn unmap_buffer(&mut self, handle: NativeHandle) -> bool;

    // --- textures ---

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<NativeHandle, Error>;
    fn destroy_texture(&mut self, handle: NativeHandle);
    fn update_texture(
        &mut self,
        handle: NativeHandle,
        desc: &TextureDescriptor,
        region: &TextureRegion,
        data: &[u8],
    );
    fn read_texture(
        &mut self,
        handle: NativeHandle,
        desc: &TextureDescriptor,
        region: &TextureRegion,
        into: &mut [u8],
    );
    /// Direct image copy.  Only called when [`BackendFeatures::copy_image`] is set.
    fn copy_texture(
        &mut self,
        src: NativeHandle,
        src_region: &TextureRegion,
        dst: NativeHandle,
        dst_origin: (u32, u32, u32),
        dst_mip_level: u32,
        dst_array_layer: u32,
    );
    fn generate_mipmaps(&mut self, handle: NativeHandle);
    /// Multisample resolve.  Only called when [`BackendFeatures::framebuffer_blit`] is set.
    fn resolve_texture(&mut self, src: NativeHandle, dst: NativeHandle, width: u32, height: u32);

    // --- framebuffers ---

    fn create_framebuffer(
        &mut self,
        color_targets: &[NativeHandle],
        depth_target: Option<NativeHandle>,
    ) -> Result<NativeHandle, Error>;
    fn destroy_framebuffer(&mut self, handle: NativeHandle);
    /// `0` binds the default (swapchain) framebuffer.
    fn bind_framebuffer(&mut self, handle: NativeHandle);

    // --- shaders and pipelines ---

    fn create_shader(&mut self, stage: ShaderStage, source: &[u8]) -> Result<NativeHandle, Error>;
    fn destroy_shader(&mut self, handle: NativeHandle);
    fn create_pipeline(&mut self, shaders: &[NativeHandle]) -> Result<NativeHandle, Error>;
    fn destroy_pipeline(&mut self, handle: NativeHandle);
    fn bind_pipeline(&mut self, handle: NativeHandle);

    // --- samplers ---

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> Result<NativeHandle, Error>;
    fn destroy_sampler(&mut self, handle: NativeHandle);

    // --- binding ---

    fn bind_uniform_buffer(&mut self, slot: u32, handle: NativeHandle, offset: u64, size: u64);
    fn bind_storage_buffer(&mut self, slot: u32, handle: NativeHandle, offset: u64, size: u64);
    fn bind_texture(&mut self, unit: u32, handle: NativeHandle);
    /// Read-write texture binding (image unit).
    fn bind_image(&mut self, unit: u32, handle: NativeHandle, writable: bool);
    fn bind_sampler(&mut self, unit: u32, handle: NativeHandle);
    fn bind_vertex_buffer(&mut self, slot: u32, handle: NativeHandle, stride: u32, offset: u64);
    fn bind_index_buffer(&mut self, handle: NativeHandle, format: IndexFormat);

    // --- fixed state, clears, draws ---

    fn set_viewport(&mut self, index: u32, viewport: &Viewport);
    fn set_scissor(&mut self, index: u32, rect: &ScissorRect);
    fn clear_color(&mut self, target: u32, rgba: [f32; 4]);
    fn clear_depth_stencil(&mut self, depth: f32, stencil: u8);
    fn draw(
        &mut self,
        topology: PrimitiveTopology,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );
    #[allow(clippy::too_many_arguments)]
    fn draw_indexed(
        &mut self,
        topology: PrimitiveTopology,
        index_format: IndexFormat,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32);

    // --- diagnostics and synchronization ---

    fn set_label(&mut self, kind: ObjectKind, handle: NativeHandle, name: &str);
    fn push_debug_group(&mut self, name: &str);
    fn pop_debug_group(&mut self);
    fn insert_debug_marker(&mut self, name: &str);
    fn flush(&mut self);
    fn finish(&mut self);
}

/// Window-system integration supplied by the embedder.
///
/// The core never constructs one of these; it receives the provider fully
/// built at device construction and drives it exclusively from the execution
/// thread.  `make_current` is called once before any [`Backend`] call, and
/// `delete` once after the last.
pub trait ContextProvider: Send {
    fn make_current(&mut self) -> Result<(), Error>;
    fn clear_current(&mut self);
    fn swap_buffers(&mut self) -> Result<(), Error>;
    fn set_vsync(&mut self, enabled: bool);
    fn resize(&mut self, _width: u32, _height: u32) {}
    fn delete(&mut self);
}
