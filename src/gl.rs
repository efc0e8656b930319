// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The OpenGL rendition of [`Backend`].

A [`GlBackend`] wraps a [`procs::ProcTable`] loaded by name through an
embedder-supplied callback.  Construction validates the entry points the
backend cannot run without and derives the capability flags from which
optional entry points loaded; nothing native is called until the execution
thread owns the context.

Buffers are manipulated through the copy-read/copy-write scratch targets so
data transfer never disturbs the draw-state bindings.  A single shared vertex
array object holds the element and vertex buffer bindings.
*/

use crate::backend::{
    Backend, BackendFeatures, BufferUsage, IndexFormat, MapMode, NativeHandle, ObjectKind,
    PixelFormat, PrimitiveTopology, SamplerDescriptor, ScissorRect, ShaderStage,
    TextureDescriptor, TextureRegion, Viewport,
};
use crate::error::Error;
use std::collections::HashMap;
use std::ffi::c_void;

mod procs;

use procs::{GLchar, GLenum, GLint, GLsizei, GLuint, ProcTable};

const ELEMENT_ARRAY_BUFFER: GLenum = 0x8893;
const UNIFORM_BUFFER: GLenum = 0x8A11;
const SHADER_STORAGE_BUFFER: GLenum = 0x90D2;
const COPY_READ_BUFFER: GLenum = 0x8F36;
const COPY_WRITE_BUFFER: GLenum = 0x8F37;
const STATIC_DRAW: GLenum = 0x88E4;
const DYNAMIC_DRAW: GLenum = 0x88E8;

const TEXTURE_2D: GLenum = 0x0DE1;
const TEXTURE_3D: GLenum = 0x806F;
const TEXTURE_2D_ARRAY: GLenum = 0x8C1A;
const TEXTURE0: GLenum = 0x84C0;
const TEXTURE_MIN_FILTER: GLenum = 0x2801;
const TEXTURE_MAG_FILTER: GLenum = 0x2800;
const TEXTURE_WRAP_S: GLenum = 0x2802;
const TEXTURE_WRAP_T: GLenum = 0x2803;
const TEXTURE_WRAP_R: GLenum = 0x8072;
const TEXTURE_MAX_LEVEL: GLenum = 0x813D;
const NEAREST: GLint = 0x2600;
const LINEAR: GLint = 0x2601;
const LINEAR_MIPMAP_LINEAR: GLint = 0x2703;
const REPEAT: GLint = 0x2901;
const MIRRORED_REPEAT: GLint = 0x8370;
const CLAMP_TO_EDGE: GLint = 0x812F;

const FRAMEBUFFER: GLenum = 0x8D40;
const READ_FRAMEBUFFER: GLenum = 0x8CA8;
const DRAW_FRAMEBUFFER: GLenum = 0x8CA9;
const COLOR_ATTACHMENT0: GLenum = 0x8CE0;
const DEPTH_ATTACHMENT: GLenum = 0x8D00;
const DEPTH_STENCIL_ATTACHMENT: GLenum = 0x821A;
const FRAMEBUFFER_COMPLETE: GLenum = 0x8CD5;
const COLOR_BUFFER_BIT: GLenum = 0x4000;
const NEAREST_FILTER: GLenum = 0x2600;

const VERTEX_SHADER: GLenum = 0x8B31;
const FRAGMENT_SHADER: GLenum = 0x8B30;
const COMPUTE_SHADER: GLenum = 0x91B9;
const COMPILE_STATUS: GLenum = 0x8B81;
const LINK_STATUS: GLenum = 0x8B82;
const INFO_LOG_LENGTH: GLenum = 0x8B84;

const UNPACK_ALIGNMENT: GLenum = 0x0CF5;
const PACK_ALIGNMENT: GLenum = 0x0D05;

const MAP_READ_BIT: GLenum = 0x0001;
const MAP_WRITE_BIT: GLenum = 0x0002;

const POINTS: GLenum = 0x0000;
const LINES: GLenum = 0x0001;
const LINE_STRIP: GLenum = 0x0003;
const TRIANGLES: GLenum = 0x0004;
const TRIANGLE_STRIP: GLenum = 0x0005;
const UNSIGNED_SHORT: GLenum = 0x1403;
const UNSIGNED_INT: GLenum = 0x1405;

const R8: GLenum = 0x8229;
const RG8: GLenum = 0x822B;
const RGBA8: GLenum = 0x8058;
const RGBA32F: GLenum = 0x8814;
const DEPTH_COMPONENT32F: GLenum = 0x8CAC;
const DEPTH24_STENCIL8: GLenum = 0x88F0;
const RED: GLenum = 0x1903;
const RG: GLenum = 0x8227;
const RGBA: GLenum = 0x1908;
const BGRA: GLenum = 0x80E1;
const DEPTH_COMPONENT: GLenum = 0x1902;
const DEPTH_STENCIL: GLenum = 0x84F9;
const UNSIGNED_BYTE: GLenum = 0x1401;
const FLOAT: GLenum = 0x1406;
const UNSIGNED_INT_24_8: GLenum = 0x84FA;

const COLOR: GLenum = 0x1800;

const READ_WRITE: GLenum = 0x88BA;
const READ_ONLY: GLenum = 0x88B8;

const DEBUG_SOURCE_APPLICATION: GLenum = 0x824A;
const DEBUG_TYPE_MARKER: GLenum = 0x8268;
const DEBUG_SEVERITY_NOTIFICATION: GLenum = 0x826B;

const LABEL_BUFFER: GLenum = 0x82E0;
const LABEL_SHADER: GLenum = 0x82E1;
const LABEL_PROGRAM: GLenum = 0x82E2;
const LABEL_SAMPLER: GLenum = 0x82E6;
const LABEL_TEXTURE: GLenum = 0x1702;
const LABEL_FRAMEBUFFER: GLenum = 0x8D40;

/// Invokes a loaded entry point.  Only used for entry points that either were
/// validated at construction or are feature-gated by the caller; a missing
/// pointer makes the call a no-op rather than a crash.
macro_rules! call {
    ($self:ident, $name:ident $(, $arg:expr)* $(,)?) => {
        match $self.procs.$name {
            Some(f) => unsafe { f($($arg),*) },
            None => Default::default(),
        }
    };
}

#[derive(Clone, Copy)]
struct TextureInfo {
    target: GLenum,
    format: PixelFormat,
    array: bool,
}

pub struct GlBackend {
    procs: ProcTable,
    features: BackendFeatures,
    textures: HashMap<GLuint, TextureInfo>,
    vao: GLuint,
    read_fbo: GLuint,
    draw_fbo: GLuint,
}

impl GlBackend {
    /// Resolves the entry-point table through `loader` and checks the
    /// required subset loaded.  Makes no native calls.
    pub fn load(loader: &mut dyn FnMut(&str) -> *const c_void) -> Result<GlBackend, Error> {
        let procs = ProcTable::load(loader);
        procs.validate()?;
        let features = BackendFeatures {
            copy_buffer: procs.CopyBufferSubData.is_some(),
            copy_image: procs.CopyImageSubData.is_some(),
            framebuffer_blit: procs.BlitFramebuffer.is_some(),
            texture_storage: procs.TexStorage2D.is_some() && procs.TexStorage3D.is_some(),
            compute_shaders: procs.DispatchCompute.is_some() && procs.BindImageTexture.is_some(),
            debug_output: procs.ObjectLabel.is_some()
                && procs.PushDebugGroup.is_some()
                && procs.PopDebugGroup.is_some(),
        };
        logwise::info_sync!(
            "loaded gl entry points, features {features}",
            features = logwise::privacy::LogIt(&features)
        );
        Ok(GlBackend {
            procs,
            features,
            textures: HashMap::new(),
            vao: 0,
            read_fbo: 0,
            draw_fbo: 0,
        })
    }

    fn native_error(&mut self, context: &'static str) -> Error {
        let code = call!(self, GetError);
        Error::Native { code, context }
    }

    fn ensure_vao(&mut self) {
        if self.vao == 0 {
            let mut vao: GLuint = 0;
            call!(self, GenVertexArrays, 1, &mut vao);
            self.vao = vao;
        }
        call!(self, BindVertexArray, self.vao);
    }

    fn ensure_scratch_fbos(&mut self) {
        if self.read_fbo == 0 {
            let mut fbos = [0 as GLuint; 2];
            call!(self, GenFramebuffers, 2, fbos.as_mut_ptr());
            self.read_fbo = fbos[0];
            self.draw_fbo = fbos[1];
        }
    }

    fn texture_info(&self, handle: NativeHandle) -> TextureInfo {
        self.textures
            .get(&(handle as GLuint))
            .copied()
            .unwrap_or(TextureInfo {
                target: TEXTURE_2D,
                format: PixelFormat::Rgba8Unorm,
                array: false,
            })
    }

    fn attach_for_read(&mut self, info: TextureInfo, handle: GLuint, mip: GLint, layer: GLint) {
        let attachment = if info.format.has_depth() {
            if info.format == PixelFormat::Depth24Stencil8 {
                DEPTH_STENCIL_ATTACHMENT
            } else {
                DEPTH_ATTACHMENT
            }
        } else {
            COLOR_ATTACHMENT0
        };
        if info.array || info.target == TEXTURE_3D {
            call!(
                self,
                FramebufferTextureLayer,
                READ_FRAMEBUFFER,
                attachment,
                handle,
                mip,
                layer
            );
        } else {
            call!(
                self,
                FramebufferTexture2D,
                READ_FRAMEBUFFER,
                attachment,
                info.target,
                handle,
                mip
            );
        }
    }
}

fn target_for(desc: &TextureDescriptor) -> GLenum {
    if desc.depth > 1 {
        TEXTURE_3D
    } else if desc.array_layers > 1 {
        TEXTURE_2D_ARRAY
    } else {
        TEXTURE_2D
    }
}

/// (internal format, pixel format, component type)
fn gl_format(format: PixelFormat) -> (GLenum, GLenum, GLenum) {
    match format {
        PixelFormat::R8Unorm => (R8, RED, UNSIGNED_BYTE),
        PixelFormat::Rg8Unorm => (RG8, RG, UNSIGNED_BYTE),
        PixelFormat::Rgba8Unorm => (RGBA8, RGBA, UNSIGNED_BYTE),
        PixelFormat::Bgra8Unorm => (RGBA8, BGRA, UNSIGNED_BYTE),
        PixelFormat::Rgba32Float => (RGBA32F, RGBA, FLOAT),
        PixelFormat::Depth32Float => (DEPTH_COMPONENT32F, DEPTH_COMPONENT, FLOAT),
        PixelFormat::Depth24Stencil8 => (DEPTH24_STENCIL8, DEPTH_STENCIL, UNSIGNED_INT_24_8),
    }
}

fn gl_topology(topology: PrimitiveTopology) -> GLenum {
    match topology {
        PrimitiveTopology::PointList => POINTS,
        PrimitiveTopology::LineList => LINES,
        PrimitiveTopology::LineStrip => LINE_STRIP,
        PrimitiveTopology::TriangleList => TRIANGLES,
        PrimitiveTopology::TriangleStrip => TRIANGLE_STRIP,
    }
}

fn gl_shader_stage(stage: ShaderStage) -> GLenum {
    match stage {
        ShaderStage::Vertex => VERTEX_SHADER,
        ShaderStage::Fragment => FRAGMENT_SHADER,
        ShaderStage::Compute => COMPUTE_SHADER,
    }
}

fn gl_filter(filter: crate::backend::FilterMode) -> GLint {
    match filter {
        crate::backend::FilterMode::Nearest => NEAREST,
        crate::backend::FilterMode::Linear => LINEAR,
    }
}

fn gl_address(mode: crate::backend::AddressMode) -> GLint {
    match mode {
        crate::backend::AddressMode::Repeat => REPEAT,
        crate::backend::AddressMode::MirrorRepeat => MIRRORED_REPEAT,
        crate::backend::AddressMode::ClampToEdge => CLAMP_TO_EDGE,
    }
}

fn gl_label_kind(kind: ObjectKind) -> GLenum {
    match kind {
        ObjectKind::Buffer => LABEL_BUFFER,
        ObjectKind::Texture => LABEL_TEXTURE,
        ObjectKind::Framebuffer => LABEL_FRAMEBUFFER,
        ObjectKind::Shader => LABEL_SHADER,
        ObjectKind::Pipeline => LABEL_PROGRAM,
        ObjectKind::Sampler => LABEL_SAMPLER,
    }
}

fn gl_index_format(format: IndexFormat) -> (GLenum, u64) {
    match format {
        IndexFormat::U16 => (UNSIGNED_SHORT, 2),
        IndexFormat::U32 => (UNSIGNED_INT, 4),
    }
}

impl Backend for GlBackend {
    fn features(&self) -> BackendFeatures {
        self.features
    }

    fn last_error(&mut self) -> u32 {
        call!(self, GetError)
    }

    fn create_buffer(&mut self, size: u64, usage: BufferUsage) -> Result<NativeHandle, Error> {
        let mut id: GLuint = 0;
        call!(self, GenBuffers, 1, &mut id);
        if id == 0 {
            return Err(self.native_error("create_buffer"));
        }
        let hint = if usage.contains(BufferUsage::STAGING) || usage.contains(BufferUsage::UNIFORM)
        {
            DYNAMIC_DRAW
        } else {
            STATIC_DRAW
        };
        call!(self, BindBuffer, COPY_WRITE_BUFFER, id);
        call!(
            self,
            BufferData,
            COPY_WRITE_BUFFER,
            size as isize,
            std::ptr::null(),
            hint
        );
        Ok(id as NativeHandle)
    }

    fn destroy_buffer(&mut self, handle: NativeHandle) {
        let id = handle as GLuint;
        call!(self, DeleteBuffers, 1, &id);
    }

    fn update_buffer(&mut self, handle: NativeHandle, offset: u64, data: &[u8]) {
        call!(self, BindBuffer, COPY_WRITE_BUFFER, handle as GLuint);
        call!(
            self,
            BufferSubData,
            COPY_WRITE_BUFFER,
            offset as isize,
            data.len() as isize,
            data.as_ptr() as *const c_void
        );
    }

    fn read_buffer(&mut self, handle: NativeHandle, offset: u64, into: &mut [u8]) {
        call!(self, BindBuffer, COPY_READ_BUFFER, handle as GLuint);
        call!(
            self,
            GetBufferSubData,
            COPY_READ_BUFFER,
            offset as isize,
            into.len() as isize,
            into.as_mut_ptr() as *mut c_void
        );
    }

    fn copy_buffer(
        &mut self,
        src: NativeHandle,
        dst: NativeHandle,
        src_offset: u64,
        dst_offset: u64,
        len: u64,
    ) {
        call!(self, BindBuffer, COPY_READ_BUFFER, src as GLuint);
        call!(self, BindBuffer, COPY_WRITE_BUFFER, dst as GLuint);
        call!(
            self,
            CopyBufferSubData,
            COPY_READ_BUFFER,
            COPY_WRITE_BUFFER,
            src_offset as isize,
            dst_offset as isize,
            len as isize
        );
    }

    fn map_buffer(
        &mut self,
        handle: NativeHandle,
        mode: MapMode,
        offset: u64,
        size: u64,
    ) -> Result<*mut u8, Error> {
        let mut access = 0;
        if mode.can_read() {
            access |= MAP_READ_BIT;
        }
        if mode.can_write() {
            access |= MAP_WRITE_BIT;
        }
        call!(self, BindBuffer, COPY_WRITE_BUFFER, handle as GLuint);
        let ptr = match self.procs.MapBufferRange {
            Some(f) => unsafe {
                f(COPY_WRITE_BUFFER, offset as isize, size as isize, access)
            },
            None => std::ptr::null_mut(),
        };
        if ptr.is_null() {
            return Err(self.native_error("map_buffer"));
        }
        Ok(ptr as *mut u8)
    }

    fn unmap_buffer(&mut self, handle: NativeHandle) -> bool {
        call!(self, BindBuffer, COPY_WRITE_BUFFER, handle as GLuint);
        call!(self, UnmapBuffer, COPY_WRITE_BUFFER) != 0
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<NativeHandle, Error> {
        let mut id: GLuint = 0;
        call!(self, GenTextures, 1, &mut id);
        if id == 0 {
            return Err(self.native_error("create_texture"));
        }
        let target = target_for(desc);
        let (internal, format, ty) = gl_format(desc.format);
        call!(self, BindTexture, target, id);
        let depth_or_layers = desc.depth.max(desc.array_layers) as GLsizei;
        if self.features.texture_storage {
            if target == TEXTURE_2D {
                call!(
                    self,
                    TexStorage2D,
                    target,
                    desc.mip_levels as GLsizei,
                    internal,
                    desc.width as GLsizei,
                    desc.height as GLsizei
                );
            } else {
                call!(
                    self,
                    TexStorage3D,
                    target,
                    desc.mip_levels as GLsizei,
                    internal,
                    desc.width as GLsizei,
                    desc.height as GLsizei,
                    depth_or_layers
                );
            }
        } else {
            for mip in 0..desc.mip_levels {
                let w = (desc.width >> mip).max(1) as GLsizei;
                let h = (desc.height >> mip).max(1) as GLsizei;
                if target == TEXTURE_2D {
                    call!(
                        self,
                        TexImage2D,
                        target,
                        mip as GLint,
                        internal as GLint,
                        w,
                        h,
                        0,
                        format,
                        ty,
                        std::ptr::null()
                    );
                } else {
                    let d = if target == TEXTURE_3D {
                        ((desc.depth >> mip).max(1)) as GLsizei
                    } else {
                        depth_or_layers
                    };
                    call!(
                        self,
                        TexImage3D,
                        target,
                        mip as GLint,
                        internal as GLint,
                        w,
                        h,
                        d,
                        0,
                        format,
                        ty,
                        std::ptr::null()
                    );
                }
            }
        }
        call!(
            self,
            TexParameteri,
            target,
            TEXTURE_MAX_LEVEL,
            (desc.mip_levels - 1) as GLint
        );
        let min_filter = if desc.mip_levels > 1 {
            LINEAR_MIPMAP_LINEAR
        } else {
            LINEAR
        };
        call!(self, TexParameteri, target, TEXTURE_MIN_FILTER, min_filter);
        call!(self, TexParameteri, target, TEXTURE_MAG_FILTER, LINEAR);
        self.textures.insert(
            id,
            TextureInfo {
                target,
                format: desc.format,
                array: desc.array_layers > 1,
            },
        );
        Ok(id as NativeHandle)
    }

    fn destroy_texture(&mut self, handle: NativeHandle) {
        let id = handle as GLuint;
        self.textures.remove(&id);
        call!(self, DeleteTextures, 1, &id);
    }

    fn update_texture(
        &mut self,
        handle: NativeHandle,
        _desc: &TextureDescriptor,
        region: &TextureRegion,
        data: &[u8],
    ) {
        let info = self.texture_info(handle);
        call!(self, BindTexture, info.target, handle as GLuint);
        call!(self, PixelStorei, UNPACK_ALIGNMENT, 1);
        let (_, format, ty) = gl_format(info.format);
        if info.target == TEXTURE_2D {
            call!(
                self,
                TexSubImage2D,
                info.target,
                region.mip_level as GLint,
                region.x as GLint,
                region.y as GLint,
                region.width as GLsizei,
                region.height as GLsizei,
                format,
                ty,
                data.as_ptr() as *const c_void
            );
        } else {
            //for array targets the layer rides in the z coordinate
            let (z, depth) = if info.array {
                (region.array_layer as GLint, 1 as GLsizei)
            } else {
                (region.z as GLint, region.depth as GLsizei)
            };
            call!(
                self,
                TexSubImage3D,
                info.target,
                region.mip_level as GLint,
                region.x as GLint,
                region.y as GLint,
                z,
                region.width as GLsizei,
                region.height as GLsizei,
                depth,
                format,
                ty,
                data.as_ptr() as *const c_void
            );
        }
    }

    fn read_texture(
        &mut self,
        handle: NativeHandle,
        _desc: &TextureDescriptor,
        region: &TextureRegion,
        into: &mut [u8],
    ) {
        let info = self.texture_info(handle);
        let (_, format, ty) = gl_format(info.format);
        call!(self, PixelStorei, PACK_ALIGNMENT, 1);
        if self.procs.GetTextureSubImage.is_some() {
            let (z, depth) = if info.array {
                (region.array_layer as GLint, 1 as GLsizei)
            } else {
                (region.z as GLint, region.depth as GLsizei)
            };
            call!(
                self,
                GetTextureSubImage,
                handle as GLuint,
                region.mip_level as GLint,
                region.x as GLint,
                region.y as GLint,
                z,
                region.width as GLsizei,
                region.height as GLsizei,
                depth,
                format,
                ty,
                into.len() as GLsizei,
                into.as_mut_ptr() as *mut c_void
            );
            return;
        }
        //fallback: attach to a scratch framebuffer and read pixels
        self.ensure_scratch_fbos();
        call!(self, BindFramebuffer, READ_FRAMEBUFFER, self.read_fbo);
        self.attach_for_read(
            info,
            handle as GLuint,
            region.mip_level as GLint,
            region.array_layer as GLint,
        );
        call!(
            self,
            ReadPixels,
            region.x as GLint,
            region.y as GLint,
            region.width as GLsizei,
            region.height as GLsizei,
            format,
            ty,
            into.as_mut_ptr() as *mut c_void
        );
        call!(self, BindFramebuffer, READ_FRAMEBUFFER, 0);
    }

    fn copy_texture(
        &mut self,
        src: NativeHandle,
        src_region: &TextureRegion,
        dst: NativeHandle,
        dst_origin: (u32, u32, u32),
        dst_mip_level: u32,
        dst_array_layer: u32,
    ) {
        let src_info = self.texture_info(src);
        let dst_info = self.texture_info(dst);
        let (src_z, depth) = if src_info.array {
            (src_region.array_layer, 1)
        } else {
            (src_region.z, src_region.depth)
        };
        let dst_z = if dst_info.array {
            dst_array_layer
        } else {
            dst_origin.2
        };
        call!(
            self,
            CopyImageSubData,
            src as GLuint,
            src_info.target,
            src_region.mip_level as GLint,
            src_region.x as GLint,
            src_region.y as GLint,
            src_z as GLint,
            dst as GLuint,
            dst_info.target,
            dst_mip_level as GLint,
            dst_origin.0 as GLint,
            dst_origin.1 as GLint,
            dst_z as GLint,
            src_region.width as GLsizei,
            src_region.height as GLsizei,
            depth as GLsizei
        );
    }

    fn generate_mipmaps(&mut self, handle: NativeHandle) {
        let info = self.texture_info(handle);
        call!(self, BindTexture, info.target, handle as GLuint);
        call!(self, GenerateMipmap, info.target);
    }

    fn resolve_texture(&mut self, src: NativeHandle, dst: NativeHandle, width: u32, height: u32) {
        self.ensure_scratch_fbos();
        let src_info = self.texture_info(src);
        let dst_info = self.texture_info(dst);
        call!(self, BindFramebuffer, READ_FRAMEBUFFER, self.read_fbo);
        call!(
            self,
            FramebufferTexture2D,
            READ_FRAMEBUFFER,
            COLOR_ATTACHMENT0,
            src_info.target,
            src as GLuint,
            0
        );
        call!(self, BindFramebuffer, DRAW_FRAMEBUFFER, self.draw_fbo);
        call!(
            self,
            FramebufferTexture2D,
            DRAW_FRAMEBUFFER,
            COLOR_ATTACHMENT0,
            dst_info.target,
            dst as GLuint,
            0
        );
        call!(
            self,
            BlitFramebuffer,
            0,
            0,
            width as GLint,
            height as GLint,
            0,
            0,
            width as GLint,
            height as GLint,
            COLOR_BUFFER_BIT,
            NEAREST_FILTER
        );
        call!(self, BindFramebuffer, READ_FRAMEBUFFER, 0);
        call!(self, BindFramebuffer, DRAW_FRAMEBUFFER, 0);
    }

    fn create_framebuffer(
        &mut self,
        color_targets: &[NativeHandle],
        depth_target: Option<NativeHandle>,
    ) -> Result<NativeHandle, Error> {
        let mut id: GLuint = 0;
        call!(self, GenFramebuffers, 1, &mut id);
        if id == 0 {
            return Err(self.native_error("create_framebuffer"));
        }
        call!(self, BindFramebuffer, FRAMEBUFFER, id);
        let mut draw_buffers = Vec::with_capacity(color_targets.len());
        for (index, &target) in color_targets.iter().enumerate() {
            let info = self.texture_info(target);
            let attachment = COLOR_ATTACHMENT0 + index as GLenum;
            if info.array || info.target == TEXTURE_3D {
                call!(
                    self,
                    FramebufferTextureLayer,
                    FRAMEBUFFER,
                    attachment,
                    target as GLuint,
                    0,
                    0
                );
            } else {
                call!(
                    self,
                    FramebufferTexture2D,
                    FRAMEBUFFER,
                    attachment,
                    info.target,
                    target as GLuint,
                    0
                );
            }
            draw_buffers.push(attachment);
        }
        if let Some(depth) = depth_target {
            let info = self.texture_info(depth);
            let attachment = if info.format == PixelFormat::Depth24Stencil8 {
                DEPTH_STENCIL_ATTACHMENT
            } else {
                DEPTH_ATTACHMENT
            };
            call!(
                self,
                FramebufferTexture2D,
                FRAMEBUFFER,
                attachment,
                info.target,
                depth as GLuint,
                0
            );
        }
        if !draw_buffers.is_empty() {
            call!(
                self,
                DrawBuffers,
                draw_buffers.len() as GLsizei,
                draw_buffers.as_ptr()
            );
        }
        let status = call!(self, CheckFramebufferStatus, FRAMEBUFFER);
        if status != FRAMEBUFFER_COMPLETE {
            call!(self, DeleteFramebuffers, 1, &id);
            return Err(Error::Native {
                code: status,
                context: "create_framebuffer status",
            });
        }
        Ok(id as NativeHandle)
    }

    fn destroy_framebuffer(&mut self, handle: NativeHandle) {
        let id = handle as GLuint;
        call!(self, DeleteFramebuffers, 1, &id);
    }

    fn bind_framebuffer(&mut self, handle: NativeHandle) {
        call!(self, BindFramebuffer, FRAMEBUFFER, handle as GLuint);
    }

    fn create_shader(&mut self, stage: ShaderStage, source: &[u8]) -> Result<NativeHandle, Error> {
        let id = call!(self, CreateShader, gl_shader_stage(stage));
        if id == 0 {
            return Err(self.native_error("create_shader"));
        }
        let ptr = source.as_ptr() as *const GLchar;
        let len = source.len() as GLint;
        call!(self, ShaderSource, id, 1, &ptr, &len);
        call!(self, CompileShader, id);
        let mut status: GLint = 0;
        call!(self, GetShaderiv, id, COMPILE_STATUS, &mut status);
        if status == 0 {
            let mut log_len: GLint = 0;
            call!(self, GetShaderiv, id, INFO_LOG_LENGTH, &mut log_len);
            let mut log = vec![0u8; log_len.max(1) as usize];
            let mut written: GLsizei = 0;
            call!(
                self,
                GetShaderInfoLog,
                id,
                log.len() as GLsizei,
                &mut written,
                log.as_mut_ptr() as *mut GLchar
            );
            log.truncate(written.max(0) as usize);
            call!(self, DeleteShader, id);
            return Err(Error::ShaderCompile {
                log: String::from_utf8_lossy(&log).into_owned(),
            });
        }
        Ok(id as NativeHandle)
    }

    fn destroy_shader(&mut self, handle: NativeHandle) {
        call!(self, DeleteShader, handle as GLuint);
    }

    fn create_pipeline(&mut self, shaders: &[NativeHandle]) -> Result<NativeHandle, Error> {
        let id = call!(self, CreateProgram);
        if id == 0 {
            return Err(self.native_error("create_pipeline"));
        }
        for &shader in shaders {
            call!(self, AttachShader, id, shader as GLuint);
        }
        call!(self, LinkProgram, id);
        let mut status: GLint = 0;
        call!(self, GetProgramiv, id, LINK_STATUS, &mut status);
        if status == 0 {
            let mut log_len: GLint = 0;
            call!(self, GetProgramiv, id, INFO_LOG_LENGTH, &mut log_len);
            let mut log = vec![0u8; log_len.max(1) as usize];
            let mut written: GLsizei = 0;
            call!(
                self,
                GetProgramInfoLog,
                id,
                log.len() as GLsizei,
                &mut written,
                log.as_mut_ptr() as *mut GLchar
            );
            log.truncate(written.max(0) as usize);
            call!(self, DeleteProgram, id);
            return Err(Error::ShaderCompile {
                log: String::from_utf8_lossy(&log).into_owned(),
            });
        }
        Ok(id as NativeHandle)
    }

    fn destroy_pipeline(&mut self, handle: NativeHandle) {
        call!(self, DeleteProgram, handle as GLuint);
    }

    fn bind_pipeline(&mut self, handle: NativeHandle) {
        call!(self, UseProgram, handle as GLuint);
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> Result<NativeHandle, Error> {
        let mut id: GLuint = 0;
        call!(self, GenSamplers, 1, &mut id);
        if id == 0 {
            return Err(self.native_error("create_sampler"));
        }
        call!(
            self,
            SamplerParameteri,
            id,
            TEXTURE_MIN_FILTER,
            gl_filter(desc.min_filter)
        );
        call!(
            self,
            SamplerParameteri,
            id,
            TEXTURE_MAG_FILTER,
            gl_filter(desc.mag_filter)
        );
        let wrap = gl_address(desc.address_mode);
        call!(self, SamplerParameteri, id, TEXTURE_WRAP_S, wrap);
        call!(self, SamplerParameteri, id, TEXTURE_WRAP_T, wrap);
        call!(self, SamplerParameteri, id, TEXTURE_WRAP_R, wrap);
        Ok(id as NativeHandle)
    }

    fn destroy_sampler(&mut self, handle: NativeHandle) {
        let id = handle as GLuint;
        call!(self, DeleteSamplers, 1, &id);
    }

    fn bind_uniform_buffer(&mut self, slot: u32, handle: NativeHandle, offset: u64, size: u64) {
        call!(
            self,
            BindBufferRange,
            UNIFORM_BUFFER,
            slot,
            handle as GLuint,
            offset as isize,
            size as isize
        );
    }

    fn bind_storage_buffer(&mut self, slot: u32, handle: NativeHandle, offset: u64, size: u64) {
        call!(
            self,
            BindBufferRange,
            SHADER_STORAGE_BUFFER,
            slot,
            handle as GLuint,
            offset as isize,
            size as isize
        );
    }

    fn bind_texture(&mut self, unit: u32, handle: NativeHandle) {
        let info = self.texture_info(handle);
        call!(self, ActiveTexture, TEXTURE0 + unit);
        call!(self, BindTexture, info.target, handle as GLuint);
    }

    fn bind_image(&mut self, unit: u32, handle: NativeHandle, writable: bool) {
        let info = self.texture_info(handle);
        let (internal, _, _) = gl_format(info.format);
        let access = if writable { READ_WRITE } else { READ_ONLY };
        call!(
            self,
            BindImageTexture,
            unit,
            handle as GLuint,
            0,
            1,
            0,
            access,
            internal
        );
    }

    fn bind_sampler(&mut self, unit: u32, handle: NativeHandle) {
        call!(self, BindSampler, unit, handle as GLuint);
    }

    fn bind_vertex_buffer(&mut self, slot: u32, handle: NativeHandle, stride: u32, offset: u64) {
        self.ensure_vao();
        call!(
            self,
            BindVertexBuffer,
            slot,
            handle as GLuint,
            offset as isize,
            stride as GLsizei
        );
    }

    fn bind_index_buffer(&mut self, handle: NativeHandle, _format: IndexFormat) {
        self.ensure_vao();
        call!(self, BindBuffer, ELEMENT_ARRAY_BUFFER, handle as GLuint);
    }

    fn set_viewport(&mut self, _index: u32, viewport: &Viewport) {
        call!(
            self,
            Viewport,
            viewport.x as GLint,
            viewport.y as GLint,
            viewport.width as GLsizei,
            viewport.height as GLsizei
        );
    }

    fn set_scissor(&mut self, _index: u32, rect: &ScissorRect) {
        call!(
            self,
            Scissor,
            rect.x as GLint,
            rect.y as GLint,
            rect.width as GLsizei,
            rect.height as GLsizei
        );
    }

    fn clear_color(&mut self, target: u32, rgba: [f32; 4]) {
        call!(self, ClearBufferfv, COLOR, target as GLint, rgba.as_ptr());
    }

    fn clear_depth_stencil(&mut self, depth: f32, stencil: u8) {
        call!(
            self,
            ClearBufferfi,
            DEPTH_STENCIL,
            0,
            depth,
            stencil as GLint
        );
    }

    fn draw(
        &mut self,
        topology: PrimitiveTopology,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.ensure_vao();
        let mode = gl_topology(topology);
        if first_instance > 0 && self.procs.DrawArraysInstancedBaseInstance.is_some() {
            call!(
                self,
                DrawArraysInstancedBaseInstance,
                mode,
                first_vertex as GLint,
                vertex_count as GLsizei,
                instance_count as GLsizei,
                first_instance
            );
        } else {
            call!(
                self,
                DrawArraysInstanced,
                mode,
                first_vertex as GLint,
                vertex_count as GLsizei,
                instance_count as GLsizei
            );
        }
    }

    fn draw_indexed(
        &mut self,
        topology: PrimitiveTopology,
        index_format: IndexFormat,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.ensure_vao();
        let mode = gl_topology(topology);
        let (index_type, index_size) = gl_index_format(index_format);
        let offset = (first_index as usize * index_size as usize) as *const c_void;
        if first_instance > 0
            && self
                .procs
                .DrawElementsInstancedBaseVertexBaseInstance
                .is_some()
        {
            call!(
                self,
                DrawElementsInstancedBaseVertexBaseInstance,
                mode,
                index_count as GLsizei,
                index_type,
                offset,
                instance_count as GLsizei,
                vertex_offset as GLint,
                first_instance
            );
        } else {
            call!(
                self,
                DrawElementsInstancedBaseVertex,
                mode,
                index_count as GLsizei,
                index_type,
                offset,
                instance_count as GLsizei,
                vertex_offset as GLint
            );
        }
    }

    fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32) {
        call!(self, DispatchCompute, groups_x, groups_y, groups_z);
    }

    fn set_label(&mut self, kind: ObjectKind, handle: NativeHandle, name: &str) {
        if !self.features.debug_output {
            return;
        }
        call!(
            self,
            ObjectLabel,
            gl_label_kind(kind),
            handle as GLuint,
            name.len() as GLsizei,
            name.as_ptr() as *const GLchar
        );
    }

    fn push_debug_group(&mut self, name: &str) {
        call!(
            self,
            PushDebugGroup,
            DEBUG_SOURCE_APPLICATION,
            0,
            name.len() as GLsizei,
            name.as_ptr() as *const GLchar
        );
    }

    fn pop_debug_group(&mut self) {
        call!(self, PopDebugGroup);
    }

    fn insert_debug_marker(&mut self, name: &str) {
        call!(
            self,
            DebugMessageInsert,
            DEBUG_SOURCE_APPLICATION,
            DEBUG_TYPE_MARKER,
            0,
            DEBUG_SEVERITY_NOTIFICATION,
            name.len() as GLsizei,
            name.as_ptr() as *const GLchar
        );
    }

    fn flush(&mut self) {
        call!(self, Flush);
    }

    fn finish(&mut self) {
        call!(self, Finish);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "system" fn nop() {}

    fn fake_loader(except: &'static [&'static str]) -> impl FnMut(&str) -> *const c_void {
        move |name: &str| {
            if except.contains(&name) {
                std::ptr::null()
            } else {
                nop as *const c_void
            }
        }
    }

    #[test]
    fn load_fails_without_a_required_entry_point() {
        let mut loader = fake_loader(&["glGenBuffers"]);
        match GlBackend::load(&mut loader) {
            Err(Error::MissingEntryPoint { name }) => assert_eq!(name, "glGenBuffers"),
            Err(other) => panic!("expected MissingEntryPoint, got {other:?}"),
            Ok(_) => panic!("load succeeded without glGenBuffers"),
        }
    }

    #[test]
    fn features_track_optional_entry_points() {
        let mut loader = fake_loader(&[]);
        let backend = GlBackend::load(&mut loader).unwrap();
        let features = backend.features();
        assert!(features.copy_buffer);
        assert!(features.copy_image);
        assert!(features.framebuffer_blit);
        assert!(features.compute_shaders);
        assert!(features.debug_output);

        let mut loader = fake_loader(&["glCopyImageSubData", "glBlitFramebuffer"]);
        let backend = GlBackend::load(&mut loader).unwrap();
        let features = backend.features();
        assert!(!features.copy_image);
        assert!(!features.framebuffer_blit);
        assert!(features.copy_buffer);
    }
}
