// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
A recording [`Backend`] for unit tests.

Handles are assigned sequentially.  Buffers and textures are backed by real
byte vectors so map pointers are stable and transfers observable.  Every call
is appended to a log so tests can assert on exactly which native work happened.
*/

use crate::backend::{
    Backend, BackendFeatures, BufferUsage, IndexFormat, MapMode, NativeHandle, ObjectKind,
    PrimitiveTopology, SamplerDescriptor, ScissorRect, ShaderStage, TextureDescriptor,
    TextureRegion, Viewport,
};
use crate::error::Error;
use std::collections::HashMap;

pub(crate) struct TestBackend {
    next_handle: NativeHandle,
    pub features: BackendFeatures,
    /// Injected native error code, returned (and cleared) by `last_error`.
    pub error_code: u32,
    pub calls: Vec<String>,
    pub buffers: HashMap<NativeHandle, Vec<u8>>,
    pub textures: HashMap<NativeHandle, Vec<u8>>,
    pub labels: Vec<(NativeHandle, String)>,
    pub destroyed: Vec<NativeHandle>,
}

impl TestBackend {
    pub fn new() -> TestBackend {
        TestBackend {
            next_handle: 1,
            features: BackendFeatures {
                copy_buffer: true,
                copy_image: true,
                framebuffer_blit: true,
                texture_storage: true,
                compute_shaders: true,
                debug_output: true,
            },
            error_code: 0,
            calls: Vec::new(),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            labels: Vec::new(),
            destroyed: Vec::new(),
        }
    }

    fn issue(&mut self) -> NativeHandle {
        let h = self.next_handle;
        self.next_handle += 1;
        h
    }

    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls.iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn texture_len(desc: &TextureDescriptor) -> usize {
        //flat per-subresource layout, generous enough for every mip
        (desc.width as usize)
            * (desc.height as usize)
            * (desc.depth as usize)
            * (desc.format.bytes_per_pixel() as usize)
            * (desc.mip_levels as usize)
            * (desc.array_layers as usize)
    }
}

impl Backend for TestBackend {
    fn features(&self) -> BackendFeatures {
        self.features
    }

    fn last_error(&mut self) -> u32 {
        std::mem::take(&mut self.error_code)
    }

    fn create_buffer(&mut self, size: u64, _usage: BufferUsage) -> Result<NativeHandle, Error> {
        let h = self.issue();
        self.buffers.insert(h, vec![0u8; size as usize]);
        self.calls.push(format!("create_buffer {h} size {size}"));
        Ok(h)
    }

    fn destroy_buffer(&mut self, handle: NativeHandle) {
        self.buffers.remove(&handle);
        self.destroyed.push(handle);
        self.calls.push(format!("destroy_buffer {handle}"));
    }

    fn update_buffer(&mut self, handle: NativeHandle, offset: u64, data: &[u8]) {
        self.calls
            .push(format!("update_buffer {handle} at {offset} len {}", data.len()));
        if let Some(storage) = self.buffers.get_mut(&handle) {
            storage[offset as usize..offset as usize + data.len()].copy_from_slice(data);
        }
    }

    fn read_buffer(&mut self, handle: NativeHandle, offset: u64, into: &mut [u8]) {
        self.calls
            .push(format!("read_buffer {handle} at {offset} len {}", into.len()));
        if let Some(storage) = self.buffers.get(&handle) {
            into.copy_from_slice(&storage[offset as usize..offset as usize + into.len()]);
        }
    }

    fn copy_buffer(
        &mut self,
        src: NativeHandle,
        dst: NativeHandle,
        src_offset: u64,
        dst_offset: u64,
        len: u64,
    ) {
        self.calls.push(format!("copy_buffer {src}->{dst} len {len}"));
        let bytes: Vec<u8> = match self.buffers.get(&src) {
            Some(storage) => {
                storage[src_offset as usize..(src_offset + len) as usize].to_vec()
            }
            None => return,
        };
        if let Some(storage) = self.buffers.get_mut(&dst) {
            storage[dst_offset as usize..(dst_offset + len) as usize].copy_from_slice(&bytes);
        }
    }

    fn map_buffer(
        &mut self,
        handle: NativeHandle,
        mode: MapMode,
        offset: u64,
        size: u64,
    ) -> Result<*mut u8, Error> {
        self.calls
            .push(format!("map_buffer {handle} {mode:?} at {offset} len {size}"));
        let storage = self.buffers.get_mut(&handle).ok_or(Error::Native {
            code: 0x502,
            context: "map_buffer",
        })?;
        Ok(unsafe { storage.as_mut_ptr().add(offset as usize) })
    }

    fn unmap_buffer(&mut self, handle: NativeHandle) -> bool {
        self.calls.push(format!("unmap_buffer {handle}"));
        true
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<NativeHandle, Error> {
        let h = self.issue();
        self.textures.insert(h, vec![0u8; Self::texture_len(desc)]);
        self.calls
            .push(format!("create_texture {h} {}x{}", desc.width, desc.height));
        Ok(h)
    }

    fn destroy_texture(&mut self, handle: NativeHandle) {
        self.textures.remove(&handle);
        self.destroyed.push(handle);
        self.calls.push(format!("destroy_texture {handle}"));
    }

    fn update_texture(
        &mut self,
        handle: NativeHandle,
        _desc: &TextureDescriptor,
        region: &TextureRegion,
        data: &[u8],
    ) {
        self.calls.push(format!(
            "update_texture {handle} mip {} layer {} len {}",
            region.mip_level,
            region.array_layer,
            data.len()
        ));
        if let Some(storage) = self.textures.get_mut(&handle) {
            let n = data.len().min(storage.len());
            storage[..n].copy_from_slice(&data[..n]);
        }
    }

    fn read_texture(
        &mut self,
        handle: NativeHandle,
        _desc: &TextureDescriptor,
        region: &TextureRegion,
        into: &mut [u8],
    ) {
        self.calls.push(format!(
            "read_texture {handle} mip {} layer {} len {}",
            region.mip_level,
            region.array_layer,
            into.len()
        ));
        if let Some(storage) = self.textures.get(&handle) {
            let n = into.len().min(storage.len());
            into[..n].copy_from_slice(&storage[..n]);
        }
    }

    fn copy_texture(
        &mut self,
        src: NativeHandle,
        _src_region: &TextureRegion,
        dst: NativeHandle,
        _dst_origin: (u32, u32, u32),
        _dst_mip_level: u32,
        _dst_array_layer: u32,
    ) {
        self.calls.push(format!("copy_texture {src}->{dst}"));
        let bytes = match self.textures.get(&src) {
            Some(storage) => storage.clone(),
            None => return,
        };
        if let Some(storage) = self.textures.get_mut(&dst) {
            let n = bytes.len().min(storage.len());
            storage[..n].copy_from_slice(&bytes[..n]);
        }
    }

    fn generate_mipmaps(&mut self, handle: NativeHandle) {
        self.calls.push(format!("generate_mipmaps {handle}"));
    }

    fn resolve_texture(&mut self, src: NativeHandle, dst: NativeHandle, _width: u32, _height: u32) {
        self.calls.push(format!("resolve_texture {src}->{dst}"));
        let bytes = match self.textures.get(&src) {
            Some(storage) => storage.clone(),
            None => return,
        };
        if let Some(storage) = self.textures.get_mut(&dst) {
            let n = bytes.len().min(storage.len());
            storage[..n].copy_from_slice(&bytes[..n]);
        }
    }

    fn create_framebuffer(
        &mut self,
        color_targets: &[NativeHandle],
        _depth_target: Option<NativeHandle>,
    ) -> Result<NativeHandle, Error> {
        let h = self.issue();
        self.calls
            .push(format!("create_framebuffer {h} colors {}", color_targets.len()));
        Ok(h)
    }

    fn destroy_framebuffer(&mut self, handle: NativeHandle) {
        self.destroyed.push(handle);
        self.calls.push(format!("destroy_framebuffer {handle}"));
    }

    fn bind_framebuffer(&mut self, handle: NativeHandle) {
        self.calls.push(format!("bind_framebuffer {handle}"));
    }

    fn create_shader(&mut self, stage: ShaderStage, _source: &[u8]) -> Result<NativeHandle, Error> {
        let h = self.issue();
        self.calls.push(format!("create_shader {h} {stage:?}"));
        Ok(h)
    }

    fn destroy_shader(&mut self, handle: NativeHandle) {
        self.destroyed.push(handle);
        self.calls.push(format!("destroy_shader {handle}"));
    }

    fn create_pipeline(&mut self, shaders: &[NativeHandle]) -> Result<NativeHandle, Error> {
        let h = self.issue();
        self.calls
            .push(format!("create_pipeline {h} shaders {}", shaders.len()));
        Ok(h)
    }

    fn destroy_pipeline(&mut self, handle: NativeHandle) {
        self.destroyed.push(handle);
        self.calls.push(format!("destroy_pipeline {handle}"));
    }

    fn bind_pipeline(&mut self, handle: NativeHandle) {
        self.calls.push(format!("bind_pipeline {handle}"));
    }

    fn create_sampler(&mut self, _desc: &SamplerDescriptor) -> Result<NativeHandle, Error> {
        let h = self.issue();
        self.calls.push(format!("create_sampler {h}"));
        Ok(h)
    }

    fn destroy_sampler(&mut self, handle: NativeHandle) {
        self.destroyed.push(handle);
        self.calls.push(format!("destroy_sampler {handle}"));
    }

    fn bind_uniform_buffer(&mut self, slot: u32, handle: NativeHandle, offset: u64, size: u64) {
        self.calls.push(format!(
            "bind_uniform_buffer slot {slot} buffer {handle} at {offset} len {size}"
        ));
    }

    fn bind_storage_buffer(&mut self, slot: u32, handle: NativeHandle, offset: u64, size: u64) {
        self.calls.push(format!(
            "bind_storage_buffer slot {slot} buffer {handle} at {offset} len {size}"
        ));
    }

    fn bind_texture(&mut self, unit: u32, handle: NativeHandle) {
        self.calls.push(format!("bind_texture unit {unit} {handle}"));
    }

    fn bind_image(&mut self, unit: u32, handle: NativeHandle, writable: bool) {
        self.calls
            .push(format!("bind_image unit {unit} {handle} writable {writable}"));
    }

    fn bind_sampler(&mut self, unit: u32, handle: NativeHandle) {
        self.calls.push(format!("bind_sampler unit {unit} {handle}"));
    }

    fn bind_vertex_buffer(&mut self, slot: u32, handle: NativeHandle, stride: u32, offset: u64) {
        self.calls.push(format!(
            "bind_vertex_buffer slot {slot} {handle} stride {stride} at {offset}"
        ));
    }

    fn bind_index_buffer(&mut self, handle: NativeHandle, format: IndexFormat) {
        self.calls
            .push(format!("bind_index_buffer {handle} {format:?}"));
    }

    fn set_viewport(&mut self, index: u32, viewport: &Viewport) {
        self.calls.push(format!(
            "set_viewport {index} {}x{}",
            viewport.width, viewport.height
        ));
    }

    fn set_scissor(&mut self, index: u32, rect: &ScissorRect) {
        self.calls
            .push(format!("set_scissor {index} {}x{}", rect.width, rect.height));
    }

    fn clear_color(&mut self, target: u32, _rgba: [f32; 4]) {
        self.calls.push(format!("clear_color {target}"));
    }

    fn clear_depth_stencil(&mut self, _depth: f32, _stencil: u8) {
        self.calls.push("clear_depth_stencil".to_string());
    }

    fn draw(
        &mut self,
        _topology: PrimitiveTopology,
        vertex_count: u32,
        instance_count: u32,
        _first_vertex: u32,
        _first_instance: u32,
    ) {
        self.calls
            .push(format!("draw {vertex_count} x{instance_count}"));
    }

    fn draw_indexed(
        &mut self,
        _topology: PrimitiveTopology,
        _index_format: IndexFormat,
        index_count: u32,
        instance_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) {
        self.calls
            .push(format!("draw_indexed {index_count} x{instance_count}"));
    }

    fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32) {
        self.calls
            .push(format!("dispatch {groups_x}x{groups_y}x{groups_z}"));
    }

    fn set_label(&mut self, _kind: ObjectKind, handle: NativeHandle, name: &str) {
        self.labels.push((handle, name.to_string()));
        self.calls.push(format!("set_label {handle} '{name}'"));
    }

    fn push_debug_group(&mut self, name: &str) {
        self.calls.push(format!("push_debug_group '{name}'"));
    }

    fn pop_debug_group(&mut self) {
        self.calls.push("pop_debug_group".to_string());
    }

    fn insert_debug_marker(&mut self, name: &str) {
        self.calls.push(format!("insert_debug_marker '{name}'"));
    }

    fn flush(&mut self) {
        self.calls.push("flush".to_string());
    }

    fn finish(&mut self) {
        self.calls.push("finish".to_string());
    }
}
