// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Shared fixture: an in-memory recording backend plus a null context provider.

The backend moves into the device's execution thread at construction, so the
tests observe it through a shared state handle instead.  Buffers and textures
are backed by real byte vectors (stable map pointers, observable transfers)
and every native call is appended to a log.
*/

//not every test binary exercises every helper
#![allow(dead_code)]

use commands_and_threads::backend::{
    Backend, BackendFeatures, BufferUsage, ContextProvider, IndexFormat, MapMode, NativeHandle,
    ObjectKind, PrimitiveTopology, SamplerDescriptor, ScissorRect, ShaderStage, TextureDescriptor,
    TextureRegion, Viewport,
};
use commands_and_threads::{Device, Error};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct SharedState {
    pub calls: Vec<String>,
    pub buffers: HashMap<NativeHandle, Vec<u8>>,
    pub textures: HashMap<NativeHandle, Vec<u8>>,
    pub labels: Vec<(NativeHandle, String)>,
    pub destroyed: Vec<NativeHandle>,
    /// Error code handed out (once) by the next `last_error` poll.
    pub inject_error: u32,
    pub swaps: u32,
    pub vsync: Option<bool>,
    pub surface_size: Option<(u32, u32)>,
    pub context_deleted: bool,
}

#[derive(Clone)]
pub struct StateHandle(Arc<Mutex<SharedState>>);

impl StateHandle {
    pub fn call_count(&self, prefix: &str) -> usize {
        self.0
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().calls.clone()
    }

    pub fn buffer_bytes(&self, handle: NativeHandle) -> Vec<u8> {
        self.0.lock().unwrap().buffers[&handle].clone()
    }

    pub fn fill_texture(&self, handle: NativeHandle, byte: u8) {
        self.0
            .lock()
            .unwrap()
            .textures
            .get_mut(&handle)
            .unwrap()
            .fill(byte);
    }

    pub fn texture_bytes(&self, handle: NativeHandle) -> Vec<u8> {
        self.0.lock().unwrap().textures[&handle].clone()
    }

    pub fn destroyed(&self) -> Vec<NativeHandle> {
        self.0.lock().unwrap().destroyed.clone()
    }

    pub fn labels(&self) -> Vec<(NativeHandle, String)> {
        self.0.lock().unwrap().labels.clone()
    }

    pub fn inject_error(&self, code: u32) {
        self.0.lock().unwrap().inject_error = code;
    }

    pub fn swaps(&self) -> u32 {
        self.0.lock().unwrap().swaps
    }

    pub fn surface_size(&self) -> Option<(u32, u32)> {
        self.0.lock().unwrap().surface_size
    }

    /// Native handles issued by `create_{kind}` calls, in creation order.
    pub fn created_handles(&self, kind: &str) -> Vec<NativeHandle> {
        let prefix = format!("create_{kind} ");
        self.0
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter_map(|c| c.strip_prefix(&prefix))
            .filter_map(|rest| rest.split_whitespace().next())
            .filter_map(|h| h.parse().ok())
            .collect()
    }
}

pub struct RecordingBackend {
    state: Arc<Mutex<SharedState>>,
    features: BackendFeatures,
    next_handle: NativeHandle,
}

pub fn all_features() -> BackendFeatures {
    BackendFeatures {
        copy_buffer: true,
        copy_image: true,
        framebuffer_blit: true,
        texture_storage: true,
        compute_shaders: true,
        debug_output: true,
    }
}

impl RecordingBackend {
    pub fn new(features: BackendFeatures) -> (RecordingBackend, StateHandle) {
        let state = Arc::new(Mutex::new(SharedState::default()));
        (
            RecordingBackend {
                state: state.clone(),
                features,
                next_handle: 1,
            },
            StateHandle(state),
        )
    }

    fn issue(&mut self) -> NativeHandle {
        let h = self.next_handle;
        self.next_handle += 1;
        h
    }

    fn log(&self, entry: String) {
        self.state.lock().unwrap().calls.push(entry);
    }
}

struct NullContext {
    state: Arc<Mutex<SharedState>>,
}

impl ContextProvider for NullContext {
    fn make_current(&mut self) -> Result<(), Error> {
        Ok(())
    }
    fn clear_current(&mut self) {}
    fn swap_buffers(&mut self) -> Result<(), Error> {
        self.state.lock().unwrap().swaps += 1;
        Ok(())
    }
    fn set_vsync(&mut self, enabled: bool) {
        self.state.lock().unwrap().vsync = Some(enabled);
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.state.lock().unwrap().surface_size = Some((width, height));
    }
    fn delete(&mut self) {
        self.state.lock().unwrap().context_deleted = true;
    }
}

/// A device backed by the recording backend, plus the observation handle.
pub fn device_with(features: BackendFeatures) -> (Device, StateHandle) {
    let (backend, handle) = RecordingBackend::new(features);
    let context = NullContext {
        state: Arc::clone(&handle.0),
    };
    let device = Device::new(Box::new(backend), Box::new(context)).unwrap();
    (device, handle)
}

pub fn device() -> (Device, StateHandle) {
    device_with(all_features())
}

/// A context whose `make_current` always fails, killing the execution thread
/// before it processes any work.
struct BrokenContext;

impl ContextProvider for BrokenContext {
    fn make_current(&mut self) -> Result<(), Error> {
        Err(Error::Native {
            code: 0xdead,
            context: "make current",
        })
    }
    fn clear_current(&mut self) {}
    fn swap_buffers(&mut self) -> Result<(), Error> {
        Ok(())
    }
    fn set_vsync(&mut self, _enabled: bool) {}
    fn delete(&mut self) {}
}

pub fn device_with_broken_context() -> Device {
    let (backend, _handle) = RecordingBackend::new(all_features());
    Device::new(Box::new(backend), Box::new(BrokenContext)).unwrap()
}

impl Backend for RecordingBackend {
    fn features(&self) -> BackendFeatures {
        self.features
    }

    fn last_error(&mut self) -> u32 {
        std::mem::take(&mut self.state.lock().unwrap().inject_error)
    }

    fn create_buffer(&mut self, size: u64, _usage: BufferUsage) -> Result<NativeHandle, Error> {
        let h = self.issue();
        let mut s = self.state.lock().unwrap();
        s.buffers.insert(h, vec![0u8; size as usize]);
        s.calls.push(format!("create_buffer {h} size {size}"));
        Ok(h)
    }

    fn destroy_buffer(&mut self, handle: NativeHandle) {
        let mut s = self.state.lock().unwrap();
        s.buffers.remove(&handle);
        s.destroyed.push(handle);
        s.calls.push(format!("destroy_buffer {handle}"));
    }

    fn update_buffer(&mut self, handle: NativeHandle, offset: u64, data: &[u8]) {
        let mut s = self.state.lock().unwrap();
        s.calls
            .push(format!("update_buffer {handle} at {offset} len {}", data.len()));
        if let Some(storage) = s.buffers.get_mut(&handle) {
            storage[offset as usize..offset as usize + data.len()].copy_from_slice(data);
        }
    }

    fn read_buffer(&mut self, handle: NativeHandle, offset: u64, into: &mut [u8]) {
        let mut s = self.state.lock().unwrap();
        s.calls
            .push(format!("read_buffer {handle} at {offset} len {}", into.len()));
        if let Some(storage) = s.buffers.get(&handle) {
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
        let mut s = self.state.lock().unwrap();
        s.calls.push(format!("copy_buffer {src}->{dst} len {len}"));
        let bytes = match s.buffers.get(&src) {
            Some(storage) => storage[src_offset as usize..(src_offset + len) as usize].to_vec(),
            None => return,
        };
        if let Some(storage) = s.buffers.get_mut(&dst) {
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
        let mut s = self.state.lock().unwrap();
        s.calls
            .push(format!("map_buffer {handle} {mode:?} at {offset} len {size}"));
        let storage = s.buffers.get_mut(&handle).ok_or(Error::NotMapped)?;
        Ok(unsafe { storage.as_mut_ptr().add(offset as usize) })
    }

    fn unmap_buffer(&mut self, handle: NativeHandle) -> bool {
        self.log(format!("unmap_buffer {handle}"));
        true
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<NativeHandle, Error> {
        let h = self.issue();
        let len = (desc.width * desc.height * desc.depth * desc.format.bytes_per_pixel()) as usize
            * (desc.mip_levels * desc.array_layers) as usize;
        let mut s = self.state.lock().unwrap();
        s.textures.insert(h, vec![0u8; len]);
        s.calls
            .push(format!("create_texture {h} {}x{}", desc.width, desc.height));
        Ok(h)
    }

    fn destroy_texture(&mut self, handle: NativeHandle) {
        let mut s = self.state.lock().unwrap();
        s.textures.remove(&handle);
        s.destroyed.push(handle);
        s.calls.push(format!("destroy_texture {handle}"));
    }

    fn update_texture(
        &mut self,
        handle: NativeHandle,
        _desc: &TextureDescriptor,
        region: &TextureRegion,
        data: &[u8],
    ) {
        let mut s = self.state.lock().unwrap();
        s.calls.push(format!(
            "update_texture {handle} mip {} layer {} len {}",
            region.mip_level,
            region.array_layer,
            data.len()
        ));
        if let Some(storage) = s.textures.get_mut(&handle) {
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
        let mut s = self.state.lock().unwrap();
        s.calls.push(format!(
            "read_texture {handle} mip {} layer {} len {}",
            region.mip_level,
            region.array_layer,
            into.len()
        ));
        if let Some(storage) = s.textures.get(&handle) {
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
        let mut s = self.state.lock().unwrap();
        s.calls.push(format!("copy_texture {src}->{dst}"));
        let bytes = match s.textures.get(&src) {
            Some(storage) => storage.clone(),
            None => return,
        };
        if let Some(storage) = s.textures.get_mut(&dst) {
            let n = bytes.len().min(storage.len());
            storage[..n].copy_from_slice(&bytes[..n]);
        }
    }

    fn generate_mipmaps(&mut self, handle: NativeHandle) {
        self.log(format!("generate_mipmaps {handle}"));
    }

    fn resolve_texture(&mut self, src: NativeHandle, dst: NativeHandle, _width: u32, _height: u32) {
        let mut s = self.state.lock().unwrap();
        s.calls.push(format!("resolve_texture {src}->{dst}"));
        let bytes = match s.textures.get(&src) {
            Some(storage) => storage.clone(),
            None => return,
        };
        if let Some(storage) = s.textures.get_mut(&dst) {
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
        self.log(format!(
            "create_framebuffer {h} colors {}",
            color_targets.len()
        ));
        Ok(h)
    }

    fn destroy_framebuffer(&mut self, handle: NativeHandle) {
        let mut s = self.state.lock().unwrap();
        s.destroyed.push(handle);
        s.calls.push(format!("destroy_framebuffer {handle}"));
    }

    fn bind_framebuffer(&mut self, handle: NativeHandle) {
        self.log(format!("bind_framebuffer {handle}"));
    }

    fn create_shader(&mut self, stage: ShaderStage, _source: &[u8]) -> Result<NativeHandle, Error> {
        let h = self.issue();
        self.log(format!("create_shader {h} {stage:?}"));
        Ok(h)
    }

    fn destroy_shader(&mut self, handle: NativeHandle) {
        let mut s = self.state.lock().unwrap();
        s.destroyed.push(handle);
        s.calls.push(format!("destroy_shader {handle}"));
    }

    fn create_pipeline(&mut self, shaders: &[NativeHandle]) -> Result<NativeHandle, Error> {
        let h = self.issue();
        self.log(format!("create_pipeline {h} shaders {}", shaders.len()));
        Ok(h)
    }

    fn destroy_pipeline(&mut self, handle: NativeHandle) {
        let mut s = self.state.lock().unwrap();
        s.destroyed.push(handle);
        s.calls.push(format!("destroy_pipeline {handle}"));
    }

    fn bind_pipeline(&mut self, handle: NativeHandle) {
        self.log(format!("bind_pipeline {handle}"));
    }

    fn create_sampler(&mut self, _desc: &SamplerDescriptor) -> Result<NativeHandle, Error> {
        let h = self.issue();
        self.log(format!("create_sampler {h}"));
        Ok(h)
    }

    fn destroy_sampler(&mut self, handle: NativeHandle) {
        let mut s = self.state.lock().unwrap();
        s.destroyed.push(handle);
        s.calls.push(format!("destroy_sampler {handle}"));
    }

    fn bind_uniform_buffer(&mut self, slot: u32, handle: NativeHandle, offset: u64, size: u64) {
        self.log(format!(
            "bind_uniform_buffer slot {slot} buffer {handle} at {offset} len {size}"
        ));
    }

    fn bind_storage_buffer(&mut self, slot: u32, handle: NativeHandle, offset: u64, size: u64) {
        self.log(format!(
            "bind_storage_buffer slot {slot} buffer {handle} at {offset} len {size}"
        ));
    }

    fn bind_texture(&mut self, unit: u32, handle: NativeHandle) {
        self.log(format!("bind_texture unit {unit} {handle}"));
    }

    fn bind_image(&mut self, unit: u32, handle: NativeHandle, writable: bool) {
        self.log(format!("bind_image unit {unit} {handle} writable {writable}"));
    }

    fn bind_sampler(&mut self, unit: u32, handle: NativeHandle) {
        self.log(format!("bind_sampler unit {unit} {handle}"));
    }

    fn bind_vertex_buffer(&mut self, slot: u32, handle: NativeHandle, stride: u32, offset: u64) {
        self.log(format!(
            "bind_vertex_buffer slot {slot} {handle} stride {stride} at {offset}"
        ));
    }

    fn bind_index_buffer(&mut self, handle: NativeHandle, format: IndexFormat) {
        self.log(format!("bind_index_buffer {handle} {format:?}"));
    }

    fn set_viewport(&mut self, index: u32, viewport: &Viewport) {
        self.log(format!(
            "set_viewport {index} {}x{}",
            viewport.width, viewport.height
        ));
    }

    fn set_scissor(&mut self, index: u32, rect: &ScissorRect) {
        self.log(format!("set_scissor {index} {}x{}", rect.width, rect.height));
    }

    fn clear_color(&mut self, target: u32, _rgba: [f32; 4]) {
        self.log(format!("clear_color {target}"));
    }

    fn clear_depth_stencil(&mut self, _depth: f32, _stencil: u8) {
        self.log("clear_depth_stencil".to_string());
    }

    fn draw(
        &mut self,
        _topology: PrimitiveTopology,
        vertex_count: u32,
        instance_count: u32,
        _first_vertex: u32,
        _first_instance: u32,
    ) {
        self.log(format!("draw {vertex_count} x{instance_count}"));
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
        self.log(format!("draw_indexed {index_count} x{instance_count}"));
    }

    fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32) {
        self.log(format!("dispatch {groups_x}x{groups_y}x{groups_z}"));
    }

    fn set_label(&mut self, _kind: ObjectKind, handle: NativeHandle, name: &str) {
        let mut s = self.state.lock().unwrap();
        s.labels.push((handle, name.to_string()));
        s.calls.push(format!("set_label {handle} '{name}'"));
    }

    fn push_debug_group(&mut self, name: &str) {
        self.log(format!("push_debug_group '{name}'"));
    }

    fn pop_debug_group(&mut self) {
        self.log("pop_debug_group".to_string());
    }

    fn insert_debug_marker(&mut self, name: &str) {
        self.log(format!("insert_debug_marker '{name}'"));
    }

    fn flush(&mut self) {
        self.log("flush".to_string());
    }

    fn finish(&mut self) {
        self.log("finish".to_string());
    }
}
