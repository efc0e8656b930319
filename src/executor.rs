// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Replays recorded command lists against the backend.

The executor runs on the execution thread and is stateful across draws and
across lists, mirroring the native API's own retained state.  Binding commands
do not touch the backend; they stage the request and mark the slot changed.
The staged state is flushed right before the next draw or dispatch, so setting
the same pipeline or resource set a thousand times costs one activation, and a
pipeline that is never drawn with is never even created.

Optional fast paths (direct buffer and image copies, framebuffer blit) fall
back to a staged round trip through the pool when the backend lacks the
capability.  The fallback changes the route, never the result.
*/

use crate::backend::{Backend, BackendFeatures, IndexFormat, TextureRegion};
use crate::command_list::{Command, CommandList};
use crate::error::Error;
use crate::mapped::{MapKey, MappedCache};
use crate::resource::{
    BindingKind, BoundResource, Buffer, DeferredResource, Pipeline, ResourceSet,
};
use crate::staging::StagingPool;
use std::sync::Arc;

struct StagedSet {
    set: Arc<ResourceSet>,
    dynamic_offsets: Vec<u64>,
    changed: bool,
}

struct StagedVertexBuffer {
    buffer: Arc<Buffer>,
    offset: u64,
    changed: bool,
}

pub(crate) struct CommandExecutor {
    features: BackendFeatures,
    pipeline: Option<Arc<Pipeline>>,
    pipeline_changed: bool,
    sets: Vec<Option<StagedSet>>,
    vertex_buffers: Vec<Option<StagedVertexBuffer>>,
    index_buffer: Option<(Arc<Buffer>, IndexFormat)>,
    index_buffer_changed: bool,
}

impl CommandExecutor {
    pub fn new(features: BackendFeatures) -> CommandExecutor {
        CommandExecutor {
            features,
            pipeline: None,
            pipeline_changed: false,
            sets: Vec::new(),
            vertex_buffers: Vec::new(),
            index_buffer: None,
            index_buffer_changed: false,
        }
    }

    /// Replays one sealed list.  Stops at the first fault; the remaining
    /// commands of the list are skipped.
    pub fn execute(
        &mut self,
        gl: &mut dyn Backend,
        cache: &MappedCache,
        pool: &StagingPool,
        list: &CommandList,
    ) -> Result<(), Error> {
        let guard = list.executable()?;
        let named = match list.debug_name() {
            Some(name) if self.features.debug_output => {
                gl.push_debug_group(&name);
                true
            }
            _ => false,
        };
        let mut result = Ok(());
        for command in &guard.commands {
            result = self.execute_one(gl, cache, pool, command);
            if result.is_err() {
                break;
            }
        }
        if named {
            gl.pop_debug_group();
        }
        result
    }

    fn execute_one(
        &mut self,
        gl: &mut dyn Backend,
        cache: &MappedCache,
        pool: &StagingPool,
        command: &Command,
    ) -> Result<(), Error> {
        match command {
            Command::SetFramebuffer(None) => gl.bind_framebuffer(0),
            Command::SetFramebuffer(Some(fb)) => {
                let handle = fb.ensure_created(gl)?;
                gl.bind_framebuffer(handle);
            }
            Command::SetPipeline(pipeline) => {
                //setting the current pipeline again is free
                if self
                    .pipeline
                    .as_ref()
                    .is_some_and(|p| Arc::ptr_eq(p, pipeline))
                {
                    return Ok(());
                }
                self.pipeline = Some(pipeline.clone());
                self.pipeline_changed = true;
                //slot assignment is per pipeline, so everything rebinds
                for set in self.sets.iter_mut().flatten() {
                    set.changed = true;
                }
                for vb in self.vertex_buffers.iter_mut().flatten() {
                    vb.changed = true;
                }
            }
            Command::SetResourceSet {
                index,
                set,
                dynamic_offsets,
            } => {
                let index = *index as usize;
                if self.sets.len() <= index {
                    self.sets.resize_with(index + 1, || None);
                }
                if let Some(existing) = &self.sets[index] {
                    if Arc::ptr_eq(&existing.set, set)
                        && existing.dynamic_offsets == *dynamic_offsets
                    {
                        return Ok(());
                    }
                }
                self.sets[index] = Some(StagedSet {
                    set: set.clone(),
                    dynamic_offsets: dynamic_offsets.clone(),
                    changed: true,
                });
            }
            Command::SetVertexBuffer {
                slot,
                buffer,
                offset,
            } => {
                let slot = *slot as usize;
                if self.vertex_buffers.len() <= slot {
                    self.vertex_buffers.resize_with(slot + 1, || None);
                }
                if let Some(existing) = &self.vertex_buffers[slot] {
                    if Arc::ptr_eq(&existing.buffer, buffer) && existing.offset == *offset {
                        return Ok(());
                    }
                }
                self.vertex_buffers[slot] = Some(StagedVertexBuffer {
                    buffer: buffer.clone(),
                    offset: *offset,
                    changed: true,
                });
            }
            Command::SetIndexBuffer { buffer, format } => {
                if let Some((existing, existing_format)) = &self.index_buffer {
                    if Arc::ptr_eq(existing, buffer) && existing_format == format {
                        return Ok(());
                    }
                }
                self.index_buffer = Some((buffer.clone(), *format));
                self.index_buffer_changed = true;
            }
            Command::SetViewport { index, viewport } => gl.set_viewport(*index, viewport),
            Command::SetScissor { index, rect } => gl.set_scissor(*index, rect),
            Command::ClearColor { target, rgba } => gl.clear_color(*target, *rgba),
            Command::ClearDepthStencil { depth, stencil } => {
                gl.clear_depth_stencil(*depth, *stencil)
            }
            Command::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => {
                let pipeline = self.flush_bindings(gl)?;
                gl.draw(
                    pipeline.topology(),
                    *vertex_count,
                    *instance_count,
                    *first_vertex,
                    *first_instance,
                );
            }
            Command::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            } => {
                if self.index_buffer.is_none() {
                    return Err(Error::InvalidCommandList {
                        reason: "indexed draw without an index buffer",
                    });
                }
                let pipeline = self.flush_bindings(gl)?;
                let format = self.index_buffer.as_ref().map(|(_, f)| *f).unwrap_or(IndexFormat::U32);
                gl.draw_indexed(
                    pipeline.topology(),
                    format,
                    *index_count,
                    *instance_count,
                    *first_index,
                    *vertex_offset,
                    *first_instance,
                );
            }
            Command::Dispatch {
                groups_x,
                groups_y,
                groups_z,
            } => {
                if !self.features.compute_shaders {
                    return Err(Error::UnsupportedOperation {
                        context: "compute dispatch",
                    });
                }
                let pipeline = self.flush_bindings(gl)?;
                if !pipeline.is_compute() {
                    return Err(Error::InvalidCommandList {
                        reason: "dispatch with a graphics pipeline",
                    });
                }
                gl.dispatch(*groups_x, *groups_y, *groups_z);
            }
            Command::UpdateBuffer {
                buffer,
                offset,
                data,
            } => {
                if cache.is_mapped(&MapKey::buffer(buffer)) {
                    return Err(Error::ResourceMapped);
                }
                let handle = buffer.ensure_created(gl)?;
                gl.update_buffer(handle, *offset, data.as_slice());
            }
            Command::CopyBuffer {
                src,
                dst,
                src_offset,
                dst_offset,
                len,
            } => {
                let src_handle = src.ensure_created(gl)?;
                let dst_handle = dst.ensure_created(gl)?;
                if self.features.copy_buffer {
                    gl.copy_buffer(src_handle, dst_handle, *src_offset, *dst_offset, *len);
                } else {
                    //staged round trip through the pool
                    let mut block = pool.rent(*len as usize);
                    gl.read_buffer(src_handle, *src_offset, block.as_mut_slice());
                    gl.update_buffer(dst_handle, *dst_offset, block.as_slice());
                }
            }
            Command::CopyTexture {
                src,
                src_region,
                dst,
                dst_origin,
                dst_mip_level,
                dst_array_layer,
            } => {
                let src_handle = src.ensure_created(gl)?;
                let dst_handle = dst.ensure_created(gl)?;
                if self.features.copy_image {
                    gl.copy_texture(
                        src_handle,
                        src_region,
                        dst_handle,
                        *dst_origin,
                        *dst_mip_level,
                        *dst_array_layer,
                    );
                } else {
                    let len = src_region.byte_len(src.descriptor().format) as usize;
                    let mut block = pool.rent(len);
                    gl.read_texture(src_handle, src.descriptor(), src_region, block.as_mut_slice());
                    let dst_region = TextureRegion {
                        x: dst_origin.0,
                        y: dst_origin.1,
                        z: dst_origin.2,
                        width: src_region.width,
                        height: src_region.height,
                        depth: src_region.depth,
                        mip_level: *dst_mip_level,
                        array_layer: *dst_array_layer,
                    };
                    gl.update_texture(dst_handle, dst.descriptor(), &dst_region, block.as_slice());
                }
            }
            Command::ResolveTexture { src, dst } => {
                let src_handle = src.ensure_created(gl)?;
                let dst_handle = dst.ensure_created(gl)?;
                let desc = dst.descriptor();
                if self.features.framebuffer_blit {
                    gl.resolve_texture(src_handle, dst_handle, desc.width, desc.height);
                } else {
                    let region = TextureRegion::full(desc);
                    let mut block = pool.rent(region.byte_len(desc.format) as usize);
                    gl.read_texture(src_handle, src.descriptor(), &region, block.as_mut_slice());
                    gl.update_texture(dst_handle, desc, &region, block.as_slice());
                }
            }
            Command::GenerateMipmaps(texture) => {
                let handle = texture.ensure_created(gl)?;
                gl.generate_mipmaps(handle);
            }
            Command::PushDebugGroup(name) => {
                if self.features.debug_output {
                    gl.push_debug_group(name);
                }
            }
            Command::PopDebugGroup => {
                if self.features.debug_output {
                    gl.pop_debug_group();
                }
            }
            Command::InsertDebugMarker(name) => {
                if self.features.debug_output {
                    gl.insert_debug_marker(name);
                }
            }
        }
        Ok(())
    }

    /// Applies every staged binding that changed since the last draw, then
    /// clears the changed flags.
    fn flush_bindings(&mut self, gl: &mut dyn Backend) -> Result<Arc<Pipeline>, Error> {
        let pipeline = self
            .pipeline
            .clone()
            .ok_or(Error::InvalidCommandList {
                reason: "draw without a pipeline",
            })?;
        if self.pipeline_changed {
            let handle = pipeline.ensure_created(gl)?;
            gl.bind_pipeline(handle);
            self.pipeline_changed = false;
        }
        for (set_index, staged) in self.sets.iter_mut().enumerate() {
            let Some(staged) = staged else { continue };
            if !staged.changed {
                continue;
            }
            if set_index >= pipeline.layouts().len() {
                return Err(Error::InvalidResourceSet {
                    reason: format!("set index {set_index} exceeds the pipeline's layouts"),
                });
            }
            activate_set(gl, &pipeline, set_index, staged)?;
            staged.changed = false;
        }
        for (slot, staged) in self.vertex_buffers.iter_mut().enumerate() {
            let Some(staged) = staged else { continue };
            if !staged.changed {
                continue;
            }
            let handle = staged.buffer.ensure_created(gl)?;
            let stride = pipeline.vertex_stride(slot as u32);
            gl.bind_vertex_buffer(slot as u32, handle, stride, staged.offset);
            staged.changed = false;
        }
        if self.index_buffer_changed {
            if let Some((buffer, format)) = &self.index_buffer {
                let handle = buffer.ensure_created(gl)?;
                gl.bind_index_buffer(handle, *format);
            }
            self.index_buffer_changed = false;
        }
        Ok(pipeline)
    }
}

/// Binds every element of one staged set at the slots the pipeline assigned.
/// Dynamic offsets are consumed in the declaration order of the layout's
/// dynamic elements.
fn activate_set(
    gl: &mut dyn Backend,
    pipeline: &Pipeline,
    set_index: usize,
    staged: &StagedSet,
) -> Result<(), Error> {
    let layout = &pipeline.layouts()[set_index];
    if !Arc::ptr_eq(layout, staged.set.layout()) {
        return Err(Error::InvalidResourceSet {
            reason: format!("set {set_index} was created with a different layout"),
        });
    }
    let mut next_dynamic = 0usize;
    for (element_index, (element, resource)) in layout
        .elements()
        .iter()
        .zip(staged.set.resources().iter())
        .enumerate()
    {
        let slot = pipeline.binding_slot(set_index, element_index);
        let dynamic = if element.dynamic_offset {
            let offset = staged.dynamic_offsets[next_dynamic];
            next_dynamic += 1;
            offset
        } else {
            0
        };
        match element.kind {
            BindingKind::UniformBuffer
            | BindingKind::StorageBufferReadOnly
            | BindingKind::StorageBufferReadWrite => {
                let (buffer, base, size) = buffer_range(resource)?;
                let handle = buffer.ensure_created(gl)?;
                let offset = base + dynamic;
                let size = size.saturating_sub(dynamic);
                if element.kind == BindingKind::UniformBuffer {
                    gl.bind_uniform_buffer(slot, handle, offset, size);
                } else {
                    gl.bind_storage_buffer(slot, handle, offset, size);
                }
            }
            BindingKind::TextureReadOnly => {
                let BoundResource::Texture(texture) = resource else {
                    return Err(invalid_element(set_index, element_index));
                };
                let handle = texture.ensure_created(gl)?;
                gl.bind_texture(slot, handle);
            }
            BindingKind::TextureReadWrite => {
                let BoundResource::Texture(texture) = resource else {
                    return Err(invalid_element(set_index, element_index));
                };
                let handle = texture.ensure_created(gl)?;
                gl.bind_image(slot, handle, true);
            }
            BindingKind::Sampler => {
                let BoundResource::Sampler(sampler) = resource else {
                    return Err(invalid_element(set_index, element_index));
                };
                let handle = sampler.ensure_created(gl)?;
                gl.bind_sampler(slot, handle);
            }
        }
    }
    Ok(())
}

fn buffer_range(resource: &BoundResource) -> Result<(&Arc<Buffer>, u64, u64), Error> {
    match resource {
        BoundResource::Buffer(buffer) => Ok((buffer, 0, buffer.size())),
        BoundResource::BufferRange {
            buffer,
            offset,
            size,
        } => Ok((buffer, *offset, *size)),
        _ => Err(Error::InvalidResourceSet {
            reason: "buffer binding holds a non-buffer resource".to_string(),
        }),
    }
}

fn invalid_element(set_index: usize, element_index: usize) -> Error {
    Error::InvalidResourceSet {
        reason: format!("set {set_index} element {element_index} holds the wrong resource kind"),
    }
}
