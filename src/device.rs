// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The device facade.

[`Device`] is the only entry point callers need.  It spawns the execution
thread at construction, hands out deferred resources and command lists, and
turns every mutating call into a work item on the FIFO queue.  All of its
methods are safe to call from any thread.

Two kinds of failure reach callers here.  Protocol violations detected on the
calling thread (out-of-bounds updates, recording misuse, malformed sets) come
back synchronously from the method that caused them.  Faults raised on the
execution thread are collected and delivered to whichever thread next performs
a blocking call (`map_*`, `initialize`, `wait_for_idle`); several accumulated
faults arrive as one [`Error::Aggregate`].
*/

use crate::backend::{
    Backend, BackendFeatures, BufferUsage, ContextProvider, MapMode, SamplerDescriptor,
    ShaderStage, TextureDescriptor, TextureRegion,
};
use crate::command_list::CommandList;
use crate::error::Error;
use crate::mapped::MappedResource;
use crate::resource::{
    BoundResource, Buffer, ComputePipelineDescriptor, Framebuffer, GraphicsPipelineDescriptor,
    LayoutElement, Pipeline, ResourceLayout, ResourceSet, Sampler, Shader, Texture,
};
use crate::staging::StagingPool;
use crate::worker::{self, AnyResource, MapTarget, WorkItem};
use std::sync::mpsc::{Sender, sync_channel};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

pub struct Device {
    sender: Sender<WorkItem>,
    pool: StagingPool,
    faults: Arc<Mutex<Vec<Error>>>,
    features: BackendFeatures,
    thread: Option<JoinHandle<()>>,
}

impl Device {
    /// Spawns the execution thread and moves the backend and context into it.
    ///
    /// The context must not be current on any thread; the execution thread
    /// makes it current before the first native call.
    pub fn new(
        backend: Box<dyn Backend>,
        context: Box<dyn ContextProvider>,
    ) -> Result<Device, Error> {
        let features = backend.features();
        let pool = StagingPool::new();
        let faults = Arc::new(Mutex::new(Vec::new()));
        let (sender, thread) = worker::spawn(backend, context, pool.clone(), faults.clone())?;
        logwise::info_sync!("device created");
        Ok(Device {
            sender,
            pool,
            faults,
            features,
            thread: Some(thread),
        })
    }

    pub fn features(&self) -> BackendFeatures {
        self.features
    }

    fn send(&self, item: WorkItem) -> Result<(), Error> {
        self.sender.send(item).map_err(|_| self.terminated())
    }

    /// The execution thread is gone.  Surface the fault that killed it when
    /// one was stored; plain termination otherwise.
    fn terminated(&self) -> Error {
        self.check_faults().err().unwrap_or(Error::DeviceTerminated)
    }

    /// Drains accumulated execution-thread faults.
    fn check_faults(&self) -> Result<(), Error> {
        let mut faults = self.faults.lock().unwrap();
        if faults.is_empty() {
            Ok(())
        } else {
            Err(Error::aggregate(std::mem::take(&mut *faults)))
        }
    }

    // --- resource factories (nothing native happens here) ---

    /// Creates a buffer.  Initial contents, if any, upload when the buffer is
    /// first used natively.
    pub fn create_buffer(
        &self,
        size: u64,
        usage: BufferUsage,
        initial_data: Option<&[u8]>,
    ) -> Result<Arc<Buffer>, Error> {
        let staged = match initial_data {
            Some(bytes) => {
                if bytes.len() as u64 > size {
                    return Err(Error::OutOfBounds {
                        offset: 0,
                        len: bytes.len() as u64,
                        capacity: size,
                        context: "create_buffer initial data",
                    });
                }
                Some(self.pool.stage(bytes))
            }
            None => None,
        };
        Ok(Arc::new(Buffer::new(size, usage, staged)))
    }

    /// Creates a texture.  Initial contents, if any, must cover exactly mip 0
    /// of layer 0 and upload on first native use.
    pub fn create_texture(
        &self,
        desc: TextureDescriptor,
        initial_data: Option<&[u8]>,
    ) -> Result<Arc<Texture>, Error> {
        let staged = match initial_data {
            Some(bytes) => {
                let region = TextureRegion::full(&desc);
                let expected = region.byte_len(desc.format);
                if bytes.len() as u64 != expected {
                    return Err(Error::OutOfBounds {
                        offset: 0,
                        len: bytes.len() as u64,
                        capacity: expected,
                        context: "create_texture initial data",
                    });
                }
                Some((self.pool.stage(bytes), region))
            }
            None => None,
        };
        Ok(Arc::new(Texture::new(desc, staged)))
    }

    pub fn create_framebuffer(
        &self,
        color_targets: Vec<Arc<Texture>>,
        depth_target: Option<Arc<Texture>>,
    ) -> Arc<Framebuffer> {
        Arc::new(Framebuffer::new(color_targets, depth_target))
    }

    pub fn create_shader(&self, stage: ShaderStage, source: &[u8]) -> Arc<Shader> {
        Arc::new(Shader::new(stage, source.to_vec()))
    }

    pub fn create_sampler(&self, desc: SamplerDescriptor) -> Arc<Sampler> {
        Arc::new(Sampler::new(desc))
    }

    pub fn create_graphics_pipeline(&self, desc: GraphicsPipelineDescriptor) -> Arc<Pipeline> {
        Arc::new(Pipeline::graphics(desc))
    }

    pub fn create_compute_pipeline(&self, desc: ComputePipelineDescriptor) -> Arc<Pipeline> {
        Arc::new(Pipeline::compute(desc))
    }

    pub fn create_resource_layout(&self, elements: Vec<LayoutElement>) -> Arc<ResourceLayout> {
        Arc::new(ResourceLayout::new(elements))
    }

    pub fn create_resource_set(
        &self,
        layout: &Arc<ResourceLayout>,
        resources: Vec<BoundResource>,
    ) -> Result<Arc<ResourceSet>, Error> {
        Ok(Arc::new(ResourceSet::new(layout.clone(), resources)?))
    }

    pub fn create_command_list(&self) -> Arc<CommandList> {
        Arc::new(CommandList::new(self.pool.clone()))
    }

    // --- lifecycle ---

    /// Forces native creation now instead of at first use.  Blocks until the
    /// execution thread has processed the request.
    pub fn initialize(&self, resource: impl Into<AnyResource>) -> Result<(), Error> {
        let (reply, result) = sync_channel(1);
        self.send(WorkItem::InitializeResource {
            resource: resource.into(),
            reply,
        })?;
        result.recv().map_err(|_| self.terminated())??;
        self.check_faults()
    }

    /// Requests disposal.  Safe to call from any thread and any number of
    /// times; the native free happens once, on the execution thread, after
    /// all previously queued work.
    pub fn dispose(&self, resource: impl Into<AnyResource>) -> Result<(), Error> {
        let resource = resource.into();
        if resource.as_deferred().request_dispose() {
            self.send(WorkItem::DisposeResource(resource))?;
        }
        Ok(())
    }

    /// Disposes a command list.  If executions of it are still queued, the
    /// recording is freed after the last one completes.
    pub fn dispose_command_list(&self, list: &Arc<CommandList>) -> Result<(), Error> {
        if list.request_dispose() {
            self.send(WorkItem::DisposeCommandList(list.clone()))?;
        }
        Ok(())
    }

    // --- updates and submission ---

    /// Queues a buffer write.  The bytes are captured before this returns;
    /// the caller's slice is not referenced afterwards.
    pub fn update_buffer(
        &self,
        buffer: &Arc<Buffer>,
        offset: u64,
        data: &[u8],
    ) -> Result<(), Error> {
        //checked add: a huge offset must not wrap past the capacity test
        if offset
            .checked_add(data.len() as u64)
            .is_none_or(|end| end > buffer.size())
        {
            return Err(Error::OutOfBounds {
                offset,
                len: data.len() as u64,
                capacity: buffer.size(),
                context: "update_buffer",
            });
        }
        self.send(WorkItem::UpdateBuffer {
            buffer: buffer.clone(),
            offset,
            data: self.pool.stage(data),
        })
    }

    /// Queues a texture region write.
    pub fn update_texture(
        &self,
        texture: &Arc<Texture>,
        region: TextureRegion,
        data: &[u8],
    ) -> Result<(), Error> {
        let expected = region.byte_len(texture.descriptor().format);
        if data.len() as u64 != expected {
            return Err(Error::OutOfBounds {
                offset: 0,
                len: data.len() as u64,
                capacity: expected,
                context: "update_texture",
            });
        }
        self.send(WorkItem::UpdateTexture {
            texture: texture.clone(),
            region,
            data: self.pool.stage(data),
        })
    }

    /// Queues a sealed command list for execution.
    pub fn submit(&self, list: &Arc<CommandList>) -> Result<(), Error> {
        if list.is_disposed() {
            return Err(Error::InvalidCommandList {
                reason: "submit of a disposed command list",
            });
        }
        list.submissions().begin();
        self.send(WorkItem::ExecuteList(list.clone()))
    }

    // --- mapping ---

    /// Maps a buffer.  Blocks until all previously queued work has executed
    /// and the map is live.  Mapping an already-mapped buffer with the same
    /// mode returns the same pointer and adds a reference.
    pub fn map_buffer(
        &self,
        buffer: &Arc<Buffer>,
        mode: MapMode,
    ) -> Result<MappedResource, Error> {
        self.map(MapTarget::Buffer(buffer.clone()), mode)
    }

    /// Maps one texture subresource through a staged round trip.
    pub fn map_texture(
        &self,
        texture: &Arc<Texture>,
        subresource: u32,
        mode: MapMode,
    ) -> Result<MappedResource, Error> {
        self.map(MapTarget::Texture(texture.clone(), subresource), mode)
    }

    fn map(&self, target: MapTarget, mode: MapMode) -> Result<MappedResource, Error> {
        let (reply, result) = sync_channel(1);
        self.send(WorkItem::Map {
            target,
            mode,
            reply,
        })?;
        let mapped = result.recv().map_err(|_| self.terminated())??;
        self.check_faults()?;
        Ok(mapped)
    }

    /// Releases one buffer map reference.  Does not block; a protocol
    /// violation here (unmapping something not mapped) surfaces as a fault at
    /// the next blocking call.
    pub fn unmap_buffer(&self, buffer: &Arc<Buffer>) -> Result<(), Error> {
        self.send(WorkItem::Unmap {
            target: MapTarget::Buffer(buffer.clone()),
        })
    }

    /// Releases one texture subresource map reference.  A writable map writes
    /// its staged bytes back on the final release.
    pub fn unmap_texture(&self, texture: &Arc<Texture>, subresource: u32) -> Result<(), Error> {
        self.send(WorkItem::Unmap {
            target: MapTarget::Texture(texture.clone(), subresource),
        })
    }

    // --- presentation and synchronization ---

    pub fn swap_buffers(&self) -> Result<(), Error> {
        self.send(WorkItem::SwapBuffers)
    }

    pub fn set_vsync(&self, enabled: bool) -> Result<(), Error> {
        self.send(WorkItem::SetVsync(enabled))
    }

    /// Notifies the context that the swapchain surface changed size.
    pub fn resize(&self, width: u32, height: u32) -> Result<(), Error> {
        self.send(WorkItem::Resize { width, height })
    }

    /// Blocks until every previously queued item has executed, then surfaces
    /// accumulated faults.  With `full_flush` the native queue is drained too.
    pub fn wait_for_idle(&self, full_flush: bool) -> Result<(), Error> {
        let (reply, done) = sync_channel(1);
        self.send(WorkItem::WaitForIdle { full_flush, reply })?;
        done.recv().map_err(|_| self.terminated())?;
        self.check_faults()
    }

    /// Runs a closure on the execution thread with direct backend access,
    /// ordered like any other work item.
    pub fn run_on_execution_thread(
        &self,
        thunk: impl FnOnce(&mut dyn Backend) + Send + 'static,
    ) -> Result<(), Error> {
        self.send(WorkItem::Run(Box::new(thunk)))
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        let (reply, done) = sync_channel(1);
        if self.sender.send(WorkItem::Terminate { reply }).is_ok() {
            let _ = done.recv();
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("features", &self.features)
            .finish()
    }
}
