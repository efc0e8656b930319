// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The execution thread.

All native work funnels through one background thread that owns the context,
the backend, the mapped-resource cache, and the executor.  Other threads talk
to it exclusively through a FIFO channel of [`WorkItem`]s; items are processed
strictly in submission order, one at a time.

Blocking operations (map, initialize, wait-for-idle, terminate) carry a
bounded reply channel the submitting thread parks on.  Everything else is fire
and forget: faults raised while processing those items are pushed onto a
shared list and surface to whichever thread hits the next synchronization
point.

In debug builds the native error flag is polled once after every item, so a
stray native error is attributed to at least the right work item.  Release
builds skip the poll; it forces a pipeline sync on some drivers.
*/

use crate::backend::{Backend, ContextProvider, MapMode, TextureRegion};
use crate::command_list::CommandList;
use crate::error::Error;
use crate::executor::CommandExecutor;
use crate::mapped::{MapKey, MappedCache, MappedResource};
use crate::resource::{
    Buffer, DeferredResource, Framebuffer, Pipeline, Sampler, Shader, Texture,
};
use crate::staging::{StagingBlock, StagingPool};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{Receiver, Sender, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Any deferred resource, for initialization and disposal work items.
#[derive(Debug, Clone)]
pub enum AnyResource {
    Buffer(Arc<Buffer>),
    Texture(Arc<Texture>),
    Framebuffer(Arc<Framebuffer>),
    Shader(Arc<Shader>),
    Pipeline(Arc<Pipeline>),
    Sampler(Arc<Sampler>),
}

impl AnyResource {
    pub(crate) fn as_deferred(&self) -> &dyn DeferredResource {
        match self {
            AnyResource::Buffer(r) => r.as_ref(),
            AnyResource::Texture(r) => r.as_ref(),
            AnyResource::Framebuffer(r) => r.as_ref(),
            AnyResource::Shader(r) => r.as_ref(),
            AnyResource::Pipeline(r) => r.as_ref(),
            AnyResource::Sampler(r) => r.as_ref(),
        }
    }
}

macro_rules! any_resource_from {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<Arc<$ty>> for AnyResource {
                fn from(r: Arc<$ty>) -> AnyResource {
                    AnyResource::$variant(r)
                }
            }
            impl From<&Arc<$ty>> for AnyResource {
                fn from(r: &Arc<$ty>) -> AnyResource {
                    AnyResource::$variant(r.clone())
                }
            }
        )*
    };
}

any_resource_from! {
    Buffer => Buffer,
    Texture => Texture,
    Framebuffer => Framebuffer,
    Shader => Shader,
    Pipeline => Pipeline,
    Sampler => Sampler,
}

/// What a map or unmap item targets.
pub(crate) enum MapTarget {
    Buffer(Arc<Buffer>),
    Texture(Arc<Texture>, u32),
}

impl MapTarget {
    fn key(&self) -> MapKey {
        match self {
            MapTarget::Buffer(buffer) => MapKey::buffer(buffer),
            MapTarget::Texture(texture, subresource) => MapKey::texture(texture, *subresource),
        }
    }
}

/// One unit of work for the execution thread.
pub(crate) enum WorkItem {
    ExecuteList(Arc<CommandList>),
    Map {
        target: MapTarget,
        mode: MapMode,
        reply: SyncSender<Result<MappedResource, Error>>,
    },
    Unmap {
        target: MapTarget,
    },
    UpdateBuffer {
        buffer: Arc<Buffer>,
        offset: u64,
        data: StagingBlock,
    },
    UpdateTexture {
        texture: Arc<Texture>,
        region: TextureRegion,
        data: StagingBlock,
    },
    InitializeResource {
        resource: AnyResource,
        reply: SyncSender<Result<(), Error>>,
    },
    DisposeResource(AnyResource),
    DisposeCommandList(Arc<CommandList>),
    SwapBuffers,
    SetVsync(bool),
    Resize {
        width: u32,
        height: u32,
    },
    WaitForIdle {
        full_flush: bool,
        reply: SyncSender<()>,
    },
    Run(Box<dyn FnOnce(&mut dyn Backend) + Send>),
    Terminate {
        reply: SyncSender<()>,
    },
}

impl WorkItem {
    fn context(&self) -> &'static str {
        match self {
            WorkItem::ExecuteList(..) => "execute list",
            WorkItem::Map { .. } => "map",
            WorkItem::Unmap { .. } => "unmap",
            WorkItem::UpdateBuffer { .. } => "update buffer",
            WorkItem::UpdateTexture { .. } => "update texture",
            WorkItem::InitializeResource { .. } => "initialize resource",
            WorkItem::DisposeResource(..) => "dispose resource",
            WorkItem::DisposeCommandList(..) => "dispose command list",
            WorkItem::SwapBuffers => "swap buffers",
            WorkItem::SetVsync(..) => "set vsync",
            WorkItem::Resize { .. } => "resize",
            WorkItem::WaitForIdle { .. } => "wait for idle",
            WorkItem::Run(..) => "run",
            WorkItem::Terminate { .. } => "terminate",
        }
    }
}

/// Submission counter used by the deferred command list disposal protocol.
///
/// A list disposed while submissions are still queued is parked until its last
/// queued execution completes, then freed on the execution thread.
#[derive(Debug)]
pub(crate) struct SubmissionCount(AtomicU32);

impl SubmissionCount {
    pub fn new() -> SubmissionCount {
        SubmissionCount(AtomicU32::new(0))
    }

    pub fn begin(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    pub fn end(&self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn pending(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }
}

struct ExecState {
    gl: Box<dyn Backend>,
    context: Box<dyn ContextProvider>,
    pool: StagingPool,
    cache: MappedCache,
    executor: CommandExecutor,
    faults: Arc<Mutex<Vec<Error>>>,
    //lists whose dispose arrived while executions were still queued
    pending_dispose: Vec<Arc<CommandList>>,
}

impl ExecState {
    fn fault(&self, error: Error) {
        logwise::warn_sync!(
            "execution thread fault: {error}",
            error = logwise::privacy::LogIt(&error)
        );
        self.faults.lock().unwrap().push(error);
    }

    /// Returns false when the loop should exit.
    fn process(&mut self, item: WorkItem) -> bool {
        match item {
            WorkItem::ExecuteList(list) => {
                let result = self
                    .executor
                    .execute(self.gl.as_mut(), &self.cache, &self.pool, &list);
                list.submissions().end();
                if let Err(e) = result {
                    self.fault(e);
                }
                self.reap_disposed_lists();
            }
            WorkItem::Map {
                target,
                mode,
                reply,
            } => {
                let result = match &target {
                    MapTarget::Buffer(buffer) => {
                        self.cache.map_buffer(self.gl.as_mut(), buffer, mode)
                    }
                    MapTarget::Texture(texture, subresource) => self.cache.map_texture(
                        self.gl.as_mut(),
                        &self.pool,
                        texture,
                        *subresource,
                        mode,
                    ),
                };
                //the requester may have given up; that loses the reply, not the map
                let _ = reply.send(result);
            }
            WorkItem::Unmap { target } => {
                if let Err(e) = self.cache.unmap(self.gl.as_mut(), target.key()) {
                    self.fault(e);
                }
            }
            WorkItem::UpdateBuffer {
                buffer,
                offset,
                data,
            } => {
                if self.cache.is_mapped(&MapKey::buffer(&buffer)) {
                    self.fault(Error::ResourceMapped);
                    return true;
                }
                match buffer.ensure_created(self.gl.as_mut()) {
                    Ok(handle) => self.gl.update_buffer(handle, offset, data.as_slice()),
                    Err(e) => self.fault(e),
                }
            }
            WorkItem::UpdateTexture {
                texture,
                region,
                data,
            } => match texture.ensure_created(self.gl.as_mut()) {
                Ok(handle) => {
                    self.gl
                        .update_texture(handle, texture.descriptor(), &region, data.as_slice())
                }
                Err(e) => self.fault(e),
            },
            WorkItem::InitializeResource { resource, reply } => {
                let result = resource
                    .as_deferred()
                    .ensure_created(self.gl.as_mut())
                    .map(|_| ());
                let _ = reply.send(result);
            }
            WorkItem::DisposeResource(resource) => {
                resource.as_deferred().destroy(self.gl.as_mut());
            }
            WorkItem::DisposeCommandList(list) => {
                if list.submissions().pending() > 0 {
                    self.pending_dispose.push(list);
                } else {
                    list.clear();
                }
            }
            WorkItem::SwapBuffers => {
                self.gl.flush();
                if let Err(e) = self.context.swap_buffers() {
                    self.fault(e);
                }
            }
            WorkItem::SetVsync(enabled) => self.context.set_vsync(enabled),
            WorkItem::Resize { width, height } => self.context.resize(width, height),
            WorkItem::WaitForIdle { full_flush, reply } => {
                if full_flush {
                    self.gl.finish();
                }
                let _ = reply.send(());
            }
            WorkItem::Run(thunk) => thunk(self.gl.as_mut()),
            WorkItem::Terminate { reply } => {
                self.context.clear_current();
                self.context.delete();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn reap_disposed_lists(&mut self) {
        self.pending_dispose.retain(|list| {
            if list.submissions().pending() == 0 {
                list.clear();
                false
            } else {
                true
            }
        });
    }
}

/// Spawns the execution thread.  The backend and context move into it and
/// never come back.
pub(crate) fn spawn(
    gl: Box<dyn Backend>,
    context: Box<dyn ContextProvider>,
    pool: StagingPool,
    faults: Arc<Mutex<Vec<Error>>>,
) -> Result<(Sender<WorkItem>, JoinHandle<()>), Error> {
    let (sender, receiver): (Sender<WorkItem>, Receiver<WorkItem>) = std::sync::mpsc::channel();
    let handle = std::thread::Builder::new()
        .name("gpu_exec".to_string())
        .spawn(move || {
            let features = gl.features();
            let mut state = ExecState {
                gl,
                context,
                pool,
                cache: MappedCache::new(),
                executor: CommandExecutor::new(features),
                faults,
                pending_dispose: Vec::new(),
            };
            if let Err(e) = state.context.make_current() {
                state.fault(e);
                //without a current context nothing can run; dropping the
                //receiver makes every sender observe termination
                return;
            }
            logwise::info_sync!("execution thread running");
            while let Ok(item) = receiver.recv() {
                let context = item.context();
                if !state.process(item) {
                    break;
                }
                //debug-only error flag poll; forces a sync on some drivers
                if cfg!(debug_assertions) {
                    let code = state.gl.last_error();
                    if code != 0 {
                        state.fault(Error::Native { code, context });
                    }
                }
            }
            logwise::info_sync!("execution thread exiting");
        })
        .map_err(Error::ThreadSpawn)?;
    Ok((sender, handle))
}
