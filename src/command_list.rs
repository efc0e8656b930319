// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Recorded command lists.

A [`CommandList`] is a passive recording: commands are validated and appended
on the recording thread, and nothing native happens until the list is
submitted to the device and replayed by the executor on the execution thread.

Recording follows a begin/end protocol.  `begin` opens (or reopens) the list
and discards any previous recording, `end` seals it for submission, and every
recording call outside an open recording is a protocol violation reported on
the calling thread.  Because commands hold `Arc`s to the resources they
reference, a recorded list keeps those resources alive until it is re-begun or
disposed; inline update data is held in staging blocks that return to the pool
at the same points.
*/

use crate::backend::{IndexFormat, ScissorRect, TextureRegion, Viewport};
use crate::error::Error;
use crate::resource::{Buffer, Framebuffer, Pipeline, ResourceSet, Texture};
use crate::staging::{StagingBlock, StagingPool};
use crate::worker::SubmissionCount;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// One recorded command.  Replayed in order by the executor.
pub(crate) enum Command {
    /// `None` targets the default (swapchain) framebuffer.
    SetFramebuffer(Option<Arc<Framebuffer>>),
    SetPipeline(Arc<Pipeline>),
    SetResourceSet {
        index: u32,
        set: Arc<ResourceSet>,
        dynamic_offsets: Vec<u64>,
    },
    SetVertexBuffer {
        slot: u32,
        buffer: Arc<Buffer>,
        offset: u64,
    },
    SetIndexBuffer {
        buffer: Arc<Buffer>,
        format: IndexFormat,
    },
    SetViewport {
        index: u32,
        viewport: Viewport,
    },
    SetScissor {
        index: u32,
        rect: ScissorRect,
    },
    ClearColor {
        target: u32,
        rgba: [f32; 4],
    },
    ClearDepthStencil {
        depth: f32,
        stencil: u8,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    Dispatch {
        groups_x: u32,
        groups_y: u32,
        groups_z: u32,
    },
    UpdateBuffer {
        buffer: Arc<Buffer>,
        offset: u64,
        data: StagingBlock,
    },
    CopyBuffer {
        src: Arc<Buffer>,
        dst: Arc<Buffer>,
        src_offset: u64,
        dst_offset: u64,
        len: u64,
    },
    CopyTexture {
        src: Arc<Texture>,
        src_region: TextureRegion,
        dst: Arc<Texture>,
        dst_origin: (u32, u32, u32),
        dst_mip_level: u32,
        dst_array_layer: u32,
    },
    ResolveTexture {
        src: Arc<Texture>,
        dst: Arc<Texture>,
    },
    GenerateMipmaps(Arc<Texture>),
    PushDebugGroup(String),
    PopDebugGroup,
    InsertDebugMarker(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordState {
    Initial,
    Recording,
    Executable,
}

pub(crate) struct Inner {
    state: RecordState,
    pub commands: Vec<Command>,
}

pub struct CommandList {
    inner: Mutex<Inner>,
    pool: StagingPool,
    label: Mutex<Option<String>>,
    disposed: AtomicBool,
    submissions: SubmissionCount,
}

impl CommandList {
    pub(crate) fn new(pool: StagingPool) -> CommandList {
        CommandList {
            inner: Mutex::new(Inner {
                state: RecordState::Initial,
                commands: Vec::new(),
            }),
            pool,
            label: Mutex::new(None),
            disposed: AtomicBool::new(false),
            submissions: SubmissionCount::new(),
        }
    }

    pub fn set_debug_name(&self, name: &str) {
        *self.label.lock().unwrap() = Some(name.to_string());
    }

    pub fn debug_name(&self) -> Option<String> {
        self.label.lock().unwrap().clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Opens a recording, discarding any previous one.  Staging blocks held
    /// by the previous recording return to the pool here.
    pub fn begin(&self) -> Result<(), Error> {
        if self.is_disposed() {
            return Err(Error::InvalidCommandList {
                reason: "begin on a disposed command list",
            });
        }
        let mut inner = self.inner.lock().unwrap();
        inner.commands.clear();
        inner.state = RecordState::Recording;
        Ok(())
    }

    /// Seals the recording for submission.
    pub fn end(&self) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != RecordState::Recording {
            return Err(Error::InvalidCommandList {
                reason: "end without a matching begin",
            });
        }
        inner.state = RecordState::Executable;
        Ok(())
    }

    fn record(&self, command: Command) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != RecordState::Recording {
            return Err(Error::InvalidCommandList {
                reason: "recording outside begin/end",
            });
        }
        inner.commands.push(command);
        Ok(())
    }

    /// Targets a framebuffer; `None` targets the swapchain.
    pub fn set_framebuffer(&self, framebuffer: Option<&Arc<Framebuffer>>) -> Result<(), Error> {
        self.record(Command::SetFramebuffer(framebuffer.cloned()))
    }

    pub fn set_pipeline(&self, pipeline: &Arc<Pipeline>) -> Result<(), Error> {
        self.record(Command::SetPipeline(pipeline.clone()))
    }

    pub fn set_resource_set(
        &self,
        index: u32,
        set: &Arc<ResourceSet>,
        dynamic_offsets: &[u64],
    ) -> Result<(), Error> {
        if dynamic_offsets.len() != set.layout().dynamic_offset_count() {
            return Err(Error::InvalidResourceSet {
                reason: format!(
                    "layout expects {} dynamic offsets but {} were supplied",
                    set.layout().dynamic_offset_count(),
                    dynamic_offsets.len()
                ),
            });
        }
        self.record(Command::SetResourceSet {
            index,
            set: set.clone(),
            dynamic_offsets: dynamic_offsets.to_vec(),
        })
    }

    pub fn set_vertex_buffer(
        &self,
        slot: u32,
        buffer: &Arc<Buffer>,
        offset: u64,
    ) -> Result<(), Error> {
        self.record(Command::SetVertexBuffer {
            slot,
            buffer: buffer.clone(),
            offset,
        })
    }

    pub fn set_index_buffer(&self, buffer: &Arc<Buffer>, format: IndexFormat) -> Result<(), Error> {
        self.record(Command::SetIndexBuffer {
            buffer: buffer.clone(),
            format,
        })
    }

    pub fn set_viewport(&self, index: u32, viewport: Viewport) -> Result<(), Error> {
        self.record(Command::SetViewport { index, viewport })
    }

    pub fn set_scissor(&self, index: u32, rect: ScissorRect) -> Result<(), Error> {
        self.record(Command::SetScissor { index, rect })
    }

    pub fn clear_color(&self, target: u32, rgba: [f32; 4]) -> Result<(), Error> {
        self.record(Command::ClearColor { target, rgba })
    }

    pub fn clear_depth_stencil(&self, depth: f32, stencil: u8) -> Result<(), Error> {
        self.record(Command::ClearDepthStencil { depth, stencil })
    }

    pub fn draw(
        &self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<(), Error> {
        self.record(Command::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        })
    }

    pub fn draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> Result<(), Error> {
        self.record(Command::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        })
    }

    pub fn dispatch(&self, groups_x: u32, groups_y: u32, groups_z: u32) -> Result<(), Error> {
        self.record(Command::Dispatch {
            groups_x,
            groups_y,
            groups_z,
        })
    }

    /// Records an inline buffer write.  The bytes are captured into a staging
    /// block at record time; the source slice is not referenced afterwards.
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
                context: "command list update_buffer",
            });
        }
        let block = self.pool.stage(data);
        self.record(Command::UpdateBuffer {
            buffer: buffer.clone(),
            offset,
            data: block,
        })
    }

    pub fn copy_buffer(
        &self,
        src: &Arc<Buffer>,
        dst: &Arc<Buffer>,
        src_offset: u64,
        dst_offset: u64,
        len: u64,
    ) -> Result<(), Error> {
        if src_offset.checked_add(len).is_none_or(|end| end > src.size()) {
            return Err(Error::OutOfBounds {
                offset: src_offset,
                len,
                capacity: src.size(),
                context: "copy_buffer source",
            });
        }
        if dst_offset.checked_add(len).is_none_or(|end| end > dst.size()) {
            return Err(Error::OutOfBounds {
                offset: dst_offset,
                len,
                capacity: dst.size(),
                context: "copy_buffer destination",
            });
        }
        self.record(Command::CopyBuffer {
            src: src.clone(),
            dst: dst.clone(),
            src_offset,
            dst_offset,
            len,
        })
    }

    pub fn copy_texture(
        &self,
        src: &Arc<Texture>,
        src_region: TextureRegion,
        dst: &Arc<Texture>,
        dst_origin: (u32, u32, u32),
        dst_mip_level: u32,
        dst_array_layer: u32,
    ) -> Result<(), Error> {
        self.record(Command::CopyTexture {
            src: src.clone(),
            src_region,
            dst: dst.clone(),
            dst_origin,
            dst_mip_level,
            dst_array_layer,
        })
    }

    /// Records a multisample resolve from `src` into `dst`.
    pub fn resolve_texture(&self, src: &Arc<Texture>, dst: &Arc<Texture>) -> Result<(), Error> {
        self.record(Command::ResolveTexture {
            src: src.clone(),
            dst: dst.clone(),
        })
    }

    pub fn generate_mipmaps(&self, texture: &Arc<Texture>) -> Result<(), Error> {
        self.record(Command::GenerateMipmaps(texture.clone()))
    }

    pub fn push_debug_group(&self, name: &str) -> Result<(), Error> {
        self.record(Command::PushDebugGroup(name.to_string()))
    }

    pub fn pop_debug_group(&self) -> Result<(), Error> {
        self.record(Command::PopDebugGroup)
    }

    pub fn insert_debug_marker(&self, name: &str) -> Result<(), Error> {
        self.record(Command::InsertDebugMarker(name.to_string()))
    }

    /// Locks the recording for replay.  Fails unless the list was sealed.
    /// The lock is held for the whole replay, which also blocks re-recording
    /// while the list is being executed.  A dispose requested after submission
    /// does not stop the replay; the free is deferred instead.
    pub(crate) fn executable(&self) -> Result<MutexGuard<'_, Inner>, Error> {
        let inner = self.inner.lock().unwrap();
        if inner.state != RecordState::Executable {
            return Err(Error::InvalidCommandList {
                reason: "submit without end",
            });
        }
        Ok(inner)
    }

    /// Executions queued but not yet completed.  Drives the deferred
    /// disposal protocol on the execution thread.
    pub(crate) fn submissions(&self) -> &SubmissionCount {
        &self.submissions
    }

    /// Marks the list disposed.  Returns true the first time.
    pub(crate) fn request_dispose(&self) -> bool {
        !self.disposed.swap(true, Ordering::AcqRel)
    }

    /// Frees the recording.  Runs on the execution thread once the list is no
    /// longer in flight.
    pub(crate) fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.commands.clear();
        inner.state = RecordState::Initial;
    }
}

impl std::fmt::Debug for CommandList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandList")
            .field("name", &self.debug_name())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
