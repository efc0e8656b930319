// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*! commands_and_threads is a command-queue core for graphics APIs that only
tolerate one thread.

Older native APIs (OpenGL being the archetype) bind the rendering context to a
single thread, while the applications built on them want to record rendering
work, stream resource updates, and manage resource lifetimes from wherever is
convenient.  This crate bridges the two: callers on any thread talk to a
[`Device`], and everything native funnels through one background execution
thread that owns the context and processes a strict FIFO queue of work.

The pieces:

* **Deferred resources.**  Buffers, textures, framebuffers, shaders, pipelines
  and samplers are plain handles at creation; the native object is allocated
  lazily, on the execution thread, the first time it is needed.  Disposal is
  the mirror image: requested from anywhere, idempotent, freed exactly once on
  the execution thread.
* **Command lists.**  Passive recordings replayed by a stateful executor that
  activates pipelines and resource sets lazily, so redundant state-setting is
  free and a pipeline that is never drawn with is never built.
* **A staging pool.**  Every upload, readback, and fallback copy moves through
  recycled capacity-tagged blocks instead of fresh allocations.
* **Mapping.**  Refcounted per-subresource maps; buffers map natively,
  textures through a staged round trip.
* **A loaded backend.**  The native API surfaces as a flat table of entry
  points resolved by name, with capability flags derived from what actually
  loaded.  Optional fast paths fall back to staged equivalents, changing the
  route but never the result.

Faults raised on the execution thread do not crash it; they accumulate and
surface to the next thread that performs a blocking call (`map_*`,
`initialize`, `wait_for_idle`), several at once as one [`Error::Aggregate`].
Protocol violations are reported synchronously on the thread that committed
them.

The backend seam ([`backend::Backend`]) is a trait, so the whole core is
testable against an in-memory fake; the shipped implementation is
[`gl::GlBackend`].
*/

pub mod backend;
mod command_list;
mod device;
mod error;
mod executor;
pub mod gl;
mod mapped;
mod resource;
mod staging;
#[cfg(test)]
mod testutil;
mod worker;

pub use backend::{
    AddressMode, Backend, BackendFeatures, BufferUsage, ContextProvider, FilterMode, IndexFormat,
    MapMode, NativeHandle, ObjectKind, PixelFormat, PrimitiveTopology, SamplerDescriptor,
    ScissorRect, ShaderStage, TextureDescriptor, TextureRegion, Viewport,
};
pub use command_list::CommandList;
pub use device::Device;
pub use error::Error;
pub use mapped::MappedResource;
pub use resource::{
    BindingKind, BoundResource, Buffer, ComputePipelineDescriptor, DeviceResource, Framebuffer,
    GraphicsPipelineDescriptor, LayoutElement, Pipeline, ResourceLayout, ResourceSet, Sampler,
    Shader, Texture,
};
pub use staging::{MIN_BLOCK_CAPACITY, StagingBlock, StagingPool};
pub use worker::AnyResource;
