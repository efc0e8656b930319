// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Deferred GPU resources.

Every device object here (buffer, texture, framebuffer, shader, pipeline,
sampler) follows one lifecycle contract:

* Construction allocates nothing natively.  The object can be referenced,
  named, recorded into command lists, and shared across threads immediately.
* The native handle is allocated lazily, on the execution thread, the first
  time the resource is ensured before a native use (or eagerly through a
  queued initialization item when the caller supplied initial data).
* Dispose may be requested from any thread and is idempotent; the native free
  runs on the execution thread, at most once, guarded by a flag distinct from
  the request flag so repeated requests racing with pending use cannot
  double-free.
* A debug name set after creation is not applied immediately; it is cached and
  applied the next time the resource is ensured.

The shared behavior lives in [`DeferredState`] plus the provided methods of
[`DeferredResource`]; each concrete type supplies only its native create and
destroy calls.
*/

use crate::backend::{
    Backend, BufferUsage, NativeHandle, ObjectKind, PrimitiveTopology, SamplerDescriptor,
    ShaderStage, TextureDescriptor, TextureRegion,
};
use crate::error::Error;
use crate::staging::StagingBlock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Lifecycle bookkeeping shared by every deferred resource.
#[derive(Debug)]
pub(crate) struct DeferredState {
    created: AtomicBool,
    handle: AtomicU64,
    dispose_requested: AtomicBool,
    //distinct from dispose_requested: guards the native free itself
    destroyed: AtomicBool,
    label: Mutex<Option<String>>,
    name_changed: AtomicBool,
}

impl DeferredState {
    pub fn new() -> DeferredState {
        DeferredState {
            created: AtomicBool::new(false),
            handle: AtomicU64::new(0),
            dispose_requested: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            label: Mutex::new(None),
            name_changed: AtomicBool::new(false),
        }
    }

    pub fn is_created(&self) -> bool {
        self.created.load(Ordering::Acquire)
    }

    pub fn handle(&self) -> NativeHandle {
        self.handle.load(Ordering::Acquire)
    }

    pub fn dispose_requested(&self) -> bool {
        self.dispose_requested.load(Ordering::Acquire)
    }

    pub fn set_name(&self, name: &str) {
        *self.label.lock().unwrap() = Some(name.to_string());
        self.name_changed.store(true, Ordering::Release);
    }

    pub fn name(&self) -> Option<String> {
        self.label.lock().unwrap().clone()
    }

    fn label_or_anonymous(&self) -> String {
        self.name().unwrap_or_else(|| "<unnamed>".to_string())
    }
}

/// The lifecycle contract.  Concrete resources implement the four required
/// methods; everything else is provided.
pub(crate) trait DeferredResource {
    fn deferred_state(&self) -> &DeferredState;
    fn object_kind(&self) -> ObjectKind;
    /// Allocates the native object.  Called on the execution thread, at most
    /// once per resource, before any other native use.
    fn create_native(&self, gl: &mut dyn Backend) -> Result<NativeHandle, Error>;
    /// Frees the native object.  Called on the execution thread, at most once.
    fn destroy_native(&self, gl: &mut dyn Backend, handle: NativeHandle);

    /// Lazily creates the native object and applies any pending debug name.
    ///
    /// The handle returned is valid: the resource is created and not yet
    /// destroyed.  Using a resource after dispose was requested is a protocol
    /// violation and fails loudly.
    fn ensure_created(&self, gl: &mut dyn Backend) -> Result<NativeHandle, Error> {
        let state = self.deferred_state();
        if state.dispose_requested.load(Ordering::Acquire) {
            return Err(Error::ResourceDisposed {
                label: state.label_or_anonymous(),
            });
        }
        if !state.created.load(Ordering::Acquire) {
            let handle = self.create_native(gl)?;
            state.handle.store(handle, Ordering::Release);
            state.created.store(true, Ordering::Release);
            //a name set before first use is applied at creation time
            if state.name_changed.swap(false, Ordering::AcqRel) {
                if let Some(name) = state.name() {
                    gl.set_label(self.object_kind(), handle, &name);
                }
            }
            return Ok(handle);
        }
        //a name set after creation is applied on the next ensure, not immediately
        if state.name_changed.swap(false, Ordering::AcqRel) {
            if let Some(name) = state.name() {
                gl.set_label(self.object_kind(), state.handle(), &name);
            }
        }
        Ok(state.handle())
    }

    /// Marks the resource for disposal.  Returns true the first time, so the
    /// caller knows to enqueue exactly one destruction work item.
    fn request_dispose(&self) -> bool {
        !self
            .deferred_state()
            .dispose_requested
            .swap(true, Ordering::AcqRel)
    }

    /// Performs the native free.  Runs on the execution thread; guarded to run
    /// at most once regardless of how many dispose requests were made.
    fn destroy(&self, gl: &mut dyn Backend) {
        let state = self.deferred_state();
        if state.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        if state.created.load(Ordering::Acquire) {
            let handle = state.handle.swap(0, Ordering::AcqRel);
            state.created.store(false, Ordering::Release);
            self.destroy_native(gl, handle);
            logwise::trace_sync!(
                "destroyed native resource '{label}'",
                label = state.label_or_anonymous()
            );
        }
    }
}

/// Public read-only surface common to all device resources.
pub trait DeviceResource {
    /// Assigns a debug name.  Before first native use the name is applied at
    /// creation; afterwards it is applied lazily on the next use.
    fn set_debug_name(&self, name: &str);
    fn debug_name(&self) -> Option<String>;
    /// Whether the native handle has been allocated.
    fn is_created(&self) -> bool;
    /// Whether dispose has been requested.
    fn is_disposed(&self) -> bool;
}

impl<T: DeferredResource> DeviceResource for T {
    fn set_debug_name(&self, name: &str) {
        self.deferred_state().set_name(name);
    }
    fn debug_name(&self) -> Option<String> {
        self.deferred_state().name()
    }
    fn is_created(&self) -> bool {
        self.deferred_state().is_created()
    }
    fn is_disposed(&self) -> bool {
        self.deferred_state().dispose_requested()
    }
}

// --- buffer ---

#[derive(Debug)]
pub struct Buffer {
    deferred: DeferredState,
    size: u64,
    usage: BufferUsage,
    //consumed at creation time when the caller supplied initial contents
    initial_data: Mutex<Option<StagingBlock>>,
}

impl Buffer {
    pub(crate) fn new(size: u64, usage: BufferUsage, initial_data: Option<StagingBlock>) -> Buffer {
        Buffer {
            deferred: DeferredState::new(),
            size,
            usage,
            initial_data: Mutex::new(initial_data),
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

impl DeferredResource for Buffer {
    fn deferred_state(&self) -> &DeferredState {
        &self.deferred
    }
    fn object_kind(&self) -> ObjectKind {
        ObjectKind::Buffer
    }
    fn create_native(&self, gl: &mut dyn Backend) -> Result<NativeHandle, Error> {
        let handle = gl.create_buffer(self.size, self.usage)?;
        if let Some(block) = self.initial_data.lock().unwrap().take() {
            gl.update_buffer(handle, 0, block.as_slice());
            //block drops here and returns to its pool
        }
        Ok(handle)
    }
    fn destroy_native(&self, gl: &mut dyn Backend, handle: NativeHandle) {
        gl.destroy_buffer(handle);
    }
}

// --- texture ---

#[derive(Debug)]
pub struct Texture {
    deferred: DeferredState,
    desc: TextureDescriptor,
    initial_data: Mutex<Option<(StagingBlock, TextureRegion)>>,
}

impl Texture {
    pub(crate) fn new(
        desc: TextureDescriptor,
        initial_data: Option<(StagingBlock, TextureRegion)>,
    ) -> Texture {
        Texture {
            deferred: DeferredState::new(),
            desc,
            initial_data: Mutex::new(initial_data),
        }
    }

    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.desc
    }

    /// Subresources are indexed layer-major: `layer * mip_levels + mip`.
    pub fn subresource_index(&self, mip_level: u32, array_layer: u32) -> u32 {
        array_layer * self.desc.mip_levels + mip_level
    }

    pub(crate) fn mip_level_and_layer(&self, subresource: u32) -> (u32, u32) {
        (
            subresource % self.desc.mip_levels,
            subresource / self.desc.mip_levels,
        )
    }

    pub(crate) fn mip_dimensions(&self, mip_level: u32) -> (u32, u32, u32) {
        (
            (self.desc.width >> mip_level).max(1),
            (self.desc.height >> mip_level).max(1),
            (self.desc.depth >> mip_level).max(1),
        )
    }

    pub(crate) fn row_pitch(&self, mip_level: u32) -> u32 {
        let (width, _, _) = self.mip_dimensions(mip_level);
        width * self.desc.format.bytes_per_pixel()
    }

    pub(crate) fn depth_pitch(&self, mip_level: u32) -> u32 {
        let (_, height, _) = self.mip_dimensions(mip_level);
        self.row_pitch(mip_level) * height
    }

    pub(crate) fn subresource_byte_len(&self, subresource: u32) -> u64 {
        let (mip, _) = self.mip_level_and_layer(subresource);
        let (_, _, depth) = self.mip_dimensions(mip);
        self.depth_pitch(mip) as u64 * depth as u64
    }

    /// The full extent of one subresource as a region.
    pub(crate) fn subresource_region(&self, subresource: u32) -> TextureRegion {
        let (mip, layer) = self.mip_level_and_layer(subresource);
        let (width, height, depth) = self.mip_dimensions(mip);
        TextureRegion {
            x: 0,
            y: 0,
            z: 0,
            width,
            height,
            depth,
            mip_level: mip,
            array_layer: layer,
        }
    }
}

impl DeferredResource for Texture {
    fn deferred_state(&self) -> &DeferredState {
        &self.deferred
    }
    fn object_kind(&self) -> ObjectKind {
        ObjectKind::Texture
    }
    fn create_native(&self, gl: &mut dyn Backend) -> Result<NativeHandle, Error> {
        let handle = gl.create_texture(&self.desc)?;
        if let Some((block, region)) = self.initial_data.lock().unwrap().take() {
            gl.update_texture(handle, &self.desc, &region, block.as_slice());
        }
        Ok(handle)
    }
    fn destroy_native(&self, gl: &mut dyn Backend, handle: NativeHandle) {
        gl.destroy_texture(handle);
    }
}

// --- sampler ---

#[derive(Debug)]
pub struct Sampler {
    deferred: DeferredState,
    desc: SamplerDescriptor,
}

impl Sampler {
    pub(crate) fn new(desc: SamplerDescriptor) -> Sampler {
        Sampler {
            deferred: DeferredState::new(),
            desc,
        }
    }

    pub fn descriptor(&self) -> &SamplerDescriptor {
        &self.desc
    }
}

impl DeferredResource for Sampler {
    fn deferred_state(&self) -> &DeferredState {
        &self.deferred
    }
    fn object_kind(&self) -> ObjectKind {
        ObjectKind::Sampler
    }
    fn create_native(&self, gl: &mut dyn Backend) -> Result<NativeHandle, Error> {
        gl.create_sampler(&self.desc)
    }
    fn destroy_native(&self, gl: &mut dyn Backend, handle: NativeHandle) {
        gl.destroy_sampler(handle);
    }
}

// --- shader ---

#[derive(Debug)]
pub struct Shader {
    deferred: DeferredState,
    stage: ShaderStage,
    source: Vec<u8>,
}

impl Shader {
    pub(crate) fn new(stage: ShaderStage, source: Vec<u8>) -> Shader {
        Shader {
            deferred: DeferredState::new(),
            stage,
            source,
        }
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }
}

impl DeferredResource for Shader {
    fn deferred_state(&self) -> &DeferredState {
        &self.deferred
    }
    fn object_kind(&self) -> ObjectKind {
        ObjectKind::Shader
    }
    fn create_native(&self, gl: &mut dyn Backend) -> Result<NativeHandle, Error> {
        gl.create_shader(self.stage, &self.source)
    }
    fn destroy_native(&self, gl: &mut dyn Backend, handle: NativeHandle) {
        gl.destroy_shader(handle);
    }
}

// --- framebuffer ---

#[derive(Debug)]
pub struct Framebuffer {
    deferred: DeferredState,
    color_targets: Vec<Arc<Texture>>,
    depth_target: Option<Arc<Texture>>,
    width: u32,
    height: u32,
}

impl Framebuffer {
    pub(crate) fn new(
        color_targets: Vec<Arc<Texture>>,
        depth_target: Option<Arc<Texture>>,
    ) -> Framebuffer {
        let (width, height) = color_targets
            .first()
            .or(depth_target.as_ref())
            .map(|t| (t.descriptor().width, t.descriptor().height))
            .unwrap_or((0, 0));
        Framebuffer {
            deferred: DeferredState::new(),
            color_targets,
            depth_target,
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn color_targets(&self) -> &[Arc<Texture>] {
        &self.color_targets
    }

    pub fn depth_target(&self) -> Option<&Arc<Texture>> {
        self.depth_target.as_ref()
    }
}

impl DeferredResource for Framebuffer {
    fn deferred_state(&self) -> &DeferredState {
        &self.deferred
    }
    fn object_kind(&self) -> ObjectKind {
        ObjectKind::Framebuffer
    }
    fn create_native(&self, gl: &mut dyn Backend) -> Result<NativeHandle, Error> {
        //attachments must exist natively before the framebuffer referencing them
        let mut colors = Vec::with_capacity(self.color_targets.len());
        for target in &self.color_targets {
            colors.push(target.ensure_created(gl)?);
        }
        let depth = match &self.depth_target {
            Some(target) => Some(target.ensure_created(gl)?),
            None => None,
        };
        gl.create_framebuffer(&colors, depth)
    }
    fn destroy_native(&self, gl: &mut dyn Backend, handle: NativeHandle) {
        gl.destroy_framebuffer(handle);
    }
}

// --- resource layouts and sets ---

/// The kind of one binding declared in a [`ResourceLayout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    UniformBuffer,
    StorageBufferReadOnly,
    StorageBufferReadWrite,
    TextureReadOnly,
    TextureReadWrite,
    Sampler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutElement {
    pub kind: BindingKind,
    /// Dynamic-offset elements consume one entry from the per-call offset
    /// list, in the order the layout declares them.  Only meaningful for
    /// buffer kinds.
    pub dynamic_offset: bool,
}

impl LayoutElement {
    pub fn new(kind: BindingKind) -> LayoutElement {
        LayoutElement {
            kind,
            dynamic_offset: false,
        }
    }

    pub fn dynamic(kind: BindingKind) -> LayoutElement {
        LayoutElement {
            kind,
            dynamic_offset: true,
        }
    }
}

/// An ordered declaration of bindings.  Not a native object; layouts exist
/// only to drive slot assignment and set validation.
#[derive(Debug)]
pub struct ResourceLayout {
    elements: Vec<LayoutElement>,
}

impl ResourceLayout {
    pub(crate) fn new(elements: Vec<LayoutElement>) -> ResourceLayout {
        ResourceLayout { elements }
    }

    pub fn elements(&self) -> &[LayoutElement] {
        &self.elements
    }

    pub(crate) fn dynamic_offset_count(&self) -> usize {
        self.elements.iter().filter(|e| e.dynamic_offset).count()
    }
}

/// One resource bound into a [`ResourceSet`].
#[derive(Debug, Clone)]
pub enum BoundResource {
    Buffer(Arc<Buffer>),
    /// A sub-range of a buffer.
    BufferRange {
        buffer: Arc<Buffer>,
        offset: u64,
        size: u64,
    },
    Texture(Arc<Texture>),
    Sampler(Arc<Sampler>),
}

impl BoundResource {
    fn matches(&self, kind: BindingKind) -> bool {
        match kind {
            BindingKind::UniformBuffer
            | BindingKind::StorageBufferReadOnly
            | BindingKind::StorageBufferReadWrite => {
                matches!(
                    self,
                    BoundResource::Buffer(_) | BoundResource::BufferRange { .. }
                )
            }
            BindingKind::TextureReadOnly | BindingKind::TextureReadWrite => {
                matches!(self, BoundResource::Texture(_))
            }
            BindingKind::Sampler => matches!(self, BoundResource::Sampler(_)),
        }
    }
}

/// Resources matching a layout, element for element, in declaration order.
#[derive(Debug)]
pub struct ResourceSet {
    layout: Arc<ResourceLayout>,
    resources: Vec<BoundResource>,
}

impl ResourceSet {
    pub(crate) fn new(
        layout: Arc<ResourceLayout>,
        resources: Vec<BoundResource>,
    ) -> Result<ResourceSet, Error> {
        if resources.len() != layout.elements().len() {
            return Err(Error::InvalidResourceSet {
                reason: format!(
                    "layout declares {} elements but {} resources were supplied",
                    layout.elements().len(),
                    resources.len()
                ),
            });
        }
        for (index, (element, resource)) in
            layout.elements().iter().zip(resources.iter()).enumerate()
        {
            if !resource.matches(element.kind) {
                return Err(Error::InvalidResourceSet {
                    reason: format!(
                        "element {index} declares {:?} but an incompatible resource was supplied",
                        element.kind
                    ),
                });
            }
        }
        Ok(ResourceSet { layout, resources })
    }

    pub fn layout(&self) -> &Arc<ResourceLayout> {
        &self.layout
    }

    pub(crate) fn resources(&self) -> &[BoundResource] {
        &self.resources
    }
}

// --- pipeline ---

/// Everything needed to build a graphics or compute pipeline.
#[derive(Debug)]
pub struct GraphicsPipelineDescriptor {
    pub shaders: Vec<Arc<Shader>>,
    pub layouts: Vec<Arc<ResourceLayout>>,
    /// Byte stride per vertex buffer slot.
    pub vertex_strides: Vec<u32>,
    pub topology: PrimitiveTopology,
}

#[derive(Debug)]
pub struct ComputePipelineDescriptor {
    pub shader: Arc<Shader>,
    pub layouts: Vec<Arc<ResourceLayout>>,
}

#[derive(Debug)]
enum PipelineKind {
    Graphics {
        vertex_strides: Vec<u32>,
        topology: PrimitiveTopology,
    },
    Compute,
}

/// Binding slots for one layout, element for element, resolved when the
/// pipeline is constructed so set activation does no lookup work per draw.
#[derive(Debug)]
struct SetSlots {
    slots: Vec<u32>,
}

#[derive(Debug)]
pub struct Pipeline {
    deferred: DeferredState,
    shaders: Vec<Arc<Shader>>,
    layouts: Vec<Arc<ResourceLayout>>,
    kind: PipelineKind,
    slots: Vec<SetSlots>,
}

impl Pipeline {
    pub(crate) fn graphics(desc: GraphicsPipelineDescriptor) -> Pipeline {
        let slots = assign_slots(&desc.layouts);
        Pipeline {
            deferred: DeferredState::new(),
            shaders: desc.shaders,
            layouts: desc.layouts,
            kind: PipelineKind::Graphics {
                vertex_strides: desc.vertex_strides,
                topology: desc.topology,
            },
            slots,
        }
    }

    pub(crate) fn compute(desc: ComputePipelineDescriptor) -> Pipeline {
        let slots = assign_slots(&desc.layouts);
        Pipeline {
            deferred: DeferredState::new(),
            shaders: vec![desc.shader],
            layouts: desc.layouts,
            kind: PipelineKind::Compute,
            slots,
        }
    }

    pub fn is_compute(&self) -> bool {
        matches!(self.kind, PipelineKind::Compute)
    }

    pub(crate) fn topology(&self) -> PrimitiveTopology {
        match &self.kind {
            PipelineKind::Graphics { topology, .. } => *topology,
            PipelineKind::Compute => PrimitiveTopology::TriangleList,
        }
    }

    pub(crate) fn vertex_stride(&self, slot: u32) -> u32 {
        match &self.kind {
            PipelineKind::Graphics { vertex_strides, .. } => {
                vertex_strides.get(slot as usize).copied().unwrap_or(0)
            }
            PipelineKind::Compute => 0,
        }
    }

    pub(crate) fn layouts(&self) -> &[Arc<ResourceLayout>] {
        &self.layouts
    }

    /// The native slot for `element_index` of the layout at `set_index`.
    pub(crate) fn binding_slot(&self, set_index: usize, element_index: usize) -> u32 {
        self.slots[set_index].slots[element_index]
    }
}

/// Assigns native binding slots per kind class, walking layouts and elements
/// in declaration order.  Uniform buffers, storage buffers, texture units,
/// image units, and sampler units each draw from their own counter, matching
/// how the native API separates binding namespaces.
fn assign_slots(layouts: &[Arc<ResourceLayout>]) -> Vec<SetSlots> {
    let mut uniform = 0u32;
    let mut storage = 0u32;
    let mut texture_unit = 0u32;
    let mut image_unit = 0u32;
    let mut sampler_unit = 0u32;
    layouts
        .iter()
        .map(|layout| {
            let slots = layout
                .elements()
                .iter()
                .map(|element| match element.kind {
                    BindingKind::UniformBuffer => {
                        let s = uniform;
                        uniform += 1;
                        s
                    }
                    BindingKind::StorageBufferReadOnly | BindingKind::StorageBufferReadWrite => {
                        let s = storage;
                        storage += 1;
                        s
                    }
                    BindingKind::TextureReadOnly => {
                        let s = texture_unit;
                        texture_unit += 1;
                        s
                    }
                    BindingKind::TextureReadWrite => {
                        let s = image_unit;
                        image_unit += 1;
                        s
                    }
                    BindingKind::Sampler => {
                        let s = sampler_unit;
                        sampler_unit += 1;
                        s
                    }
                })
                .collect();
            SetSlots { slots }
        })
        .collect()
}

impl DeferredResource for Pipeline {
    fn deferred_state(&self) -> &DeferredState {
        &self.deferred
    }
    fn object_kind(&self) -> ObjectKind {
        ObjectKind::Pipeline
    }
    fn create_native(&self, gl: &mut dyn Backend) -> Result<NativeHandle, Error> {
        let mut shader_handles = Vec::with_capacity(self.shaders.len());
        for shader in &self.shaders {
            shader_handles.push(shader.ensure_created(gl)?);
        }
        gl.create_pipeline(&shader_handles)
    }
    fn destroy_native(&self, gl: &mut dyn Backend, handle: NativeHandle) {
        gl.destroy_pipeline(handle);
    }
}
