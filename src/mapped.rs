// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The mapped-resource cache.

Mapping gives the caller a raw pointer into a resource's storage.  Buffers map
natively; textures map through a staged round trip (rent a block, read the
subresource into it if readable, hand out the block's pointer, write it back on
unmap if writable).

Map calls are refcounted per (resource, subresource): mapping something already
mapped with the same mode returns the existing pointer and bumps a count, and
only the matching number of unmaps releases the native map.  Mapping with a
different mode than the existing map is a protocol violation.

The cache is owned by the execution thread and only ever touched there; the
[`MappedResource`] snapshots handed back to callers carry the pointer across
threads, which is what makes access from the mapping thread possible at all.
*/

use crate::backend::{Backend, MapMode, NativeHandle};
use crate::error::Error;
use crate::resource::{Buffer, DeferredResource, Texture};
use crate::staging::{StagingBlock, StagingPool};
use send_cells::UnsafeSendCell;
use std::collections::HashMap;
use std::sync::Arc;

/// Identity of one mapped subresource.  Buffers always use subresource 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct MapKey {
    resource: usize,
    subresource: u32,
}

impl MapKey {
    pub fn buffer(buffer: &Arc<Buffer>) -> MapKey {
        MapKey {
            resource: Arc::as_ptr(buffer) as usize,
            subresource: 0,
        }
    }

    pub fn texture(texture: &Arc<Texture>, subresource: u32) -> MapKey {
        MapKey {
            resource: Arc::as_ptr(texture) as usize,
            subresource,
        }
    }
}

/// What the caller gets back from a map call.
///
/// The pointer stays valid until the final unmap of this (resource,
/// subresource).  Pitches are only meaningful for texture maps.
#[derive(Debug)]
pub struct MappedResource {
    ptr: UnsafeSendCell<*mut u8>,
    len: usize,
    mode: MapMode,
    subresource: u32,
    row_pitch: u32,
    depth_pitch: u32,
}

impl MappedResource {
    pub fn mode(&self) -> MapMode {
        self.mode
    }

    pub fn subresource(&self) -> u32 {
        self.subresource
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn row_pitch(&self) -> u32 {
        self.row_pitch
    }

    pub fn depth_pitch(&self) -> u32 {
        self.depth_pitch
    }

    pub fn data_ptr(&self) -> *mut u8 {
        //safety: we only read the pointer value; dereferencing is the caller's problem
        unsafe { *self.ptr.get() }
    }

    /// # Safety
    /// The map must still be live (no unmap since this was returned) and the
    /// mode must permit reading.
    pub unsafe fn as_slice(&self) -> &[u8] {
        debug_assert!(self.mode.can_read());
        unsafe { std::slice::from_raw_parts(self.data_ptr(), self.len) }
    }

    /// # Safety
    /// The map must still be live and the mode must permit writing, and no
    /// other alias of this range may be in use.
    pub unsafe fn as_mut_slice(&mut self) -> &mut [u8] {
        debug_assert!(self.mode.can_write());
        unsafe { std::slice::from_raw_parts_mut(self.data_ptr(), self.len) }
    }
}

enum Backing {
    //the arc keeps the resource alive while mapped, so the identity key
    //cannot be reused by a new allocation mid-map
    Buffer {
        _buffer: Arc<Buffer>,
        handle: NativeHandle,
    },
    Texture {
        texture: Arc<Texture>,
        subresource: u32,
        block: StagingBlock,
    },
}

struct Entry {
    mode: MapMode,
    refcount: u32,
    ptr: *mut u8,
    len: usize,
    row_pitch: u32,
    depth_pitch: u32,
    backing: Backing,
}

impl Entry {
    fn info(&self, subresource: u32) -> MappedResource {
        MappedResource {
            //safety: the pointer is only dereferenced while this entry is live
            ptr: unsafe { UnsafeSendCell::new_unchecked(self.ptr) },
            len: self.len,
            mode: self.mode,
            subresource,
            row_pitch: self.row_pitch,
            depth_pitch: self.depth_pitch,
        }
    }
}

/// Execution-thread-owned map table.  Constructed inside the execution thread
/// and never leaves it.
pub(crate) struct MappedCache {
    entries: HashMap<MapKey, Entry>,
}

impl MappedCache {
    pub fn new() -> MappedCache {
        MappedCache {
            entries: HashMap::new(),
        }
    }

    pub fn is_mapped(&self, key: &MapKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn map_buffer(
        &mut self,
        gl: &mut dyn Backend,
        buffer: &Arc<Buffer>,
        mode: MapMode,
    ) -> Result<MappedResource, Error> {
        let key = MapKey::buffer(buffer);
        if let Some(entry) = self.entries.get_mut(&key) {
            if entry.mode != mode {
                return Err(Error::MapModeMismatch {
                    existing: entry.mode,
                    requested: mode,
                });
            }
            entry.refcount += 1;
            return Ok(entry.info(0));
        }
        let handle = buffer.ensure_created(gl)?;
        let ptr = gl.map_buffer(handle, mode, 0, buffer.size())?;
        let entry = Entry {
            mode,
            refcount: 1,
            ptr,
            len: buffer.size() as usize,
            row_pitch: 0,
            depth_pitch: 0,
            backing: Backing::Buffer {
                _buffer: buffer.clone(),
                handle,
            },
        };
        let info = entry.info(0);
        self.entries.insert(key, entry);
        Ok(info)
    }

    pub fn map_texture(
        &mut self,
        gl: &mut dyn Backend,
        pool: &StagingPool,
        texture: &Arc<Texture>,
        subresource: u32,
        mode: MapMode,
    ) -> Result<MappedResource, Error> {
        let desc = *texture.descriptor();
        let subresource_count = desc.mip_levels as u64 * desc.array_layers as u64;
        if subresource as u64 >= subresource_count {
            return Err(Error::OutOfBounds {
                offset: subresource as u64,
                len: 1,
                capacity: subresource_count,
                context: "map_texture subresource",
            });
        }
        let key = MapKey::texture(texture, subresource);
        if let Some(entry) = self.entries.get_mut(&key) {
            if entry.mode != mode {
                return Err(Error::MapModeMismatch {
                    existing: entry.mode,
                    requested: mode,
                });
            }
            entry.refcount += 1;
            return Ok(entry.info(subresource));
        }
        let handle = texture.ensure_created(gl)?;
        let len = texture.subresource_byte_len(subresource) as usize;
        let region = texture.subresource_region(subresource);
        let mut block = pool.rent(len);
        if mode.can_read() {
            gl.read_texture(handle, &desc, &region, block.as_mut_slice());
        }
        let (mip, _) = texture.mip_level_and_layer(subresource);
        let entry = Entry {
            mode,
            refcount: 1,
            ptr: block.as_mut_ptr(),
            len,
            row_pitch: texture.row_pitch(mip),
            depth_pitch: texture.depth_pitch(mip),
            backing: Backing::Texture {
                texture: texture.clone(),
                subresource,
                block,
            },
        };
        let info = entry.info(subresource);
        self.entries.insert(key, entry);
        Ok(info)
    }

    /// Drops one reference; the final reference releases the native map (and
    /// for writable texture maps, writes the staged block back).
    pub fn unmap(&mut self, gl: &mut dyn Backend, key: MapKey) -> Result<(), Error> {
        let entry = self.entries.get_mut(&key).ok_or(Error::NotMapped)?;
        entry.refcount -= 1;
        if entry.refcount > 0 {
            return Ok(());
        }
        let entry = match self.entries.remove(&key) {
            Some(entry) => entry,
            None => return Err(Error::NotMapped),
        };
        match entry.backing {
            Backing::Buffer { handle, .. } => {
                gl.unmap_buffer(handle);
            }
            Backing::Texture {
                texture,
                subresource,
                block,
            } => {
                if entry.mode.can_write() {
                    let region = texture.subresource_region(subresource);
                    let handle = texture.deferred_state().handle();
                    gl.update_texture(handle, texture.descriptor(), &region, block.as_slice());
                }
                //block drops here and returns to the pool
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BufferUsage, PixelFormat, TextureDescriptor};
    use crate::testutil::TestBackend;

    #[test]
    fn buffer_map_is_refcounted() {
        let mut gl = TestBackend::new();
        let mut cache = MappedCache::new();
        let buffer = Arc::new(Buffer::new(64, BufferUsage::STAGING, None));

        let a = cache.map_buffer(&mut gl, &buffer, MapMode::ReadWrite).unwrap();
        let b = cache.map_buffer(&mut gl, &buffer, MapMode::ReadWrite).unwrap();
        assert_eq!(a.data_ptr(), b.data_ptr());
        assert_eq!(gl.call_count("map_buffer"), 1);

        cache.unmap(&mut gl, MapKey::buffer(&buffer)).unwrap();
        assert!(cache.is_mapped(&MapKey::buffer(&buffer)));
        assert_eq!(gl.call_count("unmap_buffer"), 0);

        cache.unmap(&mut gl, MapKey::buffer(&buffer)).unwrap();
        assert!(!cache.is_mapped(&MapKey::buffer(&buffer)));
        assert_eq!(gl.call_count("unmap_buffer"), 1);

        assert!(matches!(
            cache.unmap(&mut gl, MapKey::buffer(&buffer)),
            Err(Error::NotMapped)
        ));
    }

    #[test]
    fn remapping_with_a_different_mode_fails() {
        let mut gl = TestBackend::new();
        let mut cache = MappedCache::new();
        let buffer = Arc::new(Buffer::new(64, BufferUsage::STAGING, None));

        cache.map_buffer(&mut gl, &buffer, MapMode::Read).unwrap();
        match cache.map_buffer(&mut gl, &buffer, MapMode::Write) {
            Err(Error::MapModeMismatch {
                existing,
                requested,
            }) => {
                assert_eq!(existing, MapMode::Read);
                assert_eq!(requested, MapMode::Write);
            }
            other => panic!("expected MapModeMismatch, got {other:?}"),
        }
        //the failed call must not have disturbed the refcount
        cache.unmap(&mut gl, MapKey::buffer(&buffer)).unwrap();
        assert!(!cache.is_mapped(&MapKey::buffer(&buffer)));
    }

    #[test]
    fn readable_texture_map_stages_a_readback() {
        let mut gl = TestBackend::new();
        let mut cache = MappedCache::new();
        let pool = StagingPool::new();
        let texture = Arc::new(Texture::new(
            TextureDescriptor::d2(4, 4, PixelFormat::Rgba8Unorm),
            None,
        ));
        //seed native contents
        let handle = texture.ensure_created(&mut gl).unwrap();
        gl.textures.get_mut(&handle).unwrap().fill(0xab);

        let map = cache
            .map_texture(&mut gl, &pool, &texture, 0, MapMode::Read)
            .unwrap();
        assert_eq!(map.len(), 4 * 4 * 4);
        assert_eq!(map.row_pitch(), 16);
        assert_eq!(unsafe { map.as_slice() }[0], 0xab);

        cache
            .unmap(&mut gl, MapKey::texture(&texture, 0))
            .unwrap();
        //read-only map must not write back
        assert_eq!(gl.call_count("update_texture"), 0);
        //and the staging block returned to the pool
        assert_eq!(pool.free_blocks(), 1);
    }

    #[test]
    fn writable_texture_map_writes_back_on_final_unmap() {
        let mut gl = TestBackend::new();
        let mut cache = MappedCache::new();
        let pool = StagingPool::new();
        let texture = Arc::new(Texture::new(
            TextureDescriptor::d2(2, 2, PixelFormat::Rgba8Unorm),
            None,
        ));
        let handle = texture.ensure_created(&mut gl).unwrap();

        let mut map = cache
            .map_texture(&mut gl, &pool, &texture, 0, MapMode::Write)
            .unwrap();
        unsafe { map.as_mut_slice() }.fill(0x5c);
        cache
            .unmap(&mut gl, MapKey::texture(&texture, 0))
            .unwrap();
        assert_eq!(gl.call_count("update_texture"), 1);
        assert!(gl.textures[&handle].iter().all(|&b| b == 0x5c));
    }

    #[test]
    fn texture_subresource_out_of_range_is_rejected() {
        let mut gl = TestBackend::new();
        let mut cache = MappedCache::new();
        let pool = StagingPool::new();
        let texture = Arc::new(Texture::new(
            TextureDescriptor::d2(2, 2, PixelFormat::Rgba8Unorm),
            None,
        ));
        assert!(matches!(
            cache.map_texture(&mut gl, &pool, &texture, 1, MapMode::Read),
            Err(Error::OutOfBounds { .. })
        ));
    }
}
