//! Memory-mapped float buffer backing for [`super::VectorStore`].
//!
//! Grounded in the teacher's `storage/mmap.rs`: the file is truncated to the
//! new size and remapped on growth; existing slot offsets remain valid
//! because growth only ever appends capacity, it never shifts live data.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::error::{GigaError, Result};

pub(super) struct MmapBacking {
    path: PathBuf,
    mmap: MmapMut,
    len_floats: usize,
}

impl MmapBacking {
    pub(super) fn create(path: &Path, initial_floats: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let byte_len = initial_floats * std::mem::size_of::<f32>();
        file.set_len(byte_len as u64)?;
        // SAFETY: `file` is exclusively owned by this store for its lifetime;
        // no other process is expected to map the same path concurrently.
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            len_floats: initial_floats,
        })
    }

    pub(super) fn as_slice(&self) -> &[f32] {
        bytes_to_floats(&self.mmap[..self.len_floats * std::mem::size_of::<f32>()])
    }

    pub(super) fn as_mut_slice(&mut self) -> &mut [f32] {
        let byte_len = self.len_floats * std::mem::size_of::<f32>();
        bytes_to_floats_mut(&mut self.mmap[..byte_len])
    }

    pub(super) fn len(&self) -> usize {
        self.len_floats
    }

    pub(super) fn grow_to(&mut self, new_len_floats: usize) -> Result<()> {
        if new_len_floats <= self.len_floats {
            return Ok(());
        }
        let byte_len = new_len_floats * std::mem::size_of::<f32>();
        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        file.set_len(byte_len as u64)?;
        // SAFETY: remapping after the file has been extended; the store
        // holds `&mut self` here so no guard can be observing the old map.
        let new_mmap = unsafe { MmapMut::map_mut(&file)? };
        self.mmap = new_mmap;
        self.len_floats = new_len_floats;
        Ok(())
    }

    pub(super) fn flush(&self) -> Result<()> {
        self.mmap
            .flush()
            .map_err(GigaError::Io)
    }
}

fn bytes_to_floats(bytes: &[u8]) -> &[f32] {
    // SAFETY: f32 has no invalid bit patterns; the byte length is always an
    // exact multiple of 4 (maintained by construction/growth above).
    unsafe {
        std::slice::from_raw_parts(
            bytes.as_ptr().cast::<f32>(),
            bytes.len() / std::mem::size_of::<f32>(),
        )
    }
}

fn bytes_to_floats_mut(bytes: &mut [u8]) -> &mut [f32] {
    // SAFETY: see `bytes_to_floats`; exclusive borrow carried through.
    unsafe {
        std::slice::from_raw_parts_mut(
            bytes.as_mut_ptr().cast::<f32>(),
            bytes.len() / std::mem::size_of::<f32>(),
        )
    }
}
