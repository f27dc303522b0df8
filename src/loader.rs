//! Program/flash image loaders: byte-blob producers with no format of
//! their own — copied verbatim into the sections the memory configuration
//! names for them.

use std::fs;
use std::path::Path;

use crate::error::EmuError;
use crate::memory::bus::MemoryBus;
use crate::memory::page::PAGE_SIZE;

/// Copies `path`'s bytes verbatim into the BOOT_SECTOR section starting at
/// its `start_address`; the remainder of the section stays zero-filled
/// (pages are zeroed on allocation, so there's nothing extra to do there).
pub fn load_boot_image(bus: &mut MemoryBus, path: &Path, start_address: u32) -> Result<(), EmuError> {
    let bytes = fs::read(path).map_err(|e| EmuError::Load {
        kind: "boot",
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    bus.bulk_copy(start_address, &bytes);
    Ok(())
}

/// Chunks the flash file into 4 KiB blocks, trailing partial block
/// zero-padded, and copies it starting at `start_address`.
pub fn load_flash_image(bus: &mut MemoryBus, path: &Path, start_address: u32) -> Result<(), EmuError> {
    let bytes = fs::read(path).map_err(|e| EmuError::Load {
        kind: "flash",
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let padded_len = bytes.len().div_ceil(PAGE_SIZE) * PAGE_SIZE;
    let mut padded = bytes;
    padded.resize(padded_len, 0);
    bus.bulk_copy(start_address, &padded);
    Ok(())
}
