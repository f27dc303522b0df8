//! Memory configuration: the `MemoryConfig` schema produced by an INI file.
//!
//! The execution core only needs a `MemoryConfig` handed to it; this module
//! supplies a reference INI reader so the binary is runnable end to end, but
//! a host embedding the core is free to build a `MemoryConfig` by any other
//! means and skip this module entirely.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::EmuError;
use crate::memory::page::PAGE_SIZE;

pub const MAX_SECTIONS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageType {
    BootSector,
    UsableMemory,
    MmioPage,
    Flash,
    Stack,
}

impl PageType {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "boot_sector" => Some(Self::BootSector),
            "usable_memory" => Some(Self::UsableMemory),
            "mmio_page" => Some(Self::MmioPage),
            "flash" => Some(Self::Flash),
            "stack" => Some(Self::Stack),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySection {
    pub name: String,
    pub page_type: PageType,
    pub start_address: u32,
    pub page_count: u32,
    pub device: Option<String>,
}

impl MemorySection {
    pub fn end_address(&self) -> u32 {
        self.start_address
            .saturating_add(self.page_count.saturating_mul(PAGE_SIZE as u32))
    }

    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.start_address && addr < self.end_address()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Sorted ascending by `start_address`, the invariant the bus's binary
    /// search in `memory::bus` relies on.
    pub sections: Vec<MemorySection>,
}

impl MemoryConfig {
    pub fn push_sorted(&mut self, section: MemorySection) {
        let pos = self
            .sections
            .partition_point(|s| s.start_address < section.start_address);
        self.sections.insert(pos, section);
    }

    pub fn section_of(&self, addr: u32) -> Option<&MemorySection> {
        // Binary search for the greatest start_address <= addr, then check
        // containment.
        let idx = self
            .sections
            .partition_point(|s| s.start_address <= addr)
            .checked_sub(1)?;
        let section = &self.sections[idx];
        section.contains(addr).then_some(section)
    }

    pub fn section_of_type(&self, page_type: PageType) -> Option<&MemorySection> {
        self.sections.iter().find(|s| s.page_type == page_type)
    }
}

fn trim(s: &str) -> &str {
    s.trim()
}

/// Parses `strtoul`-style integers: decimal, `0x`-prefixed hex, or
/// `0`-prefixed octal, matching `strtoul(value, NULL, 0)` in
/// `ini_file_parser.c`.
fn parse_strtoul(value: &str) -> Option<u32> {
    let v = value.trim();
    if let Some(hex) = v.strip_prefix("0x").or_else(|| v.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else if v.len() > 1 && v.starts_with('0') && v.bytes().all(|b| b.is_ascii_digit()) {
        u32::from_str_radix(&v[1..], 8).ok()
    } else {
        v.parse().ok()
    }
}

/// Reads an INI-formatted memory map: `[section]` headers, `key=value`
/// lines, `;`/`#` comments, blank lines ignored. Unknown keys warn and
/// continue; a malformed section header or key-value line aborts the
/// parse.
pub fn load_memory_config(path: &Path) -> Result<MemoryConfig, EmuError> {
    let text = fs::read_to_string(path).map_err(|e| EmuError::Config {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut config = MemoryConfig::default();
    let mut current: Option<(String, PageType, u32, u32, Option<String>)> = None;

    let flush = |current: Option<(String, PageType, u32, u32, Option<String>)>,
                 config: &mut MemoryConfig| {
        if let Some((name, page_type, start_address, page_count, device)) = current {
            config.push_sorted(MemorySection {
                name,
                page_type,
                start_address,
                page_count,
                device,
            });
        }
    };

    for (lineno, raw_line) in text.lines().enumerate() {
        let line = trim(raw_line);
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }

        if let Some(rest) = line.strip_prefix('[') {
            let Some(end) = rest.find(']') else {
                return Err(EmuError::Config {
                    path: path.to_path_buf(),
                    reason: format!("malformed section header at line {}: {line}", lineno + 1),
                });
            };
            flush(current.take(), &mut config);
            current = Some((
                rest[..end].to_string(),
                PageType::UsableMemory,
                0,
                0,
                None,
            ));
            continue;
        }

        let Some(eq) = line.find('=') else {
            return Err(EmuError::Config {
                path: path.to_path_buf(),
                reason: format!("malformed key=value at line {}: {line}", lineno + 1),
            });
        };
        let key = trim(&line[..eq]);
        let value = trim(&line[eq + 1..]);
        let Some((_, page_type, start_address, page_count, device)) = current.as_mut() else {
            continue;
        };

        match key {
            "type" => {
                *page_type = PageType::parse(value).ok_or_else(|| EmuError::Config {
                    path: path.to_path_buf(),
                    reason: format!("unknown page type {value:?} at line {}", lineno + 1),
                })?;
            }
            "start_address" => {
                *start_address = parse_strtoul(value).ok_or_else(|| EmuError::Config {
                    path: path.to_path_buf(),
                    reason: format!("bad start_address {value:?} at line {}", lineno + 1),
                })?;
            }
            "page_count" => {
                *page_count = parse_strtoul(value).ok_or_else(|| EmuError::Config {
                    path: path.to_path_buf(),
                    reason: format!("bad page_count {value:?} at line {}", lineno + 1),
                })?;
            }
            "device" => *device = Some(value.to_string()),
            other => {
                tracing::warn!(line = lineno + 1, key = other, "unknown config key, ignoring");
            }
        }
    }
    flush(current, &mut config);

    Ok(config)
}
