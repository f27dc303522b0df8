//! Memory bus / MMIO dispatcher.
//!
//! Classifies every write against the sorted section map (binary search for
//! the greatest `start_address <= addr`) and routes it either to the
//! backing page table or to a device hook.

use std::sync::Arc;

use crate::config::{MemoryConfig, PageType};
use crate::interrupts::InterruptVectorTable;
use crate::memory::page::PageTable;
use crate::uart::Uart;

/// Address the UART device's TX register is mapped at.
pub const UART_TX_ADDR: u32 = 0x10000;
/// PIC IVT base register, 4 bytes, big-endian.
pub const PIC_IVT_BASE_ADDR: u32 = 0x20000;
pub const PIC_IVT_BASE_END: u32 = 0x20004;
/// PIC IVT length trigger: writing here loads the vector table.
pub const PIC_IVT_LOAD_ADDR: u32 = 0x20004;

pub struct MemoryBus {
    pub table: PageTable,
    pub config: MemoryConfig,
    uart: Arc<Uart>,
    vector_table: Arc<InterruptVectorTable>,
}

impl MemoryBus {
    pub fn new(config: MemoryConfig, uart: Arc<Uart>, vector_table: Arc<InterruptVectorTable>) -> Self {
        Self {
            table: PageTable::new(),
            config,
            uart,
            vector_table,
        }
    }

    pub fn read8(&self, addr: u32) -> u8 {
        self.table.read8(addr)
    }

    pub fn read16(&self, addr: u32) -> u16 {
        self.table.read16(addr)
    }

    pub fn read32(&self, addr: u32) -> u32 {
        self.table.read32(addr)
    }

    pub fn bulk_copy(&mut self, dst_addr: u32, src: &[u8]) {
        self.table.bulk_copy(dst_addr, src);
    }

    /// Writes one byte, dispatching to MMIO device hooks where the section
    /// map says so. Multi-byte writes decompose into consecutive `write8`
    /// calls (see `write16`/`write32`), which is safe here because every
    /// defined MMIO effect is itself byte- or single-trigger-granular.
    pub fn write8(&mut self, addr: u32, value: u8) {
        let Some(section) = self.config.section_of(addr) else {
            // No declared section covers this address: plain backing store.
            self.table.write8(addr, value);
            return;
        };

        match section.page_type {
            PageType::BootSector | PageType::UsableMemory | PageType::Flash | PageType::Stack => {
                self.table.write8(addr, value);
            }
            PageType::MmioPage => {
                let device = section.device.as_deref().unwrap_or("");
                match device {
                    "UART" if addr == UART_TX_ADDR => {
                        self.uart.tx_push(value);
                    }
                    "PIC" if (PIC_IVT_BASE_ADDR..PIC_IVT_BASE_END).contains(&addr) => {
                        // "Stores IVT base address (32-bit, big-endian)" —
                        // backing store so the 4-byte value survives for
                        // the length-trigger write below to read back.
                        self.table.write8(addr, value);
                    }
                    "PIC" if addr == PIC_IVT_LOAD_ADDR => {
                        self.load_ivt(value);
                    }
                    _ => {
                        tracing::debug!(device, address = format!("{addr:#010x}"), "unrecognized MMIO device/address, ignoring write");
                    }
                }
            }
        }
    }

    pub fn write16(&mut self, addr: u32, value: u16) {
        self.write8(addr, (value >> 8) as u8);
        self.write8(addr.wrapping_add(1), value as u8);
    }

    pub fn write32(&mut self, addr: u32, value: u32) {
        self.write8(addr, (value >> 24) as u8);
        self.write8(addr.wrapping_add(1), (value >> 16) as u8);
        self.write8(addr.wrapping_add(2), (value >> 8) as u8);
        self.write8(addr.wrapping_add(3), value as u8);
    }

    /// PIC length trigger: reads `length` consecutive 32-bit big-endian
    /// handler addresses starting at the stored IVT base and registers
    /// them as source `0..length`.
    fn load_ivt(&mut self, length_byte: u8) {
        let ivt_base = self.table.read32(PIC_IVT_BASE_ADDR);
        let length = length_byte;
        tracing::info!(base = format!("{ivt_base:#010x}"), length, "loading interrupt vector table");

        for source in 0..length {
            let handler_address = self.table.read32(ivt_base.wrapping_add(source as u32 * 4));
            self.vector_table.register(source, handler_address);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemorySection;
    use crate::interrupts::InterruptQueue;

    fn bus_with_sections(sections: Vec<MemorySection>) -> MemoryBus {
        let mut config = MemoryConfig::default();
        for s in sections {
            config.push_sorted(s);
        }
        let queue = Arc::new(InterruptQueue::new());
        let uart = Arc::new(Uart::headless(queue));
        let vt = Arc::new(InterruptVectorTable::new());
        MemoryBus::new(config, uart, vt)
    }

    fn uart_section() -> MemorySection {
        MemorySection {
            name: "uart".into(),
            page_type: PageType::MmioPage,
            start_address: UART_TX_ADDR,
            page_count: 1,
            device: Some("UART".into()),
        }
    }

    fn pic_section() -> MemorySection {
        MemorySection {
            name: "pic".into(),
            page_type: PageType::MmioPage,
            start_address: PIC_IVT_BASE_ADDR,
            page_count: 1,
            device: Some("PIC".into()),
        }
    }

    #[test]
    fn uart_write_reaches_tx_ring_not_backing_store() {
        let mut bus = bus_with_sections(vec![uart_section()]);
        bus.write8(UART_TX_ADDR, b'H');
        assert_eq!(bus.uart.tx_pop(), Some(b'H'));
        // No backing page was allocated for the MMIO write.
        assert_eq!(bus.table.page_count(), 0);
    }

    #[test]
    fn pic_ivt_load_registers_handlers() {
        let mut bus = bus_with_sections(vec![pic_section()]);
        // Handler addresses live in ordinary memory at 0x30000.
        bus.write32(0x30000, 0x1000);
        bus.write32(0x30004, 0x2000);
        bus.write32(0x30008, 0x3000);

        bus.write32(PIC_IVT_BASE_ADDR, 0x30000);
        bus.write8(PIC_IVT_LOAD_ADDR, 0x03);

        assert_eq!(bus.vector_table.lookup(0), Some(0x1000));
        assert_eq!(bus.vector_table.lookup(1), Some(0x2000));
        assert_eq!(bus.vector_table.lookup(2), Some(0x3000));
    }

    #[test]
    fn unclassified_address_falls_through_to_backing_store() {
        let mut bus = bus_with_sections(vec![]);
        bus.write8(0x1234, 0xAB);
        assert_eq!(bus.read8(0x1234), 0xAB);
    }
}
