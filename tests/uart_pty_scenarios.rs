//! End-to-end scenarios that need a real PTY and a running UART thread,
//! kept out of the library's colocated unit tests because they're slower
//! and touch host OS resources directly rather than mocking them.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nix::fcntl::{fcntl, FcntlArg, OFlag};

use neocore_emu::config::{MemoryConfig, MemorySection, PageType};
use neocore_emu::cpu::CpuState;
use neocore_emu::interrupts::{InterruptQueue, InterruptVectorTable, IRQ_UART_RX};
use neocore_emu::memory::bus::UART_TX_ADDR;
use neocore_emu::uart::Uart;

fn set_nonblocking(file: &impl AsRawFd) {
    let fd = file.as_raw_fd();
    let flags = fcntl(fd, FcntlArg::F_GETFL).unwrap();
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags)).unwrap();
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

/// A write to the UART MMIO register is observable at the PTY slave.
#[test]
fn mmio_uart_write_reaches_pty_slave() {
    let irq_queue = Arc::new(InterruptQueue::new());
    let vt = Arc::new(InterruptVectorTable::new());
    let handle = Uart::spawn(115200, irq_queue.clone()).expect("spawn uart");

    let mut config = MemoryConfig::default();
    config.push_sorted(uart_section());
    let mut cpu = CpuState::new(config, irq_queue, vt, handle.uart.clone());

    let mut slave = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&handle.slave_path)
        .expect("open pty slave");
    set_nonblocking(&slave);

    cpu.bus.write8(UART_TX_ADDR, b'H');

    let mut buf = [0u8; 1];
    let mut seen = false;
    for _ in 0..400 {
        if slave.read(&mut buf).unwrap_or(0) == 1 {
            seen = true;
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    assert!(seen, "expected 'H' to arrive at the pty slave");
    assert_eq!(buf[0], b'H');

    handle.join();
}

/// The host writes to the PTY slave; the UART thread picks it up and
/// raises the RX interrupt, which the CPU observes at its next boundary.
#[test]
fn host_write_raises_rx_irq() {
    let irq_queue = Arc::new(InterruptQueue::new());
    let handle = Uart::spawn(115200, irq_queue.clone()).expect("spawn uart");

    let mut slave = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&handle.slave_path)
        .expect("open pty slave");

    slave.write_all(&[b'K']).unwrap();
    slave.flush().unwrap();

    let source = irq_queue.wait_pop(Duration::from_secs(2));
    assert_eq!(source, Some(IRQ_UART_RX));
    assert_eq!(handle.uart.rx_pop(), Some(b'K'));

    handle.join();
}
