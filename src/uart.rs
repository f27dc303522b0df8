//! UART device: a host PTY wired up as the machine's serial port.
//!
//! TX and RX each get their own ring buffer behind their own mutex — never
//! acquired together, so a slow consumer on one side can't stall the
//! other — serviced by a dedicated OS thread that paces itself to the
//! configured baud rate and raises [`crate::interrupts::IRQ_UART_RX`] /
//! [`crate::interrupts::IRQ_UART_TX`] on every byte moved.

use std::collections::VecDeque;
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::pty::{grantpt, posix_openpt, ptsname_r, unlockpt};
use nix::unistd::{read, write};

use crate::error::EmuError;
use crate::interrupts::{InterruptQueue, IRQ_UART_RX, IRQ_UART_TX};

const RING_CAPACITY: usize = 256;
const DEFAULT_BAUD_RATE: u32 = 9600;

pub struct Uart {
    tx: Mutex<VecDeque<u8>>,
    rx: Mutex<VecDeque<u8>>,
    irq_queue: Arc<InterruptQueue>,
    baud_rate: u32,
    shutdown: AtomicBool,
}

impl Uart {
    fn new(baud_rate: u32, irq_queue: Arc<InterruptQueue>) -> Self {
        Self {
            tx: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
            rx: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
            irq_queue,
            baud_rate,
            shutdown: AtomicBool::new(false),
        }
    }

    /// Builds a `Uart` with no backing PTY and no service thread: just the
    /// ring buffers and IRQ plumbing, for embedding in tests or any other
    /// host that drives TX/RX itself instead of through a real terminal.
    pub fn headless(irq_queue: Arc<InterruptQueue>) -> Self {
        Self::new(DEFAULT_BAUD_RATE, irq_queue)
    }

    /// Opens a fresh host PTY, spawns the service thread, and returns the
    /// running device plus the slave side's path (what a user would `screen
    /// /dev/pts/N` into).
    pub fn spawn(baud_rate: u32, irq_queue: Arc<InterruptQueue>) -> Result<UartHandle, EmuError> {
        let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY)
            .map_err(|e| EmuError::Pty(format!("posix_openpt: {e}")))?;
        grantpt(&master).map_err(|e| EmuError::Pty(format!("grantpt: {e}")))?;
        unlockpt(&master).map_err(|e| EmuError::Pty(format!("unlockpt: {e}")))?;
        let slave_name = ptsname_r(&master).map_err(|e| EmuError::Pty(format!("ptsname_r: {e}")))?;
        let slave_path = PathBuf::from(slave_name);

        let flags = fcntl(master.as_raw_fd(), FcntlArg::F_GETFL)
            .map_err(|e| EmuError::Pty(format!("fcntl(F_GETFL): {e}")))?;
        let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
        fcntl(master.as_raw_fd(), FcntlArg::F_SETFL(flags))
            .map_err(|e| EmuError::Pty(format!("fcntl(F_SETFL): {e}")))?;

        tracing::info!(slave = %slave_path.display(), baud_rate, "UART PTY ready");

        let uart = Arc::new(Self::new(baud_rate, irq_queue));
        let worker = Arc::clone(&uart);
        let thread = thread::Builder::new()
            .name("uart".into())
            .spawn(move || worker.run(master))
            .expect("failed to spawn uart thread");

        Ok(UartHandle {
            uart,
            slave_path,
            thread,
        })
    }

    /// One simulated byte time: 10 bits (start + 8 data + stop) at the
    /// configured baud rate.
    fn byte_delay(&self) -> Duration {
        Duration::from_secs_f64(10.0 / self.baud_rate as f64)
    }

    fn run(self: Arc<Self>, master: nix::pty::PtyMaster) {
        let mut read_buf = [0u8; 1];
        while !self.shutdown.load(Ordering::Relaxed) {
            match read(master.as_raw_fd(), &mut read_buf) {
                Ok(0) => {}
                Ok(_) => {
                    self.rx_push(read_buf[0]);
                    self.irq_queue.try_push(IRQ_UART_RX);
                }
                Err(Errno::EAGAIN) | Err(Errno::EWOULDBLOCK) => {}
                Err(e) => tracing::warn!(error = %e, "uart pty read failed"),
            }

            if let Some(byte) = self.tx_pop() {
                match write(master.as_raw_fd(), &[byte]) {
                    Ok(_) => {
                        self.irq_queue.try_push(IRQ_UART_TX);
                    }
                    Err(e) => tracing::warn!(error = %e, "uart pty write failed"),
                }
            }

            thread::sleep(self.byte_delay());
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// CPU-side producer: a write to the UART TX MMIO register lands here.
    pub fn tx_push(&self, byte: u8) {
        let mut tx = self.tx.lock().unwrap();
        if tx.len() >= RING_CAPACITY {
            tracing::warn!("uart TX buffer full, dropping byte");
            return;
        }
        tx.push_back(byte);
    }

    pub(crate) fn tx_pop(&self) -> Option<u8> {
        self.tx.lock().unwrap().pop_front()
    }

    fn rx_push(&self, byte: u8) {
        let mut rx = self.rx.lock().unwrap();
        if rx.len() >= RING_CAPACITY {
            tracing::warn!("uart RX buffer full, dropping byte");
            return;
        }
        rx.push_back(byte);
    }

    /// CPU-side consumer: pops the oldest byte received from the PTY.
    pub fn rx_pop(&self) -> Option<u8> {
        self.rx.lock().unwrap().pop_front()
    }

    /// Bit 0: a byte is available to read. Bit 1: the TX ring is drained.
    pub fn status(&self) -> u8 {
        let mut status = 0u8;
        if !self.rx.lock().unwrap().is_empty() {
            status |= 0x01;
        }
        if self.tx.lock().unwrap().is_empty() {
            status |= 0x02;
        }
        status
    }
}

pub struct UartHandle {
    pub uart: Arc<Uart>,
    pub slave_path: PathBuf,
    thread: JoinHandle<()>,
}

impl UartHandle {
    pub fn join(self) {
        self.uart.shutdown();
        let _ = self.thread.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uart() -> Uart {
        Uart::new(DEFAULT_BAUD_RATE, Arc::new(InterruptQueue::new()))
    }

    #[test]
    fn tx_push_then_pop_is_fifo() {
        let uart = uart();
        uart.tx_push(b'a');
        uart.tx_push(b'b');
        assert_eq!(uart.tx_pop(), Some(b'a'));
        assert_eq!(uart.tx_pop(), Some(b'b'));
    }

    #[test]
    fn rx_push_then_pop_is_fifo() {
        let uart = uart();
        uart.rx_push(1);
        uart.rx_push(2);
        assert_eq!(uart.rx_pop(), Some(1));
        assert_eq!(uart.rx_pop(), Some(2));
    }

    #[test]
    fn status_reflects_ring_occupancy() {
        let uart = uart();
        assert_eq!(uart.status(), 0x02); // tx empty, rx empty
        uart.rx_push(1);
        assert_eq!(uart.status(), 0x03);
        uart.tx_push(1);
        assert_eq!(uart.status(), 0x01);
    }

    #[test]
    fn tx_ring_drops_past_capacity() {
        let uart = uart();
        for i in 0..RING_CAPACITY {
            uart.tx_push(i as u8);
        }
        uart.tx_push(0xFF);
        assert_eq!(uart.tx.lock().unwrap().len(), RING_CAPACITY);
    }

    #[test]
    fn real_pty_round_trip() {
        use std::io::{Read, Write};

        let queue = Arc::new(InterruptQueue::new());
        let handle = Uart::spawn(115200, queue.clone()).expect("spawn uart");
        let mut slave = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&handle.slave_path)
            .expect("open pty slave");

        handle.uart.tx_push(b'X');
        let mut buf = [0u8; 1];
        {
            use std::os::fd::AsRawFd;
            let flags = fcntl(slave.as_raw_fd(), FcntlArg::F_GETFL).unwrap();
            let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
            fcntl(slave.as_raw_fd(), FcntlArg::F_SETFL(flags)).unwrap();
        }
        for _ in 0..200 {
            if slave.read(&mut buf).unwrap_or(0) == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(buf[0], b'X');

        slave.write_all(&[b'Y']).unwrap();
        let mut got = None;
        for _ in 0..200 {
            if let Some(b) = handle.uart.rx_pop() {
                got = Some(b);
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(got, Some(b'Y'));
        assert!(queue.len() <= 2);

        handle.join();
    }
}
