//! CPU-side producer for the GUI shared-memory contract.
//!
//! The GUI/LCD renderer and SDL keyboard frontend are out of scope; this
//! module only maintains the CPU's half of the contract: a POSIX shared
//! memory region named `emulator_gui_shm` that the CPU writes the LCD frame
//! into and signals `SIGUSR1` on, and reads the GUI's keyboard state and
//! IRQ queue back out of.

use std::ffi::CString;
use std::os::fd::RawFd;
use std::ptr;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::error::EmuError;
use crate::interrupts::InterruptQueue;

pub const LCD_WIDTH: usize = 32;
pub const LCD_HEIGHT: usize = 4;
const GUI_IRQ_CAPACITY: usize = 10;
/// The GUI's own IRQ queue is drained into the CPU's queue under this
/// single source number.
pub const IRQ_GUI_KEYBOARD: u8 = 0x01;

const SHM_NAME: &str = "/emulator_gui_shm";

#[repr(C)]
struct RawGuiShm {
    display: [[u8; LCD_HEIGHT]; LCD_WIDTH],
    keyboard: [u8; 2],
    gui_irq_sources: [u8; GUI_IRQ_CAPACITY],
    gui_irq_size: u8,
}

/// Owns the mapping; unmaps and closes on drop.
pub struct GuiShm {
    ptr: *mut RawGuiShm,
    fd: RawFd,
}

// SAFETY: the mapping is exclusively owned by this struct, and callers are
// expected to serialize access the same way the CPU thread serializes all
// of its other memory accesses (one CpuState, one thread).
unsafe impl Send for GuiShm {}

impl GuiShm {
    /// Creates (or attaches to) the named shared region and maps it.
    pub fn open() -> Result<Self, EmuError> {
        let name = CString::new(SHM_NAME).expect("static name has no NUL bytes");
        let size = std::mem::size_of::<RawGuiShm>();

        // SAFETY: standard POSIX shm_open/ftruncate/mmap sequence; all
        // arguments are valid for their documented contracts.
        unsafe {
            let fd = libc::shm_open(name.as_ptr(), libc::O_CREAT | libc::O_RDWR, 0o600);
            if fd < 0 {
                return Err(EmuError::Pty(format!(
                    "shm_open({SHM_NAME}) failed: {}",
                    std::io::Error::last_os_error()
                )));
            }
            if libc::ftruncate(fd, size as libc::off_t) != 0 {
                let err = std::io::Error::last_os_error();
                libc::close(fd);
                return Err(EmuError::Pty(format!("ftruncate({SHM_NAME}) failed: {err}")));
            }
            let addr = libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            );
            if addr == libc::MAP_FAILED {
                let err = std::io::Error::last_os_error();
                libc::close(fd);
                return Err(EmuError::Pty(format!("mmap({SHM_NAME}) failed: {err}")));
            }
            ptr::write_bytes(addr as *mut u8, 0, size);
            Ok(Self {
                ptr: addr as *mut RawGuiShm,
                fd,
            })
        }
    }

    fn raw(&self) -> &RawGuiShm {
        // SAFETY: ptr is a valid, live mapping for the lifetime of self.
        unsafe { &*self.ptr }
    }

    fn raw_mut(&mut self) -> &mut RawGuiShm {
        // SAFETY: see `raw`; exclusive access via &mut self.
        unsafe { &mut *self.ptr }
    }

    pub fn write_display(&mut self, frame: &[[u8; LCD_HEIGHT]; LCD_WIDTH]) {
        self.raw_mut().display = *frame;
    }

    /// Returns `(scan_code, pressed)`.
    pub fn read_keyboard(&self) -> (u8, u8) {
        let kb = self.raw().keyboard;
        (kb[0], kb[1])
    }

    /// Signals the GUI process that the display was just updated.
    pub fn notify_display_updated(&self, gui_pid: Pid) -> Result<(), EmuError> {
        kill(gui_pid, Signal::SIGUSR1).map_err(|e| EmuError::Pty(format!("kill(SIGUSR1): {e}")))
    }

    /// Drains the GUI-local IRQ queue (written by the GUI process) into the
    /// CPU's own interrupt queue as source [`IRQ_GUI_KEYBOARD`].
    pub fn drain_into(&mut self, irq_queue: &InterruptQueue) {
        let raw = self.raw_mut();
        let count = raw.gui_irq_size as usize;
        for _ in 0..count {
            irq_queue.try_push(IRQ_GUI_KEYBOARD);
        }
        raw.gui_irq_size = 0;
        raw.gui_irq_sources = [0; GUI_IRQ_CAPACITY];
    }
}

impl Drop for GuiShm {
    fn drop(&mut self) {
        let size = std::mem::size_of::<RawGuiShm>();
        // SAFETY: ptr/fd were established by a successful open() and are
        // not used again after this point.
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, size);
            libc::close(self.fd);
        }
        if let Ok(name) = CString::new(SHM_NAME) {
            // SAFETY: name is a valid NUL-terminated string; failure here
            // (e.g. another process still has it open) is not an error.
            unsafe {
                libc::shm_unlink(name.as_ptr());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_display_round_trips() {
        let mut shm = GuiShm::open().expect("shm_open should succeed in test sandbox");
        let mut frame = [[0u8; LCD_HEIGHT]; LCD_WIDTH];
        frame[0][0] = 0xAB;
        frame[31][3] = 0xCD;
        shm.write_display(&frame);
        assert_eq!(shm.raw().display[0][0], 0xAB);
        assert_eq!(shm.raw().display[31][3], 0xCD);
    }

    #[test]
    fn drain_into_forwards_each_pending_source_as_keyboard_irq() {
        let mut shm = GuiShm::open().unwrap();
        shm.raw_mut().gui_irq_size = 3;
        let queue = InterruptQueue::new();
        shm.drain_into(&queue);
        assert_eq!(queue.try_pop(), Some(IRQ_GUI_KEYBOARD));
        assert_eq!(queue.try_pop(), Some(IRQ_GUI_KEYBOARD));
        assert_eq!(queue.try_pop(), Some(IRQ_GUI_KEYBOARD));
        assert_eq!(queue.try_pop(), None);
    }
}
