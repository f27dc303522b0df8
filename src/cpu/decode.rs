//! Instruction decode: turns bytes at an address into a tagged [`Instr`].
//!
//! Kept separate from dispatch/execute so the opcode table lives in one
//! place and the decoder can be exercised on its own, per the interpreter
//! design note this repo is built around: a decode step returning a tagged
//! variant, with a separate dispatch over variants.

use crate::memory::bus::MemoryBus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Sub,
    Mul,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instr {
    Nop,
    AluImm { op: AluOp, rd: u8, imm: u8 },
    AluMem { op: AluOp, rd: u8, rn: u8, addr: u16 },
    AluMemStore { op: AluOp, rd: u8, rn: u8, addr: u16 },
    Clz { rd: u8, rn: u8 },
    Sto { rd: u8, imm: u8 },
    Stm { rd: u8, addr: u8 },
    Ldm { rd: u8, addr: u8 },
    Psh { rd: u8 },
    Pop { rd: u8 },
    Brn { target: u8 },
    Brz { target: u8 },
    Bro { target: u8 },
    Brr { rd: u8, rn: u8, target: u16 },
    Bnr { rd: u8, rn: u8, target: u16 },
    Hlt,
    Jsr { target: u8 },
    Osr,
    Rsm { rd: u8, rn: u8 },
    Rld { rd: u8, rn: u8 },
    Eni,
    Dsi,
    LshImm { rd: u8, amount: u8 },
    LshReg { rd: u8, rn: u8 },
    RshImm { rd: u8, amount: u8 },
    RshReg { rd: u8, rn: u8 },
    And { rd: u8, rn: u8, op2: u16 },
    Orr { rd: u8, rn: u8, op2: u16 },
    Xor { rd: u8, rn: u8, op2: u16 },
    Mull { rd: u8, rn: u8, rn1: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    pub instr: Instr,
    /// Bytes this instruction occupies, per the PC increment table.
    pub length: u32,
}

fn regs(byte: u8) -> (u8, u8) {
    (byte >> 4, byte & 0x0F)
}

/// Decodes the instruction at `pc`. The only failure mode is an opcode byte
/// with no entry in the table (illegal opcode).
pub fn decode(bus: &MemoryBus, pc: u32) -> Result<Decoded, u8> {
    let opcode = bus.read8(pc);

    macro_rules! done {
        ($instr:expr, $len:expr) => {
            return Ok(Decoded {
                instr: $instr,
                length: $len,
            })
        };
    }

    match opcode {
        0x00 => done!(Instr::Nop, 1),
        0x15 => done!(Instr::Hlt, 1),
        0x17 => done!(Instr::Osr, 1),
        0x1A => done!(Instr::Eni, 1),
        0x1B => done!(Instr::Dsi, 1),

        0x0A => {
            let (rd, rn) = regs(bus.read8(pc + 1));
            done!(Instr::Clz { rd, rn }, 2);
        }
        0x0E => {
            let (rd, _) = regs(bus.read8(pc + 1));
            done!(Instr::Psh { rd }, 2);
        }
        0x0F => {
            let (rd, _) = regs(bus.read8(pc + 1));
            done!(Instr::Pop { rd }, 2);
        }
        0x1D => {
            let (rd, rn) = regs(bus.read8(pc + 1));
            done!(Instr::LshReg { rd, rn }, 2);
        }
        0x1F => {
            let (rd, rn) = regs(bus.read8(pc + 1));
            done!(Instr::RshReg { rd, rn }, 2);
        }

        0x01 | 0x02 | 0x03 => {
            let (rd, _) = regs(bus.read8(pc + 1));
            let imm = bus.read8(pc + 2);
            let op = match opcode {
                0x01 => AluOp::Add,
                0x02 => AluOp::Sub,
                _ => AluOp::Mul,
            };
            done!(Instr::AluImm { op, rd, imm }, 3);
        }
        0x0B => {
            let (rd, _) = regs(bus.read8(pc + 1));
            let imm = bus.read8(pc + 2);
            done!(Instr::Sto { rd, imm }, 3);
        }
        0x0C => {
            let (rd, _) = regs(bus.read8(pc + 1));
            let addr = bus.read8(pc + 2);
            done!(Instr::Stm { rd, addr }, 3);
        }
        0x0D => {
            let (rd, _) = regs(bus.read8(pc + 1));
            let addr = bus.read8(pc + 2);
            done!(Instr::Ldm { rd, addr }, 3);
        }
        0x10 => done!(Instr::Brn { target: bus.read8(pc + 2) }, 3),
        0x11 => done!(Instr::Brz { target: bus.read8(pc + 2) }, 3),
        0x12 => done!(Instr::Bro { target: bus.read8(pc + 2) }, 3),
        0x16 => done!(Instr::Jsr { target: bus.read8(pc + 2) }, 3),
        0x1C => {
            let (rd, _) = regs(bus.read8(pc + 1));
            let amount = bus.read8(pc + 2);
            done!(Instr::LshImm { rd, amount }, 3);
        }
        0x1E => {
            let (rd, _) = regs(bus.read8(pc + 1));
            let amount = bus.read8(pc + 2);
            done!(Instr::RshImm { rd, amount }, 3);
        }

        0x04 | 0x05 | 0x06 => {
            let (rd, rn) = regs(bus.read8(pc + 1));
            let addr = bus.read16(pc + 2);
            let op = match opcode {
                0x04 => AluOp::Add,
                0x05 => AluOp::Sub,
                _ => AluOp::Mul,
            };
            done!(Instr::AluMem { op, rd, rn, addr }, 4);
        }
        0x07 | 0x08 | 0x09 => {
            let (rd, rn) = regs(bus.read8(pc + 1));
            let addr = bus.read16(pc + 2);
            let op = match opcode {
                0x07 => AluOp::Add,
                0x08 => AluOp::Sub,
                _ => AluOp::Mul,
            };
            done!(Instr::AluMemStore { op, rd, rn, addr }, 4);
        }
        0x13 => {
            let (rd, rn) = regs(bus.read8(pc + 1));
            let target = bus.read16(pc + 2);
            done!(Instr::Brr { rd, rn, target }, 4);
        }
        0x14 => {
            let (rd, rn) = regs(bus.read8(pc + 1));
            let target = bus.read16(pc + 2);
            done!(Instr::Bnr { rd, rn, target }, 4);
        }
        0x18 => {
            let (rd, rn) = regs(bus.read8(pc + 1));
            done!(Instr::Rsm { rd, rn }, 4);
        }
        0x19 => {
            let (rd, rn) = regs(bus.read8(pc + 1));
            done!(Instr::Rld { rd, rn }, 4);
        }
        0x20 => {
            let (rd, rn) = regs(bus.read8(pc + 1));
            let op2 = bus.read16(pc + 2);
            done!(Instr::And { rd, rn, op2 }, 4);
        }
        0x21 => {
            let (rd, rn) = regs(bus.read8(pc + 1));
            let op2 = bus.read16(pc + 2);
            done!(Instr::Orr { rd, rn, op2 }, 4);
        }
        0x23 => {
            let (rd, rn) = regs(bus.read8(pc + 1));
            let op2 = bus.read16(pc + 2);
            done!(Instr::Xor { rd, rn, op2 }, 4);
        }
        0x22 => {
            let (rd, rn) = regs(bus.read8(pc + 1));
            let (rn1, _) = regs(bus.read8(pc + 2));
            done!(Instr::Mull { rd, rn, rn1 }, 4);
        }

        other => Err(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::interrupts::{InterruptQueue, InterruptVectorTable};
    use crate::uart::Uart;
    use std::sync::Arc;

    fn bus() -> MemoryBus {
        let queue = Arc::new(InterruptQueue::new());
        let uart = Arc::new(Uart::headless(queue));
        let vt = Arc::new(InterruptVectorTable::new());
        MemoryBus::new(MemoryConfig::default(), uart, vt)
    }

    #[test]
    fn decodes_sto() {
        let mut bus = bus();
        bus.write8(0, 0x0B);
        bus.write8(1, 0x30); // rd=3
        bus.write8(2, 0xF0);
        let decoded = decode(&bus, 0).unwrap();
        assert_eq!(decoded.length, 3);
        assert_eq!(decoded.instr, Instr::Sto { rd: 3, imm: 0xF0 });
    }

    #[test]
    fn decodes_add_imm() {
        let mut bus = bus();
        bus.write8(0, 0x01);
        bus.write8(1, 0x00);
        bus.write8(2, 0x20);
        let decoded = decode(&bus, 0).unwrap();
        assert_eq!(
            decoded.instr,
            Instr::AluImm {
                op: AluOp::Add,
                rd: 0,
                imm: 0x20
            }
        );
    }

    #[test]
    fn decodes_brr_with_16bit_target() {
        let mut bus = bus();
        bus.write8(0, 0x13);
        bus.write8(1, 0x12); // rd=1, rn=2
        bus.write16(2, 0x00FF);
        let decoded = decode(&bus, 0).unwrap();
        assert_eq!(decoded.length, 4);
        assert_eq!(
            decoded.instr,
            Instr::Brr {
                rd: 1,
                rn: 2,
                target: 0x00FF
            }
        );
    }

    #[test]
    fn unknown_opcode_is_illegal() {
        let mut bus = bus();
        bus.write8(0, 0xFE);
        assert_eq!(decode(&bus, 0), Err(0xFE));
    }
}
