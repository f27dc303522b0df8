//! Instruction dispatch: applies a decoded [`Instr`] to a [`CpuState`].

use super::{CpuState, TransferDirection};
use crate::cpu::decode::{AluOp, Instr};

/// `result == 0` sets Z, nonzero clears it — the same flag update every
/// ALU op applies.
fn apply_alu(op: AluOp, a: u8, b: u8) -> (u8, bool) {
    match op {
        AluOp::Add => {
            let sum = a as u16 + b as u16;
            if sum > 0xFF {
                (0xFF, true)
            } else {
                (sum as u8, false)
            }
        }
        AluOp::Sub => {
            if b > a {
                (0, true)
            } else {
                (a - b, false)
            }
        }
        AluOp::Mul => {
            let product = a as u16 * b as u16;
            if product > 0xFF {
                (0xFF, true)
            } else {
                (product as u8, false)
            }
        }
    }
}

fn transfer_byte(cpu: &mut CpuState, rd: u8, rn: u8, dst_is_rd: bool) {
    let addr_rd = cpu.reg_u16(rd) as u32;
    let addr_rn = cpu.reg_u16(rn) as u32;
    let (dst, src) = if dst_is_rd {
        (addr_rd, addr_rn)
    } else {
        (addr_rn, addr_rd)
    };
    let byte = cpu.bus.read8(src);
    cpu.bus.write8(dst, byte);
}

fn clamped_shift(value: u16, amount: u32, left: bool) -> u16 {
    if amount >= 16 {
        0
    } else if left {
        value << amount
    } else {
        value >> amount
    }
}

/// Executes `instr` against `cpu`. Returns `true` if the instruction itself
/// set `pc` (a taken branch, `JSR`, `OSR`, or an interrupt-entry-adjacent
/// opcode) so `CpuState::step` must not also apply the table's PC
/// increment.
pub fn execute(cpu: &mut CpuState, instr: Instr) -> bool {
    match instr {
        Instr::Nop => false,

        Instr::AluImm { op, rd, imm } => {
            let (result, overflow) = apply_alu(op, cpu.reg_byte(rd), imm);
            cpu.set_reg_byte(rd, result);
            cpu.z_flag = result == 0;
            cpu.v_flag = overflow;
            false
        }
        Instr::AluMem { op, rd, rn, addr } => {
            let mem_byte = cpu.bus.read8(addr as u32);
            let (result, overflow) = apply_alu(op, mem_byte, cpu.reg_byte(rn));
            cpu.set_reg_byte(rd, result);
            cpu.z_flag = result == 0;
            cpu.v_flag = overflow;
            false
        }
        Instr::AluMemStore { op, rd, rn, addr } => {
            let (result, overflow) = apply_alu(op, cpu.reg_byte(rd), cpu.reg_byte(rn));
            cpu.bus.write8(addr as u32, result);
            cpu.z_flag = result == 0;
            cpu.v_flag = overflow;
            false
        }

        Instr::Clz { rd, rn } => {
            let value = cpu.reg_u16(rn);
            let count = value.leading_zeros() as u16;
            cpu.set_reg_u16(rd, count);
            cpu.z_flag = count == 0;
            false
        }

        Instr::Sto { rd, imm } => {
            cpu.set_reg_byte(rd, imm);
            cpu.z_flag = imm == 0;
            cpu.v_flag = false;
            false
        }
        Instr::Stm { rd, addr } => {
            cpu.bus.write8(addr as u32, cpu.reg_byte(rd));
            false
        }
        Instr::Ldm { rd, addr } => {
            let value = cpu.bus.read8(addr as u32);
            cpu.set_reg_byte(rd, value);
            false
        }

        Instr::Psh { rd } => {
            cpu.push_stack_u8(cpu.reg_byte(rd));
            false
        }
        Instr::Pop { rd } => {
            let value = cpu.pop_stack_u8();
            cpu.set_reg_byte(rd, value);
            false
        }

        Instr::Brn { target } => {
            cpu.set_pc(target as u32);
            true
        }
        Instr::Brz { target } => {
            if cpu.z_flag {
                cpu.set_pc(target as u32);
                true
            } else {
                false
            }
        }
        Instr::Bro { target } => {
            if !cpu.v_flag {
                cpu.set_pc(target as u32);
                true
            } else {
                false
            }
        }
        Instr::Brr { rd, rn, target } => {
            if cpu.reg_byte(rd) == cpu.reg_byte(rn) {
                cpu.set_pc(target as u32);
                true
            } else {
                false
            }
        }
        Instr::Bnr { rd, rn, target } => {
            if cpu.reg_byte(rd) != cpu.reg_byte(rn) {
                cpu.set_pc(target as u32);
                true
            } else {
                false
            }
        }

        Instr::Hlt => {
            cpu.halted = true;
            true
        }

        Instr::Jsr { target } => {
            let return_pc = cpu.pc().wrapping_add(3);
            cpu.push_stack_u32(return_pc);
            cpu.set_pc(target as u32);
            true
        }
        Instr::Osr => {
            let return_pc = cpu.pop_stack_u32();
            cpu.set_pc(return_pc);
            true
        }

        Instr::Rsm { rd, rn } => {
            let dst_is_rd = matches!(cpu.rsm_direction, TransferDirection::MemFromFlash);
            transfer_byte(cpu, rd, rn, dst_is_rd);
            false
        }
        Instr::Rld { rd, rn } => {
            let dst_is_rd = matches!(cpu.rsm_direction, TransferDirection::FlashFromMem);
            transfer_byte(cpu, rd, rn, dst_is_rd);
            false
        }

        Instr::Eni => {
            cpu.interrupts_enabled = true;
            false
        }
        Instr::Dsi => {
            cpu.interrupts_enabled = false;
            false
        }

        Instr::LshImm { rd, amount } => {
            let result = clamped_shift(cpu.reg_u16(rd), amount as u32, true);
            cpu.set_reg_u16(rd, result);
            cpu.z_flag = result == 0;
            cpu.v_flag = false;
            false
        }
        Instr::LshReg { rd, rn } => {
            let result = clamped_shift(cpu.reg_u16(rd), cpu.reg_u16(rn) as u32, true);
            cpu.set_reg_u16(rd, result);
            cpu.z_flag = result == 0;
            cpu.v_flag = false;
            false
        }
        Instr::RshImm { rd, amount } => {
            let result = clamped_shift(cpu.reg_u16(rd), amount as u32, false);
            cpu.set_reg_u16(rd, result);
            cpu.z_flag = result == 0;
            cpu.v_flag = false;
            false
        }
        Instr::RshReg { rd, rn } => {
            let result = clamped_shift(cpu.reg_u16(rd), cpu.reg_u16(rn) as u32, false);
            cpu.set_reg_u16(rd, result);
            cpu.z_flag = result == 0;
            cpu.v_flag = false;
            false
        }

        Instr::And { rd, rn, op2 } => {
            let result = cpu.reg_u16(rn) & op2;
            cpu.set_reg_u16(rd, result);
            cpu.z_flag = result == 0;
            cpu.v_flag = false;
            false
        }
        Instr::Orr { rd, rn, op2 } => {
            let result = cpu.reg_u16(rn) | op2;
            cpu.set_reg_u16(rd, result);
            cpu.z_flag = result == 0;
            cpu.v_flag = false;
            false
        }
        Instr::Xor { rd, rn, op2 } => {
            let result = cpu.reg_u16(rn) ^ op2;
            cpu.set_reg_u16(rd, result);
            cpu.z_flag = result == 0;
            cpu.v_flag = false;
            false
        }

        Instr::Mull { rd, rn, rn1 } => {
            let product = cpu.reg_u16(rn) as u32 * cpu.reg_u16(rn1) as u32;
            let high = (product >> 16) as u16;
            let low = (product & 0xFFFF) as u16;
            cpu.set_reg_u16(rd, high);
            cpu.set_reg_u16(rn1, low);
            false
        }
    }
}
