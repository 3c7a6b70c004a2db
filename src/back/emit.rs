//! The assembly writer: MARS-compatible MIPS text.
//!
//! `li` and `la` are expanded here rather than left to the assembler,
//! because MARS would otherwise synthesize them through `$at`, which the
//! register allocator owns. String addresses are absolute: the fragments
//! are laid out right after the globals, so each `la` becomes one `lui`
//! or `li` of a known constant.

use std::fmt::Write;

use crate::back::mir::{BranchOp, Func, MBlock, MInstData, Prog};
use crate::middle::ir::RelOp;

const END_LABEL: &str = "__END";
const GLOB_PRE: &str = "__GLO_";
const STR_PRE: &str = "__STR_";
const FUNC_PRE: &str = "__FUN_";
const INDENT: &str = "    ";

fn put_li(out: &mut String, dst: &str, val: i32) {
    if val & 0xffff != 0 {
        let _ = write!(out, "li {}, {}", dst, val);
    } else {
        let _ = write!(out, "lui {}, {}", dst, (val as u32) >> 16);
    }
}

fn label(f: &Func, bb: MBlock) -> String {
    format!("_{}_bb_{}", f.name, f.block(bb).id)
}

fn write_inst(out: &mut String, f: &Func, data: &MInstData, str_addrs: &[u32]) {
    use MInstData::*;
    match *data {
        Binary { op, dst, lhs, rhs } => {
            debug_assert!(dst.is_reg() && lhs.is_reg());
            if rhs.is_const() {
                debug_assert!(rhs.is_imm());
                let _ = write!(out, "{} {}, {}, {}", op.imm_name(), dst, lhs, rhs.val);
            } else {
                let _ = write!(out, "{} {}, {}, {}", op, dst, lhs, rhs);
            }
        }
        Shift { op, dst, lhs, rhs } => {
            debug_assert!(rhs < 32);
            let _ = write!(out, "{} {}, {}, {}", op, dst, lhs, rhs);
        }
        Move { dst, src } => {
            if src.is_const() {
                put_li(out, &dst.to_string(), src.val);
            } else {
                let _ = write!(out, "move {}, {}", dst, src);
            }
        }
        Mult { lhs, rhs } => {
            let _ = write!(out, "mult {}, {}", lhs, rhs);
        }
        Div { lhs, rhs } => {
            let _ = write!(out, "div {}, {}", lhs, rhs);
        }
        MFHi { dst } => {
            let _ = write!(out, "mfhi {}", dst);
        }
        MFLo { dst } => {
            let _ = write!(out, "mflo {}", dst);
        }
        Call { name, .. } => {
            let _ = write!(out, "jal {}{}", FUNC_PRE, name);
        }
        Branch { op, lhs, rhs, to } => {
            let mn = match op {
                BranchOp::Eq => "beq",
                BranchOp::Ne => "bne",
            };
            let _ = write!(out, "{} {}, {}, {}", mn, lhs, rhs, label(f, to));
        }
        BranchZero { op, lhs, to } => match op {
            RelOp::Eq => {
                let _ = write!(out, "beq {}, $0, {}", lhs, label(f, to));
            }
            RelOp::Ne => {
                let _ = write!(out, "bne {}, $0, {}", lhs, label(f, to));
            }
            RelOp::Lt => {
                let _ = write!(out, "bltz {}, {}", lhs, label(f, to));
            }
            RelOp::Gt => {
                let _ = write!(out, "bgtz {}, {}", lhs, label(f, to));
            }
            RelOp::Le => {
                let _ = write!(out, "blez {}, {}", lhs, label(f, to));
            }
            RelOp::Ge => {
                let _ = write!(out, "bgez {}, {}", lhs, label(f, to));
            }
        },
        Jump { to } => {
            let _ = write!(out, "j {}", label(f, to));
        }
        Return => {
            let _ = write!(out, "jr $ra");
        }
        Load { dst, base, off } => {
            let _ = write!(out, "lw {}, {}({})", dst, off, base);
        }
        Store { src, base, off } => {
            let _ = write!(out, "sw {}, {}({})", src, off, base);
        }
        Sys { .. } => {
            let _ = write!(out, "syscall");
        }
        LoadStr { dst, id } => {
            put_li(out, &dst.to_string(), str_addrs[id as usize] as i32);
        }
        Removed => unreachable!("tombstone reached emission"),
    }
}

fn write_func(out: &mut String, f: &Func, str_addrs: &[u32], more_code_follows: bool) {
    for (k, &bb) in f.blocks.iter().enumerate() {
        let _ = writeln!(out, "{}:", label(f, bb));
        let insts = f.insts_of(bb);
        for (j, &i) in insts.iter().enumerate() {
            out.push_str(INDENT);
            if f.is_main && matches!(f.inst(i), MInstData::Return) {
                // main never returns; it runs off the end of the program.
                let last = j + 1 == insts.len() && k + 1 == f.blocks.len();
                if !last || more_code_follows {
                    let _ = write!(out, "j {}", END_LABEL);
                }
            } else {
                write_inst(out, f, f.inst(i), str_addrs);
            }
            out.push('\n');
        }
    }
}

pub fn emit(prog: &Prog) -> String {
    let mut out = String::new();

    out.push_str(".data\n");
    for g in &prog.globs {
        let _ = write!(out, "{}{}{}: ", INDENT, GLOB_PRE, g.name);
        match &g.init {
            Some(words) => {
                out.push_str(".word");
                for k in 0..g.size_words as usize {
                    let w = words.get(k).copied().unwrap_or(0);
                    let _ = write!(out, " {}", w);
                }
                out.push('\n');
            }
            None => {
                let _ = writeln!(out, ".space {}", g.size_words * 4);
            }
        }
    }
    out.push('\n');

    // Fragment addresses: each escape sequence is one byte shorter
    // assembled than written.
    let mut str_addrs = Vec::new();
    let mut addr = prog.str_base_addr;
    for s in prog.strs() {
        str_addrs.push(addr);
        addr += (s.len() + 1 - s.bytes().filter(|&b| b == b'\\').count()) as u32;
    }
    for (i, s) in prog.strs().iter().enumerate() {
        let _ = writeln!(out, "{}{}{}: .asciiz \"{}\"", INDENT, STR_PRE, i, s);
    }

    out.push_str("\n.text\n");

    let non_main = prog.funcs.iter().filter(|f| !f.is_main).count();
    if let Some(main) = prog.funcs.iter().find(|f| f.is_main) {
        let _ = writeln!(out, "{}main:", FUNC_PRE);
        if prog.gp_used {
            out.push_str(INDENT);
            put_li(&mut out, "$gp", DATA_BASE_I32);
            out.push('\n');
        }
        write_func(&mut out, main, &str_addrs, non_main > 0);
    }
    for f in prog.funcs.iter().filter(|f| !f.is_main) {
        let _ = writeln!(out, "{}{}:", FUNC_PRE, f.name);
        write_func(&mut out, f, &str_addrs, false);
    }
    let _ = writeln!(out, "{}:", END_LABEL);

    out
}

const DATA_BASE_I32: i32 = crate::back::mir::DATA_BASE as i32;
