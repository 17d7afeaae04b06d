use std::fmt;
use crate::backend::register::Register;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiscVBinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Sll,
    Srl,
    Sra,
    Sgt,
    Slt,
}

impl RiscVBinaryOp {
    fn mnemonic(&self) -> &'static str {
        match self {
            RiscVBinaryOp::Add => "add",
            RiscVBinaryOp::Sub => "sub",
            RiscVBinaryOp::Mul => "mul",
            RiscVBinaryOp::Div => "div",
            RiscVBinaryOp::Rem => "rem",
            RiscVBinaryOp::And => "and",
            RiscVBinaryOp::Or => "or",
            RiscVBinaryOp::Xor => "xor",
            RiscVBinaryOp::Sll => "sll",
            RiscVBinaryOp::Srl => "srl",
            RiscVBinaryOp::Sra => "sra",
            RiscVBinaryOp::Sgt => "sgt",
            RiscVBinaryOp::Slt => "slt",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiscVImmOp {
    Addi,
    Andi,
    Ori,
    Xori,
    Slli,
    Srli,
    Srai,
}

impl RiscVImmOp {
    fn mnemonic(&self) -> &'static str {
        match self {
            RiscVImmOp::Addi => "addi",
            RiscVImmOp::Andi => "andi",
            RiscVImmOp::Ori => "ori",
            RiscVImmOp::Xori => "xori",
            RiscVImmOp::Slli => "slli",
            RiscVImmOp::Srli => "srli",
            RiscVImmOp::Srai => "srai",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inst {
    Binary(RiscVBinaryOp, Register, Register, Register),
    BinaryImm(RiscVImmOp, Register, Register, i32),
    Seqz(Register, Register),
    Snez(Register, Register),
    Li(Register, i32),
    La(Register, String),
    Mv(Register, Register),
    /// `sw src, offset(base)`
    Sw(Register, Register, i32),
    /// `lw dst, offset(base)`
    Lw(Register, Register, i32),
    Bnez(Register, String),
    Beq(Register, Register, String),
    J(String),
    Call(String),
    Ret,
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inst::Binary(op, rd, rs1, rs2) => write!(f, "{} {}, {}, {}", op.mnemonic(), rd, rs1, rs2),
            Inst::BinaryImm(op, rd, rs, imm) => write!(f, "{} {}, {}, {}", op.mnemonic(), rd, rs, imm),
            Inst::Seqz(rd, rs) => write!(f, "seqz {}, {}", rd, rs),
            Inst::Snez(rd, rs) => write!(f, "snez {}, {}", rd, rs),
            Inst::Li(rd, imm) => write!(f, "li {}, {}", rd, imm),
            Inst::La(rd, label) => write!(f, "la {}, {}", rd, label),
            Inst::Mv(rd, rs) => write!(f, "mv {}, {}", rd, rs),
            Inst::Sw(rs, base, off) => write!(f, "sw {}, {}({})", rs, off, base),
            Inst::Lw(rd, base, off) => write!(f, "lw {}, {}({})", rd, off, base),
            Inst::Bnez(rs, label) => write!(f, "bnez {}, {}", rs, label),
            Inst::Beq(rs1, rs2, label) => write!(f, "beq {}, {}, {}", rs1, rs2, label),
            Inst::J(label) => write!(f, "j {}", label),
            Inst::Call(func) => write!(f, "call {}", func),
            Inst::Ret => write!(f, "ret"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Directive(String),
    Label(String),
    Inst(Inst),
    Comment(String),
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Line::Directive(text) => write!(f, "  {}", text),
            Line::Label(label) => write!(f, "{}:", label),
            Line::Inst(inst) => write!(f, "  {}", inst),
            Line::Comment(text) => write!(f, "  # {}", text),
        }
    }
}

pub fn fits_imm12(imm: i32) -> bool {
    (-2048..=2047).contains(&imm)
}

/// Line buffer for one assembly listing.
#[derive(Debug, Default, Clone)]
pub struct AsmBuilder {
    lines: Vec<Line>,
}

impl AsmBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn directive(&mut self, text: &str) {
        self.lines.push(Line::Directive(text.to_string()));
    }
    pub fn label(&mut self, label: &str) {
        self.lines.push(Line::Label(label.to_string()));
    }
    pub fn comment(&mut self, text: &str) {
        self.lines.push(Line::Comment(text.to_string()));
    }
    pub fn push(&mut self, inst: Inst) {
        self.lines.push(Line::Inst(inst));
    }

    /// `rd = rs + imm`, going through `temp` when `imm` does not fit 12 bits.
    pub fn addi(&mut self, rd: Register, rs: Register, imm: i32, temp: Register) {
        if fits_imm12(imm) {
            self.push(Inst::BinaryImm(RiscVImmOp::Addi, rd, rs, imm));
        } else {
            self.push(Inst::Li(temp, imm));
            self.push(Inst::Binary(RiscVBinaryOp::Add, rd, rs, temp));
        }
    }

    pub fn load(&mut self, rd: Register, base: Register, offset: i32, temp: Register) {
        if fits_imm12(offset) {
            self.push(Inst::Lw(rd, base, offset));
        } else {
            self.push(Inst::Li(temp, offset));
            self.push(Inst::Binary(RiscVBinaryOp::Add, temp, temp, base));
            self.push(Inst::Lw(rd, temp, 0));
        }
    }

    pub fn store(&mut self, rs: Register, base: Register, offset: i32, temp: Register) {
        if fits_imm12(offset) {
            self.push(Inst::Sw(rs, base, offset));
        } else {
            self.push(Inst::Li(temp, offset));
            self.push(Inst::Binary(RiscVBinaryOp::Add, temp, temp, base));
            self.push(Inst::Sw(rs, temp, 0));
        }
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn insts(&self) -> impl Iterator<Item = &Inst> {
        self.lines.iter().filter_map(|line| match line {
            Line::Inst(inst) => Some(inst),
            _ => None,
        })
    }

}

impl fmt::Display for AsmBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}
