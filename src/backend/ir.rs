//! The instruction stream consumed by the backend.
//!
//! This is deliberately small: an ordered list of labeled blocks per function, each
//! instruction carrying an opcode, its operands and an optional named result. The
//! lowering from koopa lives in `lower.rs`; tests build these structures by hand.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    /// A named value. Global symbols use the same namespace as locals.
    Var(String),
    Const(i32),
}

impl Operand {
    pub fn var(name: &str) -> Self {
        Operand::Var(name.to_string())
    }
    pub fn is_const(&self) -> bool {
        matches!(self, Operand::Const(_))
    }
    pub fn as_var(&self) -> Option<&str> {
        match self {
            Operand::Var(name) => Some(name),
            Operand::Const(_) => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Var(name) => write!(f, "{}", name),
            Operand::Const(num) => write!(f, "{}", num),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    /// Logical shift right.
    Shr,
    /// Arithmetic shift right.
    Sar,
}

impl BinaryOp {
    pub fn is_shift(&self) -> bool {
        matches!(self, BinaryOp::Shl | BinaryOp::Shr | BinaryOp::Sar)
    }
    pub fn is_commutative(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Mul | BinaryOp::And | BinaryOp::Or | BinaryOp::Xor
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpPred {
    Eq,
    Ne,
    Sgt,
    Sge,
    Slt,
    Sle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastOp {
    ZExt,
    SExt,
    Trunc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstKind {
    Ret(Option<Operand>),
    Jump(String),
    Branch {
        cond: Operand,
        true_label: String,
        false_label: String,
    },
    Switch {
        selector: Operand,
        default: String,
        cases: Vec<(i32, String)>,
    },
    Call {
        callee: String,
        args: Vec<Operand>,
    },
    Binary {
        op: BinaryOp,
        lhs: Operand,
        rhs: Operand,
    },
    ICmp {
        pred: CmpPred,
        lhs: Operand,
        rhs: Operand,
    },
    /// Reserves `words` 4-byte stack words and yields their address.
    Alloca {
        words: u32,
    },
    Load {
        ptr: Operand,
    },
    Store {
        value: Operand,
        ptr: Operand,
    },
    /// `base + index * elem_size`.
    ElemPtr {
        base: Operand,
        index: Operand,
        elem_size: u32,
    },
    Cast {
        op: CastOp,
        value: Operand,
        from_bits: u32,
        to_bits: u32,
    },
    Phi {
        incoming: Vec<(Operand, String)>,
    },
    /// Anything the producing IR had that this stream has no counterpart for.
    Opaque {
        opcode: String,
        operands: Vec<Operand>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inst {
    pub result: Option<String>,
    pub kind: InstKind,
}

impl Inst {
    pub fn new(kind: InstKind) -> Self {
        Inst { result: None, kind }
    }
    pub fn with_result(result: &str, kind: InstKind) -> Self {
        Inst { result: Some(result.to_string()), kind }
    }

    /// Every value operand, in source order. Block labels are not operands.
    pub fn operands(&self) -> Vec<&Operand> {
        match &self.kind {
            InstKind::Ret(value) => value.iter().collect(),
            InstKind::Jump(_) => Vec::new(),
            InstKind::Branch { cond, .. } => vec![cond],
            InstKind::Switch { selector, .. } => vec![selector],
            InstKind::Call { args, .. } => args.iter().collect(),
            InstKind::Binary { lhs, rhs, .. } | InstKind::ICmp { lhs, rhs, .. } => vec![lhs, rhs],
            InstKind::Alloca { .. } => Vec::new(),
            InstKind::Load { ptr } => vec![ptr],
            InstKind::Store { value, ptr } => vec![value, ptr],
            InstKind::ElemPtr { base, index, .. } => vec![base, index],
            InstKind::Cast { value, .. } => vec![value],
            InstKind::Phi { incoming } => incoming.iter().map(|(value, _)| value).collect(),
            InstKind::Opaque { operands, .. } => operands.iter().collect(),
        }
    }

    pub fn successors(&self) -> Vec<&str> {
        match &self.kind {
            InstKind::Jump(target) => vec![target.as_str()],
            InstKind::Branch { true_label, false_label, .. } => vec![true_label.as_str(), false_label.as_str()],
            InstKind::Switch { default, cases, .. } => {
                let mut targets: Vec<&str> = cases.iter().map(|(_, label)| label.as_str()).collect();
                targets.push(default.as_str());
                targets
            }
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub label: String,
    pub insts: Vec<Inst>,
}

impl Block {
    pub fn new(label: &str, insts: Vec<Inst>) -> Self {
        Block { label: label.to_string(), insts }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub blocks: Vec<Block>,
}

impl Function {
    pub fn new(name: &str, params: &[&str], blocks: Vec<Block>) -> Self {
        Function {
            name: name.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            blocks,
        }
    }

    pub fn insts(&self) -> impl Iterator<Item = &Inst> {
        self.blocks.iter().flat_map(|bb| bb.insts.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalInit {
    Word(i32),
    Words(Vec<i32>),
    /// Zero-filled storage of the given byte size.
    Zero(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Global {
    pub name: String,
    pub init: GlobalInit,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Module {
    pub globals: Vec<Global>,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn global_names(&self) -> impl Iterator<Item = &str> {
        self.globals.iter().map(|g| g.name.as_str())
    }
}
