//! Lowering of an in-memory koopa `Program` into the backend's instruction stream.

use std::collections::{HashMap, HashSet};
use koopa::ir::{BasicBlock, BinaryOp as KoopaOp, FunctionData, Program, Type, TypeKind, Value, ValueKind};
use thiserror::Error;
use crate::backend::ir::{
    BinaryOp, Block, CmpPred, Function, Global, GlobalInit, Inst, InstKind, Module, Operand,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LowerError {
    #[error("global allocation without a name")]
    UnnamedGlobal,
    #[error("unsupported initialiser for global {0}")]
    UnsupportedInit(String),
    #[error("value used before it is defined in function {0}")]
    UnknownValue(String),
}

pub fn lower_program(program: &Program) -> Result<Module, LowerError> {
    let mut module = Module::default();
    let mut globals: HashMap<Value, String> = HashMap::new();
    for &val in program.inst_layout() {
        let data = program.borrow_value(val);
        let ValueKind::GlobalAlloc(alloc) = data.kind() else {
            continue;
        };
        let name = data
            .name()
            .as_deref()
            .ok_or(LowerError::UnnamedGlobal)?
            .trim_start_matches('@')
            .to_string();
        let mut words = Vec::new();
        flatten_init(program, alloc.init(), &name, &mut words)?;
        let init = match program.borrow_value(alloc.init()).kind() {
            ValueKind::Integer(num) => GlobalInit::Word(num.value()),
            ValueKind::ZeroInit(_) => GlobalInit::Zero(4 * words.len() as u32),
            _ => GlobalInit::Words(words),
        };
        globals.insert(val, name.clone());
        module.globals.push(Global { name, init });
    }

    for &func in program.func_layout() {
        let data = program.func(func);
        if data.layout().entry_bb().is_none() {
            continue;
        }
        module.functions.push(FunctionLowering::new(program, data, &globals).lower()?);
    }
    Ok(module)
}

fn flatten_init(program: &Program, init: Value, global: &str, words: &mut Vec<i32>) -> Result<(), LowerError> {
    let data = program.borrow_value(init);
    match data.kind() {
        ValueKind::Integer(num) => words.push(num.value()),
        ValueKind::ZeroInit(_) => words.extend(std::iter::repeat(0).take(type_size(data.ty()) / 4)),
        ValueKind::Aggregate(agg) => {
            for &elem in agg.elems() {
                flatten_init(program, elem, global, words)?;
            }
        }
        _ => return Err(LowerError::UnsupportedInit(global.to_string())),
    }
    Ok(())
}

/// Size in bytes on a 32-bit target.
fn type_size(ty: &Type) -> usize {
    match ty.kind() {
        TypeKind::Int32 | TypeKind::Pointer(_) => 4,
        TypeKind::Array(base, len) => type_size(base) * len,
        _ => 0,
    }
}

struct FunctionLowering<'a> {
    program: &'a Program,
    data: &'a FunctionData,
    globals: &'a HashMap<Value, String>,
    name: String,
    names: HashMap<Value, String>,
    labels: HashMap<BasicBlock, String>,
}

impl<'a> FunctionLowering<'a> {
    fn new(program: &'a Program, data: &'a FunctionData, globals: &'a HashMap<Value, String>) -> Self {
        let name = data.name().trim_start_matches('@').to_string();
        let mut names = HashMap::new();
        let mut next = 0;
        let mut fresh = |val: Value, names: &mut HashMap<Value, String>| {
            names.insert(val, format!("%{}", next));
            next += 1;
        };
        for &param in data.params() {
            fresh(param, &mut names);
        }
        let mut labels = HashMap::new();
        let mut used = HashSet::new();
        for (&bb, node) in data.layout().bbs() {
            let base = match data.dfg().bb(bb).name() {
                Some(bb_name) => format!(".L{}_{}", name, bb_name.trim_start_matches(|c: char| c == '%' || c == '@')),
                None => format!(".L{}_bb", name),
            };
            let mut label = base.clone();
            let mut suffix = 0;
            while !used.insert(label.clone()) {
                suffix += 1;
                label = format!("{}_{}", base, suffix);
            }
            labels.insert(bb, label);

            for &param in data.dfg().bb(bb).params() {
                fresh(param, &mut names);
            }
            for &inst in node.insts().keys() {
                if !data.dfg().value(inst).ty().is_unit() {
                    fresh(inst, &mut names);
                }
            }
        }
        FunctionLowering { program, data, globals, name, names, labels }
    }

    fn lower(&self) -> Result<Function, LowerError> {
        let mut incoming: HashMap<BasicBlock, Vec<(String, Vec<Value>)>> = HashMap::new();
        for (&bb, node) in self.data.layout().bbs() {
            let Some(&last) = node.insts().back_key() else { continue };
            let from = self.label(bb);
            match self.data.dfg().value(last).kind() {
                ValueKind::Jump(jump) => {
                    incoming.entry(jump.target()).or_default().push((from, jump.args().to_vec()));
                }
                ValueKind::Branch(branch) => {
                    incoming
                        .entry(branch.true_bb())
                        .or_default()
                        .push((from.clone(), branch.true_args().to_vec()));
                    incoming
                        .entry(branch.false_bb())
                        .or_default()
                        .push((from, branch.false_args().to_vec()));
                }
                _ => {}
            }
        }

        let mut blocks = Vec::new();
        for (&bb, node) in self.data.layout().bbs() {
            let mut insts = Vec::new();
            for (i, &param) in self.data.dfg().bb(bb).params().iter().enumerate() {
                let mut pairs = Vec::new();
                for (pred, args) in incoming.get(&bb).map(Vec::as_slice).unwrap_or_default() {
                    if let Some(&arg) = args.get(i) {
                        pairs.push((self.operand(arg)?, pred.clone()));
                    }
                }
                insts.push(Inst::with_result(self.value_name(param)?, InstKind::Phi { incoming: pairs }));
            }
            for &inst in node.insts().keys() {
                insts.push(self.lower_inst(inst)?);
            }
            blocks.push(Block { label: self.label(bb), insts });
        }

        let params: Vec<String> = self
            .data
            .params()
            .iter()
            .map(|&p| self.value_name(p).map(str::to_string))
            .collect::<Result<_, _>>()?;
        Ok(Function { name: self.name.clone(), params, blocks })
    }

    fn label(&self, bb: BasicBlock) -> String {
        self.labels.get(&bb).cloned().unwrap_or_else(|| format!(".L{}_unknown", self.name))
    }

    fn value_name(&self, val: Value) -> Result<&str, LowerError> {
        self.names
            .get(&val)
            .map(String::as_str)
            .ok_or_else(|| LowerError::UnknownValue(self.name.clone()))
    }

    fn value_ty(&self, val: Value) -> Type {
        if self.globals.contains_key(&val) {
            self.program.borrow_value(val).ty().clone()
        } else {
            self.data.dfg().value(val).ty().clone()
        }
    }

    fn operand(&self, val: Value) -> Result<Operand, LowerError> {
        if let Some(name) = self.globals.get(&val) {
            return Ok(Operand::Var(name.clone()));
        }
        match self.data.dfg().value(val).kind() {
            ValueKind::Integer(num) => Ok(Operand::Const(num.value())),
            ValueKind::ZeroInit(_) => Ok(Operand::Const(0)),
            _ => self.value_name(val).map(Operand::var),
        }
    }

    fn lower_inst(&self, inst: Value) -> Result<Inst, LowerError> {
        let data = self.data.dfg().value(inst);
        let kind = match data.kind() {
            ValueKind::Alloc(_) => {
                let size = match data.ty().kind() {
                    TypeKind::Pointer(base) => type_size(base),
                    _ => 4,
                };
                InstKind::Alloca { words: ((size + 3) / 4).max(1) as u32 }
            }
            ValueKind::Load(load) => InstKind::Load { ptr: self.operand(load.src())? },
            ValueKind::Store(store) => {
                let value = store.value();
                if matches!(self.data.dfg().value(value).kind(), ValueKind::Aggregate(_)) {
                    InstKind::Opaque { opcode: "store aggregate".into(), operands: vec![self.operand(store.dest())?] }
                } else {
                    InstKind::Store { value: self.operand(value)?, ptr: self.operand(store.dest())? }
                }
            }
            ValueKind::GetPtr(ptr) => {
                let elem_size = match self.value_ty(ptr.src()).kind() {
                    TypeKind::Pointer(base) => type_size(base),
                    _ => 4,
                };
                InstKind::ElemPtr {
                    base: self.operand(ptr.src())?,
                    index: self.operand(ptr.index())?,
                    elem_size: elem_size as u32,
                }
            }
            ValueKind::GetElemPtr(ptr) => {
                let elem_size = match self.value_ty(ptr.src()).kind() {
                    TypeKind::Pointer(base) => match base.kind() {
                        TypeKind::Array(elem, _) => type_size(elem),
                        _ => type_size(base),
                    },
                    _ => 4,
                };
                InstKind::ElemPtr {
                    base: self.operand(ptr.src())?,
                    index: self.operand(ptr.index())?,
                    elem_size: elem_size as u32,
                }
            }
            ValueKind::Binary(binary) => {
                let lhs = self.operand(binary.lhs())?;
                let rhs = self.operand(binary.rhs())?;
                let compare = |pred| InstKind::ICmp { pred, lhs: lhs.clone(), rhs: rhs.clone() };
                let arith = |op| InstKind::Binary { op, lhs: lhs.clone(), rhs: rhs.clone() };
                match binary.op() {
                    KoopaOp::NotEq => compare(CmpPred::Ne),
                    KoopaOp::Eq => compare(CmpPred::Eq),
                    KoopaOp::Gt => compare(CmpPred::Sgt),
                    KoopaOp::Lt => compare(CmpPred::Slt),
                    KoopaOp::Ge => compare(CmpPred::Sge),
                    KoopaOp::Le => compare(CmpPred::Sle),
                    KoopaOp::Add => arith(BinaryOp::Add),
                    KoopaOp::Sub => arith(BinaryOp::Sub),
                    KoopaOp::Mul => arith(BinaryOp::Mul),
                    KoopaOp::Div => arith(BinaryOp::Div),
                    KoopaOp::Mod => arith(BinaryOp::Rem),
                    KoopaOp::And => arith(BinaryOp::And),
                    KoopaOp::Or => arith(BinaryOp::Or),
                    KoopaOp::Xor => arith(BinaryOp::Xor),
                    KoopaOp::Shl => arith(BinaryOp::Shl),
                    KoopaOp::Shr => arith(BinaryOp::Shr),
                    KoopaOp::Sar => arith(BinaryOp::Sar),
                }
            }
            ValueKind::Branch(branch) => InstKind::Branch {
                cond: self.operand(branch.cond())?,
                true_label: self.label(branch.true_bb()),
                false_label: self.label(branch.false_bb()),
            },
            ValueKind::Jump(jump) => InstKind::Jump(self.label(jump.target())),
            ValueKind::Call(call) => InstKind::Call {
                callee: self.program.func(call.callee()).name().trim_start_matches('@').to_string(),
                args: call.args().iter().map(|&arg| self.operand(arg)).collect::<Result<_, _>>()?,
            },
            ValueKind::Return(ret) => InstKind::Ret(ret.value().map(|v| self.operand(v)).transpose()?),
            other => InstKind::Opaque { opcode: kind_name(other).into(), operands: Vec::new() },
        };
        let result = if data.ty().is_unit() {
            None
        } else {
            Some(self.value_name(inst)?.to_string())
        };
        Ok(Inst { result, kind })
    }
}

fn kind_name(kind: &ValueKind) -> &'static str {
    match kind {
        ValueKind::Aggregate(_) => "aggregate",
        ValueKind::FuncArgRef(_) => "func_arg_ref",
        ValueKind::BlockArgRef(_) => "block_arg_ref",
        ValueKind::GlobalAlloc(_) => "global_alloc",
        ValueKind::Integer(_) | ValueKind::ZeroInit(_) => "constant",
        _ => "unknown",
    }
}
