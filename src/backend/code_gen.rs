use std::collections::HashSet;
use log::debug;
use crate::backend::asm::{fits_imm12, Inst as Asm, RiscVBinaryOp, RiscVImmOp};
use crate::backend::diagnostic::DiagnosticKind;
use crate::backend::environment::{
    data_slot, stage_slot, EdgeStub, Environment, FunctionCodegenState, ScratchContent,
};
use crate::backend::interval::LiveIntervalAnalyzer;
use crate::backend::ir::{
    BinaryOp, Block, CastOp, CmpPred, Function, GlobalInit, Inst, InstKind, Module, Operand,
};
use crate::backend::register::{LinearScan, Location, Register};

pub trait CodeGen {
    fn code_gen(&self, env: &mut Environment);
}

impl CodeGen for Module {
    fn code_gen(&self, env: &mut Environment) {
        if !self.globals.is_empty() {
            env.asm.directive(".data");
        }
        for global in &self.globals {
            env.asm.directive(&format!(".globl {}", global.name));
            env.asm.label(&global.name);
            match &global.init {
                GlobalInit::Word(num) => env.asm.directive(&format!(".word {}", num)),
                GlobalInit::Words(words) => {
                    for num in words {
                        env.asm.directive(&format!(".word {}", num));
                    }
                }
                GlobalInit::Zero(size) => env.asm.directive(&format!(".zero {}", size)),
            }
        }
        env.asm.directive(".text");
        for func in &self.functions {
            func.code_gen(env);
        }
    }
}

impl CodeGen for Function {
    fn code_gen(&self, env: &mut Environment) {
        let liveness = LiveIntervalAnalyzer::new(env.globals.clone()).analyze(self);
        let allocation = LinearScan::new(env.config.allocatable.clone()).allocate(liveness.intervals());
        let state = FunctionCodegenState::new(self, liveness, allocation, env.config);
        debug!(
            "{}: {} intervals, spilled {:?}, frame {} bytes",
            self.name,
            state.liveness.intervals().len(),
            state.allocation.spilled(),
            state.frame.size()
        );
        env.enter_function(state);

        env.asm.directive(&format!(".globl {}", self.name));
        env.asm.label(&self.name);
        prologue(self, env);
        for bb in &self.blocks {
            bb.code_gen(env);
        }
        let stubs = std::mem::take(&mut env.func.stubs);
        for stub in &stubs {
            emit_stub(stub, env);
        }
    }
}

fn prologue(func: &Function, env: &mut Environment) {
    let frame = env.func.frame.size();
    let reserved = env.reserved();
    if frame > 0 {
        env.asm.addi(Register::SP, Register::SP, -frame, reserved);
        if !env.func.is_entry {
            env.asm.push(Asm::Sw(Register::RA, Register::SP, 0));
        }
    }
    // a0..a7 are free once the register arguments have been moved out
    let staging = Register::A7;
    for (i, param) in func.params.iter().enumerate() {
        let Some(location) = env.func.allocation.location(0, param) else {
            continue;
        };
        let slot = env.func.frame.offset(param).unwrap_or_default();
        match (Register::arg(i), location) {
            (Some(arg), Location::Register(reg)) => env.asm.push(Asm::Mv(reg, arg)),
            (Some(arg), _) => env.asm.store(arg, Register::SP, slot, reserved),
            (None, location) => {
                let incoming = frame + 4 * (i as i32 - 8);
                match location {
                    Location::Register(reg) => env.asm.load(reg, Register::SP, incoming, reserved),
                    _ => {
                        env.asm.load(staging, Register::SP, incoming, reserved);
                        env.asm.store(staging, Register::SP, slot, reserved);
                    }
                }
            }
        }
    }
}

fn epilogue(env: &mut Environment) {
    let frame = env.func.frame.size();
    let reserved = env.reserved();
    if !env.func.is_entry {
        env.asm.push(Asm::Lw(Register::RA, Register::SP, 0));
    }
    if frame > 0 {
        env.asm.addi(Register::SP, Register::SP, frame, reserved);
    }
    if env.func.is_entry {
        env.asm.push(Asm::Call("exit".to_string()));
    } else {
        env.asm.push(Asm::Ret);
    }
}

impl CodeGen for Block {
    fn code_gen(&self, env: &mut Environment) {
        env.reset_scratch();
        env.asm.label(&self.label);
        env.func.block = self.label.clone();
        if let Some(start) = env.func.liveness.block_start(&self.label) {
            env.func.index = start;
        }
        for inst in &self.insts {
            inst.code_gen(env);
            env.end_instruction();
            env.func.index += 1;
        }
    }
}

impl CodeGen for Inst {
    fn code_gen(&self, env: &mut Environment) {
        match &self.kind {
            InstKind::Ret(value) => gen_return(value.as_ref(), env),
            InstKind::Jump(target) => {
                env.flush();
                check_label(target, env);
                edge_copies(target, env);
                env.asm.push(Asm::J(target.clone()));
            }
            InstKind::Branch { cond, true_label, false_label } => {
                gen_branch(cond, true_label, false_label, env)
            }
            InstKind::Switch { selector, default, cases } => gen_switch(selector, default, cases, env),
            InstKind::Call { callee, args } => gen_call(self.result.as_deref(), callee, args, env),
            InstKind::Store { value, ptr } => gen_store(value, ptr, env),
            InstKind::Phi { .. } => {}
            InstKind::Opaque { opcode, .. } => {
                env.diagnose(DiagnosticKind::UnsupportedOpcode, format!("unsupported opcode {}", opcode));
            }
            kind => {
                // the rest only compute a value
                let Some(dest) = &self.result else { return };
                match kind {
                    InstKind::Binary { op, lhs, rhs } => gen_binary(dest, *op, lhs, rhs, env),
                    InstKind::ICmp { pred, lhs, rhs } => gen_icmp(dest, *pred, lhs, rhs, env),
                    InstKind::Alloca { .. } => gen_alloca(dest, env),
                    InstKind::Load { ptr } => gen_load(dest, ptr, env),
                    InstKind::ElemPtr { base, index, elem_size } => {
                        gen_elem_ptr(dest, base, index, *elem_size, env)
                    }
                    InstKind::Cast { op, value, from_bits, to_bits } => {
                        gen_cast(dest, *op, value, *from_bits, *to_bits, env)
                    }
                    _ => unreachable!(),
                }
            }
        }
    }
}

fn riscv_op(op: BinaryOp) -> RiscVBinaryOp {
    match op {
        BinaryOp::Add => RiscVBinaryOp::Add,
        BinaryOp::Sub => RiscVBinaryOp::Sub,
        BinaryOp::Mul => RiscVBinaryOp::Mul,
        BinaryOp::Div => RiscVBinaryOp::Div,
        BinaryOp::Rem => RiscVBinaryOp::Rem,
        BinaryOp::And => RiscVBinaryOp::And,
        BinaryOp::Or => RiscVBinaryOp::Or,
        BinaryOp::Xor => RiscVBinaryOp::Xor,
        BinaryOp::Shl => RiscVBinaryOp::Sll,
        BinaryOp::Shr => RiscVBinaryOp::Srl,
        BinaryOp::Sar => RiscVBinaryOp::Sra,
    }
}

/// Immediate-operand variant of `op` with constant right operand `rhs`, if one exists.
fn immediate_form(op: BinaryOp, rhs: i32) -> Option<(RiscVImmOp, i32)> {
    match op {
        BinaryOp::Add if fits_imm12(rhs) => Some((RiscVImmOp::Addi, rhs)),
        BinaryOp::Sub => rhs
            .checked_neg()
            .filter(|neg| fits_imm12(*neg))
            .map(|neg| (RiscVImmOp::Addi, neg)),
        BinaryOp::And if fits_imm12(rhs) => Some((RiscVImmOp::Andi, rhs)),
        BinaryOp::Or if fits_imm12(rhs) => Some((RiscVImmOp::Ori, rhs)),
        BinaryOp::Xor if fits_imm12(rhs) => Some((RiscVImmOp::Xori, rhs)),
        BinaryOp::Shl => Some((RiscVImmOp::Slli, rhs.rem_euclid(32))),
        BinaryOp::Shr => Some((RiscVImmOp::Srli, rhs.rem_euclid(32))),
        BinaryOp::Sar => Some((RiscVImmOp::Srai, rhs.rem_euclid(32))),
        _ => None,
    }
}

fn gen_binary(dest: &str, op: BinaryOp, lhs: &Operand, rhs: &Operand, env: &mut Environment) {
    let (lhs, rhs) = if lhs.is_const() && !rhs.is_const() && op.is_commutative() {
        (rhs, lhs)
    } else {
        (lhs, rhs)
    };
    let rs1 = env.operand(lhs);
    if let Some((imm_op, imm)) = rhs_const(rhs).and_then(|c| immediate_form(op, c)) {
        let rd = env.dest(dest);
        env.asm.push(Asm::BinaryImm(imm_op, rd, rs1, imm));
        env.defined(dest, rd);
        return;
    }
    let mut rs2 = env.operand(rhs);
    if op.is_shift() {
        let masked = env.acquire(ScratchContent::Temp);
        env.asm.push(Asm::BinaryImm(RiscVImmOp::Andi, masked, rs2, 31));
        rs2 = masked;
    }
    let rd = env.dest(dest);
    env.asm.push(Asm::Binary(riscv_op(op), rd, rs1, rs2));
    env.defined(dest, rd);
}

fn rhs_const(op: &Operand) -> Option<i32> {
    match op {
        Operand::Const(num) => Some(*num),
        Operand::Var(_) => None,
    }
}

fn gen_icmp(dest: &str, pred: CmpPred, lhs: &Operand, rhs: &Operand, env: &mut Environment) {
    let symmetric = matches!(pred, CmpPred::Eq | CmpPred::Ne);
    let (lhs, rhs) = if symmetric && *lhs == Operand::Const(0) { (rhs, lhs) } else { (lhs, rhs) };
    let rs1 = env.operand(lhs);
    let against_zero = symmetric && *rhs == Operand::Const(0);
    let rs2 = if against_zero { Register::ZERO } else { env.operand(rhs) };
    let rd = env.dest(dest);
    match pred {
        CmpPred::Eq | CmpPred::Ne => {
            let src = if against_zero {
                rs1
            } else {
                env.asm.push(Asm::Binary(RiscVBinaryOp::Xor, rd, rs1, rs2));
                rd
            };
            if pred == CmpPred::Eq {
                env.asm.push(Asm::Seqz(rd, src));
            } else {
                env.asm.push(Asm::Snez(rd, src));
            }
        }
        CmpPred::Sgt => env.asm.push(Asm::Binary(RiscVBinaryOp::Sgt, rd, rs1, rs2)),
        CmpPred::Slt => env.asm.push(Asm::Binary(RiscVBinaryOp::Slt, rd, rs1, rs2)),
        CmpPred::Sge => {
            env.asm.push(Asm::Binary(RiscVBinaryOp::Slt, rd, rs1, rs2));
            env.asm.push(Asm::BinaryImm(RiscVImmOp::Xori, rd, rd, 1));
        }
        CmpPred::Sle => {
            env.asm.push(Asm::Binary(RiscVBinaryOp::Sgt, rd, rs1, rs2));
            env.asm.push(Asm::BinaryImm(RiscVImmOp::Xori, rd, rd, 1));
        }
    }
    env.defined(dest, rd);
}

fn gen_alloca(dest: &str, env: &mut Environment) {
    let rd = env.dest(dest);
    match env.func.frame.offset(&data_slot(dest)) {
        Some(offset) => {
            let reserved = env.reserved();
            env.asm.addi(rd, Register::SP, offset, reserved);
            env.defined(dest, rd);
        }
        None => env.diagnose(DiagnosticKind::MissingLocation, format!("no stack storage for {}", dest)),
    }
}

fn gen_load(dest: &str, ptr: &Operand, env: &mut Environment) {
    match ptr {
        Operand::Var(name) if env.globals.contains(name) => {
            if let Some(cached) = env.cached_global(name) {
                let rd = env.dest(dest);
                env.asm.push(Asm::Mv(rd, cached));
                env.defined(dest, rd);
            } else {
                let addr = env.address_of(name);
                let rd = env.dest(dest);
                env.asm.push(Asm::Lw(rd, addr, 0));
                env.defined(dest, rd);
            }
        }
        _ => {
            let addr = env.operand(ptr);
            let rd = env.dest(dest);
            env.asm.push(Asm::Lw(rd, addr, 0));
            env.defined(dest, rd);
        }
    }
}

fn gen_store(value: &Operand, ptr: &Operand, env: &mut Environment) {
    match ptr {
        Operand::Var(name) if env.globals.contains(name) => env.write_global(name, value),
        _ => {
            let src = env.operand(value);
            let addr = env.operand(ptr);
            env.asm.push(Asm::Sw(src, addr, 0));
        }
    }
}

fn gen_elem_ptr(dest: &str, base: &Operand, index: &Operand, elem_size: u32, env: &mut Environment) {
    let rs = env.operand(base);
    match index {
        Operand::Const(num) => {
            let offset = num.wrapping_mul(elem_size as i32);
            let rd = env.dest(dest);
            if offset == 0 {
                env.asm.push(Asm::Mv(rd, rs));
            } else if fits_imm12(offset) {
                env.asm.push(Asm::BinaryImm(RiscVImmOp::Addi, rd, rs, offset));
            } else {
                let temp = env.acquire(ScratchContent::Temp);
                env.asm.push(Asm::Li(temp, offset));
                env.asm.push(Asm::Binary(RiscVBinaryOp::Add, rd, rs, temp));
            }
            env.defined(dest, rd);
        }
        Operand::Var(_) => {
            let ri = env.operand(index);
            let scaled = env.acquire(ScratchContent::Temp);
            if elem_size.is_power_of_two() {
                let shift = elem_size.trailing_zeros() as i32;
                env.asm.push(Asm::BinaryImm(RiscVImmOp::Slli, scaled, ri, shift));
            } else {
                env.asm.push(Asm::Li(scaled, elem_size as i32));
                env.asm.push(Asm::Binary(RiscVBinaryOp::Mul, scaled, ri, scaled));
            }
            let rd = env.dest(dest);
            env.asm.push(Asm::Binary(RiscVBinaryOp::Add, rd, rs, scaled));
            env.defined(dest, rd);
        }
    }
}

fn gen_cast(dest: &str, op: CastOp, value: &Operand, from_bits: u32, to_bits: u32, env: &mut Environment) {
    let rs = env.operand(value);
    let rd = env.dest(dest);
    match op {
        // booleans are already 0 or 1
        CastOp::ZExt if from_bits <= 1 || from_bits >= 32 => env.asm.push(Asm::Mv(rd, rs)),
        CastOp::ZExt => zero_extend(rd, rs, from_bits, env),
        CastOp::SExt if from_bits < 32 => {
            let shift = 32 - from_bits as i32;
            env.asm.push(Asm::BinaryImm(RiscVImmOp::Slli, rd, rs, shift));
            env.asm.push(Asm::BinaryImm(RiscVImmOp::Srai, rd, rd, shift));
        }
        CastOp::SExt => env.asm.push(Asm::Mv(rd, rs)),
        CastOp::Trunc if to_bits < 32 => zero_extend(rd, rs, to_bits, env),
        CastOp::Trunc => env.asm.push(Asm::Mv(rd, rs)),
    }
    env.defined(dest, rd);
}

/// Keeps the low `bits` bits of `rs`.
fn zero_extend(rd: Register, rs: Register, bits: u32, env: &mut Environment) {
    let mask = (1i64 << bits) - 1;
    if mask <= 2047 {
        env.asm.push(Asm::BinaryImm(RiscVImmOp::Andi, rd, rs, mask as i32));
    } else {
        let shift = 32 - bits as i32;
        env.asm.push(Asm::BinaryImm(RiscVImmOp::Slli, rd, rs, shift));
        env.asm.push(Asm::BinaryImm(RiscVImmOp::Srli, rd, rd, shift));
    }
}

fn gen_return(value: Option<&Operand>, env: &mut Environment) {
    env.flush();
    match value {
        Some(value) => env.move_into(Register::A0, value),
        None if env.func.is_entry => env.asm.push(Asm::Li(Register::A0, 0)),
        None => {}
    }
    epilogue(env);
}

fn gen_branch(cond: &Operand, true_label: &str, false_label: &str, env: &mut Environment) {
    let rc = env.operand(cond);
    env.flush();
    let target = edge_target(true_label, env);
    env.asm.push(Asm::Bnez(rc, target));
    check_label(false_label, env);
    edge_copies(false_label, env);
    env.asm.push(Asm::J(false_label.to_string()));
}

fn gen_switch(selector: &Operand, default: &str, cases: &[(i32, String)], env: &mut Environment) {
    let rs = env.operand(selector);
    env.flush();
    let diff = env.acquire(ScratchContent::Temp);
    for (value, label) in cases {
        let target = edge_target(label, env);
        match value.checked_neg().filter(|neg| fits_imm12(*neg)) {
            Some(neg) => env.asm.push(Asm::BinaryImm(RiscVImmOp::Addi, diff, rs, neg)),
            None => {
                env.asm.push(Asm::Li(diff, *value));
                env.asm.push(Asm::Binary(RiscVBinaryOp::Sub, diff, rs, diff));
            }
        }
        env.asm.push(Asm::Beq(diff, Register::ZERO, target));
    }
    check_label(default, env);
    edge_copies(default, env);
    env.asm.push(Asm::J(default.to_string()));
}

fn check_label(label: &str, env: &mut Environment) {
    if !env.func.labels.contains(label) {
        env.diagnose(
            DiagnosticKind::UnknownLabel,
            format!("branch to unknown block {}", label),
        );
    }
}

/// Merge copies the edge from the current block into `to` needs.
fn pending_copies(to: &str, env: &Environment) -> Vec<(String, Operand)> {
    let from = &env.func.block;
    let Some(group) = env.func.phis.get(to) else {
        return Vec::new();
    };
    group
        .iter()
        .filter_map(|(dest, incoming)| {
            incoming
                .iter()
                .find(|(_, pred)| pred == from)
                .map(|(value, _)| (dest.clone(), value.clone()))
        })
        .filter(|(dest, value)| value.as_var() != Some(dest.as_str()))
        .collect()
}

/// Label a conditional edge into `to` should branch to: `to` itself, or a stub that
/// performs the edge's merge copies first.
fn edge_target(to: &str, env: &mut Environment) -> String {
    check_label(to, env);
    if pending_copies(to, env).is_empty() {
        return to.to_string();
    }
    let label = format!(".L{}_edge{}", env.func.name, env.func.stubs.len());
    env.func.stubs.push(EdgeStub {
        label: label.clone(),
        index: env.func.index,
        from: env.func.block.clone(),
        to: to.to_string(),
    });
    label
}

fn emit_stub(stub: &EdgeStub, env: &mut Environment) {
    env.func.scratch.clear();
    env.asm.label(&stub.label);
    env.func.index = stub.index;
    env.func.block = stub.from.clone();
    edge_copies(&stub.to, env);
    env.asm.push(Asm::J(stub.to.clone()));
    env.end_instruction();
}

/// Delivers incoming values into the merge destinations of `to` as one parallel copy.
fn edge_copies(to: &str, env: &mut Environment) {
    let copies = pending_copies(to, env);
    if copies.is_empty() {
        return;
    }
    let dests: HashSet<&str> = copies.iter().map(|(dest, _)| dest.as_str()).collect();
    let overlapping = copies
        .iter()
        .any(|(_, value)| value.as_var().map_or(false, |var| dests.contains(var)));
    let reserved = env.reserved();

    if !overlapping {
        for (dest, value) in &copies {
            assign(dest, value, env);
            env.end_instruction();
        }
        return;
    }

    for (i, (_, value)) in copies.iter().enumerate() {
        let src = env.operand(value);
        match env.func.frame.offset(&stage_slot(i)) {
            Some(offset) => env.asm.store(src, Register::SP, offset, reserved),
            None => env.diagnose(DiagnosticKind::MissingLocation, format!("no staging slot {}", i)),
        }
        env.end_instruction();
    }
    for (i, (dest, _)) in copies.iter().enumerate() {
        let Some(staged) = env.func.frame.offset(&stage_slot(i)) else { continue };
        match env.location(dest) {
            Some(Location::Register(reg)) => env.asm.load(reg, Register::SP, staged, reserved),
            Some(Location::Spilled) => {
                forget_value(dest, env);
                let slot = env.func.frame.offset(dest).unwrap_or_default();
                env.asm.load(reserved, Register::SP, staged, reserved);
                env.asm.store(reserved, Register::SP, slot, reserved);
            }
            _ => {
                let index = env.func.index;
                env.diagnose(
                    DiagnosticKind::MissingLocation,
                    format!("no location for {} at instruction {}", dest, index),
                );
            }
        }
    }
}

/// Writes `value` into the home of merge destination `dest`.
fn assign(dest: &str, value: &Operand, env: &mut Environment) {
    match env.location(dest) {
        Some(Location::Register(reg)) => env.move_into(reg, value),
        Some(Location::Spilled) => {
            forget_value(dest, env);
            let src = env.operand(value);
            let slot = env.func.frame.offset(dest).unwrap_or_default();
            let reserved = env.reserved();
            env.asm.store(src, Register::SP, slot, reserved);
        }
        _ => {
            let index = env.func.index;
            env.diagnose(
                DiagnosticKind::MissingLocation,
                format!("no location for {} at instruction {}", dest, index),
            );
        }
    }
}

/// Drops a stale scratch copy of `var` without writing it back.
fn forget_value(var: &str, env: &mut Environment) {
    if let Some(reg) = env.func.scratch.find(&ScratchContent::Value(var.to_string())) {
        env.func.scratch.evict(reg);
    }
}

fn gen_call(result: Option<&str>, callee: &str, args: &[Operand], env: &mut Environment) {
    env.flush();
    let reserved = env.reserved();
    let saved = env.live_across();
    for (var, reg) in &saved {
        if let Some(slot) = env.func.frame.offset(var) {
            env.asm.store(*reg, Register::SP, slot, reserved);
        }
    }

    let extra = args.len().saturating_sub(8) as i32;
    let area = (4 * extra + 15) & !15;
    for (i, arg) in args.iter().enumerate().skip(8) {
        let src = env.operand(arg);
        env.asm.store(src, Register::SP, -area + 4 * (i as i32 - 8), reserved);
        env.end_instruction();
    }
    for (i, arg) in args.iter().enumerate().take(8) {
        if let Some(reg) = Register::arg(i) {
            env.move_into(reg, arg);
        }
        env.end_instruction();
    }

    if area > 0 {
        env.asm.addi(Register::SP, Register::SP, -area, reserved);
    }
    env.asm.push(Asm::Call(callee.to_string()));
    if area > 0 {
        env.asm.addi(Register::SP, Register::SP, area, reserved);
    }
    // the callee owns every scratch register
    env.func.scratch.clear();

    for (var, reg) in &saved {
        if let Some(slot) = env.func.frame.offset(var) {
            env.asm.load(*reg, Register::SP, slot, reserved);
        }
    }
    if let Some(dest) = result {
        let rd = env.dest(dest);
        if rd != Register::A0 {
            env.asm.push(Asm::Mv(rd, Register::A0));
        }
        env.defined(dest, rd);
    }
}
