use std::collections::{HashMap, HashSet};
use log::warn;
use crate::backend::asm::{AsmBuilder, Inst};
use crate::backend::config::TargetConfig;
use crate::backend::diagnostic::{Diagnostic, DiagnosticKind};
use crate::backend::interval::Liveness;
use crate::backend::ir::{Function, GlobalInit, InstKind, Module, Operand};
use crate::backend::register::{Allocation, Location, Register};

/// What a scratch register currently holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScratchContent {
    /// A spilled local; its home is the local's stack slot.
    Value(String),
    /// The address of a global symbol.
    Address(String),
    /// The value of a scalar global; its home is the global's memory.
    Global(String),
    /// A constant or intermediate needed by one instruction only.
    Temp,
}

#[derive(Debug, Clone)]
struct ScratchSlot {
    reg: Register,
    content: Option<ScratchContent>,
    dirty: bool,
    locked: bool,
}

/// Lock and dirty bookkeeping for the scratch registers of one function.
#[derive(Debug, Clone, Default)]
pub struct ScratchPool {
    slots: Vec<ScratchSlot>,
}

impl ScratchPool {
    pub fn new(regs: &[Register]) -> Self {
        ScratchPool {
            slots: regs
                .iter()
                .map(|&reg| ScratchSlot { reg, content: None, dirty: false, locked: false })
                .collect(),
        }
    }

    fn slot_mut(&mut self, reg: Register) -> Option<&mut ScratchSlot> {
        self.slots.iter_mut().find(|slot| slot.reg == reg)
    }

    pub fn find(&self, content: &ScratchContent) -> Option<Register> {
        if *content == ScratchContent::Temp {
            return None;
        }
        self.slots
            .iter()
            .find(|slot| slot.content.as_ref() == Some(content))
            .map(|slot| slot.reg)
    }

    /// First register holding nothing.
    pub fn free(&self) -> Option<Register> {
        self.slots
            .iter()
            .find(|slot| slot.content.is_none() && !slot.locked)
            .map(|slot| slot.reg)
    }

    /// First unlocked register whose content satisfies `dead`.
    pub fn reclaimable(&self, dead: impl Fn(&ScratchContent) -> bool) -> Option<Register> {
        self.slots
            .iter()
            .filter(|slot| !slot.locked)
            .find(|slot| slot.content.as_ref().map_or(false, &dead))
            .map(|slot| slot.reg)
    }

    /// The unlocked register whose content is needed latest according to `end_of`.
    /// Earlier registers win ties.
    pub fn victim(&self, end_of: impl Fn(&ScratchContent) -> usize) -> Option<Register> {
        let mut best: Option<(usize, Register)> = None;
        for slot in self.slots.iter().filter(|slot| !slot.locked) {
            let Some(content) = &slot.content else { continue };
            let end = end_of(content);
            if best.map_or(true, |(best_end, _)| end > best_end) {
                best = Some((end, slot.reg));
            }
        }
        best.map(|(_, reg)| reg)
    }

    /// Takes `reg` for `content`, locked and clean.
    pub fn occupy(&mut self, reg: Register, content: ScratchContent) {
        if let Some(slot) = self.slot_mut(reg) {
            slot.content = Some(content);
            slot.dirty = false;
            slot.locked = true;
        }
    }

    /// Empties `reg`, returning what it held and whether it was dirty.
    pub fn evict(&mut self, reg: Register) -> Option<(ScratchContent, bool)> {
        let slot = self.slot_mut(reg)?;
        let dirty = std::mem::replace(&mut slot.dirty, false);
        slot.locked = false;
        slot.content.take().map(|content| (content, dirty))
    }

    pub fn lock(&mut self, reg: Register) {
        if let Some(slot) = self.slot_mut(reg) {
            slot.locked = true;
        }
    }
    pub fn mark_dirty(&mut self, reg: Register) {
        if let Some(slot) = self.slot_mut(reg) {
            slot.dirty = slot.content.is_some();
        }
    }
    pub fn mark_clean(&mut self, reg: Register) {
        if let Some(slot) = self.slot_mut(reg) {
            slot.dirty = false;
        }
    }

    pub fn content(&self, reg: Register) -> Option<&ScratchContent> {
        self.slots.iter().find(|slot| slot.reg == reg)?.content.as_ref()
    }
    pub fn is_locked(&self, reg: Register) -> bool {
        self.slots.iter().any(|slot| slot.reg == reg && slot.locked)
    }
    pub fn is_dirty(&self, reg: Register) -> bool {
        self.slots.iter().any(|slot| slot.reg == reg && slot.dirty)
    }

    pub fn dirty(&self) -> Vec<(Register, ScratchContent)> {
        self.slots
            .iter()
            .filter(|slot| slot.dirty)
            .filter_map(|slot| slot.content.clone().map(|content| (slot.reg, content)))
            .collect()
    }

    /// Unlocks everything and releases contents that only lived for one instruction.
    pub fn end_instruction(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.locked = false;
            if matches!(slot.content, Some(ScratchContent::Temp) | Some(ScratchContent::Address(_))) {
                slot.content = None;
            }
        }
    }

    /// Forgets every content. Dirty registers must have been flushed.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.content = None;
            slot.dirty = false;
            slot.locked = false;
        }
    }
}

/// Stack-offset table. Offsets are handed out in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct StackFrame {
    offsets: HashMap<String, i32>,
    next: i32,
}

impl StackFrame {
    pub fn new(base: i32) -> Self {
        StackFrame { offsets: HashMap::new(), next: base }
    }

    pub fn reserve(&mut self, name: &str, words: u32) -> i32 {
        if let Some(&offset) = self.offsets.get(name) {
            return offset;
        }
        let offset = self.next;
        self.offsets.insert(name.to_string(), offset);
        self.next += 4 * words as i32;
        offset
    }

    pub fn offset(&self, name: &str) -> Option<i32> {
        self.offsets.get(name).copied()
    }

    /// Frame size, rounded up to 16 bytes.
    pub fn size(&self) -> i32 {
        (self.next + 15) & !15
    }
}

pub fn data_slot(alloca: &str) -> String {
    format!("{}$data", alloca)
}

pub fn stage_slot(i: usize) -> String {
    format!("$stage{}", i)
}

/// Merge instructions at the head of a block: (destination, incoming pairs).
pub type PhiGroup = Vec<(String, Vec<(Operand, String)>)>;

/// An edge whose merge copies are emitted out of line, after the function body.
#[derive(Debug, Clone)]
pub struct EdgeStub {
    pub label: String,
    pub index: usize,
    pub from: String,
    pub to: String,
}

/// Everything the code generator knows about the function being translated.
/// A fresh one is built for every function.
#[derive(Debug, Default)]
pub struct FunctionCodegenState {
    pub name: String,
    pub is_entry: bool,
    pub liveness: Liveness,
    pub allocation: Allocation,
    pub frame: StackFrame,
    pub scratch: ScratchPool,
    /// Label of the block being translated.
    pub block: String,
    /// Index of the instruction being translated; 0 in the prologue.
    pub index: usize,
    pub phis: HashMap<String, PhiGroup>,
    pub stubs: Vec<EdgeStub>,
    pub labels: HashSet<String>,
}

impl FunctionCodegenState {
    pub fn new(func: &Function, liveness: Liveness, allocation: Allocation, config: &TargetConfig) -> Self {
        let is_entry = func.name == config.entry;
        let mut frame = StackFrame::new(if is_entry { 0 } else { 4 });
        for param in &func.params {
            frame.reserve(param, 1);
        }
        for inst in func.insts() {
            if let Some(result) = &inst.result {
                frame.reserve(result, 1);
                if let InstKind::Alloca { words } = &inst.kind {
                    frame.reserve(&data_slot(result), *words);
                }
            }
        }

        let mut phis = HashMap::new();
        for bb in &func.blocks {
            let group: PhiGroup = bb
                .insts
                .iter()
                .filter_map(|inst| match (&inst.result, &inst.kind) {
                    (Some(dest), InstKind::Phi { incoming }) => Some((dest.clone(), incoming.clone())),
                    _ => None,
                })
                .collect();
            if !group.is_empty() {
                phis.insert(bb.label.clone(), group);
            }
        }
        let widest = phis.values().map(Vec::len).max().unwrap_or(0);
        if widest > 1 {
            for i in 0..widest {
                frame.reserve(&stage_slot(i), 1);
            }
        }

        FunctionCodegenState {
            name: func.name.clone(),
            is_entry,
            liveness,
            allocation,
            frame,
            scratch: ScratchPool::new(&config.scratch),
            block: String::new(),
            index: 0,
            phis,
            stubs: Vec::new(),
            labels: func.blocks.iter().map(|bb| bb.label.clone()).collect(),
        }
    }
}

pub struct Environment<'a> {
    pub config: &'a TargetConfig,
    pub globals: HashSet<String>,
    scalar_globals: HashSet<String>,
    pub asm: AsmBuilder,
    pub diagnostics: Vec<Diagnostic>,
    pub func: FunctionCodegenState,
}

impl<'a> Environment<'a> {
    pub fn new(module: &Module, config: &'a TargetConfig) -> Self {
        Environment {
            config,
            globals: module.global_names().map(str::to_string).collect(),
            scalar_globals: module
                .globals
                .iter()
                .filter(|g| matches!(g.init, GlobalInit::Word(_)))
                .map(|g| g.name.clone())
                .collect(),
            asm: AsmBuilder::new(),
            diagnostics: Vec::new(),
            func: FunctionCodegenState::default(),
        }
    }

    pub fn finish(self) -> (AsmBuilder, Vec<Diagnostic>) {
        (self.asm, self.diagnostics)
    }

    pub fn enter_function(&mut self, state: FunctionCodegenState) {
        self.func = state;
    }

    /// Records a best-effort recovery and leaves a comment in the listing.
    pub fn diagnose(&mut self, kind: DiagnosticKind, message: String) {
        let diagnostic = Diagnostic::new(kind, &self.func.name, self.func.index, message);
        warn!("{}", diagnostic);
        self.asm.comment(&format!("{}: {}", diagnostic.severity, diagnostic.message));
        self.diagnostics.push(diagnostic);
    }

    pub fn reserved(&self) -> Register {
        self.config.reserved
    }

    pub fn location(&self, var: &str) -> Option<Location> {
        if self.globals.contains(var) {
            return Some(Location::Global);
        }
        self.func.allocation.location(self.func.index, var)
    }

    pub fn is_scalar_global(&self, name: &str) -> bool {
        self.scalar_globals.contains(name)
    }

    /// A scratch register already holding `content`, locked for this instruction.
    fn cached(&mut self, content: &ScratchContent) -> Option<Register> {
        let reg = self.func.scratch.find(content)?;
        self.func.scratch.lock(reg);
        Some(reg)
    }

    /// A scratch register newly dedicated to `content`, locked for this instruction.
    pub fn acquire(&mut self, content: ScratchContent) -> Register {
        let index = self.func.index;
        let reg = self.func.scratch.free().or_else(|| {
            let liveness = &self.func.liveness;
            self.func
                .scratch
                .reclaimable(|c| match c {
                    ScratchContent::Value(var) => liveness.get(var).map_or(true, |i| i.end < index),
                    _ => false,
                })
                .or_else(|| {
                    self.func.scratch.victim(|c| match c {
                        ScratchContent::Value(var) => liveness.get(var).map_or(index, |i| i.end),
                        _ => index,
                    })
                })
        });
        let Some(reg) = reg else {
            let reserved = self.reserved();
            self.diagnose(
                DiagnosticKind::ScratchExhausted,
                format!("all scratch registers locked, falling back to {}", reserved),
            );
            return reserved;
        };
        self.release(reg);
        self.func.scratch.occupy(reg, content);
        reg
    }

    /// Writes `reg` back to its home if it is dirty.
    fn write_back(&mut self, reg: Register) {
        if !self.func.scratch.is_dirty(reg) {
            return;
        }
        let reserved = self.reserved();
        match self.func.scratch.content(reg).cloned() {
            Some(ScratchContent::Value(var)) => match self.func.frame.offset(&var) {
                Some(offset) => self.asm.store(reg, Register::SP, offset, reserved),
                None => self.diagnose(DiagnosticKind::MissingLocation, format!("no stack slot for {}", var)),
            },
            Some(ScratchContent::Global(name)) => {
                self.asm.push(Inst::La(reserved, name));
                self.asm.push(Inst::Sw(reg, reserved, 0));
            }
            _ => {}
        }
        self.func.scratch.mark_clean(reg);
    }

    fn release(&mut self, reg: Register) {
        self.write_back(reg);
        self.func.scratch.evict(reg);
    }

    /// Writes every dirty scratch register back to its home.
    pub fn flush(&mut self) {
        for (reg, _) in self.func.scratch.dirty() {
            self.write_back(reg);
        }
    }

    /// Forgets all scratch contents, flushing first.
    pub fn reset_scratch(&mut self) {
        self.flush();
        self.func.scratch.clear();
    }

    pub fn end_instruction(&mut self) {
        self.func.scratch.end_instruction();
    }

    /// Register holding the address of global `name`.
    pub fn address_of(&mut self, name: &str) -> Register {
        // the address may be written through, so the cached value must reach memory first
        if let Some(reg) = self.func.scratch.find(&ScratchContent::Global(name.to_string())) {
            if !self.func.scratch.is_locked(reg) {
                self.release(reg);
            } else {
                self.write_back(reg);
            }
        }
        if let Some(reg) = self.cached(&ScratchContent::Address(name.to_string())) {
            return reg;
        }
        let reg = self.acquire(ScratchContent::Address(name.to_string()));
        self.asm.push(Inst::La(reg, name.to_string()));
        reg
    }

    /// Register holding the current value of `op`.
    pub fn operand(&mut self, op: &Operand) -> Register {
        match op {
            Operand::Const(num) => {
                let reg = self.acquire(ScratchContent::Temp);
                self.asm.push(Inst::Li(reg, *num));
                reg
            }
            Operand::Var(name) => self.read(name),
        }
    }

    /// Register holding the value named `var`. Globals yield their address.
    pub fn read(&mut self, var: &str) -> Register {
        match self.location(var) {
            Some(Location::Global) => self.address_of(var),
            Some(Location::Register(reg)) => reg,
            Some(Location::Spilled) => {
                let content = ScratchContent::Value(var.to_string());
                if let Some(reg) = self.cached(&content) {
                    return reg;
                }
                let Some(offset) = self.func.frame.offset(var) else {
                    return self.missing(var);
                };
                let reg = self.acquire(content);
                let reserved = self.reserved();
                self.asm.load(reg, Register::SP, offset, reserved);
                reg
            }
            None => self.missing(var),
        }
    }

    /// Register the result `var` should be computed into. Call [`Environment::defined`]
    /// once it has been written.
    pub fn dest(&mut self, var: &str) -> Register {
        match self.location(var) {
            Some(Location::Register(reg)) => reg,
            Some(Location::Spilled) => {
                let content = ScratchContent::Value(var.to_string());
                match self.cached(&content) {
                    Some(reg) => reg,
                    None => self.acquire(content),
                }
            }
            Some(Location::Global) | None => self.missing(var),
        }
    }

    pub fn defined(&mut self, var: &str, reg: Register) {
        if self.func.scratch.content(reg) == Some(&ScratchContent::Value(var.to_string())) {
            self.func.scratch.mark_dirty(reg);
        }
    }

    fn missing(&mut self, var: &str) -> Register {
        let index = self.func.index;
        self.diagnose(
            DiagnosticKind::MissingLocation,
            format!("no location for {} at instruction {}", var, index),
        );
        Register::ZERO
    }

    /// Cached value register of scalar global `name`, if one is resident.
    pub fn cached_global(&mut self, name: &str) -> Option<Register> {
        self.cached(&ScratchContent::Global(name.to_string()))
    }

    /// Stores `value` into global `name`. Scalars are kept in a dirty scratch register
    /// until the next flush.
    pub fn write_global(&mut self, name: &str, value: &Operand) {
        if !self.is_scalar_global(name) {
            let src = self.operand(value);
            let addr = self.address_of(name);
            self.asm.push(Inst::Sw(src, addr, 0));
            return;
        }
        let content = ScratchContent::Global(name.to_string());
        let reg = match self.cached(&content) {
            Some(reg) => reg,
            None => self.acquire(content),
        };
        self.move_into(reg, value);
        self.func.scratch.mark_dirty(reg);
    }

    /// Copies `op` into `rd`.
    pub fn move_into(&mut self, rd: Register, op: &Operand) {
        match op {
            Operand::Const(num) => self.asm.push(Inst::Li(rd, *num)),
            Operand::Var(name) => {
                let rs = self.read(name);
                if rs != rd {
                    self.asm.push(Inst::Mv(rd, rs));
                }
            }
        }
    }

    /// Allocator-resident values that are live on both sides of the current instruction.
    pub fn live_across(&self) -> Vec<(String, Register)> {
        let index = self.func.index;
        let liveness = &self.func.liveness;
        let mut saved: Vec<(String, Register)> = self
            .func
            .allocation
            .locations_at(index)
            .filter_map(|(var, loc)| match loc {
                Location::Register(reg) => {
                    let interval = liveness.get(var)?;
                    (interval.start < index && interval.end > index).then(|| (var.to_string(), reg))
                }
                _ => None,
            })
            .collect();
        saved.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        saved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> ScratchPool {
        ScratchPool::new(&[Register::T0, Register::temp(1).unwrap(), Register::temp(2).unwrap()])
    }

    #[test]
    fn frame_offsets_are_first_seen() {
        let mut frame = StackFrame::new(4);
        assert_eq!(frame.reserve("a", 1), 4);
        assert_eq!(frame.reserve("b", 3), 8);
        assert_eq!(frame.reserve("a", 1), 4);
        assert_eq!(frame.reserve("c", 1), 20);
        assert_eq!(frame.size(), 32);
        assert_eq!(StackFrame::new(0).size(), 0);
    }

    #[test]
    fn locked_registers_are_never_victims() {
        let mut scratch = pool();
        let t1 = Register::temp(1).unwrap();
        let t2 = Register::temp(2).unwrap();
        scratch.occupy(Register::T0, ScratchContent::Value("x".into()));
        scratch.occupy(t1, ScratchContent::Value("y".into()));
        scratch.occupy(t2, ScratchContent::Value("z".into()));
        assert_eq!(scratch.free(), None);

        let ends = |c: &ScratchContent| match c {
            ScratchContent::Value(v) if v == "x" => 9,
            ScratchContent::Value(v) if v == "y" => 4,
            _ => 7,
        };
        // everything locked during the instruction
        assert_eq!(scratch.victim(ends), None);

        scratch.end_instruction();
        assert_eq!(scratch.victim(ends), Some(Register::T0));
        scratch.lock(Register::T0);
        assert_eq!(scratch.victim(ends), Some(t2));
    }

    #[test]
    fn end_instruction_keeps_values_and_drops_temps() {
        let mut scratch = pool();
        let t1 = Register::temp(1).unwrap();
        scratch.occupy(Register::T0, ScratchContent::Temp);
        scratch.occupy(t1, ScratchContent::Value("x".into()));
        scratch.mark_dirty(t1);
        scratch.end_instruction();

        assert_eq!(scratch.free(), Some(Register::T0));
        assert_eq!(scratch.find(&ScratchContent::Value("x".into())), Some(t1));
        assert!(!scratch.is_locked(t1));
        assert_eq!(scratch.dirty(), vec![(t1, ScratchContent::Value("x".into()))]);
        assert_eq!(scratch.evict(t1), Some((ScratchContent::Value("x".into()), true)));
        assert!(scratch.dirty().is_empty());
    }
}
