use std::collections::{HashMap, HashSet};
use log::trace;
use crate::backend::ir::{Function, InstKind, Operand};

/// Inclusive range of instruction indices during which `var` may still be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveInterval {
    pub var: String,
    pub start: usize,
    pub end: usize,
}

impl LiveInterval {
    pub fn new(var: &str, start: usize, end: usize) -> Self {
        LiveInterval { var: var.to_string(), start, end }
    }
}

/// Result of one analysis pass over a function.
///
/// Intervals keep the order in which their variables were first seen; the allocator
/// relies on that order to break ties between equal start points.
#[derive(Debug, Default)]
pub struct Liveness {
    intervals: Vec<LiveInterval>,
    position: HashMap<String, usize>,
    block_start: HashMap<String, usize>,
    block_end: HashMap<String, usize>,
    globals: HashSet<String>,
    inst_count: usize,
}

impl Liveness {
    pub fn intervals(&self) -> &[LiveInterval] {
        &self.intervals
    }
    pub fn get(&self, var: &str) -> Option<&LiveInterval> {
        self.position.get(var).map(|&pos| &self.intervals[pos])
    }
    pub fn block_start(&self, label: &str) -> Option<usize> {
        self.block_start.get(label).copied()
    }
    /// Index of the last instruction of `label`, if the block is non-empty.
    pub fn block_end(&self, label: &str) -> Option<usize> {
        self.block_end.get(label).copied()
    }
    pub fn is_global(&self, name: &str) -> bool {
        self.globals.contains(name)
    }
    /// Number of instructions numbered in this function.
    pub fn inst_count(&self) -> usize {
        self.inst_count
    }

    fn entry(&mut self, var: &str, start: usize, end: usize) -> &mut LiveInterval {
        let pos = match self.position.get(var) {
            Some(&pos) => pos,
            None => {
                self.intervals.push(LiveInterval::new(var, start, end));
                self.position.insert(var.to_string(), self.intervals.len() - 1);
                self.intervals.len() - 1
            }
        };
        &mut self.intervals[pos]
    }

    fn record_use(&mut self, var: &str, index: usize) {
        if self.globals.contains(var) {
            return;
        }
        // first sighting of a use means the value is live-in (a parameter)
        let interval = self.entry(var, 0, index);
        interval.end = interval.end.max(index);
    }

    fn record_def(&mut self, var: &str, index: usize) {
        let exists = self.position.contains_key(var);
        let interval = self.entry(var, index, index);
        if exists {
            interval.start = index;
            interval.end = interval.end.max(index);
        }
    }

    fn widen(&mut self, var: &str, index: usize) {
        if let Some(&pos) = self.position.get(var) {
            let interval = &mut self.intervals[pos];
            interval.start = interval.start.min(index);
            interval.end = interval.end.max(index);
        }
    }
}

pub struct LiveIntervalAnalyzer {
    globals: HashSet<String>,
}

impl LiveIntervalAnalyzer {
    pub fn new(globals: HashSet<String>) -> Self {
        LiveIntervalAnalyzer { globals }
    }

    /// Numbers the instructions of `func` from 1 and computes an interval for every
    /// named, non-global value it touches.
    pub fn analyze(&self, func: &Function) -> Liveness {
        let mut liveness = Liveness {
            globals: self.globals.clone(),
            ..Liveness::default()
        };

        let mut counter = 1;
        for bb in &func.blocks {
            liveness.block_start.insert(bb.label.clone(), counter);
            counter += bb.insts.len();
            if !bb.insts.is_empty() {
                liveness.block_end.insert(bb.label.clone(), counter - 1);
            }
        }
        liveness.inst_count = counter - 1;

        let mut index = 1;
        for bb in &func.blocks {
            for inst in &bb.insts {
                let mut processed: HashSet<&str> = HashSet::new();
                if let InstKind::Phi { incoming } = &inst.kind {
                    for (value, pred) in incoming {
                        let name = match value {
                            Operand::Var(name) if !liveness.is_global(name) => name,
                            _ => continue,
                        };
                        processed.insert(name.as_str());
                        let end = liveness.block_end(pred).unwrap_or(index);
                        liveness.record_use(name, end);
                    }
                }

                for operand in inst.operands() {
                    if let Operand::Var(name) = operand {
                        if !processed.contains(name.as_str()) {
                            liveness.record_use(name, index);
                        }
                    }
                }

                if let Some(result) = &inst.result {
                    liveness.record_def(result, index);
                    if let InstKind::Phi { incoming } = &inst.kind {
                        // the copies that feed this value sit at the end of each predecessor
                        for (_, pred) in incoming {
                            if let Some(end) = liveness.block_end(pred) {
                                liveness.widen(result, end);
                            }
                        }
                    }
                }
                index += 1;
            }
        }

        extend_over_loops(func, &mut liveness);

        for interval in &liveness.intervals {
            trace!("{}: {} [{}, {}]", func.name, interval.var, interval.start, interval.end);
        }
        liveness
    }
}

/// Values live into a loop header must stay live until the last back edge to it.
fn extend_over_loops(func: &Function, liveness: &mut Liveness) {
    let mut back_edges = Vec::new();
    for bb in &func.blocks {
        let (Some(last), Some(end)) = (bb.insts.last(), liveness.block_end(&bb.label)) else {
            continue;
        };
        for target in last.successors() {
            if let Some(header) = liveness.block_start(target) {
                if header <= end {
                    back_edges.push((header, end));
                }
            }
        }
    }

    let mut changed = true;
    while changed {
        changed = false;
        for &(header, latch) in &back_edges {
            for interval in liveness.intervals.iter_mut() {
                if interval.start < header && interval.end >= header && interval.end < latch {
                    interval.end = latch;
                    changed = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ir::{BinaryOp, Block, Inst, InstKind};

    fn add(result: &str, lhs: Operand, rhs: Operand) -> Inst {
        Inst::with_result(result, InstKind::Binary { op: BinaryOp::Add, lhs, rhs })
    }

    #[test]
    fn straight_line_intervals() {
        let func = Function::new("f", &["p"], vec![Block::new("entry", vec![
            add("a", Operand::var("p"), Operand::Const(1)),
            add("b", Operand::var("a"), Operand::Const(2)),
            add("c", Operand::var("a"), Operand::var("b")),
            Inst::new(InstKind::Ret(Some(Operand::var("c")))),
        ])]);
        let liveness = LiveIntervalAnalyzer::new(HashSet::new()).analyze(&func);

        assert_eq!(liveness.get("p"), Some(&LiveInterval::new("p", 0, 1)));
        assert_eq!(liveness.get("a"), Some(&LiveInterval::new("a", 1, 3)));
        assert_eq!(liveness.get("b"), Some(&LiveInterval::new("b", 2, 3)));
        assert_eq!(liveness.get("c"), Some(&LiveInterval::new("c", 3, 4)));
        assert_eq!(liveness.block_start("entry"), Some(1));
        assert_eq!(liveness.inst_count(), 4);
        // insertion order: p first, then results as defined
        let order: Vec<_> = liveness.intervals().iter().map(|i| i.var.as_str()).collect();
        assert_eq!(order, ["p", "a", "b", "c"]);
    }

    #[test]
    fn globals_and_constants_are_not_tracked() {
        let func = Function::new("f", &[], vec![Block::new("entry", vec![
            Inst::with_result("x", InstKind::Load { ptr: Operand::var("g") }),
            Inst::new(InstKind::Store { value: Operand::Const(3), ptr: Operand::var("g") }),
            Inst::new(InstKind::Ret(Some(Operand::var("x")))),
        ])]);
        let globals = HashSet::from(["g".to_string()]);
        let liveness = LiveIntervalAnalyzer::new(globals).analyze(&func);
        assert!(liveness.get("g").is_none());
        assert!(liveness.is_global("g"));
        assert_eq!(liveness.intervals().len(), 1);
        assert_eq!(liveness.get("x"), Some(&LiveInterval::new("x", 1, 3)));
    }

    #[test]
    fn phi_operands_live_to_predecessor_end() {
        let func = Function::new("f", &["c"], vec![
            Block::new("entry", vec![
                add("a", Operand::var("c"), Operand::Const(1)),
                Inst::new(InstKind::Branch {
                    cond: Operand::var("c"),
                    true_label: "then".into(),
                    false_label: "join".into(),
                }),
            ]),
            Block::new("then", vec![
                add("b", Operand::var("c"), Operand::Const(2)),
                Inst::new(InstKind::Jump("join".into())),
            ]),
            Block::new("join", vec![
                Inst::with_result("m", InstKind::Phi {
                    incoming: vec![(Operand::var("a"), "entry".into()), (Operand::var("b"), "then".into())],
                }),
                Inst::new(InstKind::Ret(Some(Operand::var("m")))),
            ]),
        ]);
        let liveness = LiveIntervalAnalyzer::new(HashSet::new()).analyze(&func);

        // entry is [1, 2], then is [3, 4], join starts at 5
        assert_eq!(liveness.get("a"), Some(&LiveInterval::new("a", 1, 2)));
        assert_eq!(liveness.get("b"), Some(&LiveInterval::new("b", 3, 4)));
        assert_eq!(liveness.get("m"), Some(&LiveInterval::new("m", 2, 6)));
        assert_eq!(liveness.block_end("then"), Some(4));
    }

    #[test]
    fn values_live_into_a_loop_cover_the_back_edge() {
        let func = Function::new("f", &[], vec![
            Block::new("entry", vec![
                Inst::with_result("ptr", InstKind::Alloca { words: 1 }),
                Inst::new(InstKind::Jump("head".into())),
            ]),
            Block::new("head", vec![
                Inst::with_result("v", InstKind::Load { ptr: Operand::var("ptr") }),
                Inst::new(InstKind::Branch {
                    cond: Operand::var("v"),
                    true_label: "body".into(),
                    false_label: "exit".into(),
                }),
            ]),
            Block::new("body", vec![
                add("w", Operand::Const(1), Operand::Const(2)),
                Inst::new(InstKind::Jump("head".into())),
            ]),
            Block::new("exit", vec![Inst::new(InstKind::Ret(None))]),
        ]);
        let liveness = LiveIntervalAnalyzer::new(HashSet::new()).analyze(&func);
        // last textual use of ptr is at 3, but the latch jumps back from 6
        assert_eq!(liveness.get("ptr"), Some(&LiveInterval::new("ptr", 1, 6)));
        assert_eq!(liveness.get("v"), Some(&LiveInterval::new("v", 3, 4)));
    }
}
