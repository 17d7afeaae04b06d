use std::collections::{HashMap, HashSet};
use sysy_lsra::backend::interval::{LiveInterval, LiveIntervalAnalyzer};
use sysy_lsra::backend::ir::{BinaryOp, Block, CmpPred, Function, Inst, InstKind, Operand};
use sysy_lsra::backend::register::{Allocation, LinearScan, Location, Register};

fn pool(n: usize) -> Vec<Register> {
    (1..=n).map(|i| Register::saved(i).unwrap()).collect()
}

fn iv(var: &str, start: usize, end: usize) -> LiveInterval {
    LiveInterval::new(var, start, end)
}

/// Every variable has a location at every index of its interval, no register holds
/// two variables at once, and the spill set is exactly the variables placed on the stack.
fn check_invariants(intervals: &[LiveInterval], allocation: &Allocation) {
    let max = intervals.iter().map(|i| i.end).max().unwrap_or(0);
    for interval in intervals {
        for index in interval.start..=interval.end {
            assert!(
                allocation.location(index, &interval.var).is_some(),
                "{} has no location at {}",
                interval.var,
                index
            );
        }
    }
    for index in 0..=max {
        let mut owners: HashMap<Register, &str> = HashMap::new();
        for (var, loc) in allocation.locations_at(index) {
            if let Location::Register(reg) = loc {
                if let Some(other) = owners.insert(reg, var) {
                    panic!("{} and {} share {} at {}", other, var, reg, index);
                }
            }
        }
    }
    let placed_on_stack: HashSet<&str> = intervals
        .iter()
        .filter(|i| {
            (i.start..=i.end).any(|index| allocation.location(index, &i.var) == Some(Location::Spilled))
        })
        .map(|i| i.var.as_str())
        .collect();
    let spilled: HashSet<&str> = allocation.spilled().iter().map(String::as_str).collect();
    assert_eq!(spilled, placed_on_stack);
}

#[test]
fn nested_interval_takes_the_only_register() {
    let intervals = vec![iv("A", 1, 5), iv("B", 2, 3)];
    let allocation = LinearScan::new(pool(1)).allocate(&intervals);
    // A ends after B, so A is the one evicted
    assert_eq!(allocation.spilled().iter().collect::<Vec<_>>(), ["A"]);
    for index in 1..=5 {
        assert_eq!(allocation.location(index, "A"), Some(Location::Spilled));
    }
    let s1 = Register::saved(1).unwrap();
    assert_eq!(allocation.location(2, "B"), Some(Location::Register(s1)));
    assert_eq!(allocation.location(3, "B"), Some(Location::Register(s1)));
    check_invariants(&intervals, &allocation);
}

#[test]
fn two_registers_hold_nested_intervals() {
    let intervals = vec![iv("A", 1, 10), iv("B", 2, 3)];
    let allocation = LinearScan::new(pool(2)).allocate(&intervals);
    assert!(allocation.spilled().is_empty());
    assert_eq!(allocation.location(1, "A"), Some(Location::Register(Register::saved(1).unwrap())));
    assert_eq!(allocation.location(2, "B"), Some(Location::Register(Register::saved(2).unwrap())));
    check_invariants(&intervals, &allocation);
}

#[test]
fn equal_ends_spill_the_newcomer() {
    let intervals = vec![iv("A", 1, 10), iv("B", 2, 10), iv("C", 3, 10)];
    let allocation = LinearScan::new(pool(2)).allocate(&intervals);
    assert_eq!(allocation.spilled().iter().collect::<Vec<_>>(), ["C"]);
    assert!(matches!(allocation.location(10, "A"), Some(Location::Register(_))));
    assert!(matches!(allocation.location(10, "B"), Some(Location::Register(_))));
    check_invariants(&intervals, &allocation);
}

#[test]
fn invariants_hold_under_pressure() {
    let intervals = vec![
        iv("a", 0, 12),
        iv("b", 1, 2),
        iv("c", 1, 9),
        iv("d", 2, 4),
        iv("e", 3, 3),
        iv("f", 4, 11),
        iv("g", 5, 6),
        iv("h", 5, 14),
        iv("i", 7, 8),
        iv("j", 8, 13),
        iv("k", 10, 14),
        iv("l", 12, 12),
    ];
    for registers in 0..=5 {
        let allocation = LinearScan::new(pool(registers)).allocate(&intervals);
        check_invariants(&intervals, &allocation);
        if registers == 0 {
            assert_eq!(allocation.spilled().len(), intervals.len());
        }
    }
}

#[test]
fn analyzed_loop_keeps_values_alive_across_the_back_edge() {
    // %n is defined before the loop and read only in its header; the back edge from
    // the body must keep it live until the end of the body.
    let func = Function::new(
        "f",
        &["%0"],
        vec![
            Block::new(".Lf_entry", vec![
                Inst::with_result("%n", InstKind::Binary {
                    op: BinaryOp::Add,
                    lhs: Operand::var("%0"),
                    rhs: Operand::Const(1),
                }),
                Inst::new(InstKind::Jump(".Lf_cond".into())),
            ]),
            Block::new(".Lf_cond", vec![
                Inst::with_result("%i", InstKind::Phi {
                    incoming: vec![
                        (Operand::Const(0), ".Lf_entry".into()),
                        (Operand::var("%next"), ".Lf_body".into()),
                    ],
                }),
                Inst::with_result("%c", InstKind::ICmp {
                    pred: CmpPred::Slt,
                    lhs: Operand::var("%i"),
                    rhs: Operand::var("%n"),
                }),
                Inst::new(InstKind::Branch {
                    cond: Operand::var("%c"),
                    true_label: ".Lf_body".into(),
                    false_label: ".Lf_exit".into(),
                }),
            ]),
            Block::new(".Lf_body", vec![
                Inst::with_result("%next", InstKind::Binary {
                    op: BinaryOp::Add,
                    lhs: Operand::var("%i"),
                    rhs: Operand::Const(1),
                }),
                Inst::new(InstKind::Jump(".Lf_cond".into())),
            ]),
            Block::new(".Lf_exit", vec![Inst::new(InstKind::Ret(Some(Operand::var("%i"))))]),
        ],
    );
    let liveness = LiveIntervalAnalyzer::new(HashSet::new()).analyze(&func);
    assert_eq!(liveness.block_start(".Lf_body"), Some(6));
    assert_eq!(liveness.block_end(".Lf_body"), Some(7));
    assert_eq!(liveness.get("%n").map(|i| (i.start, i.end)), Some((1, 7)));
    // the merge result is written at the end of both predecessors
    let i = liveness.get("%i").unwrap();
    assert_eq!((i.start, i.end), (2, 8));
    assert_eq!(liveness.get("%next").map(|i| (i.start, i.end)), Some((6, 7)));

    for registers in 0..=3 {
        let allocation = LinearScan::new(pool(registers)).allocate(liveness.intervals());
        check_invariants(liveness.intervals(), &allocation);
    }
}
