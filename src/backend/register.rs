use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use log::{debug, trace};
use once_cell::sync::Lazy;
use crate::backend::interval::LiveInterval;

const ABI_NAMES: [&str; 32] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2",
    "s0", "s1", "a0", "a1", "a2", "a3", "a4", "a5",
    "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7",
    "s8", "s9", "s10", "s11", "t3", "t4", "t5", "t6",
];

static BY_NAME: Lazy<HashMap<&'static str, Register>> = Lazy::new(|| {
    let mut map: HashMap<&'static str, Register> = ABI_NAMES
        .iter()
        .enumerate()
        .map(|(i, name)| (*name, Register(i as u8)))
        .collect();
    map.insert("fp", Register(8));
    map
});

/// A RISC-V integer register, by its `x` number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Register(u8);

impl Register {
    pub const ZERO: Register = Register(0);
    pub const RA: Register = Register(1);
    pub const SP: Register = Register(2);
    pub const T0: Register = Register(5);
    pub const T6: Register = Register(31);
    pub const A0: Register = Register(10);
    pub const A7: Register = Register(17);

    /// `a0`..`a7` for argument slot `i`.
    pub fn arg(i: usize) -> Option<Register> {
        (i < 8).then(|| Register(10 + i as u8))
    }

    /// `t0`..`t6`.
    pub fn temp(i: usize) -> Option<Register> {
        match i {
            0..=2 => Some(Register(5 + i as u8)),
            3..=6 => Some(Register(28 + (i - 3) as u8)),
            _ => None,
        }
    }

    /// `s0`..`s11`.
    pub fn saved(i: usize) -> Option<Register> {
        match i {
            0..=1 => Some(Register(8 + i as u8)),
            2..=11 => Some(Register(18 + (i - 2) as u8)),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        ABI_NAMES[self.0 as usize]
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Register {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(reg) = BY_NAME.get(s) {
            return Ok(*reg);
        }
        if let Some(num) = s.strip_prefix('x') {
            let num = num.parse::<u8>().map_err(|_| format!("Invalid register name: {}", s))?;
            if num < 32 {
                return Ok(Register(num));
            }
        }
        Err(format!("Unknown register: {}", s))
    }
}

/// Where a value lives at a given instruction.
///
/// The allocator only ever produces `Register` or `Spilled`; `Global` is how the code
/// generator classifies module-level symbols, which are never allocated. A spilled
/// value carries no offset: stack layout belongs to the code generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Register(Register),
    Spilled,
    Global,
}

/// Output of linear scan: a location for every (index, variable) pair inside each
/// variable's interval, plus the variables that were spilled at some point.
#[derive(Debug, Default)]
pub struct Allocation {
    by_inst: Vec<HashMap<String, Location>>,
    spilled: BTreeSet<String>,
}

impl Allocation {
    pub fn location(&self, index: usize, var: &str) -> Option<Location> {
        self.by_inst.get(index)?.get(var).copied()
    }
    pub fn locations_at(&self, index: usize) -> impl Iterator<Item = (&str, Location)> {
        self.by_inst
            .get(index)
            .into_iter()
            .flat_map(|map| map.iter().map(|(var, loc)| (var.as_str(), *loc)))
    }
    pub fn spilled(&self) -> &BTreeSet<String> {
        &self.spilled
    }
    pub fn is_spilled(&self, var: &str) -> bool {
        self.spilled.contains(var)
    }

    fn record(&mut self, interval: &LiveInterval, location: Location) {
        for index in interval.start..=interval.end {
            if let Some(map) = self.by_inst.get_mut(index) {
                map.insert(interval.var.clone(), location);
            }
        }
    }
}

/// Classic linear scan over live intervals.
pub struct LinearScan {
    registers: Vec<Register>,
}

impl LinearScan {
    pub fn new(registers: Vec<Register>) -> Self {
        LinearScan { registers }
    }

    pub fn allocate(&self, intervals: &[LiveInterval]) -> Allocation {
        let max_index = intervals.iter().map(|i| i.end).max().unwrap_or(0);
        let mut allocation = Allocation {
            by_inst: vec![HashMap::new(); max_index + 1],
            spilled: BTreeSet::new(),
        };

        let mut sorted: Vec<&LiveInterval> = intervals.iter().collect();
        sorted.sort_by_key(|i| i.start);

        // active stays sorted by end; free holds pool positions, lowest first
        let mut active: Vec<&LiveInterval> = Vec::new();
        let mut free: Vec<usize> = (0..self.registers.len()).collect();
        let mut assigned: HashMap<&str, usize> = HashMap::new();

        for interval in sorted {
            while let Some(first) = active.first() {
                if first.end >= interval.start {
                    break;
                }
                if let Some(slot) = assigned.remove(first.var.as_str()) {
                    free.push(slot);
                }
                active.remove(0);
            }
            free.sort_unstable();

            if active.len() < self.registers.len() && !free.is_empty() {
                let slot = free.remove(0);
                assigned.insert(&interval.var, slot);
                insert_by_end(&mut active, interval);
                trace!("{} -> {}", interval.var, self.registers[slot]);
                allocation.record(interval, Location::Register(self.registers[slot]));
                continue;
            }

            match active.last().copied() {
                Some(last) if last.end > interval.end => {
                    let slot = assigned.remove(last.var.as_str()).unwrap_or_default();
                    active.pop();
                    allocation.spilled.insert(last.var.clone());
                    allocation.record(last, Location::Spilled);
                    trace!("{} evicted, {} -> {}", last.var, interval.var, self.registers[slot]);

                    assigned.insert(&interval.var, slot);
                    insert_by_end(&mut active, interval);
                    allocation.record(interval, Location::Register(self.registers[slot]));
                }
                _ => {
                    trace!("{} spilled", interval.var);
                    allocation.spilled.insert(interval.var.clone());
                    allocation.record(interval, Location::Spilled);
                }
            }
        }
        debug!("linear scan: {} intervals, {} spilled", intervals.len(), allocation.spilled.len());
        allocation
    }
}

fn insert_by_end<'a>(active: &mut Vec<&'a LiveInterval>, interval: &'a LiveInterval) {
    let pos = active.partition_point(|a| a.end <= interval.end);
    active.insert(pos, interval);
}
