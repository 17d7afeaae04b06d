use std::collections::HashSet;
use koopa::ir::{BasicBlock, FunctionData, Program, TypeKind, Value, ValueKind};
use koopa::ir::builder::{LocalInstBuilder, ValueBuilder};
use koopa::opt::ModulePass;
use log::debug;

/// Gives every block exactly one trailing terminator and drops the blocks
/// that cannot be reached from the entry.
///
/// A block that falls off its end returns `0` from an `int` function (or from
/// the entry function) and returns nothing from a `void` one.
pub struct DeadCodeElimination {
    entry: String,
}

impl DeadCodeElimination {
    pub fn new(entry: &str) -> Self {
        DeadCodeElimination { entry: format!("@{}", entry) }
    }
}

fn is_terminator(func: &FunctionData, inst: Value) -> bool {
    matches!(
        func.dfg().value(inst).kind(),
        ValueKind::Return(_) | ValueKind::Jump(_) | ValueKind::Branch(_)
    )
}

/// Cuts each block after its first terminator and returns the blocks left
/// without one.
fn truncate_after_terminators(func: &mut FunctionData) -> Vec<BasicBlock> {
    let terminators: HashSet<Value> = func.dfg().values().keys()
        .copied()
        .filter(|value| is_terminator(func, *value))
        .collect();
    let mut open_blocks = Vec::new();
    let mut bb_cursor = func.layout_mut().bbs_mut().cursor_front_mut();
    while let Some(bb) = bb_cursor.key().copied() {
        if let Some(node) = bb_cursor.node_mut() {
            let mut inst_cursor = node.insts_mut().cursor_front_mut();
            let mut terminated = false;
            while let Some(inst) = inst_cursor.key().copied() {
                if terminated {
                    inst_cursor.remove_current();
                    continue;
                }
                terminated = terminators.contains(&inst);
                inst_cursor.move_next();
            }
            if !terminated {
                open_blocks.push(bb);
            }
        }
        bb_cursor.move_next();
    }
    open_blocks
}

fn reachable_blocks(func: &FunctionData, entry: BasicBlock) -> HashSet<BasicBlock> {
    let mut reachable = HashSet::new();
    reachable.insert(entry);
    let mut stack = vec![entry];
    while let Some(bb) = stack.pop() {
        let last = func.layout().bbs().node(&bb).and_then(|node| node.insts().back_key());
        let targets = match last.map(|inst| func.dfg().value(*inst).kind()) {
            Some(ValueKind::Branch(branch)) => vec![branch.true_bb(), branch.false_bb()],
            Some(ValueKind::Jump(jump)) => vec![jump.target()],
            _ => vec![],
        };
        for target in targets {
            if reachable.insert(target) {
                stack.push(target);
            }
        }
    }
    reachable
}

impl ModulePass for DeadCodeElimination {
    fn run_on(&mut self, program: &mut Program) {
        for func in program.funcs_mut().values_mut() {
            let entry = match func.layout().entry_bb() {
                Some(entry) => entry,
                None => continue,
            };

            let returns_unit = match func.ty().kind() {
                TypeKind::Function(_, ret) => ret.is_unit(),
                _ => true,
            };
            let returns_zero = func.name() == self.entry || !returns_unit;
            for bb in truncate_after_terminators(func) {
                let value = if returns_zero {
                    Some(func.dfg_mut().new_value().integer(0))
                } else {
                    None
                };
                let ret = func.dfg_mut().new_value().ret(value);
                if let Some(node) = func.layout_mut().bbs_mut().node_mut(&bb) {
                    // a freshly built value is never already in a layout
                    let _ = node.insts_mut().push_key_back(ret);
                }
            }

            let reachable = reachable_blocks(func, entry);
            let mut removed = 0;
            let mut bb_cursor = func.layout_mut().bbs_mut().cursor_front_mut();
            while let Some(bb) = bb_cursor.key() {
                if reachable.contains(bb) {
                    bb_cursor.move_next();
                } else {
                    bb_cursor.remove_current();
                    removed += 1;
                }
            }
            if removed > 0 {
                debug!("{}: removed {} unreachable block(s)", func.name(), removed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use koopa::front::Driver;
    use koopa::ir::Type;
    use koopa::ir::builder::BasicBlockBuilder;

    fn run(text: &str) -> Program {
        let mut program = Driver::from(text.to_string()).generate_program().unwrap();
        DeadCodeElimination::new("main").run_on(&mut program);
        program
    }

    fn block_count(program: &Program, name: &str) -> usize {
        program.funcs().values()
            .find(|func| func.name() == name)
            .map(|func| func.layout().bbs().keys().count())
            .unwrap()
    }

    #[test]
    fn unreachable_blocks_are_dropped() {
        let program = run(r#"
fun @main(): i32 {
%entry:
  ret 1
%dead:
  jump %entry2
%entry2:
  ret 2
}
"#);
        assert_eq!(block_count(&program, "@main"), 1);
    }

    #[test]
    fn open_blocks_get_a_return() {
        let mut program = Program::new();
        let func = program.new_func(FunctionData::new("@f".into(), vec![], Type::get_i32()));
        let data = program.func_mut(func);
        let entry = data.dfg_mut().new_bb().basic_block(Some("%entry".into()));
        data.layout_mut().bbs_mut().push_key_back(entry).unwrap();

        DeadCodeElimination::new("main").run_on(&mut program);
        let data = program.func(func);
        let last = *data.layout().bbs().node(&entry).unwrap().insts().back_key().unwrap();
        match data.dfg().value(last).kind() {
            ValueKind::Return(ret) => {
                let value = ret.value().unwrap();
                assert!(matches!(data.dfg().value(value).kind(), ValueKind::Integer(i) if i.value() == 0));
            },
            kind => panic!("expected a return, got {:?}", kind),
        }
    }
}
