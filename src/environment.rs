use std::cell::RefCell;
use std::rc::Rc;
use koopa::ir::{BasicBlock, BinaryOp, Function, FunctionData, Program, Type, TypeKind, Value, ValueKind};
use koopa::ir::builder::*;
use thiserror::Error;
use crate::label_gen::LabelGenerator;
use crate::sym_table::SymbolTable;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct WhileEnv {
    pub start: BasicBlock,
    pub next: BasicBlock,
}
impl WhileEnv {
    pub fn new(start: BasicBlock, next: BasicBlock) -> Self {
        WhileEnv { start, next }
    }
}

/// Declarations of the SysY runtime library: name, parameter types, return type.
fn library_functions() -> Vec<(&'static str, Vec<Type>, Type)> {
    let int = Type::get_i32;
    let ptr = || Type::get_pointer(Type::get_i32());
    vec![
        ("getint", vec![], int()),
        ("getch", vec![], int()),
        ("getarray", vec![ptr()], int()),
        ("putint", vec![int()], Type::get_unit()),
        ("putch", vec![int()], Type::get_unit()),
        ("putarray", vec![int(), ptr()], Type::get_unit()),
        ("starttime", vec![], Type::get_unit()),
        ("stoptime", vec![], Type::get_unit()),
    ]
}

pub struct Environment<'a> {
    pub program: &'a mut Program,
    pub cur_func: Option<Function>,
    pub cur_bb: Option<BasicBlock>,
    pub while_env: Option<WhileEnv>,
    pub label_gen: Rc<RefCell<LabelGenerator>>,
    pub sym_table: Rc<RefCell<SymbolTable>>,
    /// Byte offset at which each source line starts.
    line_starts: Vec<usize>,
    errors: Vec<FrontendError>,
}
impl Environment<'_> {
    pub fn new(program: &mut Program) -> Environment {
        Environment {
            program,
            cur_func: None,
            cur_bb: None,
            while_env: None,
            label_gen: Rc::new(RefCell::new(LabelGenerator::new())),
            sym_table: Rc::new(RefCell::new(SymbolTable::new())),
            line_starts: vec![0],
            errors: Vec::new(),
        }
    }

    /// Like [`Environment::new`], resolving positions against `source`.
    pub fn with_source<'a>(program: &'a mut Program, source: &str) -> Environment<'a> {
        let mut env = Environment::new(program);
        env.line_starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        env
    }

    /// 1-based line of byte offset `pos`.
    pub fn line_of(&self, pos: usize) -> usize {
        self.line_starts.partition_point(|&start| start <= pos)
    }

    /// Records an error and carries on. Only the first error of each line is kept.
    pub fn report(&mut self, err: FrontendError) {
        let line = err.line();
        if line.is_some() && self.errors.iter().any(|e| e.line() == line) {
            return;
        }
        self.errors.push(err);
    }

    pub fn take_errors(&mut self) -> Vec<FrontendError> {
        std::mem::take(&mut self.errors)
    }

    pub fn declare_library(&mut self) -> Result<(), FrontendError> {
        for (name, params, ret) in library_functions() {
            let func = self.program.new_func(FunctionData::new_decl(format!("@{}", name), params, ret));
            self.sym_table.borrow_mut().insert_func(name.to_string(), func)?;
        }
        Ok(())
    }

    pub fn enter_function(&mut self, func: Function) {
        self.cur_func = Some(func);
        self.cur_bb = None;
        self.while_env = None;
        self.label_gen.borrow_mut().reset();
    }

    fn func_mut(&mut self) -> &mut FunctionData {
        let func = self.cur_func.expect("instruction emitted outside of a function");
        self.program.func_mut(func)
    }

    /// Whether the function being generated returns `i32`.
    pub fn returns_value(&self) -> bool {
        let func = match self.cur_func {
            Some(func) => func,
            None => return false,
        };
        match self.program.func(func).ty().kind() {
            TypeKind::Function(_, ret) => !ret.is_unit(),
            _ => false,
        }
    }

    /// A fresh block that is not laid out until code flows into it.
    pub fn new_block(&mut self, name: &str) -> BasicBlock {
        let name = self.label_gen.borrow_mut().get_label(name);
        self.func_mut().dfg_mut().new_bb().basic_block(Some(name))
    }
    /// A block taking one parameter of type `ty`, returned together with that parameter.
    pub fn new_block_with_param(&mut self, name: &str, ty: Type) -> (BasicBlock, Value) {
        let name = self.label_gen.borrow_mut().get_label(name);
        let func_data = self.func_mut();
        let bb = func_data.dfg_mut().new_bb().basic_block_with_params(Some(name), vec![ty]);
        let param = func_data.dfg().bb(bb).params()[0];
        (bb, param)
    }
    /// Appends `bb` to the layout and makes it the insertion point.
    pub fn enter_block(&mut self, bb: BasicBlock) {
        let func_data = self.func_mut();
        // a block entered twice keeps its first position
        let _ = func_data.layout_mut().bbs_mut().push_key_back(bb);
        self.cur_bb = Some(bb);
    }

    pub fn is_terminated(&self) -> bool {
        let (func, bb) = match (self.cur_func, self.cur_bb) {
            (Some(func), Some(bb)) => (func, bb),
            _ => return false,
        };
        let func_data = self.program.func(func);
        func_data.layout().bbs().node(&bb)
            .and_then(|node| node.insts().back_key())
            .map_or(false, |inst| matches!(
                func_data.dfg().value(*inst).kind(),
                ValueKind::Return(_) | ValueKind::Jump(_) | ValueKind::Branch(_)
            ))
    }

    pub fn enter_scope(&mut self) -> Rc<RefCell<SymbolTable>> {
        let old_table = self.sym_table.clone();
        let new_table = Rc::new(RefCell::new(SymbolTable::new_with_parent(&self.sym_table)));
        self.sym_table = new_table;
        old_table
    }
    pub fn exit_scope(&mut self, old_table: Rc<RefCell<SymbolTable>>) {
        self.sym_table = old_table;
    }

    /// Appends `inst` to the current block. Code following a terminator goes
    /// into a fresh block that nothing branches to.
    pub fn add_inst(&mut self, inst: Value) {
        if self.is_terminated() {
            let dead = self.new_block("unreachable");
            self.enter_block(dead);
        }
        let bb = self.cur_bb.expect("instruction emitted outside of a block");
        self.func_mut().layout_mut().bb_mut(bb)
            .insts_mut()
            .push_key_back(inst)
            .expect("instruction appended twice");
    }

    pub fn add_binary_inst(&mut self, op: BinaryOp, lhs: Value, rhs: Value) -> Value {
        let res = self.func_mut().dfg_mut().new_value().binary(op, lhs, rhs);
        self.add_inst(res);
        res
    }
    pub fn add_jump(&mut self, target: BasicBlock) -> Value {
        let res = self.func_mut().dfg_mut().new_value().jump(target);
        self.add_inst(res);
        res
    }
    pub fn add_jump_with_args(&mut self, target: BasicBlock, args: Vec<Value>) -> Value {
        let res = self.func_mut().dfg_mut().new_value().jump_with_args(target, args);
        self.add_inst(res);
        res
    }
    pub fn add_branch(&mut self, cond: Value, true_bb: BasicBlock, false_bb: BasicBlock) -> Value {
        let res = self.func_mut().dfg_mut().new_value().branch(cond, true_bb, false_bb);
        self.add_inst(res);
        res
    }
    pub fn add_branch_with_args(
        &mut self, cond: Value,
        true_bb: BasicBlock, false_bb: BasicBlock,
        true_args: Vec<Value>, false_args: Vec<Value>,
    ) -> Value {
        let res = self.func_mut().dfg_mut().new_value()
            .branch_with_args(cond, true_bb, false_bb, true_args, false_args);
        self.add_inst(res);
        res
    }
    pub fn add_alloc(&mut self, ty: Type) -> Value {
        let res = self.func_mut().dfg_mut().new_value().alloc(ty);
        self.add_inst(res);
        res
    }
    pub fn add_global_alloc(&mut self, initializer: Value, name: &str) -> Value {
        let res = self.program.new_value().global_alloc(initializer);
        self.program.set_value_name(res, Some(format!("@{}", name)));
        res
    }
    pub fn add_store(&mut self, value: Value, dest: Value) -> Value {
        let res = self.func_mut().dfg_mut().new_value().store(value, dest);
        self.add_inst(res);
        res
    }
    pub fn add_load(&mut self, src: Value) -> Value {
        let res = self.func_mut().dfg_mut().new_value().load(src);
        self.add_inst(res);
        res
    }
    pub fn add_get_elem_ptr(&mut self, src: Value, index: Value) -> Value {
        let res = self.func_mut().dfg_mut().new_value().get_elem_ptr(src, index);
        self.add_inst(res);
        res
    }
    pub fn add_get_ptr(&mut self, src: Value, index: Value) -> Value {
        let res = self.func_mut().dfg_mut().new_value().get_ptr(src, index);
        self.add_inst(res);
        res
    }
    pub fn add_call(&mut self, callee: Function, args: Vec<Value>) -> Value {
        let res = self.func_mut().dfg_mut().new_value().call(callee, args);
        self.add_inst(res);
        res
    }
    pub fn add_ret(&mut self, value: Option<Value>) -> Value {
        let res = self.func_mut().dfg_mut().new_value().ret(value);
        self.add_inst(res);
        res
    }
    pub fn add_integer(&mut self, value: i32) -> Value {
        self.func_mut().dfg_mut().new_value().integer(value)
    }
    /// Type of a value of the function being generated.
    pub fn value_type(&self, value: Value) -> Option<Type> {
        let func = self.cur_func?;
        Some(self.program.func(func).dfg().value(value).ty().clone())
    }
    pub fn is_global(&self) -> bool {
        self.sym_table.borrow().is_global()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrontendError {
    #[error("`continue` outside of a loop")]
    ContinueOutsideLoop,
    #[error("`break` outside of a loop")]
    BreakOutsideLoop,
    #[error("expression is not a compile-time constant")]
    EvalNonConstExpr,
    #[error("division by zero in a constant expression")]
    DivisionByZero,
    #[error("undefined variable `{0}`")]
    UndefinedVariable(String),
    #[error("undefined function `{0}`")]
    UndefinedFunction(String),
    #[error("`{0}` is already defined in this scope")]
    Redefinition(String),
    #[error("cannot assign to `{0}`")]
    InvalidAssignment(String),
    #[error("`{func}` takes {expected} argument(s) but {found} were given")]
    ArgumentCountMismatch { func: String, expected: usize, found: usize },
    #[error("`{0}` is not an array")]
    NotAnArray(String),
    #[error("`{0}` is not a function")]
    NotAFunction(String),
    #[error("`{0}` returns void and has no value")]
    VoidValue(String),
    #[error("array `{0}` used where an `int` is expected")]
    ArrayAsValue(String),
    #[error("operator requires `int` operands, `{0}` is an array")]
    OperandNotInt(String),
    #[error("type mismatch in assignment, `{0}` is an array")]
    AssignTypeMismatch(String),
    #[error("argument {index} of `{func}` has the wrong type")]
    ArgumentTypeMismatch { func: String, index: usize },
    #[error("return statement does not match the return type of `{0}`")]
    ReturnTypeMismatch(String),
    #[error("array `{0}` must have a positive constant size")]
    InvalidArraySize(String),
    #[error("malformed initialiser for `{0}`")]
    InvalidInitializer(String),
    #[error("line {line}: {error}")]
    Located { line: usize, error: Box<FrontendError> },
}

impl FrontendError {
    /// Attaches `line` unless the error already carries one.
    pub fn at(self, line: usize) -> Self {
        match self {
            FrontendError::Located { .. } => self,
            error => FrontendError::Located { line, error: Box::new(error) },
        }
    }

    pub fn line(&self) -> Option<usize> {
        match self {
            FrontendError::Located { line, .. } => Some(*line),
            _ => None,
        }
    }

    /// The error without its position.
    pub fn kind(&self) -> &FrontendError {
        match self {
            FrontendError::Located { error, .. } => error.kind(),
            error => error,
        }
    }
}

pub trait IRGen {
    type Output;
    fn generate_ir(&self, env: &mut Environment) -> Result<Self::Output, FrontendError>;
}
