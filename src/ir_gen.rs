use std::rc::Rc;
use koopa::ir::{FunctionData, Type, TypeKind, Value};
use koopa::ir;
use koopa::ir::builder::ValueBuilder;
use crate::ast;
use crate::ast::*;
use crate::environment::*;
use crate::sym_table::SymbolEntry;

impl IRGen for CompUnit {
    type Output = ();
    fn generate_ir(&self, env: &mut Environment) -> Result<Self::Output, FrontendError> {
        env.declare_library()?;
        for comp in self.items.iter() {
            if let Err(err) = comp.generate_ir(env) {
                env.report(err);
            }
        }
        Ok(())
    }
}
impl IRGen for Comp {
    type Output = ();
    fn generate_ir(&self, env: &mut Environment) -> Result<Self::Output, FrontendError> {
        match self {
            Comp::FuncDef(func_def) => func_def.generate_ir(env),
            Comp::Decl(decl) => decl.generate_ir(env),
        }
    }
}
impl IRGen for FuncDef {
    type Output = ();
    fn generate_ir(&self, env: &mut Environment) -> Result<Self::Output, FrontendError> {
        let func = env.program.new_func(FunctionData::with_param_names(
            format!("@{}", self.ident),
            self.get_param(),
            self.ret_type(),
        ));
        // visible inside its own body for recursion
        let inserted = env.sym_table.borrow_mut().insert_func(self.ident.clone(), func);
        inserted.map_err(|e| e.at(env.line_of(self.pos)))?;
        env.enter_function(func);
        let old_table = env.enter_scope();
        let body = self.generate_body(env, func);
        env.exit_scope(old_table);
        env.cur_func = None;
        env.cur_bb = None;
        body.map_err(|e| e.at(env.line_of(self.pos)))
    }
}
impl FuncDef {
    fn generate_body(&self, env: &mut Environment, func: ir::Function) -> Result<(), FrontendError> {
        let entry = env.new_block("entry");
        env.enter_block(entry);
        let params: Vec<Value> = env.program.func(func).params().to_vec();
        for (param, val) in self.params.iter().zip(params) {
            if param.is_array {
                env.sym_table.borrow_mut().insert_array_ptr(param.ident.clone(), val)?;
            } else {
                let slot = env.add_alloc(Type::get_i32());
                env.add_store(val, slot);
                env.sym_table.borrow_mut().insert_var(param.ident.clone(), slot)?;
            }
        }
        // parameters and the outermost block share one scope
        self.block.generate_ir(env)
    }
}

impl IRGen for Block {
    type Output = ();
    fn generate_ir(&self, env: &mut Environment) -> Result<Self::Output, FrontendError> {
        // a failed item is reported and generation moves on to the next one
        for item in self.items.iter() {
            if let Err(err) = item.generate_ir(env) {
                env.report(err);
            }
        }
        Ok(())
    }
}
impl IRGen for BlockItem {
    type Output = ();
    fn generate_ir(&self, env: &mut Environment) -> Result<Self::Output, FrontendError> {
        match self {
            BlockItem::Stmt(stmt) => stmt.generate_ir(env)?,
            BlockItem::Decl(decl) => decl.generate_ir(env)?,
        }
        Ok(())
    }
}

fn array_len(env: &Environment, def: &Def, size: &Exp) -> Result<usize, FrontendError> {
    match size.eval_const(env)? {
        len if len > 0 => Ok(len as usize),
        _ => Err(FrontendError::InvalidArraySize(def.ident.clone())),
    }
}

/// Constant contents of an array, zero-filled to `len`.
fn const_elements(env: &Environment, def: &Def, len: usize) -> Result<Vec<i32>, FrontendError> {
    let mut values = match &def.init {
        Some(init) => init.elements(&def.ident, len)?
            .into_iter()
            .map(|exp| exp.eval_const(env))
            .collect::<Result<Vec<_>, _>>()?,
        None => vec![],
    };
    values.resize(len, 0);
    Ok(values)
}

fn global_array(env: &mut Environment, name: &str, values: &[i32]) -> Value {
    let init = if values.iter().all(|v| *v == 0) {
        env.program.new_value().zero_init(Type::get_array(Type::get_i32(), values.len()))
    } else {
        let elems = values.iter().map(|v| env.program.new_value().integer(*v)).collect();
        env.program.new_value().aggregate(elems)
    };
    env.add_global_alloc(init, name)
}

/// Stores `values` into every element of the local array at `alloc`.
fn fill_local_array(env: &mut Environment, alloc: Value, values: Vec<Value>) {
    for (i, value) in values.into_iter().enumerate() {
        let index = env.add_integer(i as i32);
        let ptr = env.add_get_elem_ptr(alloc, index);
        env.add_store(value, ptr);
    }
}

impl Def {
    fn generate_var(&self, env: &mut Environment) -> Result<(), FrontendError> {
        match &self.array_size {
            None => {
                let val = if env.is_global() {
                    let init = match &self.init {
                        Some(InitVal::Exp(exp)) => {
                            let value = exp.eval_const(env)?;
                            env.program.new_value().integer(value)
                        },
                        Some(InitVal::List(_)) => return Err(FrontendError::InvalidInitializer(self.ident.clone())),
                        None => env.program.new_value().zero_init(Type::get_i32()),
                    };
                    env.add_global_alloc(init, &self.ident)
                } else {
                    let value = match &self.init {
                        Some(InitVal::Exp(exp)) => Some(exp.generate_int(env, FrontendError::AssignTypeMismatch)?),
                        Some(InitVal::List(_)) => return Err(FrontendError::InvalidInitializer(self.ident.clone())),
                        None => None,
                    };
                    let pos = env.add_alloc(Type::get_i32());
                    if let Some(value) = value {
                        env.add_store(value, pos);
                    }
                    pos
                };
                env.sym_table.borrow_mut().insert_var(self.ident.clone(), val)
            },
            Some(size) => {
                let len = array_len(env, self, size)?;
                let val = if env.is_global() {
                    let values = const_elements(env, self, len)?;
                    global_array(env, &self.ident, &values)
                } else {
                    let alloc = env.add_alloc(Type::get_array(Type::get_i32(), len));
                    if let Some(init) = &self.init {
                        let mut values = Vec::with_capacity(len);
                        for exp in init.elements(&self.ident, len)? {
                            values.push(exp.generate_int(env, FrontendError::AssignTypeMismatch)?);
                        }
                        while values.len() < len {
                            values.push(env.add_integer(0));
                        }
                        fill_local_array(env, alloc, values);
                    }
                    alloc
                };
                env.sym_table.borrow_mut().insert_array(self.ident.clone(), val, len, None)
            },
        }
    }

    fn generate_const(&self, env: &mut Environment) -> Result<(), FrontendError> {
        match &self.array_size {
            None => {
                let value = match &self.init {
                    Some(InitVal::Exp(exp)) => exp.eval_const(env)?,
                    _ => return Err(FrontendError::InvalidInitializer(self.ident.clone())),
                };
                env.sym_table.borrow_mut().insert_const(self.ident.clone(), value)
            },
            Some(size) => {
                let len = array_len(env, self, size)?;
                let values = const_elements(env, self, len)?;
                // still materialised: a constant array can be indexed at run time
                let val = if env.is_global() {
                    global_array(env, &self.ident, &values)
                } else {
                    let alloc = env.add_alloc(Type::get_array(Type::get_i32(), len));
                    let elems = values.iter().map(|v| env.add_integer(*v)).collect();
                    fill_local_array(env, alloc, elems);
                    alloc
                };
                env.sym_table.borrow_mut().insert_array(self.ident.clone(), val, len, Some(values))
            },
        }
    }
}

impl IRGen for Decl {
    type Output = ();
    fn generate_ir(&self, env: &mut Environment) -> Result<Self::Output, FrontendError> {
        match self {
            Decl::ConstDecl(defs) => {
                for def in defs.iter() {
                    def.generate_const(env).map_err(|e| e.at(env.line_of(def.pos)))?;
                }
            },
            Decl::VarDecl(defs) => {
                for def in defs.iter() {
                    def.generate_var(env).map_err(|e| e.at(env.line_of(def.pos)))?;
                }
            },
        }
        Ok(())
    }
}

impl LVal {
    /// Address of the element or scalar this lvalue names.
    fn address(&self, env: &mut Environment) -> Result<Value, FrontendError> {
        self.resolve_address(env).map_err(|e| e.at(env.line_of(self.pos)))
    }

    fn resolve_address(&self, env: &mut Environment) -> Result<Value, FrontendError> {
        let entry = env.sym_table.borrow().get(&self.ident);
        match (entry, &self.index) {
            (Some(SymbolEntry::Var(var)), None) => Ok(var),
            (Some(SymbolEntry::Array(array, _, _)), Some(index)) => {
                let index = index.generate_ir(env)?;
                Ok(env.add_get_elem_ptr(array, index))
            },
            (Some(SymbolEntry::ArrayPtr(ptr)), Some(index)) => {
                let index = index.generate_ir(env)?;
                Ok(env.add_get_ptr(ptr, index))
            },
            (Some(SymbolEntry::Var(_) | SymbolEntry::Const(_)), Some(_)) => Err(FrontendError::NotAnArray(self.ident.clone())),
            (Some(_), _) => Err(FrontendError::InvalidAssignment(self.ident.clone())),
            (None, _) => Err(FrontendError::UndefinedVariable(self.ident.clone())),
        }
    }

    /// The `int` this lvalue names.
    fn value(&self, env: &mut Environment) -> Result<Value, FrontendError> {
        let entry = env.sym_table.borrow().get(&self.ident);
        let value = match (entry, &self.index) {
            (Some(SymbolEntry::Const(value)), None) => Ok(env.add_integer(value)),
            (Some(SymbolEntry::Var(var)), None) => Ok(env.add_load(var)),
            (Some(SymbolEntry::Array(..) | SymbolEntry::ArrayPtr(_)), None) => {
                Err(FrontendError::ArrayAsValue(self.ident.clone()))
            },
            (Some(SymbolEntry::Array(..) | SymbolEntry::ArrayPtr(_)), Some(_)) => {
                let ptr = self.address(env)?;
                Ok(env.add_load(ptr))
            },
            (Some(SymbolEntry::Func(_)), _) => Err(FrontendError::UndefinedVariable(self.ident.clone())),
            (Some(_), Some(_)) => Err(FrontendError::NotAnArray(self.ident.clone())),
            (None, _) => Err(FrontendError::UndefinedVariable(self.ident.clone())),
        };
        value.map_err(|e| e.at(env.line_of(self.pos)))
    }

    /// Whether this lvalue names a whole array rather than an element of one.
    fn is_whole_array(&self, env: &Environment) -> bool {
        let entry = env.sym_table.borrow().get(&self.ident);
        self.index.is_none() && matches!(entry, Some(SymbolEntry::Array(..) | SymbolEntry::ArrayPtr(_)))
    }

    /// Pointer to the first element, when this lvalue names a whole array.
    fn array_pointer(&self, env: &mut Environment) -> Option<Value> {
        if self.index.is_some() {
            return None;
        }
        let entry = env.sym_table.borrow().get(&self.ident);
        match entry {
            Some(SymbolEntry::Array(array, _, _)) => {
                let zero = env.add_integer(0);
                Some(env.add_get_elem_ptr(array, zero))
            },
            Some(SymbolEntry::ArrayPtr(ptr)) => Some(ptr),
            _ => None,
        }
    }
}

impl Stmt {
    fn gen_single_block(&self, env: &mut Environment, stmt: &Rc<Stmt>, target_bb: ir::BasicBlock) -> Result<(), FrontendError> {
        let old_table = env.enter_scope();
        let result = stmt.generate_ir(env);
        env.exit_scope(old_table);
        result?;
        if !env.is_terminated() {
            env.add_jump(target_bb);
        }
        Ok(())
    }
    fn generate_ir(&self, env: &mut Environment) -> Result<(), FrontendError> {
        match self {
            Stmt::Exp(exp) => {
                if let Some(exp) = exp {
                    exp.generate_value(env)?;
                }
                Ok(())
            },
            Stmt::Block(block) => {
                let old_table = env.enter_scope();
                let result = block.generate_ir(env);
                env.exit_scope(old_table);
                result
            },
            Stmt::Return(exp, pos) => {
                generate_return(env, exp.as_ref()).map_err(|e| e.at(env.line_of(*pos)))
            },
            Stmt::If(exp, then, else_) => {
                let cond = exp.generate_ir(env)?;
                let then_bb = env.new_block("then");
                match else_ {
                    Some(else_stmt) => {
                        let else_bb = env.new_block("else");
                        let end_bb = env.new_block("end");
                        env.add_branch(cond, then_bb, else_bb);

                        env.enter_block(then_bb);
                        self.gen_single_block(env, then, end_bb)?;
                        env.enter_block(else_bb);
                        self.gen_single_block(env, else_stmt, end_bb)?;
                        env.enter_block(end_bb);
                    },
                    None => {
                        let end_bb = env.new_block("end");
                        env.add_branch(cond, then_bb, end_bb);

                        env.enter_block(then_bb);
                        self.gen_single_block(env, then, end_bb)?;
                        env.enter_block(end_bb);
                    },
                }
                Ok(())
            },
            Stmt::While(exp, stmt) => {
                let start_bb = env.new_block("while_start");
                let body_bb = env.new_block("while_body");
                let end_bb = env.new_block("while_end");

                env.add_jump(start_bb);
                env.enter_block(start_bb);
                let cond = exp.generate_ir(env)?;
                env.add_branch(cond, body_bb, end_bb);

                let old_while_env = env.while_env.replace(WhileEnv::new(start_bb, end_bb));
                env.enter_block(body_bb);
                let body = self.gen_single_block(env, stmt, start_bb);
                env.while_env = old_while_env;
                body?;

                env.enter_block(end_bb);
                Ok(())
            },
            Stmt::Continue(pos) => {
                match env.while_env {
                    Some(while_env) => env.add_jump(while_env.start),
                    None => return Err(FrontendError::ContinueOutsideLoop.at(env.line_of(*pos))),
                };
                Ok(())
            },
            Stmt::Break(pos) => {
                match env.while_env {
                    Some(while_env) => env.add_jump(while_env.next),
                    None => return Err(FrontendError::BreakOutsideLoop.at(env.line_of(*pos))),
                };
                Ok(())
            },
            Stmt::Assign(lval, exp) => {
                let dest = lval.address(env)?;
                let value = exp.generate_int(env, FrontendError::AssignTypeMismatch)?;
                env.add_store(value, dest);
                Ok(())
            },
        }
    }
}

fn generate_return(env: &mut Environment, exp: Option<&Exp>) -> Result<(), FrontendError> {
    let func_name = env.cur_func
        .map(|func| env.program.func(func).name().trim_start_matches('@').to_string())
        .unwrap_or_default();
    match (exp, env.returns_value()) {
        (Some(exp), true) => {
            let value = exp.generate_ir(env)?;
            env.add_ret(Some(value));
        },
        (None, false) => {
            env.add_ret(None);
        },
        _ => return Err(FrontendError::ReturnTypeMismatch(func_name)),
    }
    Ok(())
}

impl Exp {
    /// Evaluates the expression for its side effects; a void call yields `None`.
    fn generate_value(&self, env: &mut Environment) -> Result<Option<Value>, FrontendError> {
        match self {
            Exp::Call(name, args, pos) => generate_call(env, name, args, *pos),
            _ => self.generate_ir(env).map(Some),
        }
    }

    /// Generates an `int` operand. A whole array is rejected with `mismatch`.
    fn generate_int(&self, env: &mut Environment, mismatch: fn(String) -> FrontendError) -> Result<Value, FrontendError> {
        match self {
            Exp::LVal(lval) if lval.is_whole_array(env) => {
                Err(mismatch(lval.ident.clone()).at(env.line_of(lval.pos)))
            },
            _ => self.generate_ir(env),
        }
    }

    /// Generates a call argument: a whole array is passed as a pointer to its first element.
    fn generate_arg(&self, env: &mut Environment) -> Result<Value, FrontendError> {
        if let Exp::LVal(lval) = self {
            if let Some(ptr) = lval.array_pointer(env) {
                return Ok(ptr);
            }
        }
        self.generate_ir(env)
    }

    fn generate_short_circuit(&self, env: &mut Environment, op: ast::BinaryOp, lhs: &Exp, rhs: &Exp) -> Result<Value, FrontendError> {
        let (prefix, short_value) = match op {
            ast::BinaryOp::Land => ("land", 0),
            _ => ("lor", 1),
        };
        let lhs_val = lhs.generate_int(env, FrontendError::OperandNotInt)?;
        let zero = env.add_integer(0);
        let lhs_res = env.add_binary_inst(ir::BinaryOp::NotEq, lhs_val, zero);

        let rhs_bb = env.new_block(&format!("{}_rhs", prefix));
        let (end_bb, result) = env.new_block_with_param(&format!("{}_end", prefix), Type::get_i32());
        let short = env.add_integer(short_value);
        if op == ast::BinaryOp::Land {
            env.add_branch_with_args(lhs_res, rhs_bb, end_bb, vec![], vec![short]);
        } else {
            env.add_branch_with_args(lhs_res, end_bb, rhs_bb, vec![short], vec![]);
        }

        env.enter_block(rhs_bb);
        let rhs_val = rhs.generate_int(env, FrontendError::OperandNotInt)?;
        let rhs_res = env.add_binary_inst(ir::BinaryOp::NotEq, rhs_val, zero);
        env.add_jump_with_args(end_bb, vec![rhs_res]);

        env.enter_block(end_bb);
        Ok(result)
    }
}

fn generate_call(env: &mut Environment, name: &str, args: &[Exp], pos: usize) -> Result<Option<Value>, FrontendError> {
    build_call(env, name, args).map_err(|e| e.at(env.line_of(pos)))
}

fn build_call(env: &mut Environment, name: &str, args: &[Exp]) -> Result<Option<Value>, FrontendError> {
    let func = match env.sym_table.borrow().get(name) {
        Some(SymbolEntry::Func(func)) => func,
        Some(_) => return Err(FrontendError::NotAFunction(name.to_string())),
        None => return Err(FrontendError::UndefinedFunction(name.to_string())),
    };
    let (param_types, returns_value) = match env.program.func(func).ty().kind() {
        TypeKind::Function(params, ret) => (params.clone(), !ret.is_unit()),
        _ => (Vec::new(), false),
    };
    if param_types.len() != args.len() {
        return Err(FrontendError::ArgumentCountMismatch {
            func: name.to_string(),
            expected: param_types.len(),
            found: args.len(),
        });
    }

    let mut arg_values = Vec::new();
    for (i, (arg, param_type)) in args.iter().zip(param_types.iter()).enumerate() {
        let value = arg.generate_arg(env)?;
        if env.value_type(value).as_ref() != Some(param_type) {
            return Err(FrontendError::ArgumentTypeMismatch { func: name.to_string(), index: i + 1 });
        }
        arg_values.push(value);
    }
    let call = env.add_call(func, arg_values);
    Ok(if returns_value { Some(call) } else { None })
}

impl IRGen for Exp {
    type Output = Value;
    fn generate_ir(&self, env: &mut Environment) -> Result<Self::Output, FrontendError> {
        if matches!(self, Exp::UnaryExp(..) | Exp::BinaryExp(..)) {
            if let Ok(value) = self.eval_const(env) {
                return Ok(env.add_integer(value));
            }
        }
        match self {
            Exp::BinaryExp(op, lhs, rhs) => {
                match op.to_koopa_op() {
                    Some(koopa_op) => {
                        let lhs_val = lhs.generate_int(env, FrontendError::OperandNotInt)?;
                        let rhs_val = rhs.generate_int(env, FrontendError::OperandNotInt)?;
                        Ok(env.add_binary_inst(koopa_op, lhs_val, rhs_val))
                    },
                    None => self.generate_short_circuit(env, *op, lhs, rhs),
                }
            },
            Exp::Num(number) => {
                let value = env.add_integer(*number);
                Ok(value)
            },
            Exp::LVal(lval) => lval.value(env),
            Exp::UnaryExp(op, exp) => {
                let exp_val = exp.generate_int(env, FrontendError::OperandNotInt)?;
                match op {
                    UnaryOp::Neg => {
                        let zero = env.add_integer(0);
                        Ok(env.add_binary_inst(ir::BinaryOp::Sub, zero, exp_val))
                    },
                    UnaryOp::Not => {
                        let zero = env.add_integer(0);
                        Ok(env.add_binary_inst(ir::BinaryOp::Eq, exp_val, zero))
                    },
                    UnaryOp::Pos => Ok(exp_val),
                }
            },
            Exp::Call(name, args, pos) => generate_call(env, name, args, *pos)?
                .ok_or_else(|| FrontendError::VoidValue(name.clone()).at(env.line_of(*pos))),
        }
    }
}

#[cfg(test)]
mod tests {
    use koopa::ir::Program;
    use crate::environment::{Environment, FrontendError, IRGen};
    use crate::sysy;

    fn generate_all(source: &str) -> (Program, Vec<FrontendError>) {
        let ast = sysy::CompUnitParser::new().parse(source).unwrap();
        let mut program = Program::new();
        let errors = {
            let mut env = Environment::with_source(&mut program, source);
            ast.generate_ir(&mut env).unwrap();
            env.take_errors()
        };
        (program, errors)
    }

    /// The program, or the first error without its position.
    fn generate(source: &str) -> Result<Program, FrontendError> {
        let (program, errors) = generate_all(source);
        match errors.first() {
            Some(err) => Err(err.kind().clone()),
            None => Ok(program),
        }
    }

    fn koopa_text(program: &Program) -> String {
        crate::koopa_text(program).unwrap()
    }

    #[test]
    fn short_circuit_uses_a_block_parameter() {
        let program = generate("int main() { int a = getint(); return a && 2; }").unwrap();
        let text = koopa_text(&program);
        assert!(text.contains("%land_end_1(%"), "{}", text);
        assert!(text.contains("br "), "{}", text);
    }

    #[test]
    fn constant_expressions_are_folded() {
        let program = generate("const int N = 3 * 4; int main() { return N + 1 - 2; }").unwrap();
        let text = koopa_text(&program);
        assert!(text.contains("ret 11"), "{}", text);
    }

    #[test]
    fn semantic_errors() {
        assert_eq!(
            generate("int main() { return x; }").err(),
            Some(FrontendError::UndefinedVariable("x".into()))
        );
        assert_eq!(
            generate("int main() { break; }").err(),
            Some(FrontendError::BreakOutsideLoop)
        );
        assert_eq!(
            generate("const int c = 1; int main() { c = 2; return 0; }").err(),
            Some(FrontendError::InvalidAssignment("c".into()))
        );
        assert_eq!(
            generate("int f(int a) { return a; } int main() { return f(); }").err(),
            Some(FrontendError::ArgumentCountMismatch { func: "f".into(), expected: 1, found: 0 })
        );
        assert_eq!(
            generate("int main() { int a[0]; return 0; }").err(),
            Some(FrontendError::InvalidArraySize("a".into()))
        );
        assert_eq!(
            generate("void f() {} int main() { return f(); }").err(),
            Some(FrontendError::VoidValue("f".into()))
        );
        assert_eq!(
            generate("void f() { return 1; } int main() { return 0; }").err(),
            Some(FrontendError::ReturnTypeMismatch("f".into()))
        );
    }

    #[test]
    fn arrays_are_not_ints() {
        assert_eq!(
            generate("int main() { int a[3]; return a + 1; }").err(),
            Some(FrontendError::OperandNotInt("a".into()))
        );
        assert_eq!(
            generate("int main() { int a[3]; int b; b = a; return b; }").err(),
            Some(FrontendError::AssignTypeMismatch("a".into()))
        );
        assert_eq!(
            generate("int f(int a[]) { int x = a; return x; } int main() { return 0; }").err(),
            Some(FrontendError::AssignTypeMismatch("a".into()))
        );
        assert_eq!(
            generate("int main() { int a[3]; return a; }").err(),
            Some(FrontendError::ArrayAsValue("a".into()))
        );
    }

    #[test]
    fn arguments_must_match_parameter_types() {
        assert_eq!(
            generate("int f(int a[]) { return a[0]; } int main() { return f(3); }").err(),
            Some(FrontendError::ArgumentTypeMismatch { func: "f".into(), index: 1 })
        );
        assert_eq!(
            generate("int f(int x) { return x; } int main() { int b[2]; return f(b); }").err(),
            Some(FrontendError::ArgumentTypeMismatch { func: "f".into(), index: 1 })
        );
        // whole arrays and array parameters are passed through as pointers
        let program = generate(
            "int g[4]; int f(int n, int a[]) { return a[n]; }\n\
             int h(int a[]) { return f(1, a); }\n\
             int main() { int l[2]; putarray(2, l); return f(0, g) + h(l); }"
        );
        assert!(program.is_ok(), "{:?}", program.err());
    }

    #[test]
    fn every_failing_line_is_reported_once() {
        let source = "int main() {\n  int a[2];\n  x = 1;\n  y = z;\n  return a + 1;\n}\nint main() { return 0; }\n";
        let (_, errors) = generate_all(source);
        assert_eq!(errors, vec![
            FrontendError::UndefinedVariable("x".into()).at(3),
            FrontendError::UndefinedVariable("y".into()).at(4),
            FrontendError::OperandNotInt("a".into()).at(5),
            FrontendError::Redefinition("main".into()).at(7),
        ]);
        assert_eq!(errors[0].to_string(), "line 3: undefined variable `x`");
    }

    #[test]
    fn nested_statements_report_their_own_line() {
        let source = "int main() {\n  while (1) {\n    if (1)\n      return;\n  }\n  break;\n}";
        let (_, errors) = generate_all(source);
        assert_eq!(errors, vec![
            FrontendError::ReturnTypeMismatch("main".into()).at(4),
            FrontendError::BreakOutsideLoop.at(6),
        ]);
    }

    #[test]
    fn global_arrays_use_aggregates() {
        let program = generate("int a[4] = {1, 2}; int z[8]; int main() { return a[1]; }").unwrap();
        let text = koopa_text(&program);
        assert!(text.contains("global @a = alloc [i32, 4], {1, 2, 0, 0}"), "{}", text);
        assert!(text.contains("global @z = alloc [i32, 8], zeroinit"), "{}", text);
    }
}
