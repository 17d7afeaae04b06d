use std::rc::Rc;
use koopa::ir;
use koopa::ir::Type;
use crate::environment::{Environment, FrontendError};
use crate::sym_table::SymbolEntry;

#[derive(Debug)]
pub struct CompUnit {
    pub items: Vec<Comp>,
}

#[derive(Debug)]
pub enum Comp {
    FuncDef(Rc<FuncDef>),
    Decl(Rc<Decl>),
}

#[derive(Debug)]
pub struct FuncDef {
    pub func_type: FuncType,
    pub ident: String,
    pub params: Vec<FuncFParam>,
    pub block: Rc<Block>,
    pub pos: usize,
}
impl FuncDef {
    pub fn get_param(&self) -> Vec<(Option<String>, Type)> {
        self.params.iter()
            .map(|param| (Some(format!("@{}", param.ident)), param.to_type()))
            .collect()
    }
    pub fn ret_type(&self) -> Type {
        match self.func_type {
            FuncType::Void => Type::get_unit(),
            FuncType::Int => Type::get_i32(),
        }
    }
}

/// `int x` or `int x[]`.
#[derive(Debug)]
pub struct FuncFParam {
    pub ident: String,
    pub is_array: bool,
}
impl FuncFParam {
    pub fn to_type(&self) -> Type {
        if self.is_array {
            Type::get_pointer(Type::get_i32())
        } else {
            Type::get_i32()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncType {
    Void,
    Int,
}

#[derive(Debug)]
pub struct Block {
    pub items: Vec<BlockItem>,
}
#[derive(Debug)]
pub enum BlockItem {
    Stmt(Rc<Stmt>),
    Decl(Rc<Decl>),
}

#[derive(Debug)]
pub enum Stmt {
    Return(Option<Exp>, usize),
    Assign(LVal, Exp),
    Exp(Option<Exp>),
    Block(Rc<Block>),
    If(Exp, Rc<Stmt>, Option<Rc<Stmt>>),
    While(Exp, Rc<Stmt>),
    Break(usize),
    Continue(usize),
}

#[derive(Debug)]
pub enum Exp {
    Num(Number),
    LVal(LVal),
    UnaryExp(UnaryOp, Rc<Exp>),
    BinaryExp(BinaryOp, Rc<Exp>, Rc<Exp>),
    /// Callee, arguments and the byte offset of the callee name.
    Call(String, Vec<Exp>, usize),
}
impl Exp {
    pub fn eval_const(&self, env: &Environment) -> Result<Number, FrontendError> {
        match self {
            Exp::Num(n) => Ok(*n),
            Exp::LVal(lval) => {
                let entry = env.sym_table.borrow().get(&lval.ident);
                match (entry, &lval.index) {
                    (Some(SymbolEntry::Const(value)), None) => Ok(value),
                    (Some(SymbolEntry::Array(_, len, Some(consts))), Some(index)) => {
                        let i = index.eval_const(env)?;
                        if i < 0 || i as usize >= len {
                            return Err(FrontendError::EvalNonConstExpr);
                        }
                        Ok(consts[i as usize])
                    },
                    (Some(_), _) => Err(FrontendError::EvalNonConstExpr),
                    (None, _) => Err(FrontendError::UndefinedVariable(lval.ident.clone())),
                }
            },
            Exp::UnaryExp(op, exp) => {
                let value = exp.eval_const(env)?;
                match op {
                    UnaryOp::Pos => Ok(value),
                    UnaryOp::Neg => Ok(value.wrapping_neg()),
                    UnaryOp::Not => Ok((value == 0) as i32),
                }
            },
            Exp::BinaryExp(op, left, right) => {
                let left_value = left.eval_const(env)?;
                let right_value = right.eval_const(env)?;
                match op {
                    BinaryOp::Add => Ok(left_value.wrapping_add(right_value)),
                    BinaryOp::Sub => Ok(left_value.wrapping_sub(right_value)),
                    BinaryOp::Mul => Ok(left_value.wrapping_mul(right_value)),
                    BinaryOp::Div => if right_value == 0 { Err(FrontendError::DivisionByZero) } else { Ok(left_value.wrapping_div(right_value)) },
                    BinaryOp::Mod => if right_value == 0 { Err(FrontendError::DivisionByZero) } else { Ok(left_value.wrapping_rem(right_value)) },
                    BinaryOp::Eq => Ok((left_value == right_value) as i32),
                    BinaryOp::Neq => Ok((left_value != right_value) as i32),
                    BinaryOp::Gt => Ok((left_value > right_value) as i32),
                    BinaryOp::Ge => Ok((left_value >= right_value) as i32),
                    BinaryOp::Lt => Ok((left_value < right_value) as i32),
                    BinaryOp::Le => Ok((left_value <= right_value) as i32),
                    BinaryOp::Land => Ok((left_value != 0 && right_value != 0) as i32),
                    BinaryOp::Lor => Ok((left_value != 0 || right_value != 0) as i32),
                }
            },
            // calls are never compile-time constants
            Exp::Call(..) => Err(FrontendError::EvalNonConstExpr),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Pos,
    Neg,
    Not,
}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Neq,
    Gt,
    Ge,
    Lt,
    Le,
    Land,
    Lor,
}
impl BinaryOp {
    /// `None` for the short-circuit operators, which become control flow.
    pub fn to_koopa_op(&self) -> Option<ir::BinaryOp> {
        match self {
            BinaryOp::Add => Some(ir::BinaryOp::Add),
            BinaryOp::Sub => Some(ir::BinaryOp::Sub),
            BinaryOp::Mul => Some(ir::BinaryOp::Mul),
            BinaryOp::Div => Some(ir::BinaryOp::Div),
            BinaryOp::Mod => Some(ir::BinaryOp::Mod),
            BinaryOp::Eq => Some(ir::BinaryOp::Eq),
            BinaryOp::Neq => Some(ir::BinaryOp::NotEq),
            BinaryOp::Gt => Some(ir::BinaryOp::Gt),
            BinaryOp::Ge => Some(ir::BinaryOp::Ge),
            BinaryOp::Lt => Some(ir::BinaryOp::Lt),
            BinaryOp::Le => Some(ir::BinaryOp::Le),
            BinaryOp::Land | BinaryOp::Lor => None,
        }
    }
}

#[derive(Debug)]
pub struct LVal {
    pub ident: String,
    pub index: Option<Rc<Exp>>,
    pub pos: usize,
}

#[derive(Debug)]
pub enum Decl {
    ConstDecl(Vec<Def>),
    VarDecl(Vec<Def>),
}

/// One declarator: `x`, `x = 1`, `a[4]` or `a[4] = {1, 2}`.
#[derive(Debug)]
pub struct Def {
    pub ident: String,
    pub array_size: Option<Exp>,
    pub init: Option<InitVal>,
    pub pos: usize,
}

#[derive(Debug)]
pub enum InitVal {
    Exp(Exp),
    List(Vec<InitVal>),
}
impl InitVal {
    /// Element expressions of an array initialiser, at most `len` of them.
    pub fn elements(&self, ident: &str, len: usize) -> Result<Vec<&Exp>, FrontendError> {
        let list = match self {
            InitVal::List(list) => list,
            InitVal::Exp(_) => return Err(FrontendError::InvalidInitializer(ident.to_string())),
        };
        if list.len() > len {
            return Err(FrontendError::InvalidInitializer(ident.to_string()));
        }
        list.iter()
            .map(|item| match item {
                InitVal::Exp(exp) => Ok(exp),
                InitVal::List(_) => Err(FrontendError::InvalidInitializer(ident.to_string())),
            })
            .collect()
    }
}

pub type Number = i32;

/// Integer literal in the given radix. Values up to `u32::MAX` wrap, so that
/// `-2147483648` can be written.
pub fn parse_literal(digits: &str, radix: u32) -> Result<Number, &'static str> {
    match u32::from_str_radix(digits, radix) {
        Ok(value) => Ok(value as i32),
        Err(_) => Err("integer literal out of range"),
    }
}
