use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use koopa::ir::{Function, Value};
use crate::ast::Number;
use crate::environment::FrontendError;

#[derive(Clone, Debug)]
pub enum SymbolEntry {
    Const(Number),
    Var(Value),
    Func(Function),
    /// Array storage, its length, and its contents when declared `const`.
    Array(Value, usize, Option<Rc<Vec<i32>>>),
    /// `int a[]` parameter, already a pointer to the first element.
    ArrayPtr(Value),
}
pub struct SymbolTable {
    symbols: HashMap<String, SymbolEntry>,
    parent: Option<Rc<RefCell<SymbolTable>>>,
}
impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            symbols: HashMap::new(),
            parent: None,
        }
    }

    pub fn new_with_parent(parent: &Rc<RefCell<SymbolTable>>) -> Self {
        SymbolTable {
            symbols: HashMap::new(),
            parent: Some(parent.clone()),
        }
    }

    fn insert(&mut self, name: String, entry: SymbolEntry) -> Result<(), FrontendError> {
        if self.symbols.contains_key(&name) {
            return Err(FrontendError::Redefinition(name));
        }
        self.symbols.insert(name, entry);
        Ok(())
    }
    pub fn insert_var(&mut self, name: String, value: Value) -> Result<(), FrontendError> {
        self.insert(name, SymbolEntry::Var(value))
    }
    pub fn insert_const(&mut self, name: String, value: Number) -> Result<(), FrontendError> {
        self.insert(name, SymbolEntry::Const(value))
    }
    pub fn insert_func(&mut self, name: String, func: Function) -> Result<(), FrontendError> {
        self.insert(name, SymbolEntry::Func(func))
    }
    pub fn insert_array_ptr(&mut self, name: String, value: Value) -> Result<(), FrontendError> {
        self.insert(name, SymbolEntry::ArrayPtr(value))
    }
    pub fn insert_array(
        &mut self,
        name: String,
        value: Value,
        len: usize,
        consts: Option<Vec<i32>>,
    ) -> Result<(), FrontendError> {
        self.insert(name, SymbolEntry::Array(value, len, consts.map(Rc::new)))
    }
    pub fn is_global(&self) -> bool {
        self.parent.is_none()
    }

    pub fn get(&self, name: &str) -> Option<SymbolEntry> {
        if let Some(value) = self.symbols.get(name) {
            Some(value.clone())
        } else if let Some(parent) = &self.parent {
            parent.borrow().get(name)
        } else {
            None
        }
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}
