pub mod asm;
pub mod code_gen;
pub mod config;
pub mod diagnostic;
pub mod environment;
pub mod interval;
pub mod ir;
pub mod lower;
pub mod register;

use std::fmt;
use koopa::ir::Program;
use crate::backend::asm::AsmBuilder;
use crate::backend::code_gen::CodeGen;
use crate::backend::config::TargetConfig;
use crate::backend::diagnostic::{Diagnostic, Severity};
use crate::backend::environment::Environment;
use crate::backend::ir::Module;
use crate::backend::lower::LowerError;

/// A generated listing together with the recoveries made while producing it.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub asm: AsmBuilder,
    pub diagnostics: Vec<Diagnostic>,
}

impl Assembly {
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.severity == Severity::Error)
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }
}

impl fmt::Display for Assembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.asm)
    }
}

pub fn compile_module(module: &Module, config: &TargetConfig) -> Assembly {
    let mut env = Environment::new(module, config);
    module.code_gen(&mut env);
    let (asm, diagnostics) = env.finish();
    Assembly { asm, diagnostics }
}

pub fn generate_asm(program: &Program, config: &TargetConfig) -> Result<Assembly, LowerError> {
    let module = lower::lower_program(program)?;
    Ok(compile_module(&module, config))
}
