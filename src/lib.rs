//! SysY to RISC-V compiler built around a linear-scan register allocator.
//!
//! The pipeline is: lalrpop parser, koopa IR generation, a cleanup pass,
//! lowering into the backend's narrow IR, live intervals, linear scan, and
//! RISC-V emission with a scratch register pool.

pub mod ast;
pub mod backend;
pub mod environment;
pub mod ir_gen;
pub mod label_gen;
pub mod opt;
pub mod sym_table;

use koopa::back::KoopaGenerator;
use koopa::ir::Program;
use koopa::opt::ModulePass;
use lalrpop_util::{lalrpop_mod, ParseError};
use log::debug;
use thiserror::Error;
use crate::backend::config::TargetConfig;
use crate::backend::diagnostic::Diagnostic;
use crate::backend::lower::LowerError;
use crate::backend::Assembly;
use crate::environment::{Environment, FrontendError, IRGen};
use crate::opt::DeadCodeElimination;

lalrpop_mod!(#[allow(clippy::all)] pub sysy);

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error at {line}:{col}: {message}")]
    Parse { line: usize, col: usize, message: String },
    #[error("{}", join_lines(.0))]
    Frontend(Vec<FrontendError>),
    #[error(transparent)]
    Lower(#[from] LowerError),
    #[error("code generation reported {} error(s)", .0.len())]
    Diagnostics(Vec<Diagnostic>),
}

impl From<FrontendError> for CompileError {
    fn from(err: FrontendError) -> Self {
        CompileError::Frontend(vec![err])
    }
}

fn join_lines(errors: &[FrontendError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n")
}

/// 1-based line and column of a byte offset.
fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let before = &source[..offset.min(source.len())];
    let line = before.matches('\n').count() + 1;
    let col = before.len() - before.rfind('\n').map_or(0, |i| i + 1) + 1;
    (line, col)
}

pub fn parse(source: &str) -> Result<ast::CompUnit, CompileError> {
    sysy::CompUnitParser::new().parse(source).map_err(|err| {
        let (offset, message) = match err {
            ParseError::InvalidToken { location } => (location, "invalid token".to_string()),
            ParseError::UnrecognizedEOF { location, expected } => {
                (location, format!("unexpected end of file, expected one of {}", expected.join(", ")))
            },
            ParseError::UnrecognizedToken { token: (start, tok, _), expected } => {
                (start, format!("unexpected token `{}`, expected one of {}", tok, expected.join(", ")))
            },
            ParseError::ExtraToken { token: (start, tok, _) } => (start, format!("extra token `{}`", tok)),
            ParseError::User { error } => (0, error.to_string()),
        };
        let (line, col) = line_col(source, offset);
        CompileError::Parse { line, col, message }
    })
}

/// Parses and type-checks `source` and returns the cleaned-up koopa program.
/// Semantic errors are collected, one per line, before the pipeline stops.
pub fn compile_to_koopa(source: &str, entry: &str) -> Result<Program, CompileError> {
    let ast = parse(source)?;
    let mut program = Program::new();
    let errors = {
        let mut env = Environment::with_source(&mut program, source);
        ast.generate_ir(&mut env)?;
        env.take_errors()
    };
    if !errors.is_empty() {
        return Err(CompileError::Frontend(errors));
    }
    DeadCodeElimination::new(entry).run_on(&mut program);
    debug!("generated {} function(s)", program.func_layout().len());
    Ok(program)
}

pub fn koopa_text(program: &Program) -> Result<String, CompileError> {
    let mut gen = KoopaGenerator::new(Vec::new());
    gen.generate_on(program)?;
    Ok(String::from_utf8_lossy(&gen.writer()).into_owned())
}

/// Compiles `source` all the way to RISC-V assembly. Backend recoveries are
/// reported in [`Assembly::diagnostics`] rather than as an error.
pub fn compile_to_asm(source: &str, config: &TargetConfig) -> Result<Assembly, CompileError> {
    let program = compile_to_koopa(source, &config.entry)?;
    Ok(backend::generate_asm(&program, config)?)
}
