use std::fs;
use std::path::PathBuf;
use clap::Parser;
use sysy_lsra::backend::config::{TargetConfig, MIN_SCRATCH};
use sysy_lsra::{compile_to_asm, compile_to_koopa, koopa_text, CompileError};

#[derive(Parser, Debug)]
#[command(name = "sysy-lsra")]
#[command(about = "Compiles SysY to Koopa IR or RISC-V assembly with linear-scan register allocation")]
struct Args {
    /// SysY source file
    input: PathBuf,
    /// Where to write the result
    #[arg(short, long)]
    output: PathBuf,
    /// Emit Koopa IR
    #[arg(long, conflicts_with = "riscv")]
    koopa: bool,
    /// Emit RISC-V assembly (the default)
    #[arg(long)]
    riscv: bool,
    /// Number of registers given to the allocator
    #[arg(long)]
    registers: Option<usize>,
    /// Number of scratch registers, at least 4
    #[arg(long, value_parser = scratch_count)]
    scratch: Option<usize>,
    /// Function that exits the process instead of returning
    #[arg(long, default_value = "main")]
    entry: String,
    /// Fail when code generation reports an error diagnostic
    #[arg(long)]
    strict: bool,
    /// Log per-function allocation summaries
    #[arg(short, long)]
    verbose: bool,
}

fn scratch_count(arg: &str) -> Result<usize, String> {
    let count: usize = arg.parse().map_err(|_| format!("`{}` is not a register count", arg))?;
    if count < MIN_SCRATCH {
        return Err(format!("at least {} scratch registers are needed", MIN_SCRATCH));
    }
    Ok(count)
}

fn run(args: &Args) -> Result<(), CompileError> {
    let source = fs::read_to_string(&args.input)?;
    let mut config = TargetConfig::default().with_entry(&args.entry);
    if let Some(limit) = args.registers {
        config = config.with_register_limit(limit);
    }
    if let Some(limit) = args.scratch {
        config = config.with_scratch_limit(limit);
    }

    if args.koopa && !args.riscv {
        let program = compile_to_koopa(&source, &config.entry)?;
        fs::write(&args.output, koopa_text(&program)?)?;
        return Ok(());
    }

    let assembly = compile_to_asm(&source, &config)?;
    if args.strict && assembly.has_errors() {
        return Err(CompileError::Diagnostics(assembly.errors().cloned().collect()));
    }
    fs::write(&args.output, assembly.to_string())?;
    Ok(())
}

fn main() {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    if let Err(e) = run(&args) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
