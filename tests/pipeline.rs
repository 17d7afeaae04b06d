use sysy_lsra::backend::config::TargetConfig;
use sysy_lsra::backend::Assembly;
use sysy_lsra::environment::FrontendError;
use sysy_lsra::{compile_to_asm, CompileError};

fn compile(source: &str, config: &TargetConfig) -> Assembly {
    let assembly = compile_to_asm(source, config).unwrap();
    assert!(!assembly.has_errors(), "{:?}\n{}", assembly.diagnostics, assembly);
    assembly
}

fn compile_default(source: &str) -> String {
    compile(source, &TargetConfig::default()).to_string()
}

const FIB: &str = r#"
int fib(int n) {
  if (n <= 1) return n;
  return fib(n - 1) + fib(n - 2);
}

int main() {
  return fib(10);
}
"#;

#[test]
fn recursive_functions() {
    let asm = compile_default(FIB);
    assert!(asm.contains("  .globl fib\nfib:\n"));
    assert!(asm.contains("  .globl main\nmain:\n"));
    assert!(asm.contains("  call fib\n"));
    // fib returns to its caller, main hands its value to exit
    assert!(asm.contains("  sw ra, 0(sp)\n"));
    assert!(asm.contains("  ret\n"));
    assert!(asm.contains("  call exit\n"));
}

#[test]
fn recursion_compiles_with_any_register_count() {
    for registers in [0, 1, 2, 11] {
        let config = TargetConfig::default().with_register_limit(registers);
        let asm = compile(FIB, &config).to_string();
        assert!(asm.contains("  call fib\n"));
    }
}

#[test]
fn arrays_and_loops() {
    let source = r#"
const int N = 8;
int data[N] = {3, 1, 4, 1, 5};
int zeros[16];

int sum(int a[], int n) {
  int i = 0, total = 0;
  while (1) {
    if (i >= n) break;
    if (a[i] == 1) { i = i + 1; continue; }
    total = total + a[i];
    i = i + 1;
  }
  return total;
}

int main() {
  int local[4] = {N, N * 2};
  local[3] = sum(data, N);
  return sum(local, 4) + zeros[2];
}
"#;
    let asm = compile_default(source);
    assert!(asm.contains("data:\n  .word 3\n  .word 1\n  .word 4\n  .word 1\n  .word 5\n  .word 0\n"));
    assert!(asm.contains("zeros:\n  .zero 64\n"));
    assert!(asm.contains("la t0, data"));
    assert!(asm.contains(".Lsum_while_body"));
    assert!(asm.contains("  call sum\n"));
    // element addresses are scaled by the word size
    assert!(asm.contains("slli"));
}

#[test]
fn short_circuit_merges_through_block_parameters() {
    let source = r#"
int side;

int touch() {
  side = side + 1;
  return 1;
}

int main() {
  int a = getint();
  if (a > 0 && touch()) {
    putint(side);
  }
  if (a < 0 || touch()) {
    putint(side);
  }
  return 0;
}
"#;
    let asm = compile_default(source);
    assert!(asm.contains("  call getint\n"));
    assert!(asm.contains("  call putint\n"));
    assert!(asm.contains("  bnez "));
    // uninitialised scalars still get storage
    assert!(asm.contains("side:\n  .zero 4\n"));
}

#[test]
fn more_than_eight_arguments() {
    let source = r#"
int many(int a, int b, int c, int d, int e, int f, int g, int h, int i, int j) {
  return a + j * 2 - i;
}

int main() {
  return many(1, 2, 3, 4, 5, 6, 7, 8, 9, 10);
}
"#;
    let assembly = compile(source, &TargetConfig::default());
    let asm = assembly.to_string();
    assert!(asm.contains("  addi sp, sp, -16\n  call many\n  addi sp, sp, 16\n"));
    assert!(asm.contains("  li t0, 9\n  sw t0, -16(sp)\n"));
    assert!(asm.contains("  li t0, 10\n  sw t0, -12(sp)\n"));
    assert!(assembly.diagnostics.is_empty());
}

#[test]
fn scalar_globals_are_cached_and_written_back() {
    let source = r#"
int counter = 5;

void bump() {
  counter = counter + 1;
  counter = counter + 1;
}

int main() {
  bump();
  return counter;
}
"#;
    let asm = compile_default(source);
    assert!(asm.contains("counter:\n  .word 5\n"));
    assert!(asm.contains("  la t6, counter\n"));
}

#[test]
fn main_without_return_exits_with_zero() {
    let source = "void f() {}\nint main() { f(); }";
    let asm = compile_default(source);
    assert!(asm.contains("  li a0, 0\n"));
    assert!(asm.trim_end().ends_with("call exit"));
}

#[test]
fn frontend_errors_stop_the_pipeline() {
    let err = compile_to_asm("int main() { return x; }", &TargetConfig::default()).unwrap_err();
    assert!(matches!(err, CompileError::Frontend(ref errors)
        if errors[..] == [FrontendError::UndefinedVariable("x".into()).at(1)]));

    let err = compile_to_asm("int main() {\n  break;\n}", &TargetConfig::default()).unwrap_err();
    assert!(matches!(err, CompileError::Frontend(ref errors)
        if errors[..] == [FrontendError::BreakOutsideLoop.at(2)]));
    assert_eq!(err.to_string(), "line 2: `break` outside of a loop");

    let err = compile_to_asm("int main() { return 1 }", &TargetConfig::default()).unwrap_err();
    assert!(matches!(err, CompileError::Parse { line: 1, .. }));
}

fn frontend_errors(source: &str) -> Vec<FrontendError> {
    match compile_to_asm(source, &TargetConfig::default()) {
        Err(CompileError::Frontend(errors)) => errors,
        other => panic!("expected semantic errors, got {:?}", other.map(|asm| asm.to_string())),
    }
}

#[test]
fn ill_typed_programs_are_rejected() {
    let source = r#"
int f(int a[]) { return a[0]; }
int g(int x) { return x; }
int main() {
  int a[3];
  int b;
  b = f(3);
  b = g(a);
  b = a + 1;
  b = a;
  return f(a) + g(b);
}
"#;
    assert_eq!(frontend_errors(source), vec![
        FrontendError::ArgumentTypeMismatch { func: "f".into(), index: 1 }.at(7),
        FrontendError::ArgumentTypeMismatch { func: "g".into(), index: 1 }.at(8),
        FrontendError::OperandNotInt("a".into()).at(9),
        FrontendError::AssignTypeMismatch("a".into()).at(10),
    ]);
}
