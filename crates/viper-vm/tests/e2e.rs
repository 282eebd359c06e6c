//! The literal end-to-end scenarios: each one is parsed verbatim from its
//! textual IL, verified, then run with a captured stdout.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use viper_rt::bridge::Bridge;
use viper_rt::name_map::NameMap;
use viper_vm::{Interpreter, RunOutcome};

#[derive(Clone, Default)]
struct CapturingWriter(Rc<RefCell<Vec<u8>>>);

impl Write for CapturingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn run_captured(src: &str) -> (RunOutcome, Vec<u8>) {
    let m = viper_il::parse(src).expect("valid IL");
    let report = viper_verify::verify_module(&m);
    assert!(
        report.is_ok(),
        "module failed to verify: {:?}",
        report.diagnostics.iter().collect::<Vec<_>>()
    );

    let out = CapturingWriter::default();
    let bridge = Bridge::with_writer(Box::new(out.clone()));
    let mut vm = Interpreter::new(&m, &bridge, NameMap::for_load());
    let outcome = vm.run("@main");
    let bytes = out.0.borrow().clone();
    (outcome, bytes)
}

const E1_HELLO_WORLD: &str = r#"il 0.1
extern @Viper.Console.PrintStr(str) -> void
global const str @.msg = "hello"
func @main() -> i64 { entry: %s = const_str @.msg  call @Viper.Console.PrintStr(%s)  ret 0 }
"#;

#[test]
fn e1_hello_world() {
    let (outcome, out) = run_captured(E1_HELLO_WORLD);
    assert!(matches!(outcome, RunOutcome::Exit(0)), "{outcome:?}");
    assert_eq!(out, b"hello");
}

const E2_ARITHMETIC_AND_BRANCH: &str = r#"il 0.1
extern @Viper.Console.PrintI64(i64) -> void
func @main() -> i64 { entry:
  %v0 = add 2, 2
  %v1 = scmp_gt %v0, 3
  call @Viper.Console.PrintI64(%v1)
  ret 0 }
"#;

#[test]
fn e2_arithmetic_and_branch() {
    let (outcome, out) = run_captured(E2_ARITHMETIC_AND_BRANCH);
    assert!(matches!(outcome, RunOutcome::Exit(0)), "{outcome:?}");
    assert_eq!(out, b"1");
}

const E3_UNHANDLED_DIVIDE_BY_ZERO: &str = r#"il 0.1
func @main() -> i64 { entry:
  %q = sdiv.chk0 1, 0
  ret %q }
"#;

#[test]
fn e3_unhandled_divide_by_zero_traps() {
    let (outcome, out) = run_captured(E3_UNHANDLED_DIVIDE_BY_ZERO);
    assert!(out.is_empty());
    match outcome {
        RunOutcome::Trapped { exit_code, diagnostic } => {
            assert_ne!(exit_code, 0);
            assert!(diagnostic.contains("DivideByZero"), "{diagnostic}");
        }
        other => panic!("expected an unhandled trap, got {other:?}"),
    }
}

const E6_SWITCH_WITH_DEFAULT: &str = r#"il 0.1
extern @Viper.Console.PrintI64(i64) -> void
func @main() -> i64 { entry:
  switch.i32 2, ^d, 1 -> ^one, 2 -> ^two
^one: call @Viper.Console.PrintI64(1) ret 0
^two: call @Viper.Console.PrintI64(2) ret 0
^d:   call @Viper.Console.PrintI64(0) ret 0 }
"#;

#[test]
fn e6_switch_with_default() {
    let (outcome, out) = run_captured(E6_SWITCH_WITH_DEFAULT);
    assert!(matches!(outcome, RunOutcome::Exit(0)), "{outcome:?}");
    assert_eq!(out, b"2");
}

/// Testable Property 3: two runs of the same module over the same (empty)
/// stdin produce byte-identical stdout and the same exit code.
#[test]
fn determinism_two_runs_agree() {
    let (outcome_a, out_a) = run_captured(E2_ARITHMETIC_AND_BRANCH);
    let (outcome_b, out_b) = run_captured(E2_ARITHMETIC_AND_BRANCH);
    assert_eq!(out_a, out_b);
    match (outcome_a, outcome_b) {
        (RunOutcome::Exit(a), RunOutcome::Exit(b)) => assert_eq!(a, b),
        other => panic!("expected two clean exits, got {other:?}"),
    }
}

/// Testable Property 4: a trapping instruction leaves no observable side
/// effect. `%q`'s divide-by-zero trap must pre-empt the `ret` that would
/// otherwise echo its value, so nothing reaches stdout.
#[test]
fn trap_precision_no_output_escapes_a_trapping_instruction() {
    let src = r#"il 0.1
extern @Viper.Console.PrintI64(i64) -> void
func @main() -> i64 { entry:
  call @Viper.Console.PrintI64(1)
  %q = sdiv.chk0 1, 0
  call @Viper.Console.PrintI64(2)
  ret %q }
"#;
    let (outcome, out) = run_captured(src);
    assert_eq!(out, b"1");
    assert!(matches!(outcome, RunOutcome::Trapped { .. }), "{outcome:?}");
}
