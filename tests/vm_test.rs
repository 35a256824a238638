// Black-box interpreter tests (spec §8). Grounded on the teacher's
// `tests/vm_test.rs` pattern of driving the VM end to end from source text
// rather than poking at internals.
use qi::{InterpretResult, LogLevel, Vm};
use std::io::Write;
use std::sync::{Arc, Mutex};

fn run(source: &str) -> InterpretResult {
    let mut vm = Vm::new(LogLevel::Release);
    vm.interpret(source)
}

/// `Write` sink that stays readable after the `Vm` that owns it has moved
/// on, so a test can assert on exactly what `打印` sent out (spec §8).
#[derive(Clone, Default)]
struct CapturedOutput(Arc<Mutex<Vec<u8>>>);

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl CapturedOutput {
    fn as_string(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).expect("printed output is valid UTF-8")
    }
}

fn run_captured(source: &str) -> (InterpretResult, String) {
    let captured = CapturedOutput::default();
    let mut vm = Vm::with_output(LogLevel::Release, Box::new(captured.clone()));
    let result = vm.interpret(source);
    (result, captured.as_string())
}

#[test]
fn arithmetic_and_print() {
    assert_eq!(run("打印 1 + 2 * 3;"), InterpretResult::Ok);
}

#[test]
fn string_interning_equality() {
    // spec §8: two interned strings built from distinct literals compare equal.
    let source = r#"
        变量 a = "你好" + "世界";
        变量 b = "你好世界";
        打印 a == b;
    "#;
    let (result, output) = run_captured(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(output, "真\n");
}

#[test]
fn closures_maintain_independent_counters() {
    // spec §8: makeCounter()-style closures over a captured local stay independent.
    let source = r#"
        函数 造计数器() {
            变量 次数 = 0;
            函数 计数() {
                次数 = 次数 + 1;
                返回 次数;
            }
            返回 计数;
        }
        变量 甲 = 造计数器();
        变量 乙 = 造计数器();
        打印 甲();
        打印 甲();
        打印 乙();
    "#;
    let (result, output) = run_captured(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(output, "1\n2\n1\n");
}

#[test]
fn inheritance_and_super_dispatch() {
    let source = r#"
        类 动物 {
            初始化(名字) {
                此.名字 = 名字;
            }
            叫声() {
                返回 "...";
            }
        }
        类 狗 < 动物 {
            叫声() {
                返回 父类.叫声() + "汪";
            }
        }
        变量 d = 狗("旺财");
        打印 d.叫声();
    "#;
    assert_eq!(run(source), InterpretResult::Ok);
}

#[test]
fn list_sort_and_filter_reenter_vm() {
    // spec §8 scenario 2, plus a `过滤` pass that reenters the VM through a
    // plain named-function value (the language has no closure literals).
    let source = r#"
        函数 是偶数(x) {
            返回 x % 2 == 0;
        }
        变量 数组 = [5, 3, 1, 4, 2];
        数组.排序();
        打印 数组;
        变量 偶数 = 数组.过滤(是偶数);
        打印 偶数;
    "#;
    let (result, output) = run_captured(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(output, "[1, 2, 3, 4, 5]\n[2, 4]\n");
}

#[test]
fn substring_allows_end_equal_to_length() {
    let source = r#"
        变量 s = "你好世界";
        打印 s.子串(0, 4);
    "#;
    assert_eq!(run(source), InterpretResult::Ok);
}

#[test]
fn calling_a_number_is_a_runtime_error() {
    assert_eq!(run("变量 x = 1; x();"), InterpretResult::RuntimeError);
}

#[test]
fn unterminated_block_is_a_compile_error() {
    assert_eq!(run("函数 f() {"), InterpretResult::CompileError);
}

#[test]
fn wrong_arity_call_reports_a_runtime_error() {
    let source = r#"
        函数 需要两个(a, b) {
            返回 a + b;
        }
        需要两个(1);
    "#;
    assert_eq!(run(source), InterpretResult::RuntimeError);
}
