// GC and VM-limit tests (spec §4.4, §8 boundary scenarios). Grounded on the
// teacher's black-box style: drive allocation pressure and frame depth
// through ordinary source programs rather than poking the heap directly.
use qi::{InterpretResult, LogLevel, Vm};

fn run(source: &str) -> InterpretResult {
    let mut vm = Vm::new(LogLevel::Release);
    vm.interpret(source)
}

#[test]
fn sustained_allocation_survives_multiple_collections() {
    // Well past GC_INITIAL_THRESHOLD worth of list/string churn; every
    // iteration's garbage must be reclaimed or this runs out of memory.
    let source = r#"
        变量 i = 0;
        当 (i < 20000) {
            变量 临时 = [i, i + 1, i + 2];
            变量 文本 = "项目" + "编号";
            临时.推入(文本);
            i = i + 1;
        }
        打印 i;
    "#;
    assert_eq!(run(source), InterpretResult::Ok);
}

#[test]
fn interned_strings_built_differently_share_identity() {
    let mut vm = Vm::new(LogLevel::Release);
    let a = vm.intern("你好世界");
    let b = vm.intern("你好世界");
    assert_eq!(a, b);
}

#[test]
fn unbounded_recursion_is_a_stack_overflow_runtime_error() {
    let source = r#"
        函数 递归(n) {
            返回 递归(n + 1);
        }
        递归(0);
    "#;
    assert_eq!(run(source), InterpretResult::RuntimeError);
}

#[test]
fn deeply_nested_but_bounded_calls_succeed() {
    let source = r#"
        函数 计数(n) {
            如果 (n <= 0) {
                返回 0;
            }
            返回 1 + 计数(n - 1);
        }
        打印 计数(50);
    "#;
    assert_eq!(run(source), InterpretResult::Ok);
}
