// Compiler boundary tests (spec §8, §9). Grounded on the teacher's
// black-box `tests/` style: drive `Vm::interpret` with source text and
// assert on the reported `InterpretResult`, rather than poking at the
// `Compiler` internals directly.
use qi::{InterpretResult, LogLevel, Vm};

fn run(source: &str) -> InterpretResult {
    let mut vm = Vm::new(LogLevel::Release);
    vm.interpret(source)
}

#[test]
fn redeclaring_a_local_in_the_same_scope_is_a_compile_error() {
    let source = r#"
        {
            变量 x = 1;
            变量 x = 2;
        }
    "#;
    assert_eq!(run(source), InterpretResult::CompileError);
}

#[test]
fn referencing_a_local_in_its_own_initializer_is_a_compile_error() {
    let source = r#"
        {
            变量 x = x;
        }
    "#;
    assert_eq!(run(source), InterpretResult::CompileError);
}

#[test]
fn returning_from_top_level_script_is_a_compile_error() {
    assert_eq!(run("返回 1;"), InterpretResult::CompileError);
}

#[test]
fn this_outside_a_class_is_a_compile_error() {
    assert_eq!(run("打印 此;"), InterpretResult::CompileError);
}

#[test]
fn super_without_a_superclass_is_a_compile_error() {
    let source = r#"
        类 甲 {
            方法() {
                返回 父类.方法();
            }
        }
    "#;
    assert_eq!(run(source), InterpretResult::CompileError);
}

#[test]
fn assigning_to_a_non_assignable_expression_is_a_compile_error() {
    assert_eq!(run("1 + 2 = 3;"), InterpretResult::CompileError);
}

#[test]
fn compound_assignment_on_a_property_round_trips() {
    let source = r#"
        类 盒子 {
            初始化(值) {
                此.值 = 值;
            }
        }
        变量 b = 盒子(10);
        b.值 += 5;
        打印 b.值;
    "#;
    assert_eq!(run(source), InterpretResult::Ok);
}

#[test]
fn compound_assignment_on_a_subscript_round_trips() {
    let source = r#"
        变量 数组 = [1, 2, 3];
        数组[1] *= 10;
        打印 数组;
    "#;
    assert_eq!(run(source), InterpretResult::Ok);
}

#[test]
fn prefix_and_postfix_increment_on_locals() {
    let source = r#"
        变量 i = 0;
        打印 ++i;
        打印 i++;
        打印 i;
    "#;
    assert_eq!(run(source), InterpretResult::Ok);
}

#[test]
fn recursive_function_can_call_itself() {
    let source = r#"
        函数 阶乘(n) {
            如果 (n <= 1) {
                返回 1;
            }
            返回 n * 阶乘(n - 1);
        }
        打印 阶乘(5);
    "#;
    assert_eq!(run(source), InterpretResult::Ok);
}

#[test]
fn for_loop_desugars_to_while_shaped_bytecode() {
    let source = r#"
        变量 总和 = 0;
        循环 (变量 i = 0; i < 5; i = i + 1) {
            总和 = 总和 + i;
        }
        打印 总和;
    "#;
    assert_eq!(run(source), InterpretResult::Ok);
}
