// Qi stack VM (spec §4.3, §4.4, §5, §7). Grounded on the teacher's
// `VirtualMachine` (`backend/vm/mod.rs`): a `LogLevel`-gated tracing VM
// holding its heap, globals and call stack, driving execution through a
// `run` loop that reports errors via a dedicated error type. Generalized
// from the teacher's register-machine IR execution to a value-stack /
// call-frame bytecode dispatch loop (spec §4.3), and from the teacher's
// single-frame error report to the full backtrace spec §7 requires.
pub mod dispatch;
pub mod error;
pub mod gc;
pub mod heap;
pub mod natives;
pub mod stack;

use crate::backend::vm::error::{ErrorKind, TraceFrame, VmError};
use crate::backend::vm::heap::Heap;
use crate::backend::vm::stack::CallFrame;
use crate::common::hash::Table;
use crate::common::object::{
    ClosureObj, FunctionObj, ObjKind, ObjRef, StringObj, UpvalueObj, UpvalueState, Value, cast,
    kind_of,
};
use clap::ValueEnum;

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Only the program's own output.
    Release,
    /// Plus compiler/VM initialization milestones.
    Debug,
    /// Plus per-instruction disassembly and GC sweep summaries.
    Trace,
}

/// Call-frame depth limit (spec §4.3/§8: "Call frames up to `FRAMES_MAX − 1`
/// succeed; one more is a stack-overflow runtime error").
pub const FRAMES_MAX: usize = 64;
pub const STACK_MAX: usize = FRAMES_MAX * 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
}

pub struct Vm {
    pub stack: Vec<Value>,
    pub frames: Vec<CallFrame>,
    pub globals: Table,
    pub heap: Heap,
    /// Open upvalues, kept sorted by descending stack index for O(k)
    /// capture-sharing and O(k) close-on-return (spec §9, "Upvalue list").
    pub open_upvalues: Vec<ObjRef>,
    pub init_string: ObjRef,
    /// Roots the compiler pushes while a function is mid-compilation
    /// (spec §3 invariant (f); SPEC_FULL.md §4.4).
    pub compiler_roots: Vec<ObjRef>,
    pub log_level: LogLevel,
    /// Sink `print` writes to (spec §4.2 "print"). Real stdout by default;
    /// swapped for an in-memory buffer in tests so output can be asserted on
    /// instead of only the coarse `InterpretResult`.
    pub output: Box<dyn std::io::Write>,
}

impl Vm {
    pub fn new(log_level: LogLevel) -> Self {
        Self::with_output(log_level, Box::new(std::io::stdout()))
    }

    pub fn with_output(log_level: LogLevel, output: Box<dyn std::io::Write>) -> Self {
        let mut heap = Heap::new();
        let init_string = heap.intern_str("初始化");
        Vm {
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: Table::new(),
            heap,
            open_upvalues: Vec::new(),
            init_string,
            compiler_roots: Vec::new(),
            log_level,
            output,
        }
    }

    pub fn set_log_level(&mut self, level: LogLevel) {
        self.log_level = level;
    }

    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> Value {
        self.stack.pop().expect("stack underflow: dispatch loop popped past empty stack")
    }

    pub fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    fn reset_stack(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
    }

    pub fn push_compiler_root(&mut self, function: ObjRef) {
        self.compiler_roots.push(function);
    }

    pub fn pop_compiler_root(&mut self) {
        self.compiler_roots.pop();
    }

    pub fn intern(&mut self, s: &str) -> ObjRef {
        self.heap.intern_str(s)
    }

    // ------------------------------------------------------------------
    // Entry point
    // ------------------------------------------------------------------

    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        let function = match crate::frontend::compiler::compile(self, source) {
            Some(function) => function,
            None => return InterpretResult::CompileError,
        };

        self.push(Value::Obj(function));
        let closure = self.heap.alloc_closure(function, Vec::new());
        self.pop();
        self.push(Value::Obj(closure));

        if self.call_value(Value::Obj(closure), 0).is_err() {
            self.reset_stack();
            return InterpretResult::RuntimeError;
        }

        match self.run() {
            Ok(()) => InterpretResult::Ok,
            Err(err) => {
                eprint!("{err}");
                self.reset_stack();
                InterpretResult::RuntimeError
            }
        }
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    pub fn call_value(&mut self, callee: Value, argc: u8) -> Result<(), VmError> {
        if let Value::Obj(ptr) = callee {
            match unsafe { kind_of(ptr) } {
                ObjKind::Closure => return self.call_closure(ptr, argc, false),
                ObjKind::Native => return self.call_native(ptr, argc),
                ObjKind::Class => return self.call_class(ptr, argc),
                ObjKind::BoundMethod => return self.call_bound_method(ptr, argc),
                _ => {}
            }
        }
        Err(self.error(ErrorKind::InvalidCall("只能调用函数、方法或类".to_string())))
    }

    pub(crate) fn call_closure(
        &mut self,
        closure: ObjRef,
        argc: u8,
        host_return: bool,
    ) -> Result<(), VmError> {
        let function = unsafe { (*cast::<ClosureObj>(closure)).data.function };
        let arity = unsafe { (*cast::<FunctionObj>(function)).data.arity };
        if argc != arity {
            return Err(self.error(ErrorKind::InvalidCall(format!(
                "期望 {arity} 个参数，实际传入 {argc} 个"
            ))));
        }
        if self.frames.len() >= FRAMES_MAX {
            return Err(self.error(ErrorKind::StackOverflow));
        }
        let base = self.stack.len() - argc as usize - 1;
        self.frames.push(CallFrame::new(closure, base, host_return));
        Ok(())
    }

    fn call_native(&mut self, native: ObjRef, argc: u8) -> Result<(), VmError> {
        let native_obj = unsafe { &(*cast::<crate::common::object::NativeObj>(native)).data };
        let arity = native_obj.arity;
        if arity >= 0 && argc as i32 != arity {
            return Err(self.error(ErrorKind::InvalidCall(format!(
                "期望 {arity} 个参数，实际传入 {argc} 个"
            ))));
        }
        let function = native_obj.function;
        let args_start = self.stack.len() - argc as usize;
        let args: Vec<Value> = self.stack[args_start..].to_vec();
        let result = function(self, &args);
        match result {
            Ok(value) => {
                self.stack.truncate(args_start - 1);
                self.push(value);
                Ok(())
            }
            Err(message) => Err(self.error(ErrorKind::InvalidCall(message))),
        }
    }

    fn call_class(&mut self, class: ObjRef, argc: u8) -> Result<(), VmError> {
        let instance = self.heap.alloc_instance(class, false);
        self.maybe_collect();
        let slot = self.stack.len() - argc as usize - 1;
        self.stack[slot] = Value::Obj(instance);

        let initializer = unsafe { (*cast::<crate::common::object::ClassObj>(class)).data.methods.get(self.init_string) };
        match initializer {
            Some(init) => self.call_value(init, argc),
            None => {
                if argc != 0 {
                    return Err(self.error(ErrorKind::InvalidCall(format!(
                        "期望 0 个参数，实际传入 {argc} 个"
                    ))));
                }
                Ok(())
            }
        }
    }

    fn call_bound_method(&mut self, bound: ObjRef, argc: u8) -> Result<(), VmError> {
        let bound_obj = unsafe { &(*cast::<crate::common::object::BoundMethodObj>(bound)).data };
        let receiver = bound_obj.receiver;
        let method = bound_obj.method;
        let slot = self.stack.len() - argc as usize - 1;
        self.stack[slot] = receiver;
        self.call_value(method, argc)
    }

    /// Reentrant call from a native (list `筛选`/`排序`, spec §5 "Native
    /// callbacks"): pushes a fresh frame marked `host_return` and drives the
    /// shared dispatch loop until that frame alone returns, leaving the rest
    /// of the call stack untouched.
    pub fn run_closure(&mut self, callee: Value, args: &[Value]) -> Result<Value, VmError> {
        let ptr = match callee {
            Value::Obj(ptr) if unsafe { kind_of(ptr) } == ObjKind::Closure => ptr,
            _ => return Err(self.error(ErrorKind::InvalidCall("期望一个函数".to_string()))),
        };
        self.push(callee);
        for &arg in args {
            self.push(arg);
        }
        self.call_closure(ptr, args.len() as u8, true)?;
        self.run()?;
        Ok(self.pop())
    }

    // ------------------------------------------------------------------
    // Upvalues
    // ------------------------------------------------------------------

    pub(crate) fn capture_upvalue(&mut self, stack_index: usize) -> ObjRef {
        if let Some(existing) = self.open_upvalues.iter().find(|&&u| {
            matches!(unsafe { (*cast::<UpvalueObj>(u)).data.state }, UpvalueState::Open(i) if i == stack_index)
        }) {
            return *existing;
        }
        let upvalue = self.heap.alloc_upvalue(UpvalueState::Open(stack_index));
        self.open_upvalues.push(upvalue);
        self.open_upvalues.sort_by(|a, b| {
            let ia = match unsafe { (*cast::<UpvalueObj>(*a)).data.state } {
                UpvalueState::Open(i) => i,
                UpvalueState::Closed(_) => usize::MAX,
            };
            let ib = match unsafe { (*cast::<UpvalueObj>(*b)).data.state } {
                UpvalueState::Open(i) => i,
                UpvalueState::Closed(_) => usize::MAX,
            };
            ib.cmp(&ia)
        });
        upvalue
    }

    /// Closes every open upvalue whose location is `>= from` (spec §4.3
    /// "Returns"; §3 "An upvalue... transitions to closed exactly once").
    pub(crate) fn close_upvalues(&mut self, from: usize) {
        let mut still_open = Vec::with_capacity(self.open_upvalues.len());
        for upvalue in self.open_upvalues.drain(..) {
            let index = match unsafe { (*cast::<UpvalueObj>(upvalue)).data.state } {
                UpvalueState::Open(i) => i,
                UpvalueState::Closed(_) => {
                    still_open.push(upvalue);
                    continue;
                }
            };
            if index >= from {
                let value = self.stack[index];
                unsafe {
                    (*cast::<UpvalueObj>(upvalue)).data.state = UpvalueState::Closed(value);
                }
            } else {
                still_open.push(upvalue);
            }
        }
        self.open_upvalues = still_open;
    }

    // ------------------------------------------------------------------
    // Errors
    // ------------------------------------------------------------------

    /// Renders any value the way `打印`/print and string concatenation's
    /// implicit number formatting want it (SPEC_FULL.md §3, "stringify").
    pub fn stringify(&self, value: Value) -> String {
        match value {
            Value::Nil => "空".to_string(),
            Value::Bool(b) => if b { "真".to_string() } else { "假".to_string() },
            Value::Number(n) => format_number(n),
            Value::Obj(ptr) => match unsafe { kind_of(ptr) } {
                ObjKind::String => unsafe { (*cast::<StringObj>(ptr)).data.chars.clone() },
                ObjKind::Function => self.function_name(ptr),
                ObjKind::Closure => {
                    let function = unsafe { (*cast::<ClosureObj>(ptr)).data.function };
                    self.function_name(function)
                }
                ObjKind::Native => "<原生函数>".to_string(),
                ObjKind::Upvalue => "<upvalue>".to_string(),
                ObjKind::Class => unsafe {
                    let name = (*cast::<crate::common::object::ClassObj>(ptr)).data.name;
                    (*cast::<StringObj>(name)).data.chars.clone()
                },
                ObjKind::Instance => unsafe {
                    let instance = &(*cast::<crate::common::object::InstanceObj>(ptr)).data;
                    let class_name = (*cast::<crate::common::object::ClassObj>(instance.class)).data.name;
                    format!("{} 的实例", (*cast::<StringObj>(class_name)).data.chars)
                },
                ObjKind::BoundMethod => {
                    let method = unsafe { (*cast::<crate::common::object::BoundMethodObj>(ptr)).data.method };
                    self.stringify(method)
                }
                ObjKind::List => unsafe {
                    let items = &(*cast::<crate::common::object::ListObj>(ptr)).data.items;
                    let parts: Vec<String> = items.iter().map(|v| self.stringify(*v)).collect();
                    format!("[{}]", parts.join(", "))
                },
            },
        }
    }

    fn function_name(&self, function: ObjRef) -> String {
        let data = unsafe { &(*cast::<FunctionObj>(function)).data };
        match data.name {
            Some(name) => format!("<函数 {}>", unsafe { (*cast::<StringObj>(name)).data.chars.clone() }),
            None => "<脚本>".to_string(),
        }
    }

    pub fn error(&self, kind: ErrorKind) -> VmError {
        let mut trace = Vec::with_capacity(self.frames.len());
        for frame in self.frames.iter().rev() {
            let function = unsafe { (*cast::<ClosureObj>(frame.closure)).data.function };
            let function_data = unsafe { &(*cast::<FunctionObj>(function)).data };
            let line = if frame.ip == 0 { 0 } else { function_data.chunk.line_at(frame.ip - 1) };
            let name = match function_data.name {
                Some(name_ref) => unsafe { (*cast::<StringObj>(name_ref)).data.chars.clone() },
                None => "脚本".to_string(),
            };
            trace.push(TraceFrame { func_name: name, line });
        }
        VmError { kind, trace }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{n:.0}")
    } else {
        n.to_string()
    }
}
