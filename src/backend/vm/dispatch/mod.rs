// Instruction dispatch loop (spec §4.3). Grounded on the teacher's
// `dispatch` module split (`arithmetic`/`control`/`access` sub-dispatch
// files driven from one `execute_instruction` match in
// `backend/vm/dispatch/mod.rs`), generalized from the teacher's
// register-machine instructions to the stack-machine opcode set this
// language's compiler emits (spec §6).
pub mod access;
pub mod arithmetic;
pub mod class;
pub mod collection;
pub mod control;

use crate::backend::vm::LogLevel;
use crate::backend::vm::Vm;
use crate::backend::vm::error::{ErrorKind, VmError};
use crate::common::object::{ClosureObj, FunctionObj, Value, cast};
use crate::common::opcode::OpCode;
use std::io::Write;

impl Vm {
    /// Runs until the current call-frame window unwinds to empty (the
    /// top-level script returning) or a reentrant frame marked
    /// `host_return` returns control to its native caller (spec §5).
    pub fn run(&mut self) -> Result<(), VmError> {
        loop {
            let frame_index = self.frames.len() - 1;
            let (closure, ip, base) = {
                let frame = &self.frames[frame_index];
                (frame.closure, frame.ip, frame.base)
            };
            let function = unsafe { (*cast::<ClosureObj>(closure)).data.function };
            let op = unsafe { (*cast::<FunctionObj>(function)).data.chunk.code.get(ip).cloned() };
            let op = match op {
                Some(op) => op,
                None => return Err(self.error(ErrorKind::InternalError("指令指针越界".to_string()))),
            };
            self.frames[frame_index].ip = ip + 1;

            if self.log_level == LogLevel::Trace {
                let line = unsafe { (*cast::<FunctionObj>(function)).data.chunk.line_at(ip) };
                println!("{ip:04} (第{line}行) {op}");
            }

            match op {
                OpCode::Constant { index } => {
                    let value = self.read_constant(function, index);
                    self.push(value);
                }
                OpCode::Nil => self.push(Value::Nil),
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::Dup => {
                    let top = self.peek(0);
                    self.push(top);
                }
                OpCode::DoubleDup => {
                    let a = self.peek(1);
                    let b = self.peek(0);
                    self.push(a);
                    self.push(b);
                }
                OpCode::GetLocal { slot } => {
                    let value = self.stack[base + slot as usize];
                    self.push(value);
                }
                OpCode::SetLocal { slot } => {
                    let value = self.peek(0);
                    self.stack[base + slot as usize] = value;
                }
                OpCode::GetGlobal { index } => self.get_global(function, index)?,
                OpCode::DefineGlobal { index } => self.define_global(function, index),
                OpCode::SetGlobal { index } => self.set_global(function, index)?,
                OpCode::GetUpvalue { slot } => {
                    let value = self.read_upvalue(closure, slot);
                    self.push(value);
                }
                OpCode::SetUpvalue { slot } => {
                    let value = self.peek(0);
                    self.write_upvalue(closure, slot, value);
                }
                OpCode::GetProperty { index } => self.get_property(function, index)?,
                OpCode::SetProperty { index } => self.set_property(function, index)?,
                OpCode::GetSuper { index } => self.get_super(function, index)?,
                OpCode::BuildList { count } => self.build_list(count),
                OpCode::IndexSubscr => self.index_subscr()?,
                OpCode::StoreSubscr => self.store_subscr()?,
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(Value::values_equal(&a, &b)));
                }
                OpCode::Greater => self.compare(|a, b| a > b)?,
                OpCode::Less => self.compare(|a, b| a < b)?,
                OpCode::Add => self.add()?,
                OpCode::Subtract => self.numeric_binary(|a, b| a - b)?,
                OpCode::Multiply => self.numeric_binary(|a, b| a * b)?,
                OpCode::Divide => self.numeric_binary(|a, b| a / b)?,
                OpCode::Modulo => self.modulo()?,
                OpCode::Not => {
                    let value = self.pop();
                    self.push(Value::Bool(!value.is_truthy()));
                }
                OpCode::Negate => self.negate()?,
                OpCode::Increment => self.bump(1.0)?,
                OpCode::Decrement => self.bump(-1.0)?,
                OpCode::BitwiseNot => self.bitwise_not()?,
                OpCode::BitwiseAnd => self.bitwise(|a, b| a & b)?,
                OpCode::BitwiseOr => self.bitwise(|a, b| a | b)?,
                OpCode::BitwiseXor => self.bitwise(|a, b| a ^ b)?,
                OpCode::BitwiseLeftShift => self.bitwise_shift(|a, b| a.wrapping_shl(b as u32))?,
                OpCode::BitwiseRightShift => self.bitwise_shift(|a, b| a.wrapping_shr(b as u32))?,
                OpCode::Jump { offset } => {
                    self.frames[frame_index].ip += offset as usize;
                }
                OpCode::JumpIfFalse { offset } => {
                    if !self.peek(0).is_truthy() {
                        self.frames[frame_index].ip += offset as usize;
                    }
                }
                OpCode::Loop { offset } => {
                    self.frames[frame_index].ip -= offset as usize;
                }
                OpCode::Call { argc } => {
                    let callee = self.peek(argc as usize);
                    self.call_value(callee, argc)?;
                }
                OpCode::Invoke { index, argc } => self.invoke(function, index, argc)?,
                OpCode::SuperInvoke { index, argc } => self.super_invoke(function, index, argc)?,
                OpCode::Return => {
                    if self.finish_return()? {
                        return Ok(());
                    }
                }
                OpCode::Closure { index, upvalues } => self.make_closure(function, index, &upvalues),
                OpCode::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues(top);
                    self.pop();
                }
                OpCode::Class { index } => self.make_class(function, index),
                OpCode::Inherit => self.inherit()?,
                OpCode::Method { index } => self.method(function, index),
                OpCode::Print => {
                    let value = self.pop();
                    let _ = writeln!(self.output, "{}", self.stringify(value));
                }
                OpCode::End => {}
            }
        }
    }
}
