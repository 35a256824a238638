// Return and closure-creation opcodes (spec §4.3 "Returns", "Closures").
// Grounded on the teacher's `dispatch/control.rs` `handle_call`/`handle_return`
// frame-lifecycle pattern, generalized to the upvalue-closing return path and
// the explicit local/enclosing-upvalue capture `OP_CLOSURE` needs (the
// teacher's register VM captured no upvalues at all).
use crate::backend::vm::Vm;
use crate::backend::vm::error::VmError;
use crate::common::object::{ClosureObj, ObjRef, Value, cast};
use crate::common::opcode::UpvalueDesc;

impl Vm {
    /// Pops the return value, unwinds the current frame, and closes any
    /// upvalues it captured. Returns `true` when `run`'s dispatch loop
    /// should stop: either a reentrant (`host_return`) frame just unwound,
    /// or the last frame (the top-level script) did.
    pub(crate) fn finish_return(&mut self) -> Result<bool, VmError> {
        let result = self.pop();
        let frame = self.frames.pop().expect("OP_RETURN with no active call frame");
        self.close_upvalues(frame.base);
        self.stack.truncate(frame.base);
        if frame.host_return {
            self.push(result);
            return Ok(true);
        }
        if self.frames.is_empty() {
            return Ok(true);
        }
        self.push(result);
        Ok(false)
    }

    pub(crate) fn make_closure(&mut self, function: ObjRef, index: u8, upvalues: &[UpvalueDesc]) {
        let function_ptr = match self.read_constant(function, index) {
            Value::Obj(ptr) => ptr,
            _ => unreachable!("OP_CLOSURE operand is always a function constant"),
        };
        let frame = self.frames.last().expect("OP_CLOSURE with no active call frame");
        let base = frame.base;
        let enclosing = frame.closure;
        let mut captured = Vec::with_capacity(upvalues.len());
        for desc in upvalues {
            if desc.is_local {
                captured.push(self.capture_upvalue(base + desc.index as usize));
            } else {
                let inherited =
                    unsafe { (*cast::<ClosureObj>(enclosing)).data.upvalues[desc.index as usize] };
                captured.push(inherited);
            }
        }
        let closure = self.heap.alloc_closure(function_ptr, captured);
        self.maybe_collect();
        self.push(Value::Obj(closure));
    }
}
