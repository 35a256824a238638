// Class declaration, inheritance and method-binding opcodes (spec §4.3
// "Classes"). The teacher's register VM has no class model, so this module
// is grounded directly on spec §4.3/§6 rather than adapted teacher code.
use crate::backend::vm::Vm;
use crate::backend::vm::error::{ErrorKind, VmError};
use crate::common::object::{ClassObj, ObjKind, ObjRef, Value, cast, kind_of};

impl Vm {
    pub(crate) fn make_class(&mut self, function: ObjRef, index: u8) {
        let name = match self.read_constant(function, index) {
            Value::Obj(ptr) => ptr,
            _ => unreachable!("OP_CLASS operand is always a name constant"),
        };
        let class = self.heap.alloc_class(name);
        self.maybe_collect();
        self.push(Value::Obj(class));
    }

    /// Copies every method from the superclass (on top of stack, below the
    /// subclass) into the subclass's method table, then drops the
    /// superclass operand (spec §4.3 "Inheritance copies methods once at
    /// declaration time").
    pub(crate) fn inherit(&mut self) -> Result<(), VmError> {
        let subclass = match self.pop() {
            Value::Obj(ptr) => ptr,
            _ => unreachable!("subclass operand is always a class object"),
        };
        let superclass = match self.peek(0) {
            Value::Obj(ptr) if unsafe { kind_of(ptr) } == ObjKind::Class => ptr,
            other => {
                return Err(self.error(ErrorKind::TypeError(format!(
                    "父类必须是类，实际为 {}",
                    other.type_name()
                ))));
            }
        };
        unsafe {
            let super_methods = &(*cast::<ClassObj>(superclass)).data.methods as *const _;
            (*cast::<ClassObj>(subclass)).data.methods.add_all_from(&*super_methods);
        }
        self.pop();
        self.push(Value::Obj(subclass));
        Ok(())
    }

    /// Attaches the closure on top of stack to the class just beneath it
    /// under the name constant, without popping the class (spec §4.3
    /// "Method declarations stay on the stack so consecutive `OP_METHOD`s
    /// share one class operand").
    pub(crate) fn method(&mut self, function: ObjRef, index: u8) {
        let name = match self.read_constant(function, index) {
            Value::Obj(ptr) => ptr,
            _ => unreachable!("OP_METHOD operand is always a name constant"),
        };
        let method = self.pop();
        let class = match self.peek(0) {
            Value::Obj(ptr) => ptr,
            _ => unreachable!("OP_METHOD always runs with a class on top of stack"),
        };
        unsafe {
            (*cast::<ClassObj>(class)).data.methods.set(name, method);
        }
    }
}
