// Native registration surface (spec §6 "Native registration"). Out of
// scope per spec.md §1 is any concrete "core module" (time/math/string class
// stubs) that would call these — this module only implements the three
// entry points such a collaborator would use, as plain `Vm` methods taking
// already-allocated objects, exactly as spec.md §6 names them.
use crate::backend::vm::Vm;
use crate::common::object::{ClassObj, InstanceObj, NativeFn, ObjRef, Value, cast};

impl Vm {
    /// Installs `function` as a method named `name` on `class`'s method
    /// table (spec §6 `defineNative(name, fn, arity, class)`).
    pub fn define_native(&mut self, name: &str, function: NativeFn, arity: i32, class: ObjRef) {
        let name_ref = self.heap.intern_str(name);
        let native = self.heap.alloc_native(name_ref, arity, function);
        self.maybe_collect();
        unsafe {
            (*cast::<ClassObj>(class)).data.methods.set(name_ref, Value::Obj(native));
        }
    }

    /// Installs `instance` under the global `name` (spec §6
    /// `defineNativeInstance(name, instance)`).
    pub fn define_native_instance(&mut self, name: &str, instance: ObjRef) {
        let name_ref = self.heap.intern_str(name);
        self.globals.set(name_ref, Value::Obj(instance));
    }

    /// Sets a field named `name` on `instance` (spec §6
    /// `defineProperty(name, value, instance)`).
    pub fn define_property(&mut self, name: &str, value: Value, instance: ObjRef) {
        let name_ref = self.heap.intern_str(name);
        unsafe {
            (*cast::<InstanceObj>(instance)).data.fields.set(name_ref, value);
        }
    }
}
