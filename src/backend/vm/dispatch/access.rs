// Variable/property/method-dispatch opcodes (spec §4.3 "Method dispatch",
// "Property model"). Grounded on the teacher's `dispatch/access.rs`
// `handle_get_global`/`handle_get_upval` pattern, generalized to globals
// backed by the interned-string `Table` (rather than a `HashMap<String,_>`)
// and to instance/class property and method resolution, which the teacher's
// register VM never had (no class model).
use crate::backend::vm::Vm;
use crate::backend::vm::error::{ErrorKind, VmError};
use crate::common::object::{
    BoundMethodObj, ClassObj, ClosureObj, FunctionObj, InstanceObj, ObjKind, ObjRef, StringObj,
    UpvalueObj, UpvalueState, Value, cast, kind_of,
};

impl Vm {
    pub(crate) fn read_constant(&self, function: ObjRef, index: u8) -> Value {
        unsafe { (*cast::<FunctionObj>(function)).data.chunk.constants[index as usize] }
    }

    fn constant_name(&self, function: ObjRef, index: u8) -> ObjRef {
        match self.read_constant(function, index) {
            Value::Obj(ptr) => ptr,
            _ => unreachable!("name constants are always interned strings"),
        }
    }

    pub(crate) fn get_global(&mut self, function: ObjRef, index: u8) -> Result<(), VmError> {
        let name = self.constant_name(function, index);
        match self.globals.get(name) {
            Some(value) => {
                self.push(value);
                Ok(())
            }
            None => {
                let name_str = unsafe { (*cast::<StringObj>(name)).data.chars.clone() };
                Err(self.error(ErrorKind::UndefinedVariable(name_str)))
            }
        }
    }

    pub(crate) fn define_global(&mut self, function: ObjRef, index: u8) {
        let name = self.constant_name(function, index);
        let value = self.pop();
        self.globals.set(name, value);
    }

    pub(crate) fn set_global(&mut self, function: ObjRef, index: u8) -> Result<(), VmError> {
        let name = self.constant_name(function, index);
        let value = self.peek(0);
        if self.globals.set(name, value) {
            // `set` returning true means the key was new: spec requires the
            // name to already exist, so undo the insert and error.
            self.globals.delete(name);
            let name_str = unsafe { (*cast::<StringObj>(name)).data.chars.clone() };
            return Err(self.error(ErrorKind::UndefinedVariable(name_str)));
        }
        Ok(())
    }

    pub(crate) fn read_upvalue(&self, closure: ObjRef, slot: u8) -> Value {
        let upvalue = unsafe { (*cast::<ClosureObj>(closure)).data.upvalues[slot as usize] };
        match unsafe { (*cast::<UpvalueObj>(upvalue)).data.state } {
            UpvalueState::Open(index) => self.stack[index],
            UpvalueState::Closed(value) => value,
        }
    }

    pub(crate) fn write_upvalue(&mut self, closure: ObjRef, slot: u8, value: Value) {
        let upvalue = unsafe { (*cast::<ClosureObj>(closure)).data.upvalues[slot as usize] };
        match unsafe { (*cast::<UpvalueObj>(upvalue)).data.state } {
            UpvalueState::Open(index) => self.stack[index] = value,
            UpvalueState::Closed(_) => unsafe {
                (*cast::<UpvalueObj>(upvalue)).data.state = UpvalueState::Closed(value);
            },
        }
    }

    pub(crate) fn get_property(&mut self, function: ObjRef, index: u8) -> Result<(), VmError> {
        let receiver = self.peek(0);
        let instance_ptr = match receiver {
            Value::Obj(ptr) if unsafe { kind_of(ptr) } == ObjKind::Instance => ptr,
            other => {
                return Err(self.error(ErrorKind::PropertyError(format!(
                    "只能在实例上读取属性，实际为 {}",
                    other.type_name()
                ))));
            }
        };
        let name = self.constant_name(function, index);
        let instance = unsafe { &(*cast::<InstanceObj>(instance_ptr)).data };
        if let Some(value) = instance.fields.get(name) {
            self.pop();
            self.push(value);
            return Ok(());
        }
        let class = instance.class;
        self.bind_method(class, name)
    }

    pub(crate) fn set_property(&mut self, function: ObjRef, index: u8) -> Result<(), VmError> {
        let value = self.peek(0);
        let receiver = self.peek(1);
        let instance_ptr = match receiver {
            Value::Obj(ptr) if unsafe { kind_of(ptr) } == ObjKind::Instance => ptr,
            other => {
                return Err(self.error(ErrorKind::PropertyError(format!(
                    "只能在实例上设置属性，实际为 {}",
                    other.type_name()
                ))));
            }
        };
        let instance = unsafe { &mut (*cast::<InstanceObj>(instance_ptr)).data };
        if instance.is_static {
            return Err(self.error(ErrorKind::PropertyError("不能修改静态实例的字段".to_string())));
        }
        let name = self.constant_name(function, index);
        instance.fields.set(name, value);
        self.pop();
        self.pop();
        self.push(value);
        Ok(())
    }

    pub(crate) fn get_super(&mut self, function: ObjRef, index: u8) -> Result<(), VmError> {
        let name = self.constant_name(function, index);
        let superclass = match self.pop() {
            Value::Obj(ptr) => ptr,
            _ => unreachable!("superclass operand is always a class object"),
        };
        self.bind_method(superclass, name)
    }

    fn bind_method(&mut self, class: ObjRef, name: ObjRef) -> Result<(), VmError> {
        let method = unsafe { (*cast::<ClassObj>(class)).data.methods.get(name) };
        let method = match method {
            Some(method) => method,
            None => {
                let name_str = unsafe { (*cast::<StringObj>(name)).data.chars.clone() };
                return Err(self.error(ErrorKind::PropertyError(format!("未定义的属性 '{name_str}'"))));
            }
        };
        let is_static_method = matches!(method, Value::Obj(ptr) if unsafe { kind_of(ptr) } == ObjKind::Native);
        if is_static_method {
            self.pop();
            self.push(method);
            return Ok(());
        }
        let receiver = self.pop();
        let bound = self.heap.alloc_bound_method(receiver, method);
        self.maybe_collect();
        self.push(Value::Obj(bound));
        Ok(())
    }

    pub(crate) fn invoke(&mut self, function: ObjRef, index: u8, argc: u8) -> Result<(), VmError> {
        let name = self.constant_name(function, index);
        let receiver = self.peek(argc as usize);
        match receiver {
            Value::Obj(ptr) if unsafe { kind_of(ptr) } == ObjKind::Instance => {
                let instance = unsafe { &(*cast::<InstanceObj>(ptr)).data };
                if let Some(field) = instance.fields.get(name) {
                    let slot = self.stack.len() - argc as usize - 1;
                    self.stack[slot] = field;
                    return self.call_value(field, argc);
                }
                let class = instance.class;
                self.invoke_from_class(class, name, argc)
            }
            Value::Obj(ptr) if unsafe { kind_of(ptr) } == ObjKind::String => {
                self.invoke_string_method(name, argc)
            }
            Value::Obj(ptr) if unsafe { kind_of(ptr) } == ObjKind::List => {
                self.invoke_list_method(name, argc)
            }
            other => Err(self.error(ErrorKind::InvalidCall(format!(
                "只有实例、字符串和列表拥有方法，实际为 {}",
                other.type_name()
            )))),
        }
    }

    fn invoke_from_class(&mut self, class: ObjRef, name: ObjRef, argc: u8) -> Result<(), VmError> {
        let method = unsafe { (*cast::<ClassObj>(class)).data.methods.get(name) };
        let method = match method {
            Some(method) => method,
            None => {
                let name_str = unsafe { (*cast::<StringObj>(name)).data.chars.clone() };
                return Err(self.error(ErrorKind::PropertyError(format!("未定义的属性 '{name_str}'"))));
            }
        };
        self.call_value(method, argc)
    }

    pub(crate) fn super_invoke(
        &mut self,
        function: ObjRef,
        index: u8,
        argc: u8,
    ) -> Result<(), VmError> {
        let name = self.constant_name(function, index);
        let superclass = match self.pop() {
            Value::Obj(ptr) => ptr,
            _ => unreachable!("superclass operand is always a class object"),
        };
        self.invoke_from_class(superclass, name, argc)
    }
}
