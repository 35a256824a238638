// Qi object heap: allocation, string interning, and the intrusive
// sweep list (spec §3, §4.4). Grounded on the teacher's `heap.rs`
// (`alloc_string`/`alloc_table`/`alloc_function` over one `alloc_raw_object`,
// with `total_allocated`/`threshold` bookkeeping feeding `check_gc_condition`/
// `expand_threshold`), generalized from the teacher's three object kinds to
// the nine this language needs, and from a `HashMap<String, _>` string pool
// to the open-addressing intern `Table` spec §3 specifies.
use crate::common::chunk::Chunk;
use crate::common::hash::Table;
use crate::common::object::{
    BoundMethodObj, ClassObj, ClosureObj, Gc, GcHeader, InstanceObj, ListObj, NativeFn, NativeObj,
    ObjKind, ObjRef, StringObj, UpvalueObj, UpvalueState, Value, hash_str,
};

pub const GC_INITIAL_THRESHOLD: usize = 1024 * 1024;
pub const GC_GROWTH_FACTOR: usize = 2;

pub struct Heap {
    pub objects: ObjRef,
    pub strings: Table,
    pub bytes_allocated: usize,
    pub next_gc: usize,
    pub gray_stack: Vec<ObjRef>,
}

impl Heap {
    pub fn new() -> Self {
        Self {
            objects: std::ptr::null_mut(),
            strings: Table::new(),
            bytes_allocated: 0,
            next_gc: GC_INITIAL_THRESHOLD,
            gray_stack: Vec::new(),
        }
    }

    pub fn should_collect(&self) -> bool {
        self.bytes_allocated > self.next_gc
    }

    fn alloc_object<T>(&mut self, data: T, kind: ObjKind) -> ObjRef {
        let boxed = Box::new(Gc {
            header: GcHeader { kind, marked: false, next: self.objects },
            data,
        });
        let ptr = Box::into_raw(boxed) as ObjRef;
        self.objects = ptr;
        self.bytes_allocated += std::mem::size_of::<Gc<T>>();
        ptr
    }

    /// Interns `chars`, copying only if no equal-content string already
    /// lives on the heap (spec §3, "String interning invariant").
    pub fn intern_str(&mut self, chars: &str) -> ObjRef {
        let hash = hash_str(chars);
        if let Some(existing) = self.strings.find_string(chars, hash) {
            return existing;
        }
        self.intern_owned(chars.to_string(), hash)
    }

    /// Same as `intern_str` but takes ownership of an already-built buffer
    /// (e.g. the result of string concatenation), avoiding a redundant copy
    /// on the common case of a fresh, not-yet-seen string.
    pub fn intern_string(&mut self, chars: String) -> ObjRef {
        let hash = hash_str(&chars);
        if let Some(existing) = self.strings.find_string(&chars, hash) {
            return existing;
        }
        self.intern_owned(chars, hash)
    }

    fn intern_owned(&mut self, chars: String, hash: u64) -> ObjRef {
        let char_count = chars.chars().count();
        let extra = chars.capacity();
        let obj = StringObj { chars, hash, char_count };
        let ptr = self.alloc_object(obj, ObjKind::String);
        self.bytes_allocated += extra;
        self.strings.set(ptr, Value::Nil);
        ptr
    }

    pub fn alloc_function(
        &mut self,
        arity: u8,
        name: Option<ObjRef>,
        chunk: Chunk,
    ) -> ObjRef {
        let extra = chunk.code.len() * std::mem::size_of::<crate::common::opcode::OpCode>()
            + chunk.constants.capacity() * std::mem::size_of::<Value>();
        let obj = crate::common::object::FunctionObj { arity, upvalue_count: 0, chunk, name };
        let ptr = self.alloc_object(obj, ObjKind::Function);
        self.bytes_allocated += extra;
        ptr
    }

    pub fn alloc_closure(&mut self, function: ObjRef, upvalues: Vec<ObjRef>) -> ObjRef {
        let obj = ClosureObj { function, upvalues };
        self.alloc_object(obj, ObjKind::Closure)
    }

    pub fn alloc_upvalue(&mut self, state: UpvalueState) -> ObjRef {
        self.alloc_object(UpvalueObj { state }, ObjKind::Upvalue)
    }

    pub fn alloc_native(&mut self, name: ObjRef, arity: i32, function: NativeFn) -> ObjRef {
        self.alloc_object(NativeObj { name, arity, function }, ObjKind::Native)
    }

    pub fn alloc_class(&mut self, name: ObjRef) -> ObjRef {
        self.alloc_object(ClassObj { name, methods: Table::new() }, ObjKind::Class)
    }

    pub fn alloc_instance(&mut self, class: ObjRef, is_static: bool) -> ObjRef {
        self.alloc_object(InstanceObj { class, fields: Table::new(), is_static }, ObjKind::Instance)
    }

    pub fn alloc_bound_method(&mut self, receiver: Value, method: Value) -> ObjRef {
        self.alloc_object(BoundMethodObj { receiver, method }, ObjKind::BoundMethod)
    }

    pub fn alloc_list(&mut self, items: Vec<Value>) -> ObjRef {
        let extra = items.capacity() * std::mem::size_of::<Value>();
        let ptr = self.alloc_object(ListObj { items }, ObjKind::List);
        self.bytes_allocated += extra;
        ptr
    }
}
