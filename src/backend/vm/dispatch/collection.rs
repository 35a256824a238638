// List/string construction, subscripting, and built-in methods (spec §4.3
// "Lists", §6 "String built-in methods"/"List built-in methods"). The
// teacher's register VM has neither a list type nor string methods, so this
// module is grounded directly on spec.md §6's method list and SPEC_FULL.md's
// Unicode-scalar-value resolution of it, following the teacher's style of
// one small `impl Vm` method per opcode/operation.
use crate::backend::vm::Vm;
use crate::backend::vm::error::{ErrorKind, VmError};
use crate::common::object::{ListObj, ObjKind, ObjRef, StringObj, Value, cast, kind_of};

impl Vm {
    pub(crate) fn build_list(&mut self, count: u8) {
        let n = count as usize;
        let items = self.stack.split_off(self.stack.len() - n);
        let list = self.heap.alloc_list(items);
        self.maybe_collect();
        self.push(Value::Obj(list));
    }

    pub(crate) fn index_subscr(&mut self) -> Result<(), VmError> {
        let index_val = self.pop();
        let receiver = self.pop();
        match receiver {
            Value::Obj(ptr) if unsafe { kind_of(ptr) } == ObjKind::List => {
                let len = unsafe { (*cast::<ListObj>(ptr)).data.items.len() };
                let i = self.resolve_index(len, index_val)?;
                let item = unsafe { (*cast::<ListObj>(ptr)).data.items[i] };
                self.push(item);
                Ok(())
            }
            Value::Obj(ptr) if unsafe { kind_of(ptr) } == ObjKind::String => {
                let chars: Vec<char> =
                    unsafe { (*cast::<StringObj>(ptr)).data.chars.chars().collect() };
                let i = self.resolve_index(chars.len(), index_val)?;
                let interned = self.heap.intern_string(chars[i].to_string());
                self.maybe_collect();
                self.push(Value::Obj(interned));
                Ok(())
            }
            other => Err(self.error(ErrorKind::TypeError(format!(
                "只能对列表或字符串取下标，实际为 {}",
                other.type_name()
            )))),
        }
    }

    pub(crate) fn store_subscr(&mut self) -> Result<(), VmError> {
        let value = self.pop();
        let index_val = self.pop();
        let receiver = self.pop();
        match receiver {
            Value::Obj(ptr) if unsafe { kind_of(ptr) } == ObjKind::List => {
                let len = unsafe { (*cast::<ListObj>(ptr)).data.items.len() };
                let i = self.resolve_index(len, index_val)?;
                unsafe {
                    (*cast::<ListObj>(ptr)).data.items[i] = value;
                }
                self.push(value);
                Ok(())
            }
            other => Err(self.error(ErrorKind::TypeError(format!(
                "只能对列表赋值下标，实际为 {}",
                other.type_name()
            )))),
        }
    }

    /// Negative indices wrap from the end (spec §4.3 "Lists"); out-of-range
    /// after wrapping is a runtime error.
    fn resolve_index(&self, len: usize, value: Value) -> Result<usize, VmError> {
        let n = match value.as_number() {
            Some(n) => n,
            None => {
                return Err(self.error(ErrorKind::TypeError(format!(
                    "下标必须是数字，实际为 {}",
                    value.type_name()
                ))));
            }
        };
        let mut i = n as i64;
        if i < 0 {
            i += len as i64;
        }
        if i < 0 || i as usize >= len {
            return Err(self.error(ErrorKind::IndexError(format!(
                "下标 {n} 超出范围（长度 {len}）"
            ))));
        }
        Ok(i as usize)
    }

    /// Like `resolve_index` but allows `i == len` (insertion point / `子串`
    /// end boundary, spec §6 "substring(begin,end)... end exclusive,
    /// `end == length` permitted").
    fn resolve_bound(&self, len: usize, value: Value) -> Result<usize, VmError> {
        let n = match value.as_number() {
            Some(n) => n,
            None => {
                return Err(self.error(ErrorKind::TypeError(format!(
                    "边界必须是数字，实际为 {}",
                    value.type_name()
                ))));
            }
        };
        let mut i = n as i64;
        if i < 0 {
            i += len as i64;
        }
        if i < 0 || i as usize > len {
            return Err(self.error(ErrorKind::IndexError(format!(
                "边界 {n} 超出范围（长度 {len}）"
            ))));
        }
        Ok(i as usize)
    }

    fn arity_error(&self, method: &str, expected: u8, actual: u8) -> VmError {
        self.error(ErrorKind::InvalidCall(format!(
            "{method}() 需要 {expected} 个参数，实际传入 {actual} 个"
        )))
    }

    fn expect_string_arg(&self, value: Value) -> Result<String, VmError> {
        match value {
            Value::Obj(ptr) if unsafe { kind_of(ptr) } == ObjKind::String => {
                Ok(unsafe { (*cast::<StringObj>(ptr)).data.chars.clone() })
            }
            other => Err(self.error(ErrorKind::TypeError(format!(
                "参数必须是字符串，实际为 {}",
                other.type_name()
            )))),
        }
    }

    /// Pops `argc` argument(s) and the receiver beneath them, then pushes
    /// the method's result (spec §4.3 "`OP_INVOKE` fuses property lookup and
    /// call"; the result replaces both in one step here).
    fn finish_invoke(&mut self, argc: u8, result: Value) {
        let base = self.stack.len() - argc as usize - 1;
        self.stack.truncate(base);
        self.push(result);
    }

    // ------------------------------------------------------------------
    // List methods
    // ------------------------------------------------------------------

    pub(crate) fn invoke_list_method(&mut self, name: ObjRef, argc: u8) -> Result<(), VmError> {
        let receiver = match self.peek(argc as usize) {
            Value::Obj(ptr) => ptr,
            _ => unreachable!("invoke_list_method always runs on a list receiver"),
        };
        let method = unsafe { (*cast::<StringObj>(name)).data.chars.clone() };
        match method.as_str() {
            "推入" => self.list_push(receiver, argc),
            "弹出" => self.list_pop(receiver, argc),
            "插入" => self.list_insert(receiver, argc),
            "删除" => self.list_delete(receiver, argc),
            "长度" => self.list_length(receiver, argc),
            "过滤" => self.list_filter(receiver, argc),
            "排序" => self.list_sort(receiver, argc),
            other => Err(self.error(ErrorKind::PropertyError(format!(
                "列表没有名为 '{other}' 的方法"
            )))),
        }
    }

    fn list_push(&mut self, receiver: ObjRef, argc: u8) -> Result<(), VmError> {
        if argc != 1 {
            return Err(self.arity_error("推入", 1, argc));
        }
        let value = self.peek(0);
        unsafe {
            (*cast::<ListObj>(receiver)).data.items.push(value);
        }
        self.finish_invoke(argc, Value::Nil);
        Ok(())
    }

    fn list_pop(&mut self, receiver: ObjRef, argc: u8) -> Result<(), VmError> {
        if argc != 0 {
            return Err(self.arity_error("弹出", 0, argc));
        }
        let popped = unsafe { (*cast::<ListObj>(receiver)).data.items.pop() };
        match popped {
            Some(value) => {
                self.finish_invoke(argc, value);
                Ok(())
            }
            None => Err(self.error(ErrorKind::IndexError("不能对空列表调用 弹出()".to_string()))),
        }
    }

    fn list_insert(&mut self, receiver: ObjRef, argc: u8) -> Result<(), VmError> {
        if argc != 2 {
            return Err(self.arity_error("插入", 2, argc));
        }
        let value = self.peek(0);
        let index_val = self.peek(1);
        let len = unsafe { (*cast::<ListObj>(receiver)).data.items.len() };
        let i = self.resolve_bound(len, index_val)?;
        unsafe {
            (*cast::<ListObj>(receiver)).data.items.insert(i, value);
        }
        self.finish_invoke(argc, Value::Nil);
        Ok(())
    }

    fn list_delete(&mut self, receiver: ObjRef, argc: u8) -> Result<(), VmError> {
        if argc != 1 {
            return Err(self.arity_error("删除", 1, argc));
        }
        let index_val = self.peek(0);
        let len = unsafe { (*cast::<ListObj>(receiver)).data.items.len() };
        let i = self.resolve_index(len, index_val)?;
        let removed = unsafe { (*cast::<ListObj>(receiver)).data.items.remove(i) };
        self.finish_invoke(argc, removed);
        Ok(())
    }

    fn list_length(&mut self, receiver: ObjRef, argc: u8) -> Result<(), VmError> {
        if argc != 0 {
            return Err(self.arity_error("长度", 0, argc));
        }
        let len = unsafe { (*cast::<ListObj>(receiver)).data.items.len() };
        self.finish_invoke(argc, Value::Number(len as f64));
        Ok(())
    }

    /// Builds a fresh list of the elements the predicate (called back into
    /// the dispatch loop via `run_closure`, spec §5) accepted.
    fn list_filter(&mut self, receiver: ObjRef, argc: u8) -> Result<(), VmError> {
        if argc != 1 {
            return Err(self.arity_error("过滤", 1, argc));
        }
        let predicate = self.peek(0);
        let items = unsafe { (*cast::<ListObj>(receiver)).data.items.clone() };
        let mut kept = Vec::with_capacity(items.len());
        for item in items {
            let accepted = self.run_closure(predicate, &[item])?;
            if accepted.is_truthy() {
                kept.push(item);
            }
        }
        let list = self.heap.alloc_list(kept);
        self.maybe_collect();
        self.finish_invoke(argc, Value::Obj(list));
        Ok(())
    }

    /// In-place insertion sort (spec §8 scenario 2). An optional comparator
    /// closure takes two elements and returns negative/zero/positive,
    /// mirroring the default numeric ordering when omitted.
    fn list_sort(&mut self, receiver: ObjRef, argc: u8) -> Result<(), VmError> {
        if argc > 1 {
            return Err(self.error(ErrorKind::InvalidCall(format!(
                "排序() 最多接受 1 个参数，实际传入 {argc} 个"
            ))));
        }
        let cmp = if argc == 1 { Some(self.peek(0)) } else { None };
        let mut items = unsafe { (*cast::<ListObj>(receiver)).data.items.clone() };
        for i in 1..items.len() {
            let mut j = i;
            while j > 0 && self.items_less(&cmp, items[j], items[j - 1])? {
                items.swap(j, j - 1);
                j -= 1;
            }
        }
        unsafe {
            (*cast::<ListObj>(receiver)).data.items = items;
        }
        self.finish_invoke(argc, Value::Nil);
        Ok(())
    }

    fn items_less(&mut self, cmp: &Option<Value>, a: Value, b: Value) -> Result<bool, VmError> {
        match cmp {
            Some(closure) => {
                let result = self.run_closure(*closure, &[a, b])?;
                match result.as_number() {
                    Some(n) => Ok(n < 0.0),
                    None => Err(self.error(ErrorKind::TypeError("比较函数必须返回数字".to_string()))),
                }
            }
            None => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => Ok(x < y),
                _ => Err(self.error(ErrorKind::TypeError(
                    "默认排序需要数字元素，其他类型请提供比较函数".to_string(),
                ))),
            },
        }
    }

    // ------------------------------------------------------------------
    // String methods
    // ------------------------------------------------------------------

    pub(crate) fn invoke_string_method(&mut self, name: ObjRef, argc: u8) -> Result<(), VmError> {
        let receiver = match self.peek(argc as usize) {
            Value::Obj(ptr) => ptr,
            _ => unreachable!("invoke_string_method always runs on a string receiver"),
        };
        let method = unsafe { (*cast::<StringObj>(name)).data.chars.clone() };
        match method.as_str() {
            "长度" => self.string_length(receiver, argc),
            "索引" => self.string_index_of(receiver, argc),
            "计数" => self.string_count(receiver, argc),
            "分割" => self.string_split(receiver, argc),
            "替换" => self.string_replace(receiver, argc),
            "去除空白" => self.string_trim(receiver, argc, true, true),
            "去除首空白" => self.string_trim(receiver, argc, true, false),
            "去除尾空白" => self.string_trim(receiver, argc, false, true),
            "转大写" => self.string_case(receiver, argc, true),
            "转小写" => self.string_case(receiver, argc, false),
            "子串" => self.string_substring(receiver, argc),
            other => Err(self.error(ErrorKind::PropertyError(format!(
                "字符串没有名为 '{other}' 的方法"
            )))),
        }
    }

    fn string_length(&mut self, receiver: ObjRef, argc: u8) -> Result<(), VmError> {
        if argc != 0 {
            return Err(self.arity_error("长度", 0, argc));
        }
        let count = unsafe { (*cast::<StringObj>(receiver)).data.char_count };
        self.finish_invoke(argc, Value::Number(count as f64));
        Ok(())
    }

    fn string_index_of(&mut self, receiver: ObjRef, argc: u8) -> Result<(), VmError> {
        if argc != 1 {
            return Err(self.arity_error("索引", 1, argc));
        }
        let needle = self.expect_string_arg(self.peek(0))?;
        let haystack = unsafe { (*cast::<StringObj>(receiver)).data.chars.clone() };
        let found = char_index_of(&haystack, &needle);
        self.finish_invoke(argc, Value::Number(found.map(|i| i as f64).unwrap_or(-1.0)));
        Ok(())
    }

    fn string_count(&mut self, receiver: ObjRef, argc: u8) -> Result<(), VmError> {
        if argc != 1 {
            return Err(self.arity_error("计数", 1, argc));
        }
        let needle = self.expect_string_arg(self.peek(0))?;
        let haystack = unsafe { (*cast::<StringObj>(receiver)).data.chars.clone() };
        let count = char_count_occurrences(&haystack, &needle);
        self.finish_invoke(argc, Value::Number(count as f64));
        Ok(())
    }

    fn string_split(&mut self, receiver: ObjRef, argc: u8) -> Result<(), VmError> {
        if argc != 1 {
            return Err(self.arity_error("分割", 1, argc));
        }
        let delim = self.expect_string_arg(self.peek(0))?;
        let source = unsafe { (*cast::<StringObj>(receiver)).data.chars.clone() };
        let parts: Vec<String> = if delim.is_empty() {
            source.chars().map(|c| c.to_string()).collect()
        } else {
            source.split(delim.as_str()).map(|s| s.to_string()).collect()
        };
        let mut items = Vec::with_capacity(parts.len());
        for part in parts {
            items.push(Value::Obj(self.heap.intern_string(part)));
        }
        let list = self.heap.alloc_list(items);
        self.maybe_collect();
        self.finish_invoke(argc, Value::Obj(list));
        Ok(())
    }

    fn string_replace(&mut self, receiver: ObjRef, argc: u8) -> Result<(), VmError> {
        if argc != 2 {
            return Err(self.arity_error("替换", 2, argc));
        }
        let new = self.expect_string_arg(self.peek(0))?;
        let old = self.expect_string_arg(self.peek(1))?;
        let source = unsafe { (*cast::<StringObj>(receiver)).data.chars.clone() };
        let replaced = if old.is_empty() { source } else { source.replace(old.as_str(), &new) };
        let interned = self.heap.intern_string(replaced);
        self.maybe_collect();
        self.finish_invoke(argc, Value::Obj(interned));
        Ok(())
    }

    fn string_trim(
        &mut self,
        receiver: ObjRef,
        argc: u8,
        start: bool,
        end: bool,
    ) -> Result<(), VmError> {
        if argc != 0 {
            return Err(self.arity_error("去除空白", 0, argc));
        }
        let source = unsafe { (*cast::<StringObj>(receiver)).data.chars.clone() };
        let trimmed = match (start, end) {
            (true, true) => source.trim().to_string(),
            (true, false) => source.trim_start().to_string(),
            (false, true) => source.trim_end().to_string(),
            (false, false) => source,
        };
        let interned = self.heap.intern_string(trimmed);
        self.maybe_collect();
        self.finish_invoke(argc, Value::Obj(interned));
        Ok(())
    }

    fn string_case(&mut self, receiver: ObjRef, argc: u8, upper: bool) -> Result<(), VmError> {
        if argc != 0 {
            let method = if upper { "转大写" } else { "转小写" };
            return Err(self.arity_error(method, 0, argc));
        }
        let source = unsafe { (*cast::<StringObj>(receiver)).data.chars.clone() };
        let converted = if upper { source.to_uppercase() } else { source.to_lowercase() };
        let interned = self.heap.intern_string(converted);
        self.maybe_collect();
        self.finish_invoke(argc, Value::Obj(interned));
        Ok(())
    }

    /// `子串(begin, end)`: negative indices wrap, `end` is exclusive and may
    /// equal the string's length (spec §6, §9 design notes).
    fn string_substring(&mut self, receiver: ObjRef, argc: u8) -> Result<(), VmError> {
        if argc != 2 {
            return Err(self.arity_error("子串", 2, argc));
        }
        let end_val = self.peek(0);
        let begin_val = self.peek(1);
        let chars: Vec<char> =
            unsafe { (*cast::<StringObj>(receiver)).data.chars.chars().collect() };
        let len = chars.len();
        let begin = self.resolve_bound(len, begin_val)?;
        let end = self.resolve_bound(len, end_val)?;
        if begin > end {
            return Err(self.error(ErrorKind::IndexError(format!(
                "子串起始 {begin} 大于结束 {end}"
            ))));
        }
        let slice: String = chars[begin..end].iter().collect();
        let interned = self.heap.intern_string(slice);
        self.maybe_collect();
        self.finish_invoke(argc, Value::Obj(interned));
        Ok(())
    }
}

fn char_index_of(haystack: &str, needle: &str) -> Option<usize> {
    let h: Vec<char> = haystack.chars().collect();
    let n: Vec<char> = needle.chars().collect();
    if n.is_empty() {
        return Some(0);
    }
    if n.len() > h.len() {
        return None;
    }
    (0..=(h.len() - n.len())).find(|&start| h[start..start + n.len()] == n[..])
}

fn char_count_occurrences(haystack: &str, needle: &str) -> usize {
    let h: Vec<char> = haystack.chars().collect();
    let n: Vec<char> = needle.chars().collect();
    if n.is_empty() {
        return 0;
    }
    let mut count = 0;
    let mut i = 0;
    while i + n.len() <= h.len() {
        if h[i..i + n.len()] == n[..] {
            count += 1;
            i += n.len();
        } else {
            i += 1;
        }
    }
    count
}
