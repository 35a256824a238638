// Open-addressing hash table keyed by interned-string identity (spec §3,
// "Hash table"): linear probing, load factor <= 0.75, tombstones on delete.
// One `Table` type serves the globals table, every class's method table,
// every instance's field table, and the heap's string-intern set — spec §3
// calls these out as separate uses of the same structure. Grounded in the
// teacher's `common/hash.rs` stub (`LuaHash`/`LuaNode`, a chained-bucket
// sketch that was never finished) generalized into the full open-addressing
// design spec §3 requires.
use crate::common::object::{ObjRef, StringObj, Value, cast};

const MAX_LOAD: f64 = 0.75;

#[derive(Clone, Copy)]
pub struct Entry {
    /// Null = empty bucket (if `value` is nil) or tombstone (if `value` is
    /// `Bool(true)`), matching spec §3's literal encoding.
    pub key: ObjRef,
    pub value: Value,
}

impl Entry {
    fn empty() -> Self {
        Entry { key: std::ptr::null_mut(), value: Value::Nil }
    }
}

#[derive(Default)]
pub struct Table {
    entries: Vec<Entry>,
    /// Active entries *plus* tombstones — used to decide when to grow, per
    /// clox-lineage implementations (a table full of tombstones still needs
    /// to resize so probing terminates in bounded time).
    count: usize,
}

unsafe fn key_hash(key: ObjRef) -> u64 {
    unsafe { (*cast::<StringObj>(key)).data.hash }
}

unsafe fn key_chars(key: ObjRef) -> *const str {
    unsafe { (*cast::<StringObj>(key)).data.chars.as_str() }
}

fn grow_capacity(capacity: usize) -> usize {
    if capacity < 8 { 8 } else { capacity * 2 }
}

fn find_entry(entries: &[Entry], key: ObjRef, hash: u64) -> usize {
    let capacity = entries.len();
    let mut index = (hash as usize) % capacity;
    let mut tombstone: Option<usize> = None;
    loop {
        let entry = &entries[index];
        if entry.key.is_null() {
            if entry.value.is_nil() {
                return tombstone.unwrap_or(index);
            } else if tombstone.is_none() {
                tombstone = Some(index);
            }
        } else if std::ptr::eq(entry.key, key) {
            return index;
        }
        index = (index + 1) % capacity;
    }
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn adjust_capacity(&mut self, capacity: usize) {
        let mut fresh = vec![Entry::empty(); capacity];
        let mut live = 0;
        for entry in &self.entries {
            if entry.key.is_null() {
                continue;
            }
            let hash = unsafe { key_hash(entry.key) };
            let idx = find_entry(&fresh, entry.key, hash);
            fresh[idx] = *entry;
            live += 1;
        }
        self.entries = fresh;
        self.count = live;
    }

    /// Returns `true` if `key` was not already present.
    pub fn set(&mut self, key: ObjRef, value: Value) -> bool {
        if (self.count + 1) as f64 > self.entries.len() as f64 * MAX_LOAD {
            let cap = grow_capacity(self.entries.len());
            self.adjust_capacity(cap);
        }
        let hash = unsafe { key_hash(key) };
        let index = find_entry(&self.entries, key, hash);
        let entry = &mut self.entries[index];
        let is_new_key = entry.key.is_null();
        if is_new_key && entry.value.is_nil() {
            self.count += 1;
        }
        entry.key = key;
        entry.value = value;
        is_new_key
    }

    pub fn get(&self, key: ObjRef) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        let hash = unsafe { key_hash(key) };
        let index = find_entry(&self.entries, key, hash);
        let entry = &self.entries[index];
        if entry.key.is_null() { None } else { Some(entry.value) }
    }

    pub fn contains(&self, key: ObjRef) -> bool {
        self.get(key).is_some()
    }

    pub fn delete(&mut self, key: ObjRef) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let hash = unsafe { key_hash(key) };
        let index = find_entry(&self.entries, key, hash);
        let entry = &mut self.entries[index];
        if entry.key.is_null() {
            return false;
        }
        entry.key = std::ptr::null_mut();
        entry.value = Value::Bool(true); // tombstone marker, spec §3
        true
    }

    /// Probes by hash+content rather than by key identity — used by the
    /// heap's string interner *before* a candidate `StringObj` exists for
    /// the content being looked up (spec §3, "String interning invariant").
    pub fn find_string(&self, chars: &str, hash: u64) -> Option<ObjRef> {
        if self.entries.is_empty() {
            return None;
        }
        let capacity = self.entries.len();
        let mut index = (hash as usize) % capacity;
        loop {
            let entry = &self.entries[index];
            if entry.key.is_null() {
                if entry.value.is_nil() {
                    return None;
                }
            } else {
                let candidate = unsafe { &*key_chars(entry.key) };
                if unsafe { key_hash(entry.key) } == hash && candidate == chars {
                    return Some(entry.key);
                }
            }
            index = (index + 1) % capacity;
        }
    }

    /// Copies every live entry of `other` into `self`, overwriting existing
    /// keys — used by `OP_INHERIT` to seed a subclass's method table from
    /// its superclass (spec §4.2, "Classes").
    pub fn add_all_from(&mut self, other: &Table) {
        for entry in &other.entries {
            if !entry.key.is_null() {
                self.set(entry.key, entry.value);
            }
        }
    }

    /// Removes entries whose key is an unmarked string, used by the GC
    /// sweep phase before strings themselves are freed (spec §4.4,
    /// "remove entries from the string-intern set whose keys are
    /// unmarked").
    pub fn remove_unmarked_keys(&mut self) {
        for entry in &mut self.entries {
            if !entry.key.is_null() {
                let marked = unsafe { (*entry.key).marked };
                if !marked {
                    entry.key = std::ptr::null_mut();
                    entry.value = Value::Bool(true);
                }
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjRef, Value)> + '_ {
        self.entries
            .iter()
            .filter(|e| !e.key.is_null())
            .map(|e| (e.key, e.value))
    }
}
