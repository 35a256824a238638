// Arithmetic, comparison and bitwise opcodes (spec §4.3 "Arithmetic").
// Grounded on the teacher's `dispatch/arithmetic.rs` `handle_binary_op`
// closure-based dispatch pattern, generalized to Qi's overloaded `+`
// (number+number or string+string) and its 32-bit-signed bitwise
// intermediate (spec §1 Non-goals: "bitwise ops fold through a 32-bit
// signed intermediate").
use crate::backend::vm::Vm;
use crate::backend::vm::error::{ErrorKind, VmError};
use crate::common::object::Value;

impl Vm {
    pub(crate) fn add(&mut self) -> Result<(), VmError> {
        let b = self.pop();
        let a = self.pop();
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => {
                self.push(Value::Number(x + y));
                Ok(())
            }
            (a, b) if a.is_obj_kind(crate::common::object::ObjKind::String)
                && b.is_obj_kind(crate::common::object::ObjKind::String) =>
            {
                let left = self.stringify(a);
                let right = self.stringify(b);
                let concatenated = left + &right;
                let ptr = self.heap.intern_string(concatenated);
                self.maybe_collect();
                self.push(Value::Obj(ptr));
                Ok(())
            }
            (a, b) => Err(self.error(ErrorKind::TypeError(format!(
                "'+' 需要两个数字或两个字符串，实际为 {} 和 {}",
                a.type_name(),
                b.type_name()
            )))),
        }
    }

    pub(crate) fn numeric_binary(&mut self, op: impl Fn(f64, f64) -> f64) -> Result<(), VmError> {
        let b = self.pop();
        let a = self.pop();
        match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => {
                self.push(Value::Number(op(x, y)));
                Ok(())
            }
            _ => Err(self.error(ErrorKind::TypeError(format!(
                "运算符需要两个数字，实际为 {} 和 {}",
                a.type_name(),
                b.type_name()
            )))),
        }
    }

    pub(crate) fn modulo(&mut self) -> Result<(), VmError> {
        let b = self.pop();
        let a = self.pop();
        match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => {
                // Float remainder with the sign of the dividend (spec §4.3).
                self.push(Value::Number(x % y));
                Ok(())
            }
            _ => Err(self.error(ErrorKind::TypeError(format!(
                "'%' 需要两个数字，实际为 {} 和 {}",
                a.type_name(),
                b.type_name()
            )))),
        }
    }

    pub(crate) fn compare(&mut self, op: impl Fn(f64, f64) -> bool) -> Result<(), VmError> {
        let b = self.pop();
        let a = self.pop();
        match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => {
                self.push(Value::Bool(op(x, y)));
                Ok(())
            }
            _ => Err(self.error(ErrorKind::TypeError(format!(
                "比较运算符需要两个数字，实际为 {} 和 {}",
                a.type_name(),
                b.type_name()
            )))),
        }
    }

    pub(crate) fn negate(&mut self) -> Result<(), VmError> {
        let value = self.pop();
        match value.as_number() {
            Some(n) => {
                self.push(Value::Number(-n));
                Ok(())
            }
            None => Err(self.error(ErrorKind::TypeError(format!(
                "一元 '-' 需要数字，实际为 {}",
                value.type_name()
            )))),
        }
    }

    /// `++`/`--`: rewritten by the compiler as get, bump, set; this helper
    /// only performs the numeric add/subtract-by-one (spec §4.2, "Compound
    /// assignments").
    pub(crate) fn bump(&mut self, delta: f64) -> Result<(), VmError> {
        let value = self.pop();
        match value.as_number() {
            Some(n) => {
                self.push(Value::Number(n + delta));
                Ok(())
            }
            None => Err(self.error(ErrorKind::TypeError(format!(
                "'++'/'--' 需要数字，实际为 {}",
                value.type_name()
            )))),
        }
    }

    fn as_i32(&self, value: Value) -> Result<i32, VmError> {
        match value.as_number() {
            Some(n) => Ok(n as i64 as i32),
            None => Err(self.error(ErrorKind::TypeError(format!(
                "位运算需要数字，实际为 {}",
                value.type_name()
            )))),
        }
    }

    pub(crate) fn bitwise(&mut self, op: impl Fn(i32, i32) -> i32) -> Result<(), VmError> {
        let b = self.pop();
        let a = self.pop();
        let x = self.as_i32(a)?;
        let y = self.as_i32(b)?;
        self.push(Value::Number(op(x, y) as f64));
        Ok(())
    }

    pub(crate) fn bitwise_shift(&mut self, op: impl Fn(i32, i32) -> i32) -> Result<(), VmError> {
        let b = self.pop();
        let a = self.pop();
        let x = self.as_i32(a)?;
        let y = self.as_i32(b)?;
        self.push(Value::Number(op(x, y) as f64));
        Ok(())
    }

    pub(crate) fn bitwise_not(&mut self) -> Result<(), VmError> {
        let value = self.pop();
        let x = self.as_i32(value)?;
        self.push(Value::Number(!x as f64));
        Ok(())
    }
}
