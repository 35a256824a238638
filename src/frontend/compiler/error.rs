// Compile-time diagnostics (spec §7 "Compile errors"). Grounded on the
// teacher's `backend/vm/error.rs` hand-written `Display` style, applied to
// the compiler's own line/lexeme/message triple (spec §4.2 "Errors").
use std::fmt;

#[derive(Debug, Clone)]
pub struct CompileError {
    pub line: u32,
    pub lexeme: String,
    pub message: String,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lexeme.is_empty() {
            write!(f, "[第 {} 行] 错误：{}", self.line, self.message)
        } else {
            write!(f, "[第 {} 行] 在 '{}' 处错误：{}", self.line, self.lexeme, self.message)
        }
    }
}
