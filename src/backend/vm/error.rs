// Runtime error model (spec §7). Grounded on the teacher's
// `ErrorKind`/`VMError` (`backend/vm/error.rs`): a closed error-kind enum,
// hand-written `Display`, and a frame-name/pc/backtrace bundle, generalized
// from the teacher's single-frame trace to the full backtrace spec §7
// requires ("a backtrace from the innermost frame outward").
#[derive(Debug, Clone)]
pub enum ErrorKind {
    TypeError(String),
    UndefinedVariable(String),
    InvalidCall(String),
    PropertyError(String),
    IndexError(String),
    StackOverflow,
    InternalError(String),
}

/// One line of a runtime backtrace: the function name (or "脚本" for the
/// top-level script, per spec §7) and the source line active when that
/// frame was on top.
#[derive(Debug, Clone)]
pub struct TraceFrame {
    pub func_name: String,
    pub line: u32,
}

#[derive(Debug, Clone)]
pub struct VmError {
    pub kind: ErrorKind,
    pub trace: Vec<TraceFrame>,
}

impl std::fmt::Display for VmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.message())?;
        for frame in &self.trace {
            writeln!(f, "  [第 {} 行] 在 {} 中", frame.line, frame.func_name)?;
        }
        Ok(())
    }
}

impl VmError {
    pub fn message(&self) -> String {
        match &self.kind {
            ErrorKind::TypeError(m) => format!("类型错误: {m}"),
            ErrorKind::UndefinedVariable(name) => format!("未定义的变量 '{name}'"),
            ErrorKind::InvalidCall(m) => format!("调用错误: {m}"),
            ErrorKind::PropertyError(m) => format!("属性错误: {m}"),
            ErrorKind::IndexError(m) => format!("索引错误: {m}"),
            ErrorKind::StackOverflow => "栈溢出".to_string(),
            ErrorKind::InternalError(m) => format!("内部错误: {m}"),
        }
    }
}
