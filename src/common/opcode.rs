// Qi bytecode instruction set (spec §6). Grounded on the teacher's
// `common/opcode.rs` convention of a Rust enum carrying its operands as
// named fields rather than a packed byte buffer — see SPEC_FULL.md §4.3 for
// why that representation is kept instead of literal 1-byte-opcode packing,
// and DESIGN.md for the full list of name/field choices made to match
// spec §6 exactly (constant/slot/global indices are `u8`, jump/loop offsets
// are `u16`, matching the "one operand byte" / "16-bit offset" format).
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum OpCode {
    Constant { index: u8 },
    Nil,
    True,
    False,

    Pop,
    Dup,
    DoubleDup,

    GetLocal { slot: u8 },
    SetLocal { slot: u8 },
    GetGlobal { index: u8 },
    DefineGlobal { index: u8 },
    SetGlobal { index: u8 },
    GetUpvalue { slot: u8 },
    SetUpvalue { slot: u8 },

    GetProperty { index: u8 },
    SetProperty { index: u8 },
    GetSuper { index: u8 },

    BuildList { count: u8 },
    IndexSubscr,
    StoreSubscr,

    Equal,
    Greater,
    Less,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Not,
    Negate,
    Increment,
    Decrement,

    BitwiseNot,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    BitwiseLeftShift,
    BitwiseRightShift,

    Jump { offset: u16 },
    JumpIfFalse { offset: u16 },
    Loop { offset: u16 },
    Call { argc: u8 },
    Invoke { index: u8, argc: u8 },
    SuperInvoke { index: u8, argc: u8 },
    Return,

    Closure { index: u8, upvalues: Vec<UpvalueDesc> },
    CloseUpvalue,
    Class { index: u8 },
    Inherit,
    Method { index: u8 },

    /// `print` statement (spec §4.2 supplement in SPEC_FULL.md — restored
    /// because §4.1 reserves the keyword and §8's scenarios all use it, even
    /// though §6's opcode table omits it).
    Print,

    /// Debug-only chunk terminator (spec §9 Open Questions; resolved in
    /// DESIGN.md as "emitted, never dispatched").
    End,
}

/// One closure-capture descriptor, emitted inline after `OP_CLOSURE`
/// (spec §4.2 "Upvalues" / §6 "`CLOSURE k { (isLocal, idx) x upvalueCount }`").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpvalueDesc {
    pub is_local: bool,
    pub index: u8,
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpCode::Constant { index } => write!(f, "OP_CONSTANT        {index}"),
            OpCode::Nil => write!(f, "OP_NIL"),
            OpCode::True => write!(f, "OP_TRUE"),
            OpCode::False => write!(f, "OP_FALSE"),
            OpCode::Pop => write!(f, "OP_POP"),
            OpCode::Dup => write!(f, "OP_DUP"),
            OpCode::DoubleDup => write!(f, "OP_DOUBLE_DUP"),
            OpCode::GetLocal { slot } => write!(f, "OP_GET_LOCAL       {slot}"),
            OpCode::SetLocal { slot } => write!(f, "OP_SET_LOCAL       {slot}"),
            OpCode::GetGlobal { index } => write!(f, "OP_GET_GLOBAL      {index}"),
            OpCode::DefineGlobal { index } => write!(f, "OP_DEFINE_GLOBAL   {index}"),
            OpCode::SetGlobal { index } => write!(f, "OP_SET_GLOBAL      {index}"),
            OpCode::GetUpvalue { slot } => write!(f, "OP_GET_UPVALUE     {slot}"),
            OpCode::SetUpvalue { slot } => write!(f, "OP_SET_UPVALUE     {slot}"),
            OpCode::GetProperty { index } => write!(f, "OP_GET_PROPERTY    {index}"),
            OpCode::SetProperty { index } => write!(f, "OP_SET_PROPERTY    {index}"),
            OpCode::GetSuper { index } => write!(f, "OP_GET_SUPER       {index}"),
            OpCode::BuildList { count } => write!(f, "OP_BUILD_LIST      {count}"),
            OpCode::IndexSubscr => write!(f, "OP_INDEX_SUBSCR"),
            OpCode::StoreSubscr => write!(f, "OP_STORE_SUBSCR"),
            OpCode::Equal => write!(f, "OP_EQUAL"),
            OpCode::Greater => write!(f, "OP_GREATER"),
            OpCode::Less => write!(f, "OP_LESS"),
            OpCode::Add => write!(f, "OP_ADD"),
            OpCode::Subtract => write!(f, "OP_SUBTRACT"),
            OpCode::Multiply => write!(f, "OP_MULTIPLY"),
            OpCode::Divide => write!(f, "OP_DIVIDE"),
            OpCode::Modulo => write!(f, "OP_MODULO"),
            OpCode::Not => write!(f, "OP_NOT"),
            OpCode::Negate => write!(f, "OP_NEGATE"),
            OpCode::Increment => write!(f, "OP_INCREMENT"),
            OpCode::Decrement => write!(f, "OP_DECREMENT"),
            OpCode::BitwiseNot => write!(f, "OP_BITWISE_NOT"),
            OpCode::BitwiseAnd => write!(f, "OP_BITWISE_AND"),
            OpCode::BitwiseOr => write!(f, "OP_BITWISE_OR"),
            OpCode::BitwiseXor => write!(f, "OP_BITWISE_XOR"),
            OpCode::BitwiseLeftShift => write!(f, "OP_BITWISE_LEFT_SHIFT"),
            OpCode::BitwiseRightShift => write!(f, "OP_BITWISE_RIGHT_SHIFT"),
            OpCode::Jump { offset } => write!(f, "OP_JUMP            +{offset}"),
            OpCode::JumpIfFalse { offset } => write!(f, "OP_JUMP_IF_FALSE   +{offset}"),
            OpCode::Loop { offset } => write!(f, "OP_LOOP            -{offset}"),
            OpCode::Call { argc } => write!(f, "OP_CALL            {argc}"),
            OpCode::Invoke { index, argc } => write!(f, "OP_INVOKE          {index} ({argc} args)"),
            OpCode::SuperInvoke { index, argc } => {
                write!(f, "OP_SUPER_INVOKE    {index} ({argc} args)")
            }
            OpCode::Return => write!(f, "OP_RETURN"),
            OpCode::Closure { index, upvalues } => {
                write!(f, "OP_CLOSURE         {index} ({} upvalues)", upvalues.len())
            }
            OpCode::CloseUpvalue => write!(f, "OP_CLOSE_UPVALUE"),
            OpCode::Class { index } => write!(f, "OP_CLASS           {index}"),
            OpCode::Inherit => write!(f, "OP_INHERIT"),
            OpCode::Method { index } => write!(f, "OP_METHOD          {index}"),
            OpCode::Print => write!(f, "OP_PRINT"),
            OpCode::End => write!(f, "OP_END"),
        }
    }
}
