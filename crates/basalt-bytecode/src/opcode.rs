//! Bytecode opcodes for the Basalt stack machine
//!
//! Every opcode is a single byte, optionally followed by little-endian
//! immediate operands. Jump operands are `i32` displacements relative to the
//! first byte of the jump instruction.
//!
//! Opcodes are organized into categories:
//! - 0x00-0x07: Stack shuffles
//! - 0x08-0x17: Literals
//! - 0x18-0x1F: Local and argument slots
//! - 0x20-0x2F: Binary arithmetic
//! - 0x30-0x37: Unary operators
//! - 0x38-0x3F: Comparison
//! - 0x40-0x4F: Control flow
//! - 0x50-0x5F: Names, properties, elements, globals and calls
//! - 0x60-0x6F: Return
//! - 0x70-0x7F: Constructs the baseline tier does not lower

/// Bytecode opcode enumeration
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Stack Shuffles (0x00-0x07) =====
    /// No operation
    Nop = 0x00,
    /// Loop header marker, no operation
    LoopHead = 0x01,
    /// Pop top value
    Pop = 0x02,
    /// Pop N values (operand: u16 count)
    PopN = 0x03,
    /// Duplicate top value
    Dup = 0x04,
    /// Duplicate top two values
    Dup2 = 0x05,
    /// Swap top two values
    Swap = 0x06,

    // ===== Literals (0x08-0x17) =====
    /// Push undefined
    Undefined = 0x08,
    /// Push null
    Null = 0x09,
    /// Push true
    True = 0x0A,
    /// Push false
    False = 0x0B,
    /// Push int32 0
    Zero = 0x0C,
    /// Push int32 1
    One = 0x0D,
    /// Push small integer (operand: i8)
    Int8 = 0x0E,
    /// Push 32-bit integer (operand: i32)
    Int32 = 0x0F,
    /// Push double (operand: f64)
    Double = 0x10,
    /// Push interned string (operand: u32 atom index)
    String = 0x11,
    /// Push the array-hole magic marker
    Hole = 0x12,

    // ===== Local and Argument Slots (0x18-0x1F) =====
    /// Push local slot (operand: u16 slot)
    GetLocal = 0x18,
    /// Store top of stack into local slot, leaving it on the stack (operand: u16 slot)
    SetLocal = 0x19,
    /// Push formal argument (operand: u16 index)
    GetArg = 0x1A,
    /// Store top of stack into formal argument, leaving it on the stack (operand: u16 index)
    SetArg = 0x1B,
    /// Pre-increment local slot and push the new value (operand: u16 slot)
    IncLocal = 0x1C,
    /// Pre-decrement local slot and push the new value (operand: u16 slot)
    DecLocal = 0x1D,

    // ===== Binary Arithmetic (0x20-0x2F) =====
    /// pop b, pop a, push a + b
    Add = 0x20,
    /// pop b, pop a, push a - b
    Sub = 0x21,
    /// pop b, pop a, push a * b
    Mul = 0x22,
    /// pop b, pop a, push a / b
    Div = 0x23,
    /// pop b, pop a, push a % b
    Mod = 0x24,
    /// pop b, pop a, push a & b
    BitAnd = 0x25,
    /// pop b, pop a, push a | b
    BitOr = 0x26,
    /// pop b, pop a, push a ^ b
    BitXor = 0x27,
    /// pop b, pop a, push a << b
    Lsh = 0x28,
    /// pop b, pop a, push a >> b
    Rsh = 0x29,
    /// pop b, pop a, push a >>> b
    Ursh = 0x2A,

    // ===== Unary Operators (0x30-0x37) =====
    /// pop a, push -a
    Neg = 0x30,
    /// pop a, push +a
    Pos = 0x31,
    /// pop a, push ~a
    BitNot = 0x32,
    /// pop a, push !a
    Not = 0x33,

    // ===== Comparison (0x38-0x3F) =====
    /// pop b, pop a, push a == b
    Eq = 0x38,
    /// pop b, pop a, push a != b
    Ne = 0x39,
    /// pop b, pop a, push a === b
    StrictEq = 0x3A,
    /// pop b, pop a, push a !== b
    StrictNe = 0x3B,
    /// pop b, pop a, push a < b
    Lt = 0x3C,
    /// pop b, pop a, push a <= b
    Le = 0x3D,
    /// pop b, pop a, push a > b
    Gt = 0x3E,
    /// pop b, pop a, push a >= b
    Ge = 0x3F,

    // ===== Control Flow (0x40-0x4F) =====
    /// Unconditional jump (operand: i32 displacement)
    Goto = 0x40,
    /// Pop a, jump if a is falsy (operand: i32 displacement)
    IfEq = 0x41,
    /// Pop a, jump if a is truthy (operand: i32 displacement)
    IfNe = 0x42,
    /// Jump if top is falsy, leaving it on the stack (operand: i32 displacement)
    And = 0x43,
    /// Jump if top is truthy, leaving it on the stack (operand: i32 displacement)
    Or = 0x44,

    // ===== Names, Properties, Globals and Calls (0x50-0x5F) =====
    /// Push value bound to a scope name (operand: u32 atom index)
    GetName = 0x50,
    /// Assign top of stack to a scope name, leaving it (operand: u32 atom index)
    SetName = 0x51,
    /// Push global variable (operand: u32 atom index)
    GetGlobal = 0x52,
    /// Assign top of stack to a global, leaving it (operand: u32 atom index)
    SetGlobal = 0x53,
    /// pop obj, push obj.name (operand: u32 atom index)
    GetProp = 0x54,
    /// pop value, pop obj, obj.name = value, push value (operand: u32 atom index)
    SetProp = 0x55,
    /// pop key, pop obj, push obj[key]
    GetElem = 0x56,
    /// pop value, pop key, pop obj, obj[key] = value, push value
    SetElem = 0x57,
    /// pop args, pop this, pop callee, push callee.call(this, args) (operand: u16 argc)
    Call = 0x58,

    // ===== Return (0x60-0x6F) =====
    /// pop a, return a
    Return = 0x60,
    /// End of script, return undefined
    Stop = 0x61,

    // ===== Not lowered by the baseline tier (0x70-0x7F) =====
    /// Debugger statement
    Debugger = 0x70,
    /// pop a, throw a
    Throw = 0x71,
    /// Push a closure (operand: u32 function index)
    Lambda = 0x72,
    /// Push the reified arguments object
    Arguments = 0x73,
    /// pop obj, enter a `with` scope
    EnterWith = 0x74,
    /// Leave a `with` scope
    LeaveWith = 0x75,
}

/// Shape of an opcode's immediate operands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandFormat {
    /// No operand bytes
    None,
    /// One signed byte
    I8,
    /// Little-endian u16
    U16,
    /// Little-endian i32
    I32,
    /// Little-endian u32
    U32,
    /// Little-endian f64
    F64,
    /// Little-endian i32 jump displacement
    Jump,
}

impl OperandFormat {
    /// Number of operand bytes following the opcode byte
    pub fn size(self) -> usize {
        match self {
            OperandFormat::None => 0,
            OperandFormat::I8 => 1,
            OperandFormat::U16 => 2,
            OperandFormat::I32 | OperandFormat::U32 | OperandFormat::Jump => 4,
            OperandFormat::F64 => 8,
        }
    }
}

impl Opcode {
    /// Convert byte to opcode
    ///
    /// Returns None if the byte does not correspond to a valid opcode.
    pub fn from_u8(byte: u8) -> Option<Self> {
        let op = match byte {
            0x00 => Self::Nop,
            0x01 => Self::LoopHead,
            0x02 => Self::Pop,
            0x03 => Self::PopN,
            0x04 => Self::Dup,
            0x05 => Self::Dup2,
            0x06 => Self::Swap,

            0x08 => Self::Undefined,
            0x09 => Self::Null,
            0x0A => Self::True,
            0x0B => Self::False,
            0x0C => Self::Zero,
            0x0D => Self::One,
            0x0E => Self::Int8,
            0x0F => Self::Int32,
            0x10 => Self::Double,
            0x11 => Self::String,
            0x12 => Self::Hole,

            0x18 => Self::GetLocal,
            0x19 => Self::SetLocal,
            0x1A => Self::GetArg,
            0x1B => Self::SetArg,
            0x1C => Self::IncLocal,
            0x1D => Self::DecLocal,

            0x20 => Self::Add,
            0x21 => Self::Sub,
            0x22 => Self::Mul,
            0x23 => Self::Div,
            0x24 => Self::Mod,
            0x25 => Self::BitAnd,
            0x26 => Self::BitOr,
            0x27 => Self::BitXor,
            0x28 => Self::Lsh,
            0x29 => Self::Rsh,
            0x2A => Self::Ursh,

            0x30 => Self::Neg,
            0x31 => Self::Pos,
            0x32 => Self::BitNot,
            0x33 => Self::Not,

            0x38 => Self::Eq,
            0x39 => Self::Ne,
            0x3A => Self::StrictEq,
            0x3B => Self::StrictNe,
            0x3C => Self::Lt,
            0x3D => Self::Le,
            0x3E => Self::Gt,
            0x3F => Self::Ge,

            0x40 => Self::Goto,
            0x41 => Self::IfEq,
            0x42 => Self::IfNe,
            0x43 => Self::And,
            0x44 => Self::Or,

            0x50 => Self::GetName,
            0x51 => Self::SetName,
            0x52 => Self::GetGlobal,
            0x53 => Self::SetGlobal,
            0x54 => Self::GetProp,
            0x55 => Self::SetProp,
            0x56 => Self::GetElem,
            0x57 => Self::SetElem,
            0x58 => Self::Call,

            0x60 => Self::Return,
            0x61 => Self::Stop,

            0x70 => Self::Debugger,
            0x71 => Self::Throw,
            0x72 => Self::Lambda,
            0x73 => Self::Arguments,
            0x74 => Self::EnterWith,
            0x75 => Self::LeaveWith,

            _ => return None,
        };
        Some(op)
    }

    /// Convert opcode to byte
    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Get the mnemonic of this opcode
    pub fn name(self) -> &'static str {
        match self {
            Self::Nop => "NOP",
            Self::LoopHead => "LOOPHEAD",
            Self::Pop => "POP",
            Self::PopN => "POPN",
            Self::Dup => "DUP",
            Self::Dup2 => "DUP2",
            Self::Swap => "SWAP",
            Self::Undefined => "UNDEFINED",
            Self::Null => "NULL",
            Self::True => "TRUE",
            Self::False => "FALSE",
            Self::Zero => "ZERO",
            Self::One => "ONE",
            Self::Int8 => "INT8",
            Self::Int32 => "INT32",
            Self::Double => "DOUBLE",
            Self::String => "STRING",
            Self::Hole => "HOLE",
            Self::GetLocal => "GETLOCAL",
            Self::SetLocal => "SETLOCAL",
            Self::GetArg => "GETARG",
            Self::SetArg => "SETARG",
            Self::IncLocal => "INCLOCAL",
            Self::DecLocal => "DECLOCAL",
            Self::Add => "ADD",
            Self::Sub => "SUB",
            Self::Mul => "MUL",
            Self::Div => "DIV",
            Self::Mod => "MOD",
            Self::BitAnd => "BITAND",
            Self::BitOr => "BITOR",
            Self::BitXor => "BITXOR",
            Self::Lsh => "LSH",
            Self::Rsh => "RSH",
            Self::Ursh => "URSH",
            Self::Neg => "NEG",
            Self::Pos => "POS",
            Self::BitNot => "BITNOT",
            Self::Not => "NOT",
            Self::Eq => "EQ",
            Self::Ne => "NE",
            Self::StrictEq => "STRICTEQ",
            Self::StrictNe => "STRICTNE",
            Self::Lt => "LT",
            Self::Le => "LE",
            Self::Gt => "GT",
            Self::Ge => "GE",
            Self::Goto => "GOTO",
            Self::IfEq => "IFEQ",
            Self::IfNe => "IFNE",
            Self::And => "AND",
            Self::Or => "OR",
            Self::GetName => "GETNAME",
            Self::SetName => "SETNAME",
            Self::GetGlobal => "GETGLOBAL",
            Self::SetGlobal => "SETGLOBAL",
            Self::GetProp => "GETPROP",
            Self::SetProp => "SETPROP",
            Self::GetElem => "GETELEM",
            Self::SetElem => "SETELEM",
            Self::Call => "CALL",
            Self::Return => "RETURN",
            Self::Stop => "STOP",
            Self::Debugger => "DEBUGGER",
            Self::Throw => "THROW",
            Self::Lambda => "LAMBDA",
            Self::Arguments => "ARGUMENTS",
            Self::EnterWith => "ENTERWITH",
            Self::LeaveWith => "LEAVEWITH",
        }
    }

    /// Operand layout following the opcode byte
    pub fn operand_format(self) -> OperandFormat {
        match self {
            Self::Int8 => OperandFormat::I8,
            Self::PopN
            | Self::GetLocal
            | Self::SetLocal
            | Self::GetArg
            | Self::SetArg
            | Self::IncLocal
            | Self::DecLocal
            | Self::Call => OperandFormat::U16,
            Self::Int32 => OperandFormat::I32,
            Self::String
            | Self::GetName
            | Self::SetName
            | Self::GetGlobal
            | Self::SetGlobal
            | Self::GetProp
            | Self::SetProp
            | Self::Lambda => OperandFormat::U32,
            Self::Double => OperandFormat::F64,
            Self::Goto | Self::IfEq | Self::IfNe | Self::And | Self::Or => OperandFormat::Jump,
            _ => OperandFormat::None,
        }
    }

    /// Physical length of the instruction in bytes (opcode + operands)
    #[inline]
    pub fn length(self) -> usize {
        1 + self.operand_format().size()
    }

    /// Check if this opcode carries a jump displacement
    pub fn is_jump(self) -> bool {
        self.operand_format() == OperandFormat::Jump
    }

    /// Check if this is a conditional jump
    pub fn is_conditional_jump(self) -> bool {
        matches!(self, Self::IfEq | Self::IfNe | Self::And | Self::Or)
    }

    /// Check if control can continue to the next instruction
    pub fn falls_through(self) -> bool {
        !matches!(self, Self::Goto | Self::Return | Self::Stop | Self::Throw)
    }

    /// Check if this opcode leaves its function
    pub fn is_return(self) -> bool {
        matches!(self, Self::Return | Self::Stop)
    }

    /// Check if this opcode reads or writes a local slot operand
    pub fn is_local_access(self) -> bool {
        matches!(
            self,
            Self::GetLocal | Self::SetLocal | Self::IncLocal | Self::DecLocal
        )
    }

    /// Check if this opcode reads or writes an argument slot operand
    pub fn is_arg_access(self) -> bool {
        matches!(self, Self::GetArg | Self::SetArg)
    }

    /// Check if the u32 operand is an atom index
    pub fn has_atom_operand(self) -> bool {
        matches!(
            self,
            Self::String
                | Self::GetName
                | Self::SetName
                | Self::GetGlobal
                | Self::SetGlobal
                | Self::GetProp
                | Self::SetProp
        )
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
