use crate::jvm::code::{Label, Opcode};
use std::fmt;

/// Errors produced while assembling a class
///
/// With the exception of [`Error::FormatLimit`] and [`Error::IoError`], every variant indicates a
/// bug in whatever is driving the assembler (emitting bad operands, forgetting to bind a label,
/// etc.). Format limits are different: they are caused by the program being compiled being too
/// large for the class file format, and should be reported as a diagnostic about that program.
#[derive(Debug)]
pub enum Error {
    IoError(std::io::Error),

    /// Some size constraint of the class file format was exceeded
    FormatLimit(FormatLimit),

    WrongOperandCount {
        opcode: Opcode,
        expected: usize,
        found: usize,
    },
    OperandOutOfRange {
        opcode: Opcode,
        operand: i64,
    },

    /// Byte is not an opcode the assembler knows how to emit or decode
    UnsupportedOpcode(u8),

    /// Jump helper used with an opcode that does not branch
    NotABranch(Opcode),

    /// Opcode has a stack effect that depends on a descriptor, so it must be emitted through the
    /// typed helpers (eg. `emit_invoke`)
    RequiresTypedEmit(Opcode),

    StackUnderflow {
        offset: usize,
        opcode: Opcode,
    },
    StackOverflow {
        offset: usize,
    },

    UnknownLabel(Label),
    LabelAlreadyBound(Label),

    /// Method was closed while a label was never bound
    UnboundLabel(Label),

    /// A label is reached with two different stack depths
    InconsistentStackDepth {
        label: Label,
        expected: i32,
        found: i32,
    },

    /// Table switch at this offset was never fully patched
    UnpatchedSwitch {
        offset: usize,
    },
    UnknownSwitch {
        offset: usize,
    },

    /// Branch, switch, or exception handler targets something that is not an instruction start
    InvalidJumpTarget {
        source: usize,
        target: isize,
    },
    InvalidExceptionRange {
        start: usize,
        end: usize,
    },

    NoOpenMethod,
    MethodAlreadyOpen(String),

    BadDescriptor(String),

    /// Abstract interpretation of the method body failed
    VerifierError {
        offset: usize,
        kind: VerifierErrorKind,
    },

    /// The two serialization passes disagree (indicates a bug in the assembler)
    SerializedSizeMismatch {
        expected: usize,
        written: usize,
    },
}

/// Limits imposed by the class file format
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatLimit {
    /// Constant pool index space (`u16`) is exhausted
    ConstantPoolOverflow { offset: usize },

    /// Modified UTF-8 encoding of a string is longer than 65535 bytes
    Utf8TooLong { encoded_length: usize },

    /// Method code is longer than 65535 bytes
    MethodCodeTooLarge { length: usize },

    /// Relative branch offset does not fit in a signed 16-bit value
    BranchOffsetOutOfRange { source: usize, target: usize },

    /// Local variable index does not fit in the `wide` form
    TooManyLocals(usize),

    /// Table switch has more entries than could ever fit in a method
    TableSwitchTooLarge { low: i32, high: i32 },

    /// Table inside the `Code` attribute has more than 65535 entries
    TooManyEntries { table: &'static str, count: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifierErrorKind {
    EmptyStack,

    /// Category 2 value split by a stack manipulation instruction
    InvalidWidth,
    InvalidType,
    InvalidIndex,
    MissingConstant(u16),
    NotLoadableConstant(u16),

    /// A block is entered with two different stack heights
    InconsistentStackHeight {
        expected: usize,
        found: usize,
    },

    /// Control can reach the end of the code array
    FallsOffEnd,

    /// Constructor call on something that is not an uninitialized object
    NotUninitialized,
}

impl Error {
    /// Is this a format limit (as opposed to a bug in the caller)?
    pub fn is_format_limit(&self) -> bool {
        matches!(self, Error::FormatLimit(_))
    }
}

impl From<FormatLimit> for Error {
    fn from(limit: FormatLimit) -> Error {
        Error::FormatLimit(limit)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::FormatLimit(limit) => write!(f, "class file format limit exceeded: {}", limit),
            Error::WrongOperandCount {
                opcode,
                expected,
                found,
            } => write!(
                f,
                "{} expects {} operand(s) but got {}",
                opcode, expected, found
            ),
            Error::OperandOutOfRange { opcode, operand } => {
                write!(f, "operand {} is out of range for {}", operand, opcode)
            }
            Error::UnsupportedOpcode(byte) => write!(f, "unsupported opcode 0x{:02x}", byte),
            Error::NotABranch(opcode) => write!(f, "{} is not a branch instruction", opcode),
            Error::RequiresTypedEmit(opcode) => {
                write!(f, "{} must be emitted with its descriptor", opcode)
            }
            Error::StackUnderflow { offset, opcode } => {
                write!(f, "stack underflow at {} ({})", offset, opcode)
            }
            Error::StackOverflow { offset } => write!(f, "stack overflow at {}", offset),
            Error::UnknownLabel(label) => write!(f, "label {} was never acquired", label),
            Error::LabelAlreadyBound(label) => write!(f, "label {} is already bound", label),
            Error::UnboundLabel(label) => write!(f, "label {} was never bound", label),
            Error::InconsistentStackDepth {
                label,
                expected,
                found,
            } => write!(
                f,
                "label {} reached with stack depth {} (expected {})",
                label, found, expected
            ),
            Error::UnpatchedSwitch { offset } => {
                write!(f, "table switch at {} has unpatched targets", offset)
            }
            Error::UnknownSwitch { offset } => write!(f, "no table switch at {}", offset),
            Error::InvalidJumpTarget { source, target } => {
                write!(f, "jump from {} to invalid target {}", source, target)
            }
            Error::InvalidExceptionRange { start, end } => {
                write!(f, "invalid exception range [{}, {})", start, end)
            }
            Error::NoOpenMethod => write!(f, "no method is open"),
            Error::MethodAlreadyOpen(name) => write!(f, "method {} is still open", name),
            Error::BadDescriptor(descriptor) => write!(f, "malformed descriptor {:?}", descriptor),
            Error::VerifierError { offset, kind } => {
                write!(f, "verification failed at {}: {:?}", offset, kind)
            }
            Error::SerializedSizeMismatch { expected, written } => write!(
                f,
                "class was sized at {} bytes but {} were written",
                expected, written
            ),
        }
    }
}

impl fmt::Display for FormatLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatLimit::ConstantPoolOverflow { offset } => {
                write!(f, "constant pool is full (next index {})", offset)
            }
            FormatLimit::Utf8TooLong { encoded_length } => {
                write!(f, "string constant is {} bytes long", encoded_length)
            }
            FormatLimit::MethodCodeTooLarge { length } => {
                write!(f, "method code is {} bytes long", length)
            }
            FormatLimit::BranchOffsetOutOfRange { source, target } => {
                write!(f, "branch from {} to {} is too far", source, target)
            }
            FormatLimit::TooManyLocals(index) => write!(f, "local variable {} is too large", index),
            FormatLimit::TableSwitchTooLarge { low, high } => {
                write!(f, "table switch over [{}, {}] is too large", low, high)
            }
            FormatLimit::TooManyEntries { table, count } => {
                write!(f, "{} has {} entries", table, count)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}
