//! Static metadata about every opcode the assembler supports
//!
//! A single table drives both emission (operand counts, encoded lengths, stack depth deltas) and
//! the abstract interpreter that synthesizes stack map frames (control flow and, for the simple
//! opcodes, the exact types popped and pushed).

use crate::jvm::Error;
use std::fmt;

/// A single bytecode opcode
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Opcode(pub u8);

/// Category of a value on the stack or in a local variable
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Slot {
    Int,
    Float,
    Long,
    Double,
    Reference,
}

impl Slot {
    /// Number of stack words (or local variable slots) the value occupies
    pub const fn words(&self) -> i32 {
        match self {
            Slot::Long | Slot::Double => 2,
            _ => 1,
        }
    }
}

/// How control leaves an instruction
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Flow {
    /// Falls through to the next instruction
    Normal,

    /// Conditional branch: either jumps or falls through
    Branch,

    /// Unconditional jump
    Goto,

    /// Jumps to one of several targets
    Switch,

    Return,
    Throw,
}

impl Flow {
    /// Does the next instruction only get reached by jumping to it?
    pub const fn is_unconditional(&self) -> bool {
        !matches!(self, Flow::Normal | Flow::Branch)
    }
}

/// Effect an instruction has on the stack and locals
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Effect {
    /// Pops values of the given categories (the last one being the top of the stack) then
    /// optionally pushes a value
    Fixed(&'static [Slot], Option<Slot>),

    /// Loads a local variable onto the stack (index is implicit for the short forms)
    Load(Slot, Option<u8>),

    /// Stores the top of the stack into a local variable (index is implicit for the short forms)
    Store(Slot, Option<u8>),

    /// Effect depends on operands, the constant pool, or the types on the stack
    Special,
}

/// Metadata about one opcode
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct OpcodeInfo {
    pub mnemonic: &'static str,

    /// Encoded length in bytes (`0` for variable-length encodings)
    pub length: u8,

    /// Number of operands passed at emission time
    pub operands: u8,

    /// Change in stack depth, in words (`None` if it depends on a descriptor)
    pub stack_delta: Option<i8>,

    pub flow: Flow,
    pub effect: Effect,
}

macro_rules! opcode_table {
    ($($name:ident = $code:literal, $len:literal, $ops:literal, $delta:expr, $flow:ident, $effect:expr;)*) => {
        impl Opcode {
            $(pub const $name: Opcode = Opcode($code);)*
        }

        const fn build_table() -> [Option<OpcodeInfo>; 256] {
            let mut table: [Option<OpcodeInfo>; 256] = [None; 256];
            $(
                table[$code] = Some(OpcodeInfo {
                    mnemonic: stringify!($name),
                    length: $len,
                    operands: $ops,
                    stack_delta: $delta,
                    flow: Flow::$flow,
                    effect: $effect,
                });
            )*
            table
        }
    };
}

use Slot::{Double as D, Float as F, Int as I, Long as L, Reference as A};

const fn fixed(pops: &'static [Slot], push: Option<Slot>) -> Effect {
    Effect::Fixed(pops, push)
}

const SPECIAL: Effect = Effect::Special;

opcode_table! {
    NOP = 0x00, 1, 0, Some(0), Normal, fixed(&[], None);
    ACONST_NULL = 0x01, 1, 0, Some(1), Normal, SPECIAL;
    ICONST_M1 = 0x02, 1, 0, Some(1), Normal, fixed(&[], Some(I));
    ICONST_0 = 0x03, 1, 0, Some(1), Normal, fixed(&[], Some(I));
    ICONST_1 = 0x04, 1, 0, Some(1), Normal, fixed(&[], Some(I));
    ICONST_2 = 0x05, 1, 0, Some(1), Normal, fixed(&[], Some(I));
    ICONST_3 = 0x06, 1, 0, Some(1), Normal, fixed(&[], Some(I));
    ICONST_4 = 0x07, 1, 0, Some(1), Normal, fixed(&[], Some(I));
    ICONST_5 = 0x08, 1, 0, Some(1), Normal, fixed(&[], Some(I));
    LCONST_0 = 0x09, 1, 0, Some(2), Normal, fixed(&[], Some(L));
    LCONST_1 = 0x0a, 1, 0, Some(2), Normal, fixed(&[], Some(L));
    FCONST_0 = 0x0b, 1, 0, Some(1), Normal, fixed(&[], Some(F));
    FCONST_1 = 0x0c, 1, 0, Some(1), Normal, fixed(&[], Some(F));
    FCONST_2 = 0x0d, 1, 0, Some(1), Normal, fixed(&[], Some(F));
    DCONST_0 = 0x0e, 1, 0, Some(2), Normal, fixed(&[], Some(D));
    DCONST_1 = 0x0f, 1, 0, Some(2), Normal, fixed(&[], Some(D));
    BIPUSH = 0x10, 2, 1, Some(1), Normal, fixed(&[], Some(I));
    SIPUSH = 0x11, 3, 1, Some(1), Normal, fixed(&[], Some(I));
    LDC = 0x12, 2, 1, Some(1), Normal, SPECIAL;
    LDC_W = 0x13, 3, 1, Some(1), Normal, SPECIAL;
    LDC2_W = 0x14, 3, 1, Some(2), Normal, SPECIAL;

    ILOAD = 0x15, 2, 1, Some(1), Normal, Effect::Load(I, None);
    LLOAD = 0x16, 2, 1, Some(2), Normal, Effect::Load(L, None);
    FLOAD = 0x17, 2, 1, Some(1), Normal, Effect::Load(F, None);
    DLOAD = 0x18, 2, 1, Some(2), Normal, Effect::Load(D, None);
    ALOAD = 0x19, 2, 1, Some(1), Normal, Effect::Load(A, None);
    ILOAD_0 = 0x1a, 1, 0, Some(1), Normal, Effect::Load(I, Some(0));
    ILOAD_1 = 0x1b, 1, 0, Some(1), Normal, Effect::Load(I, Some(1));
    ILOAD_2 = 0x1c, 1, 0, Some(1), Normal, Effect::Load(I, Some(2));
    ILOAD_3 = 0x1d, 1, 0, Some(1), Normal, Effect::Load(I, Some(3));
    LLOAD_0 = 0x1e, 1, 0, Some(2), Normal, Effect::Load(L, Some(0));
    LLOAD_1 = 0x1f, 1, 0, Some(2), Normal, Effect::Load(L, Some(1));
    LLOAD_2 = 0x20, 1, 0, Some(2), Normal, Effect::Load(L, Some(2));
    LLOAD_3 = 0x21, 1, 0, Some(2), Normal, Effect::Load(L, Some(3));
    FLOAD_0 = 0x22, 1, 0, Some(1), Normal, Effect::Load(F, Some(0));
    FLOAD_1 = 0x23, 1, 0, Some(1), Normal, Effect::Load(F, Some(1));
    FLOAD_2 = 0x24, 1, 0, Some(1), Normal, Effect::Load(F, Some(2));
    FLOAD_3 = 0x25, 1, 0, Some(1), Normal, Effect::Load(F, Some(3));
    DLOAD_0 = 0x26, 1, 0, Some(2), Normal, Effect::Load(D, Some(0));
    DLOAD_1 = 0x27, 1, 0, Some(2), Normal, Effect::Load(D, Some(1));
    DLOAD_2 = 0x28, 1, 0, Some(2), Normal, Effect::Load(D, Some(2));
    DLOAD_3 = 0x29, 1, 0, Some(2), Normal, Effect::Load(D, Some(3));
    ALOAD_0 = 0x2a, 1, 0, Some(1), Normal, Effect::Load(A, Some(0));
    ALOAD_1 = 0x2b, 1, 0, Some(1), Normal, Effect::Load(A, Some(1));
    ALOAD_2 = 0x2c, 1, 0, Some(1), Normal, Effect::Load(A, Some(2));
    ALOAD_3 = 0x2d, 1, 0, Some(1), Normal, Effect::Load(A, Some(3));

    IALOAD = 0x2e, 1, 0, Some(-1), Normal, fixed(&[A, I], Some(I));
    LALOAD = 0x2f, 1, 0, Some(0), Normal, fixed(&[A, I], Some(L));
    FALOAD = 0x30, 1, 0, Some(-1), Normal, fixed(&[A, I], Some(F));
    DALOAD = 0x31, 1, 0, Some(0), Normal, fixed(&[A, I], Some(D));
    AALOAD = 0x32, 1, 0, Some(-1), Normal, SPECIAL;
    BALOAD = 0x33, 1, 0, Some(-1), Normal, fixed(&[A, I], Some(I));
    CALOAD = 0x34, 1, 0, Some(-1), Normal, fixed(&[A, I], Some(I));
    SALOAD = 0x35, 1, 0, Some(-1), Normal, fixed(&[A, I], Some(I));

    ISTORE = 0x36, 2, 1, Some(-1), Normal, Effect::Store(I, None);
    LSTORE = 0x37, 2, 1, Some(-2), Normal, Effect::Store(L, None);
    FSTORE = 0x38, 2, 1, Some(-1), Normal, Effect::Store(F, None);
    DSTORE = 0x39, 2, 1, Some(-2), Normal, Effect::Store(D, None);
    ASTORE = 0x3a, 2, 1, Some(-1), Normal, Effect::Store(A, None);
    ISTORE_0 = 0x3b, 1, 0, Some(-1), Normal, Effect::Store(I, Some(0));
    ISTORE_1 = 0x3c, 1, 0, Some(-1), Normal, Effect::Store(I, Some(1));
    ISTORE_2 = 0x3d, 1, 0, Some(-1), Normal, Effect::Store(I, Some(2));
    ISTORE_3 = 0x3e, 1, 0, Some(-1), Normal, Effect::Store(I, Some(3));
    LSTORE_0 = 0x3f, 1, 0, Some(-2), Normal, Effect::Store(L, Some(0));
    LSTORE_1 = 0x40, 1, 0, Some(-2), Normal, Effect::Store(L, Some(1));
    LSTORE_2 = 0x41, 1, 0, Some(-2), Normal, Effect::Store(L, Some(2));
    LSTORE_3 = 0x42, 1, 0, Some(-2), Normal, Effect::Store(L, Some(3));
    FSTORE_0 = 0x43, 1, 0, Some(-1), Normal, Effect::Store(F, Some(0));
    FSTORE_1 = 0x44, 1, 0, Some(-1), Normal, Effect::Store(F, Some(1));
    FSTORE_2 = 0x45, 1, 0, Some(-1), Normal, Effect::Store(F, Some(2));
    FSTORE_3 = 0x46, 1, 0, Some(-1), Normal, Effect::Store(F, Some(3));
    DSTORE_0 = 0x47, 1, 0, Some(-2), Normal, Effect::Store(D, Some(0));
    DSTORE_1 = 0x48, 1, 0, Some(-2), Normal, Effect::Store(D, Some(1));
    DSTORE_2 = 0x49, 1, 0, Some(-2), Normal, Effect::Store(D, Some(2));
    DSTORE_3 = 0x4a, 1, 0, Some(-2), Normal, Effect::Store(D, Some(3));
    ASTORE_0 = 0x4b, 1, 0, Some(-1), Normal, Effect::Store(A, Some(0));
    ASTORE_1 = 0x4c, 1, 0, Some(-1), Normal, Effect::Store(A, Some(1));
    ASTORE_2 = 0x4d, 1, 0, Some(-1), Normal, Effect::Store(A, Some(2));
    ASTORE_3 = 0x4e, 1, 0, Some(-1), Normal, Effect::Store(A, Some(3));

    IASTORE = 0x4f, 1, 0, Some(-3), Normal, fixed(&[A, I, I], None);
    LASTORE = 0x50, 1, 0, Some(-4), Normal, fixed(&[A, I, L], None);
    FASTORE = 0x51, 1, 0, Some(-3), Normal, fixed(&[A, I, F], None);
    DASTORE = 0x52, 1, 0, Some(-4), Normal, fixed(&[A, I, D], None);
    AASTORE = 0x53, 1, 0, Some(-3), Normal, fixed(&[A, I, A], None);
    BASTORE = 0x54, 1, 0, Some(-3), Normal, fixed(&[A, I, I], None);
    CASTORE = 0x55, 1, 0, Some(-3), Normal, fixed(&[A, I, I], None);
    SASTORE = 0x56, 1, 0, Some(-3), Normal, fixed(&[A, I, I], None);

    POP = 0x57, 1, 0, Some(-1), Normal, SPECIAL;
    POP2 = 0x58, 1, 0, Some(-2), Normal, SPECIAL;
    DUP = 0x59, 1, 0, Some(1), Normal, SPECIAL;
    DUP_X1 = 0x5a, 1, 0, Some(1), Normal, SPECIAL;
    DUP_X2 = 0x5b, 1, 0, Some(1), Normal, SPECIAL;
    DUP2 = 0x5c, 1, 0, Some(2), Normal, SPECIAL;
    DUP2_X1 = 0x5d, 1, 0, Some(2), Normal, SPECIAL;
    DUP2_X2 = 0x5e, 1, 0, Some(2), Normal, SPECIAL;
    SWAP = 0x5f, 1, 0, Some(0), Normal, SPECIAL;

    IADD = 0x60, 1, 0, Some(-1), Normal, fixed(&[I, I], Some(I));
    LADD = 0x61, 1, 0, Some(-2), Normal, fixed(&[L, L], Some(L));
    FADD = 0x62, 1, 0, Some(-1), Normal, fixed(&[F, F], Some(F));
    DADD = 0x63, 1, 0, Some(-2), Normal, fixed(&[D, D], Some(D));
    ISUB = 0x64, 1, 0, Some(-1), Normal, fixed(&[I, I], Some(I));
    LSUB = 0x65, 1, 0, Some(-2), Normal, fixed(&[L, L], Some(L));
    FSUB = 0x66, 1, 0, Some(-1), Normal, fixed(&[F, F], Some(F));
    DSUB = 0x67, 1, 0, Some(-2), Normal, fixed(&[D, D], Some(D));
    IMUL = 0x68, 1, 0, Some(-1), Normal, fixed(&[I, I], Some(I));
    LMUL = 0x69, 1, 0, Some(-2), Normal, fixed(&[L, L], Some(L));
    FMUL = 0x6a, 1, 0, Some(-1), Normal, fixed(&[F, F], Some(F));
    DMUL = 0x6b, 1, 0, Some(-2), Normal, fixed(&[D, D], Some(D));
    IDIV = 0x6c, 1, 0, Some(-1), Normal, fixed(&[I, I], Some(I));
    LDIV = 0x6d, 1, 0, Some(-2), Normal, fixed(&[L, L], Some(L));
    FDIV = 0x6e, 1, 0, Some(-1), Normal, fixed(&[F, F], Some(F));
    DDIV = 0x6f, 1, 0, Some(-2), Normal, fixed(&[D, D], Some(D));
    IREM = 0x70, 1, 0, Some(-1), Normal, fixed(&[I, I], Some(I));
    LREM = 0x71, 1, 0, Some(-2), Normal, fixed(&[L, L], Some(L));
    FREM = 0x72, 1, 0, Some(-1), Normal, fixed(&[F, F], Some(F));
    DREM = 0x73, 1, 0, Some(-2), Normal, fixed(&[D, D], Some(D));
    INEG = 0x74, 1, 0, Some(0), Normal, fixed(&[I], Some(I));
    LNEG = 0x75, 1, 0, Some(0), Normal, fixed(&[L], Some(L));
    FNEG = 0x76, 1, 0, Some(0), Normal, fixed(&[F], Some(F));
    DNEG = 0x77, 1, 0, Some(0), Normal, fixed(&[D], Some(D));
    ISHL = 0x78, 1, 0, Some(-1), Normal, fixed(&[I, I], Some(I));
    LSHL = 0x79, 1, 0, Some(-1), Normal, fixed(&[L, I], Some(L));
    ISHR = 0x7a, 1, 0, Some(-1), Normal, fixed(&[I, I], Some(I));
    LSHR = 0x7b, 1, 0, Some(-1), Normal, fixed(&[L, I], Some(L));
    IUSHR = 0x7c, 1, 0, Some(-1), Normal, fixed(&[I, I], Some(I));
    LUSHR = 0x7d, 1, 0, Some(-1), Normal, fixed(&[L, I], Some(L));
    IAND = 0x7e, 1, 0, Some(-1), Normal, fixed(&[I, I], Some(I));
    LAND = 0x7f, 1, 0, Some(-2), Normal, fixed(&[L, L], Some(L));
    IOR = 0x80, 1, 0, Some(-1), Normal, fixed(&[I, I], Some(I));
    LOR = 0x81, 1, 0, Some(-2), Normal, fixed(&[L, L], Some(L));
    IXOR = 0x82, 1, 0, Some(-1), Normal, fixed(&[I, I], Some(I));
    LXOR = 0x83, 1, 0, Some(-2), Normal, fixed(&[L, L], Some(L));
    IINC = 0x84, 3, 2, Some(0), Normal, SPECIAL;

    I2L = 0x85, 1, 0, Some(1), Normal, fixed(&[I], Some(L));
    I2F = 0x86, 1, 0, Some(0), Normal, fixed(&[I], Some(F));
    I2D = 0x87, 1, 0, Some(1), Normal, fixed(&[I], Some(D));
    L2I = 0x88, 1, 0, Some(-1), Normal, fixed(&[L], Some(I));
    L2F = 0x89, 1, 0, Some(-1), Normal, fixed(&[L], Some(F));
    L2D = 0x8a, 1, 0, Some(0), Normal, fixed(&[L], Some(D));
    F2I = 0x8b, 1, 0, Some(0), Normal, fixed(&[F], Some(I));
    F2L = 0x8c, 1, 0, Some(1), Normal, fixed(&[F], Some(L));
    F2D = 0x8d, 1, 0, Some(1), Normal, fixed(&[F], Some(D));
    D2I = 0x8e, 1, 0, Some(-1), Normal, fixed(&[D], Some(I));
    D2L = 0x8f, 1, 0, Some(0), Normal, fixed(&[D], Some(L));
    D2F = 0x90, 1, 0, Some(-1), Normal, fixed(&[D], Some(F));
    I2B = 0x91, 1, 0, Some(0), Normal, fixed(&[I], Some(I));
    I2C = 0x92, 1, 0, Some(0), Normal, fixed(&[I], Some(I));
    I2S = 0x93, 1, 0, Some(0), Normal, fixed(&[I], Some(I));

    LCMP = 0x94, 1, 0, Some(-3), Normal, fixed(&[L, L], Some(I));
    FCMPL = 0x95, 1, 0, Some(-1), Normal, fixed(&[F, F], Some(I));
    FCMPG = 0x96, 1, 0, Some(-1), Normal, fixed(&[F, F], Some(I));
    DCMPL = 0x97, 1, 0, Some(-3), Normal, fixed(&[D, D], Some(I));
    DCMPG = 0x98, 1, 0, Some(-3), Normal, fixed(&[D, D], Some(I));

    IFEQ = 0x99, 3, 1, Some(-1), Branch, fixed(&[I], None);
    IFNE = 0x9a, 3, 1, Some(-1), Branch, fixed(&[I], None);
    IFLT = 0x9b, 3, 1, Some(-1), Branch, fixed(&[I], None);
    IFGE = 0x9c, 3, 1, Some(-1), Branch, fixed(&[I], None);
    IFGT = 0x9d, 3, 1, Some(-1), Branch, fixed(&[I], None);
    IFLE = 0x9e, 3, 1, Some(-1), Branch, fixed(&[I], None);
    IF_ICMPEQ = 0x9f, 3, 1, Some(-2), Branch, fixed(&[I, I], None);
    IF_ICMPNE = 0xa0, 3, 1, Some(-2), Branch, fixed(&[I, I], None);
    IF_ICMPLT = 0xa1, 3, 1, Some(-2), Branch, fixed(&[I, I], None);
    IF_ICMPGE = 0xa2, 3, 1, Some(-2), Branch, fixed(&[I, I], None);
    IF_ICMPGT = 0xa3, 3, 1, Some(-2), Branch, fixed(&[I, I], None);
    IF_ICMPLE = 0xa4, 3, 1, Some(-2), Branch, fixed(&[I, I], None);
    IF_ACMPEQ = 0xa5, 3, 1, Some(-2), Branch, fixed(&[A, A], None);
    IF_ACMPNE = 0xa6, 3, 1, Some(-2), Branch, fixed(&[A, A], None);
    GOTO = 0xa7, 3, 1, Some(0), Goto, fixed(&[], None);
    TABLESWITCH = 0xaa, 0, 0, Some(-1), Switch, fixed(&[I], None);

    IRETURN = 0xac, 1, 0, Some(-1), Return, fixed(&[I], None);
    LRETURN = 0xad, 1, 0, Some(-2), Return, fixed(&[L], None);
    FRETURN = 0xae, 1, 0, Some(-1), Return, fixed(&[F], None);
    DRETURN = 0xaf, 1, 0, Some(-2), Return, fixed(&[D], None);
    ARETURN = 0xb0, 1, 0, Some(-1), Return, fixed(&[A], None);
    RETURN = 0xb1, 1, 0, Some(0), Return, fixed(&[], None);

    GETSTATIC = 0xb2, 3, 1, None, Normal, SPECIAL;
    PUTSTATIC = 0xb3, 3, 1, None, Normal, SPECIAL;
    GETFIELD = 0xb4, 3, 1, None, Normal, SPECIAL;
    PUTFIELD = 0xb5, 3, 1, None, Normal, SPECIAL;
    INVOKEVIRTUAL = 0xb6, 3, 1, None, Normal, SPECIAL;
    INVOKESPECIAL = 0xb7, 3, 1, None, Normal, SPECIAL;
    INVOKESTATIC = 0xb8, 3, 1, None, Normal, SPECIAL;
    INVOKEINTERFACE = 0xb9, 5, 2, None, Normal, SPECIAL;

    NEW = 0xbb, 3, 1, Some(1), Normal, SPECIAL;
    NEWARRAY = 0xbc, 2, 1, Some(0), Normal, SPECIAL;
    ANEWARRAY = 0xbd, 3, 1, Some(0), Normal, SPECIAL;
    ARRAYLENGTH = 0xbe, 1, 0, Some(0), Normal, fixed(&[A], Some(I));
    ATHROW = 0xbf, 1, 0, Some(-1), Throw, fixed(&[A], None);
    CHECKCAST = 0xc0, 3, 1, Some(0), Normal, SPECIAL;
    INSTANCEOF = 0xc1, 3, 1, Some(0), Normal, fixed(&[A], Some(I));
    MONITORENTER = 0xc2, 1, 0, Some(-1), Normal, fixed(&[A], None);
    MONITOREXIT = 0xc3, 1, 0, Some(-1), Normal, fixed(&[A], None);
    WIDE = 0xc4, 0, 0, Some(0), Normal, SPECIAL;
    MULTIANEWARRAY = 0xc5, 4, 2, None, Normal, SPECIAL;
    IFNULL = 0xc6, 3, 1, Some(-1), Branch, fixed(&[A], None);
    IFNONNULL = 0xc7, 3, 1, Some(-1), Branch, fixed(&[A], None);
}

static OPCODE_TABLE: [Option<OpcodeInfo>; 256] = build_table();

impl Opcode {
    /// Metadata for this opcode (`None` if the assembler does not support it)
    pub fn info(self) -> Option<&'static OpcodeInfo> {
        OPCODE_TABLE[self.0 as usize].as_ref()
    }

    /// Like [`Opcode::info`], but unsupported opcodes are an error
    pub fn require_info(self) -> Result<&'static OpcodeInfo, Error> {
        self.info().ok_or(Error::UnsupportedOpcode(self.0))
    }

    pub fn mnemonic(self) -> &'static str {
        self.info().map_or("<unknown>", |info| info.mnemonic)
    }
}

impl fmt::Debug for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.mnemonic().to_ascii_lowercase())
    }
}

/// One decoded instruction
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Instruction {
    pub opcode: Opcode,

    /// Encoded length, including any `wide` prefix or switch padding
    pub length: usize,

    /// Was this instruction prefixed by `wide`?
    pub wide: bool,

    /// Decoded operands (unused slots are 0)
    ///
    /// Constant pool indices, local indices, and `newarray` type codes are unsigned. Immediate
    /// values and branch offsets are sign-extended.
    pub operands: [i32; 2],
}

fn read_u8(code: &[u8], at: usize) -> Result<u8, Error> {
    code.get(at).copied().ok_or(Error::VerifierError {
        offset: at,
        kind: crate::jvm::VerifierErrorKind::InvalidIndex,
    })
}

fn read_u16(code: &[u8], at: usize) -> Result<u16, Error> {
    Ok(u16::from_be_bytes([read_u8(code, at)?, read_u8(code, at + 1)?]))
}

fn read_i32(code: &[u8], at: usize) -> Result<i32, Error> {
    Ok(i32::from_be_bytes([
        read_u8(code, at)?,
        read_u8(code, at + 1)?,
        read_u8(code, at + 2)?,
        read_u8(code, at + 3)?,
    ]))
}

/// Number of padding bytes after a `tableswitch` opcode at `pc`
pub const fn switch_padding(pc: usize) -> usize {
    (4 - (pc + 1) % 4) % 4
}

/// Decode the instruction starting at `pc`
pub fn decode(code: &[u8], pc: usize) -> Result<Instruction, Error> {
    let opcode = Opcode(read_u8(code, pc)?);
    let info = opcode.require_info()?;

    if opcode == Opcode::WIDE {
        let modified = Opcode(read_u8(code, pc + 1)?);
        let index = read_u16(code, pc + 2)? as i32;
        return match modified.require_info()?.effect {
            Effect::Load(_, None) | Effect::Store(_, None) => Ok(Instruction {
                opcode: modified,
                length: 4,
                wide: true,
                operands: [index, 0],
            }),
            _ if modified == Opcode::IINC => Ok(Instruction {
                opcode: modified,
                length: 6,
                wide: true,
                operands: [index, read_u16(code, pc + 4)? as i16 as i32],
            }),
            _ => Err(Error::UnsupportedOpcode(modified.0)),
        };
    }

    if opcode == Opcode::TABLESWITCH {
        let table = decode_table_switch(code, pc)?;
        return Ok(Instruction {
            opcode,
            length: table.length,
            wide: false,
            operands: [table.low, table.high],
        });
    }

    let operands = match opcode {
        Opcode::BIPUSH => [read_u8(code, pc + 1)? as i8 as i32, 0],
        Opcode::SIPUSH => [read_u16(code, pc + 1)? as i16 as i32, 0],
        Opcode::IINC => [
            read_u8(code, pc + 1)? as i32,
            read_u8(code, pc + 2)? as i8 as i32,
        ],
        Opcode::INVOKEINTERFACE => [
            read_u16(code, pc + 1)? as i32,
            read_u8(code, pc + 3)? as i32,
        ],
        Opcode::MULTIANEWARRAY => [
            read_u16(code, pc + 1)? as i32,
            read_u8(code, pc + 3)? as i32,
        ],
        _ if matches!(info.flow, Flow::Branch | Flow::Goto) => {
            [read_u16(code, pc + 1)? as i16 as i32, 0]
        }
        _ => match info.length {
            2 => [read_u8(code, pc + 1)? as i32, 0],
            3 => [read_u16(code, pc + 1)? as i32, 0],
            _ => [0, 0],
        },
    };

    Ok(Instruction {
        opcode,
        length: info.length as usize,
        wide: false,
        operands,
    })
}

/// Decoded `tableswitch` instruction (offsets are relative to the opcode)
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TableSwitch {
    pub default: i32,
    pub low: i32,
    pub high: i32,
    pub offsets: Vec<i32>,

    /// Total encoded length
    pub length: usize,
}

pub fn decode_table_switch(code: &[u8], pc: usize) -> Result<TableSwitch, Error> {
    let base = pc + 1 + switch_padding(pc);
    let default = read_i32(code, base)?;
    let low = read_i32(code, base + 4)?;
    let high = read_i32(code, base + 8)?;
    if high < low {
        return Err(Error::VerifierError {
            offset: pc,
            kind: crate::jvm::VerifierErrorKind::InvalidIndex,
        });
    }
    let count = (high as i64 - low as i64 + 1) as usize;
    let offsets = (0..count)
        .map(|i| read_i32(code, base + 12 + 4 * i))
        .collect::<Result<Vec<i32>, Error>>()?;
    Ok(TableSwitch {
        default,
        low,
        high,
        offsets,
        length: base + 12 + 4 * count - pc,
    })
}

/// Offsets at which instructions start (in increasing order)
pub fn instruction_starts(code: &[u8]) -> Result<Vec<usize>, Error> {
    let mut starts = vec![];
    let mut pc = 0;
    while pc < code.len() {
        starts.push(pc);
        pc += decode(code, pc)?.length;
    }
    Ok(starts)
}
