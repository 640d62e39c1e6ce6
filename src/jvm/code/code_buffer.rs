use super::opcodes::{switch_padding, Effect, Flow, Opcode, OpcodeInfo, Slot};
use super::{JumpTarget, Label};
use crate::jvm::{Error, FormatLimit};
use byteorder::{BigEndian, ByteOrder};

/// Largest number of bytes in the code array of a single method
pub const MAX_CODE_LENGTH: usize = u16::MAX as usize;

/// Largest number of words the operand stack may hold
pub const MAX_STACK_DEPTH: i32 = i16::MAX as i32;

/// Growable code array for one method body
///
/// Besides encoding instructions, the buffer tracks the running stack depth (in words), the
/// highest local variable slot touched, and the facts needed later to partition the code into
/// super blocks: every jump edge and every offset that follows an unconditional transfer of
/// control.
///
/// The buffer only reasons about depths, not types. Types are inferred once the method is
/// complete (see [`crate::jvm::verifier`]).
#[derive(Debug, Default)]
pub struct CodeBuffer {
    code: Vec<u8>,

    /// Depth of the stack (in words) after the last emitted instruction
    stack_depth: i32,
    max_stack: i32,

    /// One past the highest local variable slot used so far
    max_locals: usize,

    /// Can control reach the end of the buffer?
    reachable: bool,

    labels: Vec<LabelState>,

    /// Branches to labels that are not bound yet
    fixups: Vec<Fixup>,

    /// Resolved jump edges as `(source, target)` offsets
    jumps: Vec<(usize, isize)>,

    /// Offsets of instructions that follow an unconditional transfer of control
    block_starts: Vec<usize>,

    switches: Vec<SwitchTable>,
}

#[derive(Debug, Default, Clone, Copy)]
struct LabelState {
    /// Offset the label is bound to
    offset: Option<usize>,

    /// Stack depth expected when the label is reached
    depth: Option<i32>,
}

/// Pending patch of a forward branch
#[derive(Debug, Clone, Copy)]
struct Fixup {
    label: Label,

    /// Offset of the branch opcode (offsets are relative to this)
    source: usize,
}

#[derive(Debug)]
struct SwitchTable {
    start: usize,
    default_patched: bool,
    cases_patched: Vec<bool>,
}

impl SwitchTable {
    /// Offset of the default branch (case `n` is 4 * (n + 3) bytes later)
    fn default_offset(&self) -> usize {
        self.start + 1 + switch_padding(self.start)
    }
}

impl CodeBuffer {
    pub fn new() -> CodeBuffer {
        CodeBuffer {
            reachable: true,
            ..CodeBuffer::default()
        }
    }

    /// Offset at which the next instruction will be emitted
    pub fn current_offset(&self) -> usize {
        self.code.len()
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn stack_depth(&self) -> i32 {
        self.stack_depth
    }

    /// Override the stack depth
    ///
    /// This is mostly useful after an unconditional jump, when the code that follows is reached by
    /// a label the buffer has not seen jumps to yet.
    pub fn set_stack_depth(&mut self, depth: i32) -> Result<(), Error> {
        let offset = self.code.len();
        if depth < 0 {
            return Err(Error::StackUnderflow {
                offset,
                opcode: Opcode::NOP,
            });
        }
        self.update_depth(depth, offset)
    }

    pub fn max_stack(&self) -> u16 {
        self.max_stack as u16
    }

    pub fn max_locals(&self) -> u16 {
        self.max_locals as u16
    }

    /// Is the next instruction reachable by falling through from the previous one?
    pub fn is_reachable(&self) -> bool {
        self.reachable
    }

    /// Jump edges recorded so far, as `(source, target)` offsets
    pub fn jumps(&self) -> &[(usize, isize)] {
        &self.jumps
    }

    /// Offsets of instructions that follow unconditional transfers of control
    pub fn block_starts(&self) -> &[usize] {
        &self.block_starts
    }

    /// Reserve local variable slots (eg. for parameters)
    pub fn note_local(&mut self, index: usize, words: usize) -> Result<(), Error> {
        let end = index + words;
        if end > u16::MAX as usize {
            return Err(FormatLimit::TooManyLocals(index).into());
        }
        self.max_locals = self.max_locals.max(end);
        Ok(())
    }

    /// Emit an instruction whose stack effect is known statically
    ///
    /// Operand counts and ranges are checked against the opcode table. Local variable instructions
    /// with indices above 255 (or `iinc` with increments outside a signed byte) automatically get
    /// a `wide` prefix and `ldc` is promoted to `ldc_w` when the constant index needs it. Branches
    /// emitted this way take a raw relative offset.
    pub fn emit(&mut self, opcode: Opcode, operands: &[i32]) -> Result<(), Error> {
        let info = opcode.require_info()?;
        if opcode == Opcode::WIDE {
            return Err(Error::UnsupportedOpcode(opcode.0));
        }
        if info.stack_delta.is_none() || opcode == Opcode::TABLESWITCH {
            return Err(Error::RequiresTypedEmit(opcode));
        }
        check_operand_count(opcode, info, operands)?;

        if matches!(info.flow, Flow::Branch | Flow::Goto) {
            let offset = operand_in_range(opcode, operands[0], i16::MIN as i64, i16::MAX as i64)?;
            return self.emit_jump(opcode, JumpTarget::RawOffset(offset as i16));
        }

        let popped = words_popped(opcode, info);
        let pushed = popped + info.stack_delta.map_or(0, i32::from);
        let mut bytes = Vec::with_capacity(6);

        match info.effect {
            Effect::Load(slot, None) | Effect::Store(slot, None) => {
                let index = operand_in_range(opcode, operands[0], 0, u16::MAX as i64)? as u16;
                self.note_local(index as usize, slot.words() as usize)?;
                if index > u8::MAX as u16 {
                    bytes.extend_from_slice(&[Opcode::WIDE.0, opcode.0]);
                    bytes.extend_from_slice(&index.to_be_bytes());
                } else {
                    bytes.extend_from_slice(&[opcode.0, index as u8]);
                }
            }
            Effect::Load(slot, Some(index)) | Effect::Store(slot, Some(index)) => {
                self.note_local(index as usize, slot.words() as usize)?;
                bytes.push(opcode.0);
            }
            _ => match opcode {
                Opcode::IINC => {
                    let index = operand_in_range(opcode, operands[0], 0, u16::MAX as i64)? as u16;
                    let increment =
                        operand_in_range(opcode, operands[1], i16::MIN as i64, i16::MAX as i64)?
                            as i16;
                    self.note_local(index as usize, 1)?;
                    if index > u8::MAX as u16 || increment != increment as i8 as i16 {
                        bytes.extend_from_slice(&[Opcode::WIDE.0, opcode.0]);
                        bytes.extend_from_slice(&index.to_be_bytes());
                        bytes.extend_from_slice(&increment.to_be_bytes());
                    } else {
                        bytes.extend_from_slice(&[opcode.0, index as u8, increment as i8 as u8]);
                    }
                }
                Opcode::BIPUSH => {
                    let value = operand_in_range(opcode, operands[0], -128, 127)?;
                    bytes.extend_from_slice(&[opcode.0, value as i8 as u8]);
                }
                Opcode::SIPUSH => {
                    let value =
                        operand_in_range(opcode, operands[0], i16::MIN as i64, i16::MAX as i64)?;
                    bytes.push(opcode.0);
                    bytes.extend_from_slice(&(value as i16).to_be_bytes());
                }
                Opcode::LDC => {
                    let index = operand_in_range(opcode, operands[0], 1, u16::MAX as i64)? as u16;
                    if index > u8::MAX as u16 {
                        bytes.push(Opcode::LDC_W.0);
                        bytes.extend_from_slice(&index.to_be_bytes());
                    } else {
                        bytes.extend_from_slice(&[opcode.0, index as u8]);
                    }
                }
                Opcode::NEWARRAY => {
                    let code = operand_in_range(opcode, operands[0], 4, 11)?;
                    bytes.extend_from_slice(&[opcode.0, code as u8]);
                }
                _ => encode_generic(opcode, info, operands, &mut bytes)?,
            },
        }

        self.append(opcode, &bytes, popped, pushed, info.flow)
    }

    /// Emit an instruction whose stack effect depends on a descriptor
    ///
    /// `popped` and `pushed` are measured in words. This is how field accesses, invocations, and
    /// `multianewarray` get emitted.
    pub fn emit_with_stack_effect(
        &mut self,
        opcode: Opcode,
        operands: &[i32],
        popped: i32,
        pushed: i32,
    ) -> Result<(), Error> {
        let info = opcode.require_info()?;
        if info.stack_delta.is_some() {
            return self.emit(opcode, operands);
        }
        check_operand_count(opcode, info, operands)?;
        if popped < 0 || pushed < 0 {
            return Err(Error::OperandOutOfRange {
                opcode,
                operand: popped.min(pushed) as i64,
            });
        }

        let mut bytes = Vec::with_capacity(5);
        match opcode {
            Opcode::INVOKEINTERFACE => {
                let index = operand_in_range(opcode, operands[0], 1, u16::MAX as i64)? as u16;
                let count = operand_in_range(opcode, operands[1], 1, u8::MAX as i64)? as u8;
                bytes.push(opcode.0);
                bytes.extend_from_slice(&index.to_be_bytes());
                bytes.extend_from_slice(&[count, 0]);
            }
            Opcode::MULTIANEWARRAY => {
                let index = operand_in_range(opcode, operands[0], 1, u16::MAX as i64)? as u16;
                let dimensions = operand_in_range(opcode, operands[1], 1, u8::MAX as i64)? as u8;
                bytes.push(opcode.0);
                bytes.extend_from_slice(&index.to_be_bytes());
                bytes.push(dimensions);
            }
            _ => encode_generic(opcode, info, operands, &mut bytes)?,
        }

        self.append(opcode, &bytes, popped, pushed, info.flow)
    }

    /// Emit a conditional or unconditional branch
    ///
    /// If the target label is already bound, the offset is written immediately. Otherwise a fixup
    /// is recorded and the offset gets patched in when the label is bound.
    pub fn emit_jump(&mut self, opcode: Opcode, target: JumpTarget) -> Result<(), Error> {
        let info = opcode.require_info()?;
        if !matches!(info.flow, Flow::Branch | Flow::Goto) {
            return Err(Error::NotABranch(opcode));
        }

        let source = self.code.len();
        let popped = words_popped(opcode, info);
        let depth_after = self.stack_depth - popped;
        if depth_after < 0 {
            return Err(Error::StackUnderflow {
                offset: source,
                opcode,
            });
        }

        let relative: i16 = match target {
            JumpTarget::RawOffset(offset) => {
                self.jumps.push((source, source as isize + offset as isize));
                offset
            }
            JumpTarget::Label(label) => {
                self.expect_depth(label, depth_after)?;
                match self.label_state(label)?.offset {
                    Some(target) => {
                        self.jumps.push((source, target as isize));
                        branch_offset(source, target)?
                    }
                    None => {
                        self.fixups.push(Fixup { label, source });
                        0
                    }
                }
            }
        };

        let mut bytes = [opcode.0, 0, 0];
        BigEndian::write_i16(&mut bytes[1..], relative);
        self.append(opcode, &bytes, popped, 0, info.flow)
    }

    /// Get a fresh unbound label
    pub fn acquire_label(&mut self) -> Label {
        let label = Label(self.labels.len() as u32);
        self.labels.push(LabelState::default());
        label
    }

    /// Offset a label is bound to
    pub fn label_offset(&self, label: Label) -> Result<Option<usize>, Error> {
        Ok(self.label_state(label)?.offset)
    }

    /// Bind a label to the current offset and patch every pending branch to it
    ///
    /// When the current offset is reachable by falling through, the stack depth must match the
    /// depth of every branch to the label. When it is not, the depth of those branches is adopted.
    pub fn mark_label(&mut self, label: Label) -> Result<(), Error> {
        let state = *self.label_state(label)?;
        if state.offset.is_some() {
            return Err(Error::LabelAlreadyBound(label));
        }

        match (self.reachable, state.depth) {
            (true, Some(expected)) if expected != self.stack_depth => {
                return Err(Error::InconsistentStackDepth {
                    label,
                    expected,
                    found: self.stack_depth,
                });
            }
            (false, Some(expected)) => self.stack_depth = expected,
            _ => (),
        }
        self.reachable = true;

        let target = self.code.len();
        let depth = self.stack_depth;
        let state = &mut self.labels[label.index()];
        state.offset = Some(target);
        state.depth = Some(depth);

        let mut pending = vec![];
        self.fixups.retain(|fixup| {
            let matches = fixup.label == label;
            if matches {
                pending.push(*fixup);
            }
            !matches
        });
        for Fixup { source, .. } in pending {
            let relative = branch_offset(source, target)?;
            BigEndian::write_i16(&mut self.code[source + 1..source + 3], relative);
            self.jumps.push((source, target as isize));
        }

        Ok(())
    }

    /// Bind a label at which an exception handler starts
    ///
    /// Handlers are entered with just the exception on the stack. Labels bound at the same offset
    /// right after an unconditional transfer (typically the end of the protected range) don't
    /// make the handler reachable by falling through.
    pub fn mark_handler(&mut self, label: Label) -> Result<(), Error> {
        let after_transfer = self.block_starts.last() == Some(&self.code.len());
        if !self.reachable || after_transfer {
            self.reachable = false;
            self.stack_depth = 1;
        }
        if self.label_state(label)?.depth.is_none() {
            self.labels[label.index()].depth = Some(1);
        }
        self.mark_label(label)?;
        self.update_depth(1, self.code.len())
    }

    /// Lay out a `tableswitch` with room for cases `low..=high`
    ///
    /// Returns the offset of the instruction, which is what [`CodeBuffer::patch_switch_default`]
    /// and [`CodeBuffer::patch_switch_case`] expect. All targets start out unpatched.
    pub fn reserve_table_switch(&mut self, low: i32, high: i32) -> Result<usize, Error> {
        let opcode = Opcode::TABLESWITCH;
        if high < low {
            return Err(Error::OperandOutOfRange {
                opcode,
                operand: high as i64,
            });
        }
        let count = (high as i64 - low as i64 + 1) as usize;
        if count > MAX_CODE_LENGTH / 4 {
            return Err(FormatLimit::TableSwitchTooLarge { low, high }.into());
        }

        let start = self.code.len();
        let padding = switch_padding(start);
        let mut bytes = vec![0u8; 1 + padding + 12 + 4 * count];
        bytes[0] = opcode.0;
        BigEndian::write_i32(&mut bytes[1 + padding + 4..], low);
        BigEndian::write_i32(&mut bytes[1 + padding + 8..], high);

        self.append(opcode, &bytes, 1, 0, Flow::Switch)?;
        self.switches.push(SwitchTable {
            start,
            default_patched: false,
            cases_patched: vec![false; count],
        });
        Ok(start)
    }

    /// Point the default branch of the switch at `start` to an offset
    pub fn patch_switch_default(&mut self, start: usize, target: usize) -> Result<(), Error> {
        let switch_idx = self.switch_index(start)?;
        let at = self.switches[switch_idx].default_offset();
        self.switches[switch_idx].default_patched = true;
        self.patch_switch_slot(start, at, target)
    }

    /// Point the `index`-th case (counting from `low`) of the switch at `start` to an offset
    pub fn patch_switch_case(
        &mut self,
        start: usize,
        index: usize,
        target: usize,
    ) -> Result<(), Error> {
        let switch_idx = self.switch_index(start)?;
        let switch = &mut self.switches[switch_idx];
        match switch.cases_patched.get_mut(index) {
            Some(patched) => *patched = true,
            None => {
                return Err(Error::OperandOutOfRange {
                    opcode: Opcode::TABLESWITCH,
                    operand: index as i64,
                })
            }
        }
        let at = switch.default_offset() + 12 + 4 * index;
        self.patch_switch_slot(start, at, target)
    }

    fn patch_switch_slot(&mut self, start: usize, at: usize, target: usize) -> Result<(), Error> {
        let relative = target as i64 - start as i64;
        BigEndian::write_i32(&mut self.code[at..at + 4], relative as i32);
        self.jumps.push((start, target as isize));
        Ok(())
    }

    /// Check that every label is bound and every switch slot is patched
    pub fn check_complete(&self) -> Result<(), Error> {
        if let Some(idx) = self.labels.iter().position(|state| state.offset.is_none()) {
            return Err(Error::UnboundLabel(Label(idx as u32)));
        }
        for switch in &self.switches {
            if !switch.default_patched || switch.cases_patched.contains(&false) {
                return Err(Error::UnpatchedSwitch {
                    offset: switch.start,
                });
            }
        }
        Ok(())
    }

    /// Take the encoded bytes out of the buffer
    pub fn into_code(self) -> Vec<u8> {
        self.code
    }

    fn label_state(&self, label: Label) -> Result<&LabelState, Error> {
        self.labels
            .get(label.index())
            .ok_or(Error::UnknownLabel(label))
    }

    /// Record (or check) the stack depth with which a label is reached
    fn expect_depth(&mut self, label: Label, depth: i32) -> Result<(), Error> {
        let state = self
            .labels
            .get_mut(label.index())
            .ok_or(Error::UnknownLabel(label))?;
        match state.depth {
            Some(expected) if expected != depth => Err(Error::InconsistentStackDepth {
                label,
                expected,
                found: depth,
            }),
            _ => {
                state.depth = Some(depth);
                Ok(())
            }
        }
    }

    fn switch_index(&self, start: usize) -> Result<usize, Error> {
        self.switches
            .iter()
            .position(|switch| switch.start == start)
            .ok_or(Error::UnknownSwitch { offset: start })
    }

    fn update_depth(&mut self, depth: i32, offset: usize) -> Result<(), Error> {
        if depth > MAX_STACK_DEPTH {
            return Err(Error::StackOverflow { offset });
        }
        self.stack_depth = depth;
        self.max_stack = self.max_stack.max(depth);
        Ok(())
    }

    /// Append an encoded instruction, updating depth and reachability
    fn append(
        &mut self,
        opcode: Opcode,
        bytes: &[u8],
        popped: i32,
        pushed: i32,
        flow: Flow,
    ) -> Result<(), Error> {
        let offset = self.code.len();
        if self.stack_depth < popped {
            return Err(Error::StackUnderflow { offset, opcode });
        }
        let length = offset + bytes.len();
        if length > MAX_CODE_LENGTH {
            return Err(FormatLimit::MethodCodeTooLarge { length }.into());
        }

        self.update_depth(self.stack_depth - popped + pushed, offset)?;
        self.code.extend_from_slice(bytes);

        if flow.is_unconditional() {
            self.reachable = false;
            self.block_starts.push(length);
        }
        log::trace!(
            "{:>5}: {} (stack depth {})",
            offset,
            opcode,
            self.stack_depth
        );
        Ok(())
    }
}

/// Number of words an instruction needs on the stack
fn words_popped(opcode: Opcode, info: &OpcodeInfo) -> i32 {
    match info.effect {
        Effect::Fixed(pops, _) => pops.iter().map(Slot::words).sum(),
        Effect::Store(slot, _) => slot.words(),
        Effect::Load(_, _) => 0,
        Effect::Special => match opcode {
            Opcode::POP | Opcode::DUP => 1,
            Opcode::NEWARRAY | Opcode::ANEWARRAY | Opcode::CHECKCAST => 1,
            Opcode::POP2 | Opcode::DUP_X1 | Opcode::DUP2 | Opcode::SWAP | Opcode::AALOAD => 2,
            Opcode::DUP_X2 | Opcode::DUP2_X1 => 3,
            Opcode::DUP2_X2 => 4,
            _ => info.stack_delta.map_or(0, |delta| -(delta.min(0) as i32)),
        },
    }
}

fn check_operand_count(opcode: Opcode, info: &OpcodeInfo, operands: &[i32]) -> Result<(), Error> {
    if operands.len() != info.operands as usize {
        return Err(Error::WrongOperandCount {
            opcode,
            expected: info.operands as usize,
            found: operands.len(),
        });
    }
    Ok(())
}

fn operand_in_range(opcode: Opcode, operand: i32, low: i64, high: i64) -> Result<i64, Error> {
    let operand = operand as i64;
    if operand < low || operand > high {
        Err(Error::OperandOutOfRange { opcode, operand })
    } else {
        Ok(operand)
    }
}

/// Encode instructions that have either no operands or a single constant pool index
fn encode_generic(
    opcode: Opcode,
    info: &OpcodeInfo,
    operands: &[i32],
    bytes: &mut Vec<u8>,
) -> Result<(), Error> {
    bytes.push(opcode.0);
    match info.length {
        1 => (),
        2 => {
            let value = operand_in_range(opcode, operands[0], 0, u8::MAX as i64)?;
            bytes.push(value as u8);
        }
        3 => {
            let index = operand_in_range(opcode, operands[0], 1, u16::MAX as i64)?;
            bytes.extend_from_slice(&(index as u16).to_be_bytes());
        }
        _ => return Err(Error::RequiresTypedEmit(opcode)),
    }
    Ok(())
}

/// Relative offset of a branch, if it fits in the 16-bit encoding
fn branch_offset(source: usize, target: usize) -> Result<i16, Error> {
    let relative = target as i64 - source as i64;
    if relative < i16::MIN as i64 || relative > i16::MAX as i64 {
        return Err(FormatLimit::BranchOffsetOutOfRange { source, target }.into());
    }
    Ok(relative as i16)
}
