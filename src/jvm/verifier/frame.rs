use super::{ClassContext, VerificationType};
use crate::jvm::class_file::{
    ClassConstantIndex, Constant, ConstantIndex, ConstantPool, ConstantTag, StackMapFrame,
};
use crate::jvm::code::opcodes::{Effect, Instruction, Opcode, Slot};
use crate::jvm::names::{self, array_class_name, array_element};
use crate::jvm::{
    BaseType, Error, FieldType, MethodDescriptor, ParseDescriptor, VerifierErrorKind,
};
use crate::util::Width;

/// Snapshot of the stack and local variables at a point in the bytecode
///
/// Locals are stored slot by slot: a `long` or `double` is followed by a `Top` standing in for its
/// second half, and the vector always has one entry per local slot of the method. The stack has
/// one entry per value (regardless of width).
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct Frame {
    pub locals: Vec<VerificationType>,
    pub stack: Vec<VerificationType>,
}

impl Frame {
    /// Frame with every local unusable and an empty stack
    pub fn empty(max_locals: usize) -> Frame {
        Frame {
            locals: vec![VerificationType::Top; max_locals],
            stack: vec![],
        }
    }

    /// Merge another frame into this one, returning whether this frame changed
    ///
    /// `offset` is the offset of the code this frame describes, used for error reporting.
    pub fn merge(
        &mut self,
        other: &Frame,
        offset: usize,
        constants: &mut ConstantPool,
        class: &ClassContext<'_>,
    ) -> Result<bool, Error> {
        if self.stack.len() != other.stack.len() {
            return Err(Error::VerifierError {
                offset,
                kind: VerifierErrorKind::InconsistentStackHeight {
                    expected: self.stack.len(),
                    found: other.stack.len(),
                },
            });
        }

        let mut changed = false;
        let ours = self.locals.iter_mut().chain(self.stack.iter_mut());
        let theirs = other.locals.iter().chain(other.stack.iter());
        for (typ, other_typ) in ours.zip(theirs) {
            let merged = typ.merge(*other_typ, constants, class)?;
            if merged != *typ {
                *typ = merged;
                changed = true;
            }
        }

        Ok(changed)
    }

    /// Locals as they appear in a `StackMapTable`
    ///
    /// The second halves of `long` and `double` are dropped, as are trailing unusable slots.
    pub fn compressed_locals(&self) -> Vec<VerificationType> {
        let mut compressed = vec![];
        let mut idx = 0;
        while idx < self.locals.len() {
            let typ = self.locals[idx];
            compressed.push(typ);
            idx += typ.width();
        }
        while compressed.last() == Some(&VerificationType::Top) {
            compressed.pop();
        }
        compressed
    }

    /// Update the frame to reflect the effects of an instruction
    ///
    /// Control flow is not handled here: this only simulates what happens to the stack and the
    /// locals. The code array is needed to find the class of `new` instructions when their
    /// uninitialized result gets initialized.
    pub fn execute(
        &mut self,
        insn: &Instruction,
        pc: usize,
        code: &[u8],
        constants: &mut ConstantPool,
        class: &ClassContext<'_>,
    ) -> Result<(), Error> {
        Interpreter {
            frame: self,
            pc,
            constants,
            class,
        }
        .execute(insn, code)
    }
}

/// Frame in the compressed form used by the `StackMapTable`
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct CompressedFrame {
    pub locals: Vec<VerificationType>,
    pub stack: Vec<VerificationType>,
}

impl From<&Frame> for CompressedFrame {
    fn from(frame: &Frame) -> CompressedFrame {
        CompressedFrame {
            locals: frame.compressed_locals(),
            stack: frame.stack.clone(),
        }
    }
}

impl CompressedFrame {
    /// Compute a stack map frame for this frame, given the previous frame
    ///
    /// This will fall back to the `Full` option only if none of the other stack map frame variants
    /// are enough to encode the transition.
    pub fn stack_map_frame(&self, offset_delta: u16, previous_frame: &Self) -> StackMapFrame {
        let this_locals_len = self.locals.len();
        let prev_locals_len = previous_frame.locals.len();

        match self.stack.as_slice() {
            [] if this_locals_len <= prev_locals_len => {
                let len_difference = prev_locals_len - this_locals_len;
                if len_difference < 4 && previous_frame.locals.starts_with(&self.locals) {
                    if len_difference == 0 {
                        return StackMapFrame::SameLocalsNoStack { offset_delta };
                    } else {
                        return StackMapFrame::ChopLocalsNoStack {
                            offset_delta,
                            chopped_k: len_difference as u8,
                        };
                    }
                }
            }
            [] if this_locals_len - prev_locals_len < 4 => {
                if self.locals.starts_with(&previous_frame.locals) {
                    return StackMapFrame::AppendLocalsNoStack {
                        offset_delta,
                        locals: self.locals[prev_locals_len..].to_vec(),
                    };
                }
            }
            [stack] if self.locals == previous_frame.locals => {
                return StackMapFrame::SameLocalsOneStack {
                    offset_delta,
                    stack: *stack,
                };
            }
            _ => (),
        }

        self.full_stack_map_frame(offset_delta)
    }

    /// Compute a `Full` stack map frame
    pub fn full_stack_map_frame(&self, offset_delta: u16) -> StackMapFrame {
        StackMapFrame::Full {
            offset_delta,
            stack: self.stack.clone(),
            locals: self.locals.clone(),
        }
    }
}

/// Abstract interpreter for a single instruction
struct Interpreter<'f, 'a, 'c> {
    frame: &'f mut Frame,
    pc: usize,
    constants: &'a mut ConstantPool,
    class: &'a ClassContext<'c>,
}

impl<'f, 'a, 'c> Interpreter<'f, 'a, 'c> {
    fn fail<T>(&self, kind: VerifierErrorKind) -> Result<T, Error> {
        Err(Error::VerifierError {
            offset: self.pc,
            kind,
        })
    }

    fn execute(&mut self, insn: &Instruction, code: &[u8]) -> Result<(), Error> {
        let info = insn.opcode.require_info()?;
        match info.effect {
            Effect::Fixed(pops, push) => {
                for slot in pops.iter().rev() {
                    self.pop_slot(*slot)?;
                }
                if let Some(slot) = push {
                    let typ = self.slot_type(slot)?;
                    self.frame.stack.push(typ);
                }
            }
            Effect::Load(slot, implicit) => {
                let index = implicit.map_or(insn.operands[0] as usize, usize::from);
                let typ = self.local(index)?;
                if !slot_accepts(slot, &typ) {
                    return self.fail(VerifierErrorKind::InvalidType);
                }
                self.frame.stack.push(typ);
            }
            Effect::Store(slot, implicit) => {
                let index = implicit.map_or(insn.operands[0] as usize, usize::from);
                let typ = self.pop_slot(slot)?;
                self.set_local(index, typ)?;
            }
            Effect::Special => self.execute_special(insn, code)?,
        }
        Ok(())
    }

    fn execute_special(&mut self, insn: &Instruction, code: &[u8]) -> Result<(), Error> {
        use VerificationType::*;

        match insn.opcode {
            Opcode::ACONST_NULL => self.frame.stack.push(Null),
            Opcode::LDC | Opcode::LDC_W => {
                let index = insn.operands[0] as u16;
                let typ = match self.constants.data_of(ConstantIndex(index)) {
                    None => return self.fail(VerifierErrorKind::MissingConstant(index)),
                    Some(Constant::Integer(_)) => Integer,
                    Some(Constant::Float(_)) => Float,
                    Some(Constant::String(_)) => self.object(names::STRING)?,
                    Some(Constant::Class(_)) => self.object(names::CLASS)?,
                    Some(_) => return self.fail(VerifierErrorKind::NotLoadableConstant(index)),
                };
                self.frame.stack.push(typ);
            }
            Opcode::LDC2_W => {
                let index = insn.operands[0] as u16;
                let typ = match self.constants.data_of(ConstantIndex(index)) {
                    None => return self.fail(VerifierErrorKind::MissingConstant(index)),
                    Some(Constant::Long(_)) => Long,
                    Some(Constant::Double(_)) => Double,
                    Some(_) => return self.fail(VerifierErrorKind::NotLoadableConstant(index)),
                };
                self.frame.stack.push(typ);
            }

            Opcode::AALOAD => {
                self.pop_slot(Slot::Int)?;
                let element = match self.pop_slot(Slot::Reference)? {
                    Null => Null,
                    Object(array) => {
                        let element = self.constants.class_name(array).and_then(array_element);
                        match element {
                            Some(elem @ FieldType::Object(_)) | Some(elem @ FieldType::Array(_)) => {
                                VerificationType::from_field_type(&elem, self.constants)?
                            }
                            _ => return self.fail(VerifierErrorKind::InvalidType),
                        }
                    }
                    _ => return self.fail(VerifierErrorKind::InvalidType),
                };
                self.frame.stack.push(element);
            }

            Opcode::POP => {
                self.pop_width(1)?;
            }
            Opcode::POP2 => {
                if self.pop()?.width() == 1 {
                    self.pop_width(1)?;
                }
            }
            Opcode::DUP => {
                let arg1 = self.pop_width(1)?;
                self.push_all(&[arg1, arg1]);
            }
            Opcode::DUP_X1 => {
                let arg1 = self.pop_width(1)?;
                let arg2 = self.pop_width(1)?;
                self.push_all(&[arg1, arg2, arg1]);
            }
            Opcode::DUP_X2 => {
                let arg1 = self.pop_width(1)?;
                let arg2 = self.pop()?;
                if arg2.width() == 1 {
                    let arg3 = self.pop_width(1)?;
                    self.push_all(&[arg1, arg3, arg2, arg1]);
                } else {
                    self.push_all(&[arg1, arg2, arg1]);
                }
            }
            Opcode::DUP2 => {
                let arg1 = self.pop()?;
                if arg1.width() == 1 {
                    let arg2 = self.pop_width(1)?;
                    self.push_all(&[arg2, arg1, arg2, arg1]);
                } else {
                    self.push_all(&[arg1, arg1]);
                }
            }
            Opcode::DUP2_X1 => {
                let arg1 = self.pop()?;
                if arg1.width() == 1 {
                    let arg2 = self.pop_width(1)?;
                    let arg3 = self.pop_width(1)?;
                    self.push_all(&[arg2, arg1, arg3, arg2, arg1]);
                } else {
                    let arg2 = self.pop_width(1)?;
                    self.push_all(&[arg1, arg2, arg1]);
                }
            }
            Opcode::DUP2_X2 => {
                let arg1 = self.pop()?;
                if arg1.width() == 1 {
                    let arg2 = self.pop_width(1)?;
                    let arg3 = self.pop()?;
                    if arg3.width() == 1 {
                        let arg4 = self.pop_width(1)?;
                        self.push_all(&[arg2, arg1, arg4, arg3, arg2, arg1]);
                    } else {
                        self.push_all(&[arg2, arg1, arg3, arg2, arg1]);
                    }
                } else {
                    let arg2 = self.pop()?;
                    if arg2.width() == 1 {
                        let arg3 = self.pop_width(1)?;
                        self.push_all(&[arg1, arg3, arg2, arg1]);
                    } else {
                        self.push_all(&[arg1, arg2, arg1]);
                    }
                }
            }
            Opcode::SWAP => {
                let arg1 = self.pop_width(1)?;
                let arg2 = self.pop_width(1)?;
                self.push_all(&[arg1, arg2]);
            }

            Opcode::IINC => {
                if self.local(insn.operands[0] as usize)? != Integer {
                    return self.fail(VerifierErrorKind::InvalidType);
                }
            }

            Opcode::GETSTATIC | Opcode::GETFIELD | Opcode::PUTSTATIC | Opcode::PUTFIELD => {
                let descriptor = self.member(insn.operands[0])?.2;
                let field_type = FieldType::parse(&descriptor)
                    .map_err(|_| Error::BadDescriptor(descriptor.clone()))?;
                let typ = VerificationType::from_field_type(&field_type, self.constants)?;
                match insn.opcode {
                    Opcode::GETSTATIC => self.frame.stack.push(typ),
                    Opcode::GETFIELD => {
                        self.pop_slot(Slot::Reference)?;
                        self.frame.stack.push(typ);
                    }
                    Opcode::PUTSTATIC => {
                        self.pop_slot(field_slot(&field_type))?;
                    }
                    _ => {
                        self.pop_slot(field_slot(&field_type))?;
                        self.pop_slot(Slot::Reference)?;
                    }
                }
            }

            Opcode::INVOKEVIRTUAL
            | Opcode::INVOKESPECIAL
            | Opcode::INVOKESTATIC
            | Opcode::INVOKEINTERFACE => {
                let (_, name, descriptor) = self.member(insn.operands[0])?;
                let method_descriptor = MethodDescriptor::parse(&descriptor)
                    .map_err(|_| Error::BadDescriptor(descriptor.clone()))?;

                for parameter in method_descriptor.parameters.iter().rev() {
                    self.pop_slot(field_slot(parameter))?;
                }
                if insn.opcode != Opcode::INVOKESTATIC {
                    let receiver = self.pop_slot(Slot::Reference)?;
                    if name == names::INIT {
                        let initialized = match receiver {
                            UninitializedThis => self.object(self.class.this_class)?,
                            Uninitialized(site) => {
                                let site = site as usize;
                                match code.get(site..site + 3) {
                                    Some([opcode, hi, lo]) if Opcode(*opcode) == Opcode::NEW => {
                                        let index = u16::from_be_bytes([*hi, *lo]);
                                        Object(ClassConstantIndex(ConstantIndex(index)))
                                    }
                                    _ => return self.fail(VerifierErrorKind::NotUninitialized),
                                }
                            }
                            _ => return self.fail(VerifierErrorKind::NotUninitialized),
                        };
                        self.replace_all(receiver, initialized);
                    }
                }
                if let Some(return_type) = &method_descriptor.return_type {
                    let typ = VerificationType::from_field_type(return_type, self.constants)?;
                    self.frame.stack.push(typ);
                }
            }

            Opcode::NEW => {
                self.class_operand(insn.operands[0])?;
                self.frame.stack.push(Uninitialized(self.pc as u16));
            }
            Opcode::NEWARRAY => {
                self.pop_slot(Slot::Int)?;
                let element = match BaseType::from_array_type_code(insn.operands[0] as u8) {
                    Some(base_type) => FieldType::Base(base_type),
                    None => return self.fail(VerifierErrorKind::InvalidType),
                };
                let array = FieldType::array(element);
                let typ = VerificationType::from_field_type(&array, self.constants)?;
                self.frame.stack.push(typ);
            }
            Opcode::ANEWARRAY => {
                self.pop_slot(Slot::Int)?;
                let element = self.class_operand(insn.operands[0])?;
                let element_name = match self.constants.class_name(element) {
                    Some(name) => name.to_owned(),
                    None => return self.fail(VerifierErrorKind::MissingConstant(element.0 .0)),
                };
                let typ = self.object(&array_class_name(&element_name))?;
                self.frame.stack.push(typ);
            }
            Opcode::MULTIANEWARRAY => {
                let array = self.class_operand(insn.operands[0])?;
                for _ in 0..insn.operands[1] {
                    self.pop_slot(Slot::Int)?;
                }
                self.frame.stack.push(Object(array));
            }
            Opcode::CHECKCAST => {
                let class = self.class_operand(insn.operands[0])?;
                self.pop_slot(Slot::Reference)?;
                self.frame.stack.push(Object(class));
            }

            other => return Err(Error::UnsupportedOpcode(other.0)),
        }
        Ok(())
    }

    fn object(&mut self, class_name: &str) -> Result<VerificationType, Error> {
        Ok(VerificationType::Object(self.constants.get_class(class_name)?))
    }

    fn slot_type(&mut self, slot: Slot) -> Result<VerificationType, Error> {
        Ok(match slot {
            Slot::Int => VerificationType::Integer,
            Slot::Float => VerificationType::Float,
            Slot::Long => VerificationType::Long,
            Slot::Double => VerificationType::Double,
            Slot::Reference => self.object(names::OBJECT)?,
        })
    }

    /// Resolve a field or method reference operand into `(class, name, descriptor)`
    fn member(&self, operand: i32) -> Result<(String, String, String), Error> {
        let index = operand as u16;
        match self.constants.member_ref(ConstantIndex(index)) {
            Some(member) => Ok((
                member.class_name.to_owned(),
                member.name.to_owned(),
                member.descriptor.to_owned(),
            )),
            None => self.fail(VerifierErrorKind::MissingConstant(index)),
        }
    }

    fn class_operand(&self, operand: i32) -> Result<ClassConstantIndex, Error> {
        let index = ConstantIndex(operand as u16);
        if self.constants.type_of(index) == Some(ConstantTag::Class) {
            Ok(ClassConstantIndex(index))
        } else {
            self.fail(VerifierErrorKind::MissingConstant(index.0))
        }
    }

    fn pop(&mut self) -> Result<VerificationType, Error> {
        match self.frame.stack.pop() {
            Some(typ) => Ok(typ),
            None => self.fail(VerifierErrorKind::EmptyStack),
        }
    }

    fn pop_width(&mut self, width: usize) -> Result<VerificationType, Error> {
        let typ = self.pop()?;
        if typ.width() == width {
            Ok(typ)
        } else {
            self.fail(VerifierErrorKind::InvalidWidth)
        }
    }

    fn pop_slot(&mut self, slot: Slot) -> Result<VerificationType, Error> {
        let typ = self.pop()?;
        if slot_accepts(slot, &typ) {
            Ok(typ)
        } else {
            self.fail(VerifierErrorKind::InvalidType)
        }
    }

    fn push_all(&mut self, types: &[VerificationType]) {
        self.frame.stack.extend_from_slice(types);
    }

    fn local(&self, index: usize) -> Result<VerificationType, Error> {
        match self.frame.locals.get(index) {
            Some(typ) => Ok(*typ),
            None => self.fail(VerifierErrorKind::InvalidIndex),
        }
    }

    fn set_local(&mut self, index: usize, typ: VerificationType) -> Result<(), Error> {
        let width = typ.width();
        if index + width > self.frame.locals.len() {
            return self.fail(VerifierErrorKind::InvalidIndex);
        }

        // Overwriting the second half of a wide value invalidates the first half
        if index > 0 && self.frame.locals[index - 1].width() == 2 {
            self.frame.locals[index - 1] = VerificationType::Top;
        }
        self.frame.locals[index] = typ;
        if width == 2 {
            self.frame.locals[index + 1] = VerificationType::Top;
        }
        Ok(())
    }

    /// Replace every occurrence of a type on the stack and in the locals
    fn replace_all(&mut self, from: VerificationType, to: VerificationType) {
        let Frame { locals, stack } = &mut *self.frame;
        for typ in locals.iter_mut().chain(stack.iter_mut()) {
            if *typ == from {
                *typ = to;
            }
        }
    }
}

fn slot_accepts(slot: Slot, typ: &VerificationType) -> bool {
    match slot {
        Slot::Int => *typ == VerificationType::Integer,
        Slot::Float => *typ == VerificationType::Float,
        Slot::Long => *typ == VerificationType::Long,
        Slot::Double => *typ == VerificationType::Double,
        Slot::Reference => typ.is_reference(),
    }
}

fn field_slot(field_type: &FieldType) -> Slot {
    match field_type {
        FieldType::Base(BaseType::Float) => Slot::Float,
        FieldType::Base(BaseType::Long) => Slot::Long,
        FieldType::Base(BaseType::Double) => Slot::Double,
        FieldType::Base(_) => Slot::Int,
        FieldType::Object(_) | FieldType::Array(_) => Slot::Reference,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::opcodes::decode;
    use crate::jvm::verifier::ClassGraph;
    use VerificationType::*;

    fn context(graph: &ClassGraph) -> ClassContext<'_> {
        ClassContext {
            this_class: "me/Current",
            super_class: names::OBJECT,
            hierarchy: graph,
        }
    }

    fn run(frame: &mut Frame, code: &[u8], constants: &mut ConstantPool) -> Result<(), Error> {
        let graph = ClassGraph::new();
        let class = context(&graph);
        let mut pc = 0;
        while pc < code.len() {
            let insn = decode(code, pc)?;
            frame.execute(&insn, pc, code, constants, &class)?;
            pc += insn.length;
        }
        Ok(())
    }

    fn kind_of(result: Result<(), Error>) -> Option<VerifierErrorKind> {
        match result {
            Err(Error::VerifierError { kind, .. }) => Some(kind),
            _ => None,
        }
    }

    #[test]
    fn arithmetic() {
        let binops = [
            (Integer, vec![Opcode::IADD, Opcode::ISUB, Opcode::IMUL, Opcode::IXOR]),
            (Long, vec![Opcode::LADD, Opcode::LSUB, Opcode::LDIV, Opcode::LAND]),
            (Float, vec![Opcode::FADD, Opcode::FREM]),
            (Double, vec![Opcode::DMUL, Opcode::DDIV]),
        ];

        for (good_typ, instructions) in binops {
            for instruction in instructions {
                for typ in [Integer, Long, Float, Double, Null, UninitializedThis] {
                    let mut constants = ConstantPool::new();
                    let mut frame = Frame {
                        locals: vec![],
                        stack: vec![typ, typ],
                    };
                    let result = run(&mut frame, &[instruction.0], &mut constants);
                    if typ == good_typ {
                        assert!(result.is_ok(), "Verification of {:?}", instruction);
                        assert_eq!(frame.stack, vec![typ], "Output of {:?}", instruction);
                    } else {
                        assert_eq!(kind_of(result), Some(VerifierErrorKind::InvalidType));
                    }
                }

                // Try with a stack that is too small
                let mut constants = ConstantPool::new();
                let mut frame = Frame {
                    locals: vec![],
                    stack: vec![good_typ],
                };
                let result = run(&mut frame, &[instruction.0], &mut constants);
                assert_eq!(kind_of(result), Some(VerifierErrorKind::EmptyStack));
            }
        }
    }

    #[test]
    fn locals() {
        let mut constants = ConstantPool::new();
        let mut frame = Frame::empty(4);
        // lconst_1; lstore_1; iconst_0; istore_2; iload_2; istore_0
        let code = [0x0a, 0x40, 0x03, 0x3d, 0x1c, 0x3b];
        run(&mut frame, &code, &mut constants).unwrap();
        // Storing into slot 2 clobbered the long in slots 1-2
        assert_eq!(frame.locals, vec![Integer, Top, Integer, Top]);
        assert!(frame.stack.is_empty());

        // lload_1 on a clobbered long
        let result = run(&mut frame, &[0x1f], &mut constants);
        assert_eq!(kind_of(result), Some(VerifierErrorKind::InvalidType));
        let result = run(&mut Frame::empty(1), &[0x1b], &mut constants);
        assert_eq!(kind_of(result), Some(VerifierErrorKind::InvalidIndex));
    }

    #[test]
    fn stack_shuffling() {
        let mut constants = ConstantPool::new();
        let mut frame = Frame {
            locals: vec![],
            stack: vec![Float, Long, Integer],
        };
        // dup_x2 (form 2)
        run(&mut frame, &[0x5b], &mut constants).unwrap();
        assert_eq!(frame.stack, vec![Float, Integer, Long, Integer]);

        // swap reaching into a long
        let result = run(&mut frame, &[0x5f], &mut constants);
        assert_eq!(kind_of(result), Some(VerifierErrorKind::InvalidWidth));

        // swap of two category 1 values
        let mut frame = Frame {
            locals: vec![],
            stack: vec![Float, Integer],
        };
        run(&mut frame, &[0x5f], &mut constants).unwrap();
        assert_eq!(frame.stack, vec![Integer, Float]);

        // pop splitting a long
        let mut frame = Frame {
            locals: vec![],
            stack: vec![Long],
        };
        let result = run(&mut frame, &[0x57], &mut constants);
        assert_eq!(kind_of(result), Some(VerifierErrorKind::InvalidWidth));

        // dup2 of a long, then pop2 twice
        let mut frame = Frame {
            locals: vec![],
            stack: vec![Long],
        };
        run(&mut frame, &[0x5c], &mut constants).unwrap();
        assert_eq!(frame.stack, vec![Long, Long]);
        run(&mut frame, &[0x58, 0x58], &mut constants).unwrap();
        assert!(frame.stack.is_empty());
    }

    #[test]
    fn constructors() {
        let mut constants = ConstantPool::new();
        let point = constants.get_class("me/Point").unwrap();
        let init = constants.get_method_ref("me/Point", "<init>", "(I)V", false).unwrap();
        let [hi, lo] = point.0 .0.to_be_bytes();
        let [ihi, ilo] = init.0 .0.to_be_bytes();

        // new me/Point; dup; astore_0; iconst_1; invokespecial <init>(I)V
        let code = [0xbb, hi, lo, 0x59, 0x4b, 0x04, 0xb7, ihi, ilo];
        let mut frame = Frame::empty(1);
        run(&mut frame, &code, &mut constants).unwrap();
        assert_eq!(frame.locals, vec![Object(point)]);
        assert!(frame.stack.is_empty());

        // Constructing something that is already initialized
        let mut frame = Frame {
            locals: vec![],
            stack: vec![Object(point), Integer],
        };
        let result = run(&mut frame, &[0xb7, ihi, ilo], &mut constants);
        assert_eq!(kind_of(result), Some(VerifierErrorKind::NotUninitialized));

        // Calling the superclass constructor initializes `this`
        let object_init = constants
            .get_method_ref(names::OBJECT, "<init>", "()V", false)
            .unwrap();
        let [ohi, olo] = object_init.0 .0.to_be_bytes();
        let mut frame = Frame {
            locals: vec![UninitializedThis],
            stack: vec![],
        };
        run(&mut frame, &[0x2a, 0xb7, ohi, olo], &mut constants).unwrap();
        let current = constants.get_class("me/Current").unwrap();
        assert_eq!(frame.locals, vec![Object(current)]);
    }

    #[test]
    fn constants_and_arrays() {
        let mut constants = ConstantPool::new();
        let string = constants.get_string("hi").unwrap();
        let long = constants.get_long(1 << 40).unwrap();
        let string_class = constants.get_class(names::STRING).unwrap();

        let mut frame = Frame::empty(0);
        let code = [
            0x12,
            string.0 .0 as u8, // ldc "hi"
            0x14,
            0,
            long.0 as u8, // ldc2_w 1 << 40
            0x58,       // pop2
            0x57,       // pop
            0x04,       // iconst_1
            0xbd,
            0,
            string_class.0 .0 as u8, // anewarray java/lang/String
            0x03,                    // iconst_0
            0x32,                    // aaload
        ];
        run(&mut frame, &code, &mut constants).unwrap();
        assert_eq!(frame.stack, vec![Object(string_class)]);

        // ldc of a long
        let result = run(&mut frame, &[0x12, long.0 as u8], &mut constants);
        assert_eq!(
            kind_of(result),
            Some(VerifierErrorKind::NotLoadableConstant(long.0))
        );
    }

    #[test]
    fn compression() {
        let frame = Frame {
            locals: vec![Integer, Long, Top, Top, Double, Top, Top, Top],
            stack: vec![],
        };
        assert_eq!(frame.compressed_locals(), vec![Integer, Long, Top, Double]);
        assert!(Frame::empty(3).compressed_locals().is_empty());
    }

    #[test]
    fn frame_kinds() {
        let base = CompressedFrame {
            locals: vec![Integer, Float],
            stack: vec![],
        };
        let same = base.clone();
        assert_eq!(
            same.stack_map_frame(3, &base),
            StackMapFrame::SameLocalsNoStack { offset_delta: 3 }
        );

        let one_stack = CompressedFrame {
            locals: vec![Integer, Float],
            stack: vec![Long],
        };
        assert_eq!(
            one_stack.stack_map_frame(70, &base),
            StackMapFrame::SameLocalsOneStack {
                offset_delta: 70,
                stack: Long
            }
        );

        let chopped = CompressedFrame {
            locals: vec![Integer],
            stack: vec![],
        };
        assert_eq!(
            chopped.stack_map_frame(0, &base),
            StackMapFrame::ChopLocalsNoStack {
                offset_delta: 0,
                chopped_k: 1
            }
        );

        let appended = CompressedFrame {
            locals: vec![Integer, Float, Long, Null],
            stack: vec![],
        };
        assert_eq!(
            appended.stack_map_frame(1, &base),
            StackMapFrame::AppendLocalsNoStack {
                offset_delta: 1,
                locals: vec![Long, Null]
            }
        );

        let different = CompressedFrame {
            locals: vec![Float],
            stack: vec![],
        };
        assert_eq!(
            different.stack_map_frame(2, &base),
            StackMapFrame::Full {
                offset_delta: 2,
                locals: vec![Float],
                stack: vec![]
            }
        );

        let too_many = CompressedFrame {
            locals: vec![Integer, Float, Integer, Integer, Integer, Integer],
            stack: vec![],
        };
        assert!(matches!(
            too_many.stack_map_frame(2, &base),
            StackMapFrame::Full { .. }
        ));
    }

    #[test]
    fn merging_frames() {
        let graph = ClassGraph::new();
        let class = context(&graph);
        let mut constants = ConstantPool::new();

        let mut frame = Frame {
            locals: vec![Integer, Top, Integer],
            stack: vec![Null],
        };
        let string = Object(constants.get_class(names::STRING).unwrap());
        let other = Frame {
            locals: vec![Integer, Integer, Float],
            stack: vec![string],
        };
        assert!(frame.merge(&other, 4, &mut constants, &class).unwrap());
        assert_eq!(frame.locals, vec![Integer, Top, Top]);
        assert_eq!(frame.stack, vec![string]);
        assert!(!frame.merge(&other, 4, &mut constants, &class).unwrap());

        let shorter = Frame {
            locals: vec![Integer, Top, Top],
            stack: vec![],
        };
        assert!(matches!(
            frame.merge(&shorter, 4, &mut constants, &class),
            Err(Error::VerifierError {
                offset: 4,
                kind: VerifierErrorKind::InconsistentStackHeight {
                    expected: 1,
                    found: 0
                }
            })
        ));
    }

    #[test]
    fn merges_only_widen() {
        let graph = ClassGraph::new();
        let class = context(&graph);
        let mut constants = ConstantPool::new();
        let mut object = |name: &str| Object(constants.get_class(name).unwrap());
        let string = object(names::STRING);
        let builder = object(names::STRING_BUILDER);
        let integer = object("java/lang/Integer");
        let long = object("java/lang/Long");
        let number = object("java/lang/Number");
        let java_object = object(names::OBJECT);

        let inputs = [
            Frame {
                locals: vec![Integer, string, Null],
                stack: vec![integer],
            },
            Frame {
                locals: vec![Integer, builder, string],
                stack: vec![long],
            },
            Frame {
                locals: vec![Float, string, Null],
                stack: vec![Null],
            },
            Frame {
                locals: vec![Integer, integer, string],
                stack: vec![integer],
            },
        ];
        let expected = [
            (vec![Integer, string, Null], vec![integer]),
            (vec![Integer, java_object, string], vec![number]),
            (vec![Top, java_object, string], vec![number]),
            (vec![Top, java_object, string], vec![number]),
        ];

        let mut frame = inputs[0].clone();
        for (seen, input) in inputs.iter().enumerate() {
            frame.merge(input, 0, &mut constants, &class).unwrap();
            assert_eq!((&frame.locals, &frame.stack), (&expected[seen].0, &expected[seen].1));

            // The merged frame stays above everything merged into it so far
            for earlier in &inputs[..=seen] {
                let mut again = frame.clone();
                assert!(!again.merge(earlier, 0, &mut constants, &class).unwrap());
                assert_eq!(again, frame);
            }
        }
    }
}
