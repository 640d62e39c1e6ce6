use super::{JumpTarget, Label, MethodBuffer, Opcode, Slot};
use crate::jvm::class_file::{modified_utf8_length, ConstantPool};
use crate::jvm::{names, Error, FieldType, MethodDescriptor, ParseDescriptor};
use crate::util::Width;

/// Largest modified UTF-8 encoding a single string constant can have
const MAX_UTF8_LENGTH: usize = u16::MAX as usize;

/// Typed front end for emitting the code of the method currently open
///
/// Where [`super::CodeBuffer`] deals in raw operands, this interns constants, computes the stack
/// effects of field and method instructions from their descriptors, and picks the shortest
/// encoding for constants and local variable accesses.
pub struct CodeBuilder<'a> {
    pub(crate) constants: &'a mut ConstantPool,
    pub(crate) method: &'a mut MethodBuffer,
}

impl<'a> CodeBuilder<'a> {
    pub fn new(constants: &'a mut ConstantPool, method: &'a mut MethodBuffer) -> CodeBuilder<'a> {
        CodeBuilder { constants, method }
    }

    pub fn constants(&mut self) -> &mut ConstantPool {
        self.constants
    }

    /// Emit an instruction with its raw operands (see [`super::CodeBuffer::emit`])
    pub fn emit(&mut self, opcode: Opcode, operands: &[i32]) -> Result<(), Error> {
        self.method.code.emit(opcode, operands)
    }

    /// Emit a branch to a label (or to a raw offset)
    pub fn emit_jump(
        &mut self,
        opcode: Opcode,
        target: impl Into<JumpTarget>,
    ) -> Result<(), Error> {
        self.method.code.emit_jump(opcode, target.into())
    }

    /// Emit an instruction that takes a class operand (`new`, `anewarray`, `checkcast`,
    /// `instanceof`)
    pub fn emit_class(&mut self, opcode: Opcode, class: &str) -> Result<(), Error> {
        match opcode {
            Opcode::NEW | Opcode::ANEWARRAY | Opcode::CHECKCAST | Opcode::INSTANCEOF => {
                let index = self.constants.get_class(class)?;
                self.emit(opcode, &[index.0 .0 as i32])
            }
            _ => Err(Error::UnsupportedOpcode(opcode.0)),
        }
    }

    /// Emit `multianewarray`, popping one `int` per dimension
    pub fn emit_multi_new_array(&mut self, array_class: &str, dimensions: u8) -> Result<(), Error> {
        let index = self.constants.get_class(array_class)?;
        let dimensions = dimensions as i32;
        self.method.code.emit_with_stack_effect(
            Opcode::MULTIANEWARRAY,
            &[index.0 .0 as i32, dimensions],
            dimensions,
            1,
        )
    }

    /// Emit a field access instruction
    pub fn emit_field(
        &mut self,
        opcode: Opcode,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<(), Error> {
        let field_type = FieldType::parse(descriptor)
            .map_err(|_| Error::BadDescriptor(descriptor.to_owned()))?;
        let words = field_type.width() as i32;
        let (popped, pushed) = match opcode {
            Opcode::GETSTATIC => (0, words),
            Opcode::PUTSTATIC => (words, 0),
            Opcode::GETFIELD => (1, words),
            Opcode::PUTFIELD => (1 + words, 0),
            _ => return Err(Error::UnsupportedOpcode(opcode.0)),
        };
        let index = self.constants.get_field_ref(class, name, descriptor)?;
        self.method
            .code
            .emit_with_stack_effect(opcode, &[index.0 .0 as i32], popped, pushed)
    }

    /// Emit a method invocation instruction
    ///
    /// `invokeinterface` references an interface method, every other invocation references a
    /// class method.
    pub fn emit_invoke(
        &mut self,
        opcode: Opcode,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<(), Error> {
        let method_descriptor = MethodDescriptor::parse(descriptor)
            .map_err(|_| Error::BadDescriptor(descriptor.to_owned()))?;
        let has_receiver = match opcode {
            Opcode::INVOKESTATIC => false,
            Opcode::INVOKEVIRTUAL | Opcode::INVOKESPECIAL | Opcode::INVOKEINTERFACE => true,
            _ => return Err(Error::UnsupportedOpcode(opcode.0)),
        };
        let is_interface = opcode == Opcode::INVOKEINTERFACE;
        let popped = method_descriptor.parameter_length(has_receiver) as i32;
        let pushed = method_descriptor.return_length() as i32;

        let index = self
            .constants
            .get_method_ref(class, name, descriptor, is_interface)?;
        let index = index.0 .0 as i32;
        if is_interface {
            self.method
                .code
                .emit_with_stack_effect(opcode, &[index, popped], popped, pushed)
        } else {
            self.method
                .code
                .emit_with_stack_effect(opcode, &[index], popped, pushed)
        }
    }

    /// Push an `int` constant onto the stack
    pub fn push_int(&mut self, integer: i32) -> Result<(), Error> {
        match integer {
            -1..=5 => self.emit(Opcode(Opcode::ICONST_0.0.wrapping_add(integer as u8)), &[]),
            -128..=127 => self.emit(Opcode::BIPUSH, &[integer]),
            -32768..=32767 => self.emit(Opcode::SIPUSH, &[integer]),
            _ => {
                let index = self.constants.get_integer(integer)?;
                self.emit(Opcode::LDC, &[index.0 as i32])
            }
        }
    }

    pub fn push_boolean(&mut self, boolean: bool) -> Result<(), Error> {
        self.push_int(boolean as i32)
    }

    /// Push a `long` constant onto the stack
    pub fn push_long(&mut self, long: i64) -> Result<(), Error> {
        match long {
            0 => self.emit(Opcode::LCONST_0, &[]),
            1 => self.emit(Opcode::LCONST_1, &[]),
            _ => {
                let index = self.constants.get_long(long)?;
                self.emit(Opcode::LDC2_W, &[index.0 as i32])
            }
        }
    }

    /// Push a `float` constant onto the stack
    pub fn push_float(&mut self, float: f32) -> Result<(), Error> {
        match float {
            f if f == 0.0 && f.is_sign_positive() => self.emit(Opcode::FCONST_0, &[]),
            f if f == 1.0 => self.emit(Opcode::FCONST_1, &[]),
            f if f == 2.0 => self.emit(Opcode::FCONST_2, &[]),
            _ => {
                let index = self.constants.get_float(float)?;
                self.emit(Opcode::LDC, &[index.0 as i32])
            }
        }
    }

    /// Push a `double` constant onto the stack
    pub fn push_double(&mut self, double: f64) -> Result<(), Error> {
        match double {
            f if f == 0.0 && f.is_sign_positive() => self.emit(Opcode::DCONST_0, &[]),
            f if f == 1.0 => self.emit(Opcode::DCONST_1, &[]),
            _ => {
                let index = self.constants.get_double(double)?;
                self.emit(Opcode::LDC2_W, &[index.0 as i32])
            }
        }
    }

    /// Push a `java.lang.String` constant onto the stack
    ///
    /// Strings whose encoding is too long for one constant are split into several constants and
    /// concatenated at runtime with a `java.lang.StringBuilder`.
    pub fn push_string(&mut self, string: &str) -> Result<(), Error> {
        if modified_utf8_length(string) <= MAX_UTF8_LENGTH {
            let index = self.constants.get_string(string)?;
            return self.emit(Opcode::LDC, &[index.0 .0 as i32]);
        }

        let builder = names::STRING_BUILDER;
        self.emit_class(Opcode::NEW, builder)?;
        self.emit(Opcode::DUP, &[])?;
        self.emit_invoke(Opcode::INVOKESPECIAL, builder, names::INIT, "()V")?;

        let mut start = 0;
        while start < string.len() {
            let end =
                ConstantPool::utf8_encoding_limit(string, start, string.len(), MAX_UTF8_LENGTH);
            let index = self.constants.get_string(&string[start..end])?;
            self.emit(Opcode::LDC, &[index.0 .0 as i32])?;
            self.emit_invoke(
                Opcode::INVOKEVIRTUAL,
                builder,
                "append",
                "(Ljava/lang/String;)Ljava/lang/StringBuilder;",
            )?;
            start = end;
        }

        log::debug!(
            "split a string of {} bytes into several constants",
            string.len()
        );
        self.emit_invoke(
            Opcode::INVOKEVIRTUAL,
            builder,
            "toString",
            "()Ljava/lang/String;",
        )
    }

    /// Load a local variable onto the stack, using the shortest encoding
    pub fn load_local(&mut self, kind: Slot, index: u16) -> Result<(), Error> {
        let (long_form, short_form) = match kind {
            Slot::Int => (Opcode::ILOAD, Opcode::ILOAD_0),
            Slot::Long => (Opcode::LLOAD, Opcode::LLOAD_0),
            Slot::Float => (Opcode::FLOAD, Opcode::FLOAD_0),
            Slot::Double => (Opcode::DLOAD, Opcode::DLOAD_0),
            Slot::Reference => (Opcode::ALOAD, Opcode::ALOAD_0),
        };
        self.emit_local(long_form, short_form, index)
    }

    /// Store the top of the stack into a local variable, using the shortest encoding
    pub fn store_local(&mut self, kind: Slot, index: u16) -> Result<(), Error> {
        let (long_form, short_form) = match kind {
            Slot::Int => (Opcode::ISTORE, Opcode::ISTORE_0),
            Slot::Long => (Opcode::LSTORE, Opcode::LSTORE_0),
            Slot::Float => (Opcode::FSTORE, Opcode::FSTORE_0),
            Slot::Double => (Opcode::DSTORE, Opcode::DSTORE_0),
            Slot::Reference => (Opcode::ASTORE, Opcode::ASTORE_0),
        };
        self.emit_local(long_form, short_form, index)
    }

    fn emit_local(
        &mut self,
        long_form: Opcode,
        short_form: Opcode,
        index: u16,
    ) -> Result<(), Error> {
        if index < 4 {
            self.emit(Opcode(short_form.0 + index as u8), &[])
        } else {
            self.emit(long_form, &[index as i32])
        }
    }

    /// Increment an `int` local variable
    pub fn increment_local(&mut self, index: u16, increment: i16) -> Result<(), Error> {
        self.emit(Opcode::IINC, &[index as i32, increment as i32])
    }

    pub fn acquire_label(&mut self) -> Label {
        self.method.code.acquire_label()
    }

    pub fn mark_label(&mut self, label: Label) -> Result<(), Error> {
        self.method.code.mark_label(label)
    }

    /// Bind a label at which an exception handler starts
    pub fn mark_handler(&mut self, label: Label) -> Result<(), Error> {
        self.method.code.mark_handler(label)
    }

    /// Lay out a `tableswitch` over `low..=high`, returning its offset
    pub fn reserve_table_switch(&mut self, low: i32, high: i32) -> Result<usize, Error> {
        self.method.code.reserve_table_switch(low, high)
    }

    /// Point the default branch of a switch at an already bound label
    pub fn patch_switch_default(&mut self, switch: usize, target: Label) -> Result<(), Error> {
        let target = self.bound_offset(target)?;
        self.method.code.patch_switch_default(switch, target)
    }

    /// Point the `index`-th case of a switch at an already bound label
    pub fn patch_switch_case(
        &mut self,
        switch: usize,
        index: usize,
        target: Label,
    ) -> Result<(), Error> {
        let target = self.bound_offset(target)?;
        self.method.code.patch_switch_case(switch, index, target)
    }

    /// Protect the code between two labels
    ///
    /// `catch_type` is the internal name of the exception class caught (`None` catches
    /// everything).
    pub fn register_exception_range(
        &mut self,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<&str>,
    ) -> Result<(), Error> {
        let catch_type = match catch_type {
            Some(class) => Some(self.constants.get_class(class)?),
            None => None,
        };
        self.method
            .register_exception_range(start, end, handler, catch_type)
    }

    /// Associate the code emitted from here on with a source line
    pub fn add_line_number(&mut self, line: u16) {
        self.method.add_line_number(line)
    }

    /// Name a local variable slot, from `start` until the end of the method
    pub fn add_local_variable(
        &mut self,
        name: &str,
        descriptor: &str,
        start: Label,
        index: u16,
    ) -> Result<(), Error> {
        FieldType::parse(descriptor).map_err(|_| Error::BadDescriptor(descriptor.to_owned()))?;
        let name_index = self.constants.get_utf8(name)?;
        let descriptor_index = self.constants.get_utf8(descriptor)?;
        self.method
            .add_local_variable(name_index, descriptor_index, start, index)
    }

    pub fn current_offset(&self) -> usize {
        self.method.code.current_offset()
    }

    pub fn stack_depth(&self) -> i32 {
        self.method.code.stack_depth()
    }

    /// Override the running stack depth (see [`super::CodeBuffer::set_stack_depth`])
    pub fn set_stack_depth(&mut self, depth: i32) -> Result<(), Error> {
        self.method.code.set_stack_depth(depth)
    }

    pub fn is_reachable(&self) -> bool {
        self.method.code.is_reachable()
    }

    fn bound_offset(&self, label: Label) -> Result<usize, Error> {
        self.method
            .code
            .label_offset(label)?
            .ok_or(Error::UnboundLabel(label))
    }
}
