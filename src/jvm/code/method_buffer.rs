use super::{CodeBuffer, Label};
use crate::jvm::class_file::{
    BytecodeArray, ClassConstantIndex, Code, ConstantPool, ExceptionHandler, LineNumber,
    LineNumberTable, LocalVariable, LocalVariableTable, Method, StackMapTable, Utf8ConstantIndex,
    Version,
};
use crate::jvm::verifier::{synthesize_stack_map, ClassContext, MethodCode, MethodSignature};
use crate::jvm::{
    Error, FormatLimit, MethodAccessFlags, MethodDescriptor, ParseDescriptor,
    VerifierErrorKind,
};

/// Protected range of code along with its handler
///
/// The range covers `[start, end)`. A missing catch type catches everything (as in `finally`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionRange {
    pub start: Label,
    pub end: Label,
    pub handler: Label,
    pub catch_type: Option<ClassConstantIndex>,
}

#[derive(Debug, Clone, Copy)]
struct LocalVariableEntry {
    name_index: Utf8ConstantIndex,
    descriptor_index: Utf8ConstantIndex,

    /// Variable is in scope from here until the end of the method
    start: Label,
    index: u16,
}

/// Everything accumulated for a method between the moment it is opened and the moment it is
/// closed
///
/// Most of the state is the [`CodeBuffer`]. The rest is the tables that end up next to the code in
/// the `Code` attribute.
#[derive(Debug)]
pub struct MethodBuffer {
    name: String,
    descriptor: MethodDescriptor,
    access_flags: MethodAccessFlags,
    name_index: Utf8ConstantIndex,
    descriptor_index: Utf8ConstantIndex,

    pub(crate) code: CodeBuffer,

    exception_ranges: Vec<ExceptionRange>,

    /// Line numbers as `(offset, line)` pairs, in order of offset
    line_numbers: Vec<(usize, u16)>,
    local_variables: Vec<LocalVariableEntry>,
}

impl MethodBuffer {
    /// Start a method
    ///
    /// The receiver (if the method is not static) and parameters are already counted in
    /// `max_locals`.
    pub fn new(
        access_flags: MethodAccessFlags,
        name: &str,
        descriptor: &str,
        constants: &mut ConstantPool,
    ) -> Result<MethodBuffer, Error> {
        let parsed = MethodDescriptor::parse(descriptor)
            .map_err(|_| Error::BadDescriptor(descriptor.to_owned()))?;
        let name_index = constants.get_utf8(name)?;
        let descriptor_index = constants.get_utf8(descriptor)?;

        let mut code = CodeBuffer::new();
        let is_static = access_flags.contains(MethodAccessFlags::STATIC);
        code.note_local(0, parsed.parameter_length(!is_static))?;

        log::debug!("opening method {}{}", name, descriptor);
        Ok(MethodBuffer {
            name: name.to_owned(),
            descriptor: parsed,
            access_flags,
            name_index,
            descriptor_index,
            code,
            exception_ranges: vec![],
            line_numbers: vec![],
            local_variables: vec![],
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    pub fn code(&self) -> &CodeBuffer {
        &self.code
    }

    pub fn code_mut(&mut self) -> &mut CodeBuffer {
        &mut self.code
    }

    /// Protect `[start, end)` with the handler at `handler`
    ///
    /// The labels don't need to be bound yet, but they must be by the time the method is closed.
    /// Ranges are kept in registration order, which is the order in which the JVM will try them.
    pub fn register_exception_range(
        &mut self,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<ClassConstantIndex>,
    ) -> Result<(), Error> {
        for label in [start, end, handler] {
            self.code.label_offset(label)?;
        }
        self.exception_ranges.push(ExceptionRange {
            start,
            end,
            handler,
            catch_type,
        });
        Ok(())
    }

    /// Associate the code emitted from here on with a source line
    pub fn add_line_number(&mut self, line: u16) {
        let offset = self.code.current_offset();
        match self.line_numbers.last_mut() {
            Some((last_offset, last_line)) if *last_offset == offset => *last_line = line,
            Some((_, last_line)) if *last_line == line => (),
            _ => self.line_numbers.push((offset, line)),
        }
    }

    /// Name a local variable slot, from `start` until the end of the method
    pub fn add_local_variable(
        &mut self,
        name_index: Utf8ConstantIndex,
        descriptor_index: Utf8ConstantIndex,
        start: Label,
        index: u16,
    ) -> Result<(), Error> {
        self.code.label_offset(start)?;
        self.local_variables.push(LocalVariableEntry {
            name_index,
            descriptor_index,
            start,
            index,
        });
        Ok(())
    }

    /// Close the method, producing its class file representation
    ///
    /// This is where labels get checked, the exception table gets resolved, and (for class file
    /// versions that need it) the `StackMapTable` is synthesized.
    pub fn finish(
        self,
        constants: &mut ConstantPool,
        class: &ClassContext<'_>,
        version: Version,
    ) -> Result<Method, Error> {
        self.code.check_complete()?;
        if self.code.current_offset() == 0 {
            return Err(Error::VerifierError {
                offset: 0,
                kind: VerifierErrorKind::FallsOffEnd,
            });
        }

        let exception_table = self.exception_table()?;
        let local_variables = self
            .local_variables
            .iter()
            .map(|entry| -> Result<_, Error> {
                Ok((*entry, self.bound_offset(entry.start)?))
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let jumps = self.code.jumps().to_vec();
        let block_starts = self.code.block_starts().to_vec();
        let mut method_code = MethodCode {
            max_stack: self.code.max_stack(),
            max_locals: self.code.max_locals(),
            code: self.code.into_code(),
            exception_table,
        };

        let mut frames = vec![];
        if version.supports_stack_maps() {
            let signature = MethodSignature {
                name: &self.name,
                descriptor: &self.descriptor,
                is_static: self.access_flags.contains(MethodAccessFlags::STATIC),
            };
            let synthesized = synthesize_stack_map(
                method_code,
                &jumps,
                &block_starts,
                signature,
                constants,
                class,
            )?;
            method_code = synthesized.code;
            frames = synthesized.frames;
        }

        check_table_len("exception table", method_code.exception_table.len())?;
        check_table_len("local variable table", local_variables.len())?;
        check_table_len("stack map table", frames.len())?;

        let code_length = method_code.code.len();
        let mut attributes = vec![];
        if !self.line_numbers.is_empty() {
            let line_numbers = self
                .line_numbers
                .iter()
                .filter(|(offset, _)| *offset < code_length)
                .map(|&(offset, line)| LineNumber {
                    start_pc: offset as u16,
                    line_number: line,
                })
                .collect::<Vec<_>>();
            check_table_len("line number table", line_numbers.len())?;
            attributes.push(constants.get_attribute(LineNumberTable(line_numbers))?);
        }
        if !local_variables.is_empty() {
            let local_variables = local_variables
                .into_iter()
                .map(|(entry, start)| LocalVariable {
                    start_pc: start as u16,
                    length: (code_length - start) as u16,
                    name_index: entry.name_index,
                    descriptor_index: entry.descriptor_index,
                    index: entry.index,
                })
                .collect();
            attributes.push(constants.get_attribute(LocalVariableTable(local_variables))?);
        }

        log::debug!(
            "closing method {}: {} bytes of code, max stack {}, max locals {}, {} frames",
            self.name,
            code_length,
            method_code.max_stack,
            method_code.max_locals,
            frames.len()
        );
        if !frames.is_empty() {
            attributes.push(constants.get_attribute(StackMapTable(frames))?);
        }

        let code = Code {
            max_stack: method_code.max_stack,
            max_locals: method_code.max_locals,
            code_array: BytecodeArray(method_code.code),
            exception_table: method_code.exception_table,
            attributes,
        };
        Ok(Method {
            access_flags: self.access_flags,
            name_index: self.name_index,
            descriptor_index: self.descriptor_index,
            attributes: vec![constants.get_attribute(code)?],
        })
    }

    /// Resolve exception ranges into offsets, dropping the empty ones
    fn exception_table(&self) -> Result<Vec<ExceptionHandler>, Error> {
        let mut table = vec![];
        for range in &self.exception_ranges {
            let start = self.bound_offset(range.start)?;
            let end = self.bound_offset(range.end)?;
            let handler_pc = self.bound_offset(range.handler)?;
            if start > end {
                return Err(Error::InvalidExceptionRange { start, end });
            }
            if start == end {
                log::trace!("dropping empty exception range at {}", start);
                continue;
            }
            table.push(ExceptionHandler {
                start_pc: start as u16,
                end_pc: end as u16,
                handler_pc: handler_pc as u16,
                catch_type: range.catch_type,
            });
        }
        Ok(table)
    }

    fn bound_offset(&self, label: Label) -> Result<usize, Error> {
        self.code
            .label_offset(label)?
            .ok_or(Error::UnboundLabel(label))
    }
}

/// Tables in the `Code` attribute are prefixed with a `u16` count
fn check_table_len(table: &'static str, count: usize) -> Result<(), Error> {
    if count > u16::MAX as usize {
        return Err(Error::FormatLimit(FormatLimit::TooManyEntries { table, count }));
    }
    Ok(())
}
