use super::class_file::{
    ClassFile, ConstantIndex, ConstantPool, ConstantValue, Field, Method, SourceFile, Version,
};
use super::code::{CodeBuilder, MethodBuffer};
use super::verifier::{ClassContext, ClassHierarchy};
use super::{ClassAccessFlags, Error, FieldAccessFlags, FieldType, MethodAccessFlags};
use super::{MethodDescriptor, ParseDescriptor};
use crate::util::OffsetVec;

/// Options for assembling a class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Class file version written in the header
    ///
    /// Stack map frames are only synthesized for versions that support them.
    pub version: Version,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            version: Version::JAVA6,
        }
    }
}

/// Initial value of a static field, stored in a `ConstantValue` attribute
#[derive(Debug, Clone, PartialEq)]
pub enum FieldConstant {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
}

impl FieldConstant {
    /// Can a field with this descriptor hold the constant?
    fn fits(&self, field_type: &FieldType) -> bool {
        use super::BaseType;
        match (self, field_type) {
            (FieldConstant::Int(_), FieldType::Base(base)) => matches!(
                base,
                BaseType::Int
                    | BaseType::Short
                    | BaseType::Char
                    | BaseType::Byte
                    | BaseType::Boolean
            ),
            (FieldConstant::Long(_), FieldType::Base(BaseType::Long)) => true,
            (FieldConstant::Float(_), FieldType::Base(BaseType::Float)) => true,
            (FieldConstant::Double(_), FieldType::Base(BaseType::Double)) => true,
            (FieldConstant::String(_), FieldType::Object(class)) => class == super::names::STRING,
            _ => false,
        }
    }
}

/// Builds one class: fields, methods, and everything in the constant pool they refer to
///
/// At most one method is open at a time. Its code is emitted through [`ClassAssembler::code`] and
/// its stack map frames are synthesized when it is closed.
pub struct ClassAssembler<'h> {
    settings: Settings,

    /// Internal name of the class
    this_class: String,

    /// Internal name of the superclass
    super_class: String,

    /// Class file, but with `constants` left blank
    class: ClassFile,

    /// Constants pool
    constants_pool: ConstantPool,

    /// Method currently being emitted
    method: Option<MethodBuffer>,

    /// Used when merging reference types during frame synthesis
    hierarchy: &'h dyn ClassHierarchy,
}

impl<'h> ClassAssembler<'h> {
    pub fn new(
        settings: Settings,
        hierarchy: &'h dyn ClassHierarchy,
        access_flags: ClassAccessFlags,
        this_class: &str,
        super_class: &str,
    ) -> Result<ClassAssembler<'h>, Error> {
        let this_class = super::names::canonical_class_name(this_class).into_owned();
        let super_class = super::names::canonical_class_name(super_class).into_owned();

        let mut constants_pool = ConstantPool::new();
        let class = ClassFile {
            version: settings.version,
            constants: OffsetVec::new(),
            access_flags,
            this_class: constants_pool.get_class(&this_class)?,
            super_class: constants_pool.get_class(&super_class)?,
            interfaces: vec![],
            fields: vec![],
            methods: vec![],
            attributes: vec![],
        };

        Ok(ClassAssembler {
            settings,
            this_class,
            super_class,
            class,
            constants_pool,
            method: None,
            hierarchy,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn this_class(&self) -> &str {
        &self.this_class
    }

    pub fn constants_pool(&mut self) -> &mut ConstantPool {
        &mut self.constants_pool
    }

    /// Declare that the class implements an interface
    pub fn add_interface(&mut self, interface: &str) -> Result<(), Error> {
        let index = self.constants_pool.get_class(interface)?;
        if !self.class.interfaces.contains(&index) {
            self.class.interfaces.push(index);
        }
        Ok(())
    }

    /// Set the `SourceFile` attribute (replacing any previous one)
    pub fn set_source_file(&mut self, file_name: &str) -> Result<(), Error> {
        let file_name = self.constants_pool.get_utf8(file_name)?;
        let attribute = self.constants_pool.get_attribute(SourceFile(file_name))?;
        let name_index = attribute.name_index;
        self.class
            .attributes
            .retain(|existing| existing.name_index != name_index);
        self.class.attributes.push(attribute);
        Ok(())
    }

    /// Add a field to the class
    pub fn add_field(
        &mut self,
        access_flags: FieldAccessFlags,
        name: &str,
        descriptor: &str,
    ) -> Result<(), Error> {
        self.push_field(access_flags, name, descriptor, None)
    }

    /// Add a field with a `ConstantValue` attribute
    ///
    /// The JVM only honours the attribute on static fields, but it is legal on any field.
    pub fn add_constant_field(
        &mut self,
        access_flags: FieldAccessFlags,
        name: &str,
        descriptor: &str,
        value: FieldConstant,
    ) -> Result<(), Error> {
        let field_type = FieldType::parse(descriptor)
            .map_err(|_| Error::BadDescriptor(descriptor.to_owned()))?;
        if !value.fits(&field_type) {
            return Err(Error::BadDescriptor(descriptor.to_owned()));
        }

        let index: ConstantIndex = match &value {
            FieldConstant::Int(int) => self.constants_pool.get_integer(*int)?,
            FieldConstant::Long(long) => self.constants_pool.get_long(*long)?,
            FieldConstant::Float(float) => self.constants_pool.get_float(*float)?,
            FieldConstant::Double(double) => self.constants_pool.get_double(*double)?,
            FieldConstant::String(string) => self.constants_pool.get_string(string)?.0,
        };
        self.push_field(access_flags, name, descriptor, Some(index))
    }

    fn push_field(
        &mut self,
        access_flags: FieldAccessFlags,
        name: &str,
        descriptor: &str,
        constant: Option<ConstantIndex>,
    ) -> Result<(), Error> {
        FieldType::parse(descriptor).map_err(|_| Error::BadDescriptor(descriptor.to_owned()))?;
        let name_index = self.constants_pool.get_utf8(name)?;
        let descriptor_index = self.constants_pool.get_utf8(descriptor)?;
        let attributes = match constant {
            Some(index) => vec![self.constants_pool.get_attribute(ConstantValue(index))?],
            None => vec![],
        };

        self.class.fields.push(Field {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        });
        Ok(())
    }

    /// Add a method without a body (`abstract` or `native`)
    pub fn add_abstract_method(
        &mut self,
        access_flags: MethodAccessFlags,
        name: &str,
        descriptor: &str,
    ) -> Result<(), Error> {
        MethodDescriptor::parse(descriptor)
            .map_err(|_| Error::BadDescriptor(descriptor.to_owned()))?;
        let name_index = self.constants_pool.get_utf8(name)?;
        let descriptor_index = self.constants_pool.get_utf8(descriptor)?;
        self.class.methods.push(Method {
            access_flags,
            name_index,
            descriptor_index,
            attributes: vec![],
        });
        Ok(())
    }

    /// Start a method with a body
    ///
    /// The method stays open (and receives all code emitted through [`ClassAssembler::code`])
    /// until [`ClassAssembler::close_method`].
    pub fn open_method(
        &mut self,
        access_flags: MethodAccessFlags,
        name: &str,
        descriptor: &str,
    ) -> Result<(), Error> {
        if let Some(open) = &self.method {
            return Err(Error::MethodAlreadyOpen(open.name().to_owned()));
        }
        let method = MethodBuffer::new(access_flags, name, descriptor, &mut self.constants_pool)?;
        self.method = Some(method);
        Ok(())
    }

    /// Emit code into the open method
    pub fn code(&mut self) -> Result<CodeBuilder<'_>, Error> {
        match &mut self.method {
            Some(method) => Ok(CodeBuilder::new(&mut self.constants_pool, method)),
            None => Err(Error::NoOpenMethod),
        }
    }

    /// Finish the open method: resolve its labels, synthesize its stack map frames, and add it to
    /// the class
    ///
    /// If this fails, the method is discarded.
    pub fn close_method(&mut self) -> Result<(), Error> {
        let method = self.method.take().ok_or(Error::NoOpenMethod)?;
        let context = ClassContext {
            this_class: &self.this_class,
            super_class: &self.super_class,
            hierarchy: self.hierarchy,
        };
        let method = method.finish(&mut self.constants_pool, &context, self.settings.version)?;
        self.class.methods.push(method);
        Ok(())
    }

    /// Consume the assembler and return the class file
    pub fn into_class_file(self) -> Result<ClassFile, Error> {
        if let Some(open) = &self.method {
            return Err(Error::MethodAlreadyOpen(open.name().to_owned()));
        }
        let mut class = self.class;
        class.constants = self.constants_pool.into_offset_vec();
        Ok(class)
    }

    /// Consume the assembler and serialize the class
    pub fn finish(self) -> Result<Vec<u8>, Error> {
        let this_class = self.this_class.clone();
        let bytes = self.into_class_file()?.to_bytes()?;
        log::debug!("assembled class {} ({} bytes)", this_class, bytes.len());
        Ok(bytes)
    }
}
