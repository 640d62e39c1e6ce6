//! Minimal class file reader, written independently of the assembler's own encoder so that tests
//! check the bytes against the class file format rather than against themselves.

#![allow(dead_code)]

use byteorder::{BigEndian, ReadBytesExt};
use std::io::{self, Cursor, Read};

/// Constant pool entry, with indices left unresolved
#[derive(Debug, Clone, PartialEq)]
pub enum PoolEntry {
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class(u16),
    String(u16),
    FieldRef(u16, u16),
    MethodRef(u16, u16),
    InterfaceMethodRef(u16, u16),
    NameAndType(u16, u16),

    /// Unusable slot after a `Long` or `Double`
    Gap,
}

/// Verification type, with class names resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VType {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    Object(String),
    Uninitialized(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    Same,
    SameLocals1(VType),
    Chop(u8),
    Append(Vec<VType>),
    Full { locals: Vec<VType>, stack: Vec<VType> },
}

/// Stack map frame as it appears in the table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Tag byte (frame type)
    pub tag: u8,
    pub offset_delta: u16,
    pub kind: FrameKind,
}

/// Stack map frame with the deltas and compression undone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub offset: u16,
    pub locals: Vec<VType>,
    pub stack: Vec<VType>,
}

#[derive(Debug, Clone)]
pub struct Member {
    pub access_flags: u16,
    pub name: String,
    pub descriptor: String,
    pub attributes: Vec<(String, Vec<u8>)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handler {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub handlers: Vec<Handler>,
    pub attributes: Vec<(String, Vec<u8>)>,
}

#[derive(Debug, Clone)]
pub struct ParsedClass {
    pub minor_version: u16,
    pub major_version: u16,

    /// Indexed like the pool itself (slot 0 is a `Gap`)
    pub constants: Vec<PoolEntry>,
    pub access_flags: u16,
    pub this_class: String,
    pub super_class: String,
    pub interfaces: Vec<String>,
    pub fields: Vec<Member>,
    pub methods: Vec<Member>,
    pub attributes: Vec<(String, Vec<u8>)>,
}

/// Ways reading can go wrong
#[derive(Debug)]
pub enum ReadError {
    Io(io::Error),
    BadMagic,
    BadConstant(u16),
    BadTag(u8),
    TrailingBytes(usize),
}

impl From<io::Error> for ReadError {
    fn from(err: io::Error) -> ReadError {
        ReadError::Io(err)
    }
}

type Reader<'a> = Cursor<&'a [u8]>;

impl ParsedClass {
    pub fn parse(bytes: &[u8]) -> Result<ParsedClass, ReadError> {
        let mut reader = Cursor::new(bytes);
        let mut magic = [0; 4];
        reader.read_exact(&mut magic)?;
        if magic != [0xCA, 0xFE, 0xBA, 0xBE] {
            return Err(ReadError::BadMagic);
        }
        let minor_version = reader.read_u16::<BigEndian>()?;
        let major_version = reader.read_u16::<BigEndian>()?;

        let count = reader.read_u16::<BigEndian>()?;
        let mut constants = vec![PoolEntry::Gap];
        while constants.len() < count as usize {
            let entry = read_constant(&mut reader)?;
            let wide = matches!(entry, PoolEntry::Long(_) | PoolEntry::Double(_));
            constants.push(entry);
            if wide {
                constants.push(PoolEntry::Gap);
            }
        }

        let mut class = ParsedClass {
            minor_version,
            major_version,
            constants,
            access_flags: 0,
            this_class: String::new(),
            super_class: String::new(),
            interfaces: vec![],
            fields: vec![],
            methods: vec![],
            attributes: vec![],
        };

        class.access_flags = reader.read_u16::<BigEndian>()?;
        let this_class = reader.read_u16::<BigEndian>()?;
        class.this_class = class.class_name(this_class)?;
        let super_class = reader.read_u16::<BigEndian>()?;
        class.super_class = class.class_name(super_class)?;
        for _ in 0..reader.read_u16::<BigEndian>()? {
            let interface = reader.read_u16::<BigEndian>()?;
            class.interfaces.push(class.class_name(interface)?);
        }
        class.fields = class.read_members(&mut reader)?;
        class.methods = class.read_members(&mut reader)?;
        class.attributes = class.read_attributes(&mut reader)?;

        let trailing = bytes.len() - reader.position() as usize;
        if trailing != 0 {
            return Err(ReadError::TrailingBytes(trailing));
        }
        Ok(class)
    }

    pub fn utf8(&self, index: u16) -> Result<String, ReadError> {
        match self.constants.get(index as usize) {
            Some(PoolEntry::Utf8(utf8)) => Ok(utf8.clone()),
            _ => Err(ReadError::BadConstant(index)),
        }
    }

    pub fn class_name(&self, index: u16) -> Result<String, ReadError> {
        match self.constants.get(index as usize) {
            Some(PoolEntry::Class(name)) => self.utf8(*name),
            _ => Err(ReadError::BadConstant(index)),
        }
    }

    /// Every `CONSTANT_String` in the pool, resolved
    pub fn strings(&self) -> Vec<String> {
        self.constants
            .iter()
            .filter_map(|entry| match entry {
                PoolEntry::String(utf8) => self.utf8(*utf8).ok(),
                _ => None,
            })
            .collect()
    }

    pub fn method(&self, name: &str) -> Option<&Member> {
        self.methods.iter().find(|method| method.name == name)
    }

    /// Method looked up by descriptor too, for overloads
    pub fn overload(&self, name: &str, descriptor: &str) -> Option<&Member> {
        self.methods
            .iter()
            .find(|method| method.name == name && method.descriptor == descriptor)
    }

    pub fn field(&self, name: &str) -> Option<&Member> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn code(&self, method: &Member) -> Result<Option<CodeAttribute>, ReadError> {
        let bytes = match attribute(&method.attributes, "Code") {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let mut reader = Cursor::new(bytes);
        let max_stack = reader.read_u16::<BigEndian>()?;
        let max_locals = reader.read_u16::<BigEndian>()?;
        let code_length = reader.read_u32::<BigEndian>()?;
        let mut code = vec![0; code_length as usize];
        reader.read_exact(&mut code)?;

        let mut handlers = vec![];
        for _ in 0..reader.read_u16::<BigEndian>()? {
            let start_pc = reader.read_u16::<BigEndian>()?;
            let end_pc = reader.read_u16::<BigEndian>()?;
            let handler_pc = reader.read_u16::<BigEndian>()?;
            let catch_type = match reader.read_u16::<BigEndian>()? {
                0 => None,
                index => Some(self.class_name(index)?),
            };
            handlers.push(Handler {
                start_pc,
                end_pc,
                handler_pc,
                catch_type,
            });
        }
        let attributes = self.read_attributes(&mut reader)?;
        Ok(Some(CodeAttribute {
            max_stack,
            max_locals,
            code,
            handlers,
            attributes,
        }))
    }

    /// Frames of a `StackMapTable`, exactly as encoded
    pub fn raw_frames(&self, code: &CodeAttribute) -> Result<Vec<RawFrame>, ReadError> {
        let bytes = match attribute(&code.attributes, "StackMapTable") {
            Some(bytes) => bytes,
            None => return Ok(vec![]),
        };
        let mut reader = Cursor::new(bytes);
        let mut frames = vec![];
        for _ in 0..reader.read_u16::<BigEndian>()? {
            let tag = reader.read_u8()?;
            let (offset_delta, kind) = match tag {
                0..=63 => (tag as u16, FrameKind::Same),
                64..=127 => {
                    let item = self.read_vtype(&mut reader)?;
                    (tag as u16 - 64, FrameKind::SameLocals1(item))
                }
                247 => {
                    let delta = reader.read_u16::<BigEndian>()?;
                    (delta, FrameKind::SameLocals1(self.read_vtype(&mut reader)?))
                }
                248..=250 => (reader.read_u16::<BigEndian>()?, FrameKind::Chop(251 - tag)),
                251 => (reader.read_u16::<BigEndian>()?, FrameKind::Same),
                252..=254 => {
                    let delta = reader.read_u16::<BigEndian>()?;
                    let locals = (0..tag - 251)
                        .map(|_| self.read_vtype(&mut reader))
                        .collect::<Result<_, _>>()?;
                    (delta, FrameKind::Append(locals))
                }
                255 => {
                    let delta = reader.read_u16::<BigEndian>()?;
                    let locals_count = reader.read_u16::<BigEndian>()?;
                    let locals = (0..locals_count)
                        .map(|_| self.read_vtype(&mut reader))
                        .collect::<Result<_, _>>()?;
                    let stack_count = reader.read_u16::<BigEndian>()?;
                    let stack = (0..stack_count)
                        .map(|_| self.read_vtype(&mut reader))
                        .collect::<Result<_, _>>()?;
                    (delta, FrameKind::Full { locals, stack })
                }
                _ => return Err(ReadError::BadTag(tag)),
            };
            frames.push(RawFrame {
                tag,
                offset_delta,
                kind,
            });
        }
        Ok(frames)
    }

    /// Frames of a `StackMapTable`, starting from the (compressed) locals implied by the method
    /// descriptor
    pub fn frames(
        &self,
        code: &CodeAttribute,
        initial_locals: Vec<VType>,
    ) -> Result<Vec<Frame>, ReadError> {
        let mut locals = initial_locals;
        let mut offset: Option<u16> = None;
        let mut frames = vec![];
        for raw in self.raw_frames(code)? {
            let this_offset = match offset {
                None => raw.offset_delta,
                Some(previous) => previous + raw.offset_delta + 1,
            };
            offset = Some(this_offset);
            let stack = match raw.kind {
                FrameKind::Same => vec![],
                FrameKind::SameLocals1(item) => vec![item],
                FrameKind::Chop(count) => {
                    locals.truncate(locals.len() - count as usize);
                    vec![]
                }
                FrameKind::Append(extra) => {
                    locals.extend(extra);
                    vec![]
                }
                FrameKind::Full {
                    locals: full_locals,
                    stack,
                } => {
                    locals = full_locals;
                    stack
                }
            };
            frames.push(Frame {
                offset: this_offset,
                locals: locals.clone(),
                stack,
            });
        }
        Ok(frames)
    }

    /// `(start_pc, line_number)` entries of a `LineNumberTable`
    pub fn line_numbers(&self, code: &CodeAttribute) -> Result<Vec<(u16, u16)>, ReadError> {
        let bytes = match attribute(&code.attributes, "LineNumberTable") {
            Some(bytes) => bytes,
            None => return Ok(vec![]),
        };
        let mut reader = Cursor::new(bytes);
        let mut entries = vec![];
        for _ in 0..reader.read_u16::<BigEndian>()? {
            let start_pc = reader.read_u16::<BigEndian>()?;
            let line = reader.read_u16::<BigEndian>()?;
            entries.push((start_pc, line));
        }
        Ok(entries)
    }

    /// `(start_pc, length, name, descriptor, index)` entries of a `LocalVariableTable`
    pub fn local_variables(
        &self,
        code: &CodeAttribute,
    ) -> Result<Vec<(u16, u16, String, String, u16)>, ReadError> {
        let bytes = match attribute(&code.attributes, "LocalVariableTable") {
            Some(bytes) => bytes,
            None => return Ok(vec![]),
        };
        let mut reader = Cursor::new(bytes);
        let mut entries = vec![];
        for _ in 0..reader.read_u16::<BigEndian>()? {
            let start_pc = reader.read_u16::<BigEndian>()?;
            let length = reader.read_u16::<BigEndian>()?;
            let name = self.utf8(reader.read_u16::<BigEndian>()?)?;
            let descriptor = self.utf8(reader.read_u16::<BigEndian>()?)?;
            let index = reader.read_u16::<BigEndian>()?;
            entries.push((start_pc, length, name, descriptor, index));
        }
        Ok(entries)
    }

    fn read_vtype(&self, reader: &mut Reader<'_>) -> Result<VType, ReadError> {
        Ok(match reader.read_u8()? {
            0 => VType::Top,
            1 => VType::Integer,
            2 => VType::Float,
            3 => VType::Double,
            4 => VType::Long,
            5 => VType::Null,
            6 => VType::UninitializedThis,
            7 => VType::Object(self.class_name(reader.read_u16::<BigEndian>()?)?),
            8 => VType::Uninitialized(reader.read_u16::<BigEndian>()?),
            tag => return Err(ReadError::BadTag(tag)),
        })
    }

    fn read_members(&self, reader: &mut Reader<'_>) -> Result<Vec<Member>, ReadError> {
        let mut members = vec![];
        for _ in 0..reader.read_u16::<BigEndian>()? {
            let access_flags = reader.read_u16::<BigEndian>()?;
            let name = self.utf8(reader.read_u16::<BigEndian>()?)?;
            let descriptor = self.utf8(reader.read_u16::<BigEndian>()?)?;
            let attributes = self.read_attributes(reader)?;
            members.push(Member {
                access_flags,
                name,
                descriptor,
                attributes,
            });
        }
        Ok(members)
    }

    fn read_attributes(
        &self,
        reader: &mut Reader<'_>,
    ) -> Result<Vec<(String, Vec<u8>)>, ReadError> {
        let mut attributes = vec![];
        for _ in 0..reader.read_u16::<BigEndian>()? {
            let name = self.utf8(reader.read_u16::<BigEndian>()?)?;
            let length = reader.read_u32::<BigEndian>()?;
            let mut info = vec![0; length as usize];
            reader.read_exact(&mut info)?;
            attributes.push((name, info));
        }
        Ok(attributes)
    }
}

pub fn attribute<'a>(attributes: &'a [(String, Vec<u8>)], name: &str) -> Option<&'a [u8]> {
    attributes
        .iter()
        .find(|(attribute_name, _)| attribute_name == name)
        .map(|(_, info)| info.as_slice())
}

fn read_constant(reader: &mut Reader<'_>) -> Result<PoolEntry, ReadError> {
    let tag = reader.read_u8()?;
    Ok(match tag {
        1 => {
            let length = reader.read_u16::<BigEndian>()?;
            let mut bytes = vec![0; length as usize];
            reader.read_exact(&mut bytes)?;
            PoolEntry::Utf8(decode_modified_utf8(&bytes)?)
        }
        3 => PoolEntry::Integer(reader.read_i32::<BigEndian>()?),
        4 => PoolEntry::Float(reader.read_f32::<BigEndian>()?),
        5 => PoolEntry::Long(reader.read_i64::<BigEndian>()?),
        6 => PoolEntry::Double(reader.read_f64::<BigEndian>()?),
        7 => PoolEntry::Class(reader.read_u16::<BigEndian>()?),
        8 => PoolEntry::String(reader.read_u16::<BigEndian>()?),
        9 | 10 | 11 | 12 => {
            let first = reader.read_u16::<BigEndian>()?;
            let second = reader.read_u16::<BigEndian>()?;
            match tag {
                9 => PoolEntry::FieldRef(first, second),
                10 => PoolEntry::MethodRef(first, second),
                11 => PoolEntry::InterfaceMethodRef(first, second),
                _ => PoolEntry::NameAndType(first, second),
            }
        }
        _ => return Err(ReadError::BadTag(tag)),
    })
}

/// Decode modified UTF-8 into UTF-16 code units, then into a string
fn decode_modified_utf8(bytes: &[u8]) -> Result<String, ReadError> {
    let invalid = || ReadError::Io(io::Error::new(io::ErrorKind::InvalidData, "bad utf8"));
    let mut units: Vec<u16> = vec![];
    let mut i = 0;
    while i < bytes.len() {
        let byte = bytes[i] as u16;
        if byte & 0x80 == 0 && byte != 0 {
            units.push(byte);
            i += 1;
        } else if byte & 0xE0 == 0xC0 && i + 1 < bytes.len() {
            units.push(((byte & 0x1F) << 6) | (bytes[i + 1] as u16 & 0x3F));
            i += 2;
        } else if byte & 0xF0 == 0xE0 && i + 2 < bytes.len() {
            units.push(
                ((byte & 0x0F) << 12)
                    | ((bytes[i + 1] as u16 & 0x3F) << 6)
                    | (bytes[i + 2] as u16 & 0x3F),
            );
            i += 3;
        } else {
            return Err(invalid());
        }
    }
    char::decode_utf16(units)
        .collect::<Result<String, _>>()
        .map_err(|_| invalid())
}
