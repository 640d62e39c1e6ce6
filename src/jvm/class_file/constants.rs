use crate::jvm::class_file::{Attribute, AttributeLike, Serialize};
use crate::jvm::names::canonical_class_name;
use crate::jvm::{Error, FormatLimit};
use crate::util::{Offset, OffsetVec, Width};
use byteorder::WriteBytesExt;
use std::collections::HashMap;
use std::fmt;

/// Largest number of bytes a `CONSTANT_Utf8` entry can hold
pub const MAX_UTF8_LENGTH: usize = u16::MAX as usize;

/// Class file constants pool builder
///
/// The pool is append only. Every `get_*` method returns the index of an existing entry with the
/// same value if there is one, and appends a fresh entry otherwise. Index 0 is never handed out and
/// `long`/`double` entries occupy two consecutive indices.
pub struct ConstantPool {
    constants: OffsetVec<Constant>,

    utf8s: HashMap<String, Utf8ConstantIndex>,
    classes: HashMap<Utf8ConstantIndex, ClassConstantIndex>,
    strings: HashMap<Utf8ConstantIndex, StringConstantIndex>,
    integers: HashMap<i32, ConstantIndex>,
    floats: HashMap<u32, ConstantIndex>,
    longs: HashMap<i64, ConstantIndex>,
    doubles: HashMap<u64, ConstantIndex>,
    name_and_types: HashMap<(Utf8ConstantIndex, Utf8ConstantIndex), NameAndTypeConstantIndex>,
    fieldrefs: HashMap<(ClassConstantIndex, NameAndTypeConstantIndex), FieldRefConstantIndex>,
    methodrefs:
        HashMap<(ClassConstantIndex, NameAndTypeConstantIndex, bool), MethodRefConstantIndex>,
}

impl ConstantPool {
    /// Make a fresh empty constants pool
    pub fn new() -> ConstantPool {
        ConstantPool {
            constants: OffsetVec::new_starting_at(Offset(1)),
            utf8s: HashMap::new(),
            classes: HashMap::new(),
            strings: HashMap::new(),
            integers: HashMap::new(),
            floats: HashMap::new(),
            longs: HashMap::new(),
            doubles: HashMap::new(),
            name_and_types: HashMap::new(),
            fieldrefs: HashMap::new(),
            methodrefs: HashMap::new(),
        }
    }

    /// Number of entries (not counting the unusable slots after `long` and `double` entries)
    pub fn len(&self) -> usize {
        self.constants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    /// Push a constant into the constant pool, provided there is space for it
    ///
    /// Note: the `constant_pool_count` is a `u16` and indexing starts at 1, so the largest usable
    /// index is 65534. Some constants take two spaces.
    fn push_constant(&mut self, constant: Constant) -> Result<ConstantIndex, FormatLimit> {
        let offset = self.constants.offset_len().0;
        if offset + constant.width() > u16::MAX as usize {
            return Err(FormatLimit::ConstantPoolOverflow { offset });
        }

        self.constants.push(constant);
        Ok(ConstantIndex(offset as u16))
    }

    /// Consume the pool and return the final vector of constants
    pub fn into_offset_vec(self) -> OffsetVec<Constant> {
        self.constants
    }

    /// Get or insert a utf8 constant
    ///
    /// Strings whose modified UTF-8 encoding exceeds 65535 bytes are a format limit. Use
    /// [`ConstantPool::utf8_encoding_limit`] to split them up first.
    pub fn get_utf8(&mut self, utf8: &str) -> Result<Utf8ConstantIndex, FormatLimit> {
        if let Some(idx) = self.utf8s.get(utf8) {
            return Ok(*idx);
        }

        let encoded_length = modified_utf8_length(utf8);
        if encoded_length > MAX_UTF8_LENGTH {
            return Err(FormatLimit::Utf8TooLong { encoded_length });
        }

        let owned = utf8.to_owned();
        let idx = Utf8ConstantIndex(self.push_constant(Constant::Utf8(owned.clone()))?);
        self.utf8s.insert(owned, idx);
        Ok(idx)
    }

    /// Get or insert a class constant
    ///
    /// Both `java.lang.String` and `java/lang/String` resolve to the same entry.
    pub fn get_class(&mut self, name: &str) -> Result<ClassConstantIndex, FormatLimit> {
        let utf8 = self.get_utf8(&canonical_class_name(name))?;
        if let Some(idx) = self.classes.get(&utf8) {
            Ok(*idx)
        } else {
            let idx = ClassConstantIndex(self.push_constant(Constant::Class(utf8))?);
            self.classes.insert(utf8, idx);
            Ok(idx)
        }
    }

    /// Get or insert a string constant
    pub fn get_string(&mut self, string: &str) -> Result<StringConstantIndex, FormatLimit> {
        let utf8 = self.get_utf8(string)?;
        if let Some(idx) = self.strings.get(&utf8) {
            Ok(*idx)
        } else {
            let idx = StringConstantIndex(self.push_constant(Constant::String(utf8))?);
            self.strings.insert(utf8, idx);
            Ok(idx)
        }
    }

    /// Get or insert an integer constant
    pub fn get_integer(&mut self, integer: i32) -> Result<ConstantIndex, FormatLimit> {
        if let Some(idx) = self.integers.get(&integer) {
            Ok(*idx)
        } else {
            let idx = self.push_constant(Constant::Integer(integer))?;
            self.integers.insert(integer, idx);
            Ok(idx)
        }
    }

    /// Get or insert a float constant
    ///
    /// Floats are compared by their bits, so `-0.0` and `0.0` (or different NaNs) are distinct.
    pub fn get_float(&mut self, float: f32) -> Result<ConstantIndex, FormatLimit> {
        let key = float.to_bits();
        if let Some(idx) = self.floats.get(&key) {
            Ok(*idx)
        } else {
            let idx = self.push_constant(Constant::Float(float))?;
            self.floats.insert(key, idx);
            Ok(idx)
        }
    }

    /// Get or insert a long constant
    pub fn get_long(&mut self, long: i64) -> Result<ConstantIndex, FormatLimit> {
        if let Some(idx) = self.longs.get(&long) {
            Ok(*idx)
        } else {
            let idx = self.push_constant(Constant::Long(long))?;
            self.longs.insert(long, idx);
            Ok(idx)
        }
    }

    /// Get or insert a double constant (compared by bits)
    pub fn get_double(&mut self, double: f64) -> Result<ConstantIndex, FormatLimit> {
        let key = double.to_bits();
        if let Some(idx) = self.doubles.get(&key) {
            Ok(*idx)
        } else {
            let idx = self.push_constant(Constant::Double(double))?;
            self.doubles.insert(key, idx);
            Ok(idx)
        }
    }

    /// Get or insert a name & type constant
    pub fn get_name_and_type(
        &mut self,
        name: &str,
        descriptor: &str,
    ) -> Result<NameAndTypeConstantIndex, FormatLimit> {
        let name = self.get_utf8(name)?;
        let descriptor = self.get_utf8(descriptor)?;
        let key = (name, descriptor);
        if let Some(idx) = self.name_and_types.get(&key) {
            Ok(*idx)
        } else {
            let constant = Constant::NameAndType { name, descriptor };
            let idx = NameAndTypeConstantIndex(self.push_constant(constant)?);
            self.name_and_types.insert(key, idx);
            Ok(idx)
        }
    }

    /// Get or insert a field reference constant
    pub fn get_field_ref(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<FieldRefConstantIndex, FormatLimit> {
        let class = self.get_class(class)?;
        let name_and_type = self.get_name_and_type(name, descriptor)?;
        let key = (class, name_and_type);
        if let Some(idx) = self.fieldrefs.get(&key) {
            Ok(*idx)
        } else {
            let constant = Constant::FieldRef(class, name_and_type);
            let idx = FieldRefConstantIndex(self.push_constant(constant)?);
            self.fieldrefs.insert(key, idx);
            Ok(idx)
        }
    }

    /// Get or insert a method reference constant (`Methodref` or `InterfaceMethodref`)
    pub fn get_method_ref(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> Result<MethodRefConstantIndex, FormatLimit> {
        let class = self.get_class(class)?;
        let name_and_type = self.get_name_and_type(name, descriptor)?;
        let key = (class, name_and_type, is_interface);
        if let Some(idx) = self.methodrefs.get(&key) {
            Ok(*idx)
        } else {
            let constant = Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            };
            let idx = MethodRefConstantIndex(self.push_constant(constant)?);
            self.methodrefs.insert(key, idx);
            Ok(idx)
        }
    }

    /// Add an attribute to the constant pool
    pub fn get_attribute<A: AttributeLike>(&mut self, attribute: A) -> Result<Attribute, Error> {
        let name_index = self.get_utf8(A::NAME)?;
        let mut info = vec![];
        attribute.serialize(&mut info)?;
        Ok(Attribute { name_index, info })
    }

    /// Tag of the constant at some index
    pub fn type_of(&self, index: ConstantIndex) -> Option<ConstantTag> {
        self.data_of(index).map(Constant::tag)
    }

    /// Constant stored at some index
    pub fn data_of(&self, index: ConstantIndex) -> Option<&Constant> {
        self.constants.get_offset(Offset(index.0 as usize))
    }

    /// Text of a utf8 constant
    pub fn utf8_of(&self, index: Utf8ConstantIndex) -> Option<&str> {
        match self.data_of(index.0) {
            Some(Constant::Utf8(text)) => Some(text),
            _ => None,
        }
    }

    /// Internal name of the class referenced by a class constant
    pub fn class_name(&self, index: ClassConstantIndex) -> Option<&str> {
        match self.data_of(index.0) {
            Some(Constant::Class(name)) => self.utf8_of(*name),
            _ => None,
        }
    }

    /// Resolve a field or method reference into its class, name, and descriptor
    pub fn member_ref(&self, index: ConstantIndex) -> Option<MemberRef<'_>> {
        let (class, name_and_type, is_interface) = match self.data_of(index)? {
            Constant::FieldRef(class, name_and_type) => (*class, *name_and_type, false),
            Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            } => (*class, *name_and_type, *is_interface),
            _ => return None,
        };
        let (name, descriptor) = match self.data_of(name_and_type.0)? {
            Constant::NameAndType { name, descriptor } => (*name, *descriptor),
            _ => return None,
        };
        Some(MemberRef {
            class,
            class_name: self.class_name(class)?,
            name: self.utf8_of(name)?,
            descriptor: self.utf8_of(descriptor)?,
            is_interface,
        })
    }

    /// Largest end index `e` (with `start <= e <= end`) such that the modified UTF-8 encoding of
    /// `string[start..e]` fits in `byte_budget` bytes
    ///
    /// Indices are byte offsets into `string` and must lie on character boundaries. This is used
    /// to split string literals too long for a single `CONSTANT_Utf8` entry.
    pub fn utf8_encoding_limit(string: &str, start: usize, end: usize, byte_budget: usize) -> usize {
        let mut encoded = 0;
        for (offset, c) in string[start..end].char_indices() {
            encoded += modified_utf8_char_length(c);
            if encoded > byte_budget {
                return start + offset;
            }
        }
        end
    }
}

impl Default for ConstantPool {
    fn default() -> Self {
        ConstantPool::new()
    }
}

impl fmt::Debug for ConstantPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.constants, f)
    }
}

/// Field or method reference, resolved into strings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRef<'a> {
    pub class: ClassConstantIndex,
    pub class_name: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
    pub is_interface: bool,
}

/// Tags of constants
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.4-140
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ConstantTag {
    Utf8 = 1,
    Integer = 3,
    Float = 4,
    Long = 5,
    Double = 6,
    Class = 7,
    String = 8,
    FieldRef = 9,
    MethodRef = 10,
    InterfaceMethodRef = 11,
    NameAndType = 12,
}

/// Constants as in the constant pool
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.4
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Class or an interface
    Class(Utf8ConstantIndex),

    /// Field
    FieldRef(ClassConstantIndex, NameAndTypeConstantIndex),

    /// Method (this combines `Methodref` and `InterfaceMethodref`)
    MethodRef {
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
        is_interface: bool,
    },

    /// Constant object of type `java.lang.String`
    String(Utf8ConstantIndex),

    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),

    /// Name and a type (eg. for a field or a method)
    NameAndType {
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    },

    /// Constant UTF-8 encoded raw string value
    ///
    /// Despite the name, the encoding is not quite UTF-8 (the encoding of the
    /// null character `\u{0000}` and the encoding of supplementary characters
    /// is different).
    Utf8(String),
}

impl Constant {
    pub fn tag(&self) -> ConstantTag {
        match self {
            Constant::Class(_) => ConstantTag::Class,
            Constant::FieldRef(_, _) => ConstantTag::FieldRef,
            Constant::MethodRef {
                is_interface: false,
                ..
            } => ConstantTag::MethodRef,
            Constant::MethodRef {
                is_interface: true, ..
            } => ConstantTag::InterfaceMethodRef,
            Constant::String(_) => ConstantTag::String,
            Constant::Integer(_) => ConstantTag::Integer,
            Constant::Float(_) => ConstantTag::Float,
            Constant::Long(_) => ConstantTag::Long,
            Constant::Double(_) => ConstantTag::Double,
            Constant::NameAndType { .. } => ConstantTag::NameAndType,
            Constant::Utf8(_) => ConstantTag::Utf8,
        }
    }
}

impl Serialize for Constant {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        (self.tag() as u8).serialize(writer)?;
        match self {
            Constant::Utf8(string) => {
                let buffer: Vec<u8> = encode_modified_utf8(string);
                (buffer.len() as u16).serialize(writer)?;
                writer.write_all(&buffer)?;
            }
            Constant::Integer(integer) => integer.serialize(writer)?,
            Constant::Float(float) => float.serialize(writer)?,
            Constant::Long(long) => long.serialize(writer)?,
            Constant::Double(double) => double.serialize(writer)?,
            Constant::Class(name) => name.serialize(writer)?,
            Constant::String(utf8) => utf8.serialize(writer)?,
            Constant::FieldRef(class, name_and_type)
            | Constant::MethodRef {
                class,
                name_and_type,
                ..
            } => {
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::NameAndType { name, descriptor } => {
                name.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
        };
        Ok(())
    }
}

/// Almost all constants have width 1, except for `Constant::Long` and `Constant::Double`. Quoting
/// the JVM specification:
///
/// > All 8-byte constants take up two entries in the constant_pool table of the class file. If a
/// > CONSTANT_Long_info or CONSTANT_Double_info structure is the item in the constant_pool table
/// > at index n, then the next usable item in the pool is located at index n+2. The constant_pool
/// > index n+1 must be valid but is considered unusable.
impl Width for Constant {
    fn width(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

/// Number of bytes a character occupies in modified UTF-8
fn modified_utf8_char_length(c: char) -> usize {
    match c as u32 {
        0 => 2,
        0x01..=0x7F => 1,
        0x80..=0x7FF => 2,
        0x800..=0xFFFF => 3,
        _ => 6,
    }
}

/// Number of bytes `encode_modified_utf8` would produce
pub fn modified_utf8_length(string: &str) -> usize {
    string.chars().map(modified_utf8_char_length).sum()
}

/// Modified UTF-8 format used in class files.
///
/// See [this `DataInput` section for details][0]. Quoting from that section:
///
/// > The differences between this format and the standard UTF-8 format are the following:
/// >
/// >  * The null byte `\u0000` is encoded in 2-byte format rather than 1-byte, so that the encoded
/// >    strings never have embedded nulls.
/// >  * Only the 1-byte, 2-byte, and 3-byte formats are used.
/// >  * Supplementary characters are represented in the form of surrogate pairs.
///
/// [0]: https://docs.oracle.com/en/java/javase/17/docs/api/java.base/java/io/DataInput.html#modified-utf-8
pub fn encode_modified_utf8(string: &str) -> Vec<u8> {
    let mut buffer: Vec<u8> = Vec::with_capacity(string.len());
    for c in string.chars() {
        let code: u32 = c as u32;
        match modified_utf8_char_length(c) {
            1 => buffer.push(code as u8),
            2 => {
                buffer.push((code >> 6 & 0x1F) as u8 | 0b1100_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }
            3 => {
                buffer.push((code >> 12 & 0x0F) as u8 | 0b1110_0000);
                buffer.push((code >> 6 & 0x3F) as u8 | 0b1000_0000);
                buffer.push((code & 0x3F) as u8 | 0b1000_0000);
            }

            // Supplementary characters are written as a surrogate pair, each of which is then
            // encoded in the 3-byte form
            _ => {
                let mut surrogates = [0u16; 2];
                for surrogate in c.encode_utf16(&mut surrogates).iter() {
                    let unit = *surrogate as u32;
                    buffer.push((unit >> 12 & 0x0F) as u8 | 0b1110_0000);
                    buffer.push((unit >> 6 & 0x3F) as u8 | 0b1000_0000);
                    buffer.push((unit & 0x3F) as u8 | 0b1000_0000);
                }
            }
        }
    }
    buffer
}

#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct ConstantIndex(pub u16);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct Utf8ConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct StringConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct NameAndTypeConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct ClassConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct FieldRefConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct MethodRefConstantIndex(pub ConstantIndex);

macro_rules! typed_constant_index {
    ($($typed:ident),*) => {
        $(
            impl From<$typed> for ConstantIndex {
                fn from(index: $typed) -> ConstantIndex {
                    index.0
                }
            }

            impl Serialize for $typed {
                fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
                    self.0.serialize(writer)
                }
            }
        )*
    };
}

typed_constant_index!(
    Utf8ConstantIndex,
    StringConstantIndex,
    NameAndTypeConstantIndex,
    ClassConstantIndex,
    FieldRefConstantIndex,
    MethodRefConstantIndex
);

impl Serialize for ConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut pool = ConstantPool::new();

        let utf8 = pool.get_utf8("hello").unwrap();
        assert_eq!(pool.get_utf8("hello").unwrap(), utf8);
        assert_ne!(pool.get_utf8("world").unwrap(), utf8);

        let string = pool.get_string("hello").unwrap();
        assert_eq!(pool.get_string("hello").unwrap(), string);

        let class = pool.get_class("java/lang/Object").unwrap();
        assert_eq!(pool.get_class("java/lang/Object").unwrap(), class);
        assert_ne!(pool.get_class("java/lang/String").unwrap(), class);

        let long = pool.get_long(1).unwrap();
        assert_eq!(pool.get_long(1).unwrap(), long);
        let double = pool.get_double(1.0).unwrap();
        assert_eq!(pool.get_double(1.0).unwrap(), double);
        assert_ne!(long, double);

        let integer = pool.get_integer(1).unwrap();
        assert_eq!(pool.get_integer(1).unwrap(), integer);
        assert_ne!(integer, long);
    }

    #[test]
    fn index_zero_is_never_issued() {
        let mut pool = ConstantPool::new();
        assert_eq!(pool.get_utf8("first").unwrap().0, ConstantIndex(1));
        assert_eq!(pool.data_of(ConstantIndex(0)), None);
        assert_eq!(pool.type_of(ConstantIndex(1)), Some(ConstantTag::Utf8));
    }

    #[test]
    fn wide_constants_take_two_slots() {
        let mut pool = ConstantPool::new();
        let long = pool.get_long(42).unwrap();
        let after_long = pool.get_integer(7).unwrap();
        assert_eq!(after_long.0, long.0 + 2);

        let double = pool.get_double(2.5).unwrap();
        let after_double = pool.get_utf8("x").unwrap();
        assert_eq!(after_double.0 .0, double.0 + 2);

        // The second slot of a wide constant is unusable
        assert_eq!(pool.data_of(ConstantIndex(long.0 + 1)), None);
        assert_eq!(pool.type_of(long), Some(ConstantTag::Long));
        assert_eq!(pool.type_of(double), Some(ConstantTag::Double));
    }

    #[test]
    fn class_names_are_canonicalized() {
        let mut pool = ConstantPool::new();
        let dotted = pool.get_class("java.lang.String").unwrap();
        let slashed = pool.get_class("java/lang/String").unwrap();
        assert_eq!(dotted, slashed);
        assert_eq!(pool.class_name(dotted), Some("java/lang/String"));
    }

    #[test]
    fn floats_are_keyed_by_bits() {
        let mut pool = ConstantPool::new();
        let zero = pool.get_float(0.0).unwrap();
        let negative_zero = pool.get_float(-0.0).unwrap();
        assert_ne!(zero, negative_zero);
        assert_eq!(pool.get_float(f32::NAN).unwrap(), pool.get_float(f32::NAN).unwrap());
    }

    #[test]
    fn member_refs() {
        let mut pool = ConstantPool::new();
        let method = pool
            .get_method_ref("java/util/List", "size", "()I", true)
            .unwrap();
        let member = pool.member_ref(method.into()).unwrap();
        assert_eq!(member.class_name, "java/util/List");
        assert_eq!(member.name, "size");
        assert_eq!(member.descriptor, "()I");
        assert!(member.is_interface);
        assert_eq!(
            pool.type_of(method.into()),
            Some(ConstantTag::InterfaceMethodRef)
        );

        let field = pool
            .get_field_ref("java/lang/System", "out", "Ljava/io/PrintStream;")
            .unwrap();
        assert_eq!(
            pool.get_field_ref("java.lang.System", "out", "Ljava/io/PrintStream;")
                .unwrap(),
            field
        );
        assert_eq!(pool.member_ref(field.into()).unwrap().name, "out");
    }

    #[test]
    fn pool_overflow_is_a_format_limit() {
        let mut pool = ConstantPool::new();
        for i in 0..65534 {
            pool.get_integer(i).unwrap();
        }
        assert_eq!(
            pool.get_integer(-1),
            Err(FormatLimit::ConstantPoolOverflow { offset: 65535 })
        );
    }

    #[test]
    fn wide_constant_does_not_fit_in_last_slot() {
        let mut pool = ConstantPool::new();
        for i in 0..65533 {
            pool.get_integer(i).unwrap();
        }
        assert!(pool.get_long(0).is_err());
        assert!(pool.get_integer(-1).is_ok());
    }

    #[test]
    fn long_utf8_is_a_format_limit() {
        let mut pool = ConstantPool::new();
        let fits = "a".repeat(MAX_UTF8_LENGTH);
        assert!(pool.get_utf8(&fits).is_ok());

        // 32768 NUL characters encode to 65536 bytes
        let too_long = "\u{0}".repeat(32768);
        assert_eq!(
            pool.get_utf8(&too_long),
            Err(FormatLimit::Utf8TooLong {
                encoded_length: 65536
            })
        );
    }

    #[test]
    fn encoding_limit() {
        // 'é' takes 2 bytes, '€' takes 3
        let string = "aé€b";
        assert_eq!(ConstantPool::utf8_encoding_limit(string, 0, string.len(), 100), string.len());
        assert_eq!(ConstantPool::utf8_encoding_limit(string, 0, string.len(), 1), 1);
        assert_eq!(ConstantPool::utf8_encoding_limit(string, 0, string.len(), 3), 3);
        assert_eq!(ConstantPool::utf8_encoding_limit(string, 0, string.len(), 5), 3);
        assert_eq!(ConstantPool::utf8_encoding_limit(string, 0, string.len(), 6), 6);
        assert_eq!(ConstantPool::utf8_encoding_limit(string, 1, string.len(), 2), 3);
        assert_eq!(ConstantPool::utf8_encoding_limit(string, 0, string.len(), 0), 0);

        // NUL counts as two bytes
        assert_eq!(ConstantPool::utf8_encoding_limit("\u{0}a", 0, 2, 1), 0);
        assert_eq!(ConstantPool::utf8_encoding_limit("\u{0}a", 0, 2, 2), 1);
    }

    #[test]
    fn serialized_constants() {
        let mut bytes = vec![];
        Constant::Integer(-1).serialize(&mut bytes).unwrap();
        assert_eq!(bytes, vec![3, 0xFF, 0xFF, 0xFF, 0xFF]);

        let mut bytes = vec![];
        Constant::Utf8(String::from("a\u{0}")).serialize(&mut bytes).unwrap();
        assert_eq!(bytes, vec![1, 0, 3, 97, 0xC0, 0x80]);

        let mut bytes = vec![];
        let class = ClassConstantIndex(ConstantIndex(2));
        let name_and_type = NameAndTypeConstantIndex(ConstantIndex(5));
        Constant::MethodRef {
            class,
            name_and_type,
            is_interface: true,
        }
        .serialize(&mut bytes)
        .unwrap();
        assert_eq!(bytes, vec![11, 0, 2, 0, 5]);
    }
}
