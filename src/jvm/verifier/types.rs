use super::ClassContext;
use crate::jvm::class_file::{ClassConstantIndex, ConstantPool, Serialize};
use crate::jvm::names::{self, array_class_name, array_element, is_array_class};
use crate::jvm::{BaseType, FieldType, FormatLimit};
use crate::util::Width;
use byteorder::WriteBytesExt;

/// These types are from [this hierarchy][0]
///
/// Object types are identified by their class constant. This is both what ends up in the
/// `StackMapTable` and cheap to compare.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se7/html/jvms-4.html#jvms-4.10.1.2
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum VerificationType {
    /// Unusable slot (also the result of merging incompatible types)
    Top,

    Integer,
    Float,
    Double,
    Long,
    Null,

    /// In the constructor, the `this` parameter starts with this type then turns into an object
    /// type after `<init>` is called
    UninitializedThis,

    /// Object type
    Object(ClassConstantIndex),

    /// State of an object after `new` has been called but `<init>` has not, identified by the
    /// offset of the `new` instruction
    Uninitialized(u16),
}

impl VerificationType {
    /// Is this type is a reference type?
    pub fn is_reference(&self) -> bool {
        match self {
            VerificationType::Top
            | VerificationType::Integer
            | VerificationType::Float
            | VerificationType::Double
            | VerificationType::Long => false,

            VerificationType::Null
            | VerificationType::UninitializedThis
            | VerificationType::Object(_)
            | VerificationType::Uninitialized(_) => true,
        }
    }

    /// Verification type of a value of some field type
    pub fn from_field_type(
        field_type: &FieldType,
        constants: &mut ConstantPool,
    ) -> Result<VerificationType, FormatLimit> {
        Ok(match field_type {
            FieldType::Base(BaseType::Int)
            | FieldType::Base(BaseType::Char)
            | FieldType::Base(BaseType::Short)
            | FieldType::Base(BaseType::Byte)
            | FieldType::Base(BaseType::Boolean) => VerificationType::Integer,
            FieldType::Base(BaseType::Float) => VerificationType::Float,
            FieldType::Base(BaseType::Long) => VerificationType::Long,
            FieldType::Base(BaseType::Double) => VerificationType::Double,
            FieldType::Object(name) => VerificationType::Object(constants.get_class(name)?),
            array @ FieldType::Array(_) => {
                let name = array.class_name().unwrap_or_default();
                VerificationType::Object(constants.get_class(&name)?)
            }
        })
    }

    /// Least upper bound of two types
    ///
    /// Merging is idempotent, commutative, and only ever widens: `Top` absorbs everything, `null`
    /// merges into any object type, and two object types merge into their closest common
    /// superclass. Everything else is incompatible and produces `Top`.
    pub fn merge(
        self,
        other: VerificationType,
        constants: &mut ConstantPool,
        class: &ClassContext<'_>,
    ) -> Result<VerificationType, FormatLimit> {
        use VerificationType::*;

        Ok(match (self, other) {
            (t1, t2) if t1 == t2 => t1,
            (Null, obj @ Object(_)) | (obj @ Object(_), Null) => obj,
            (Object(cls1), Object(cls2)) => {
                let name1 = constants.class_name(cls1).unwrap_or(names::OBJECT).to_owned();
                let name2 = constants.class_name(cls2).unwrap_or(names::OBJECT).to_owned();
                let common = common_superclass(&name1, &name2, class);
                Object(constants.get_class(&common)?)
            }
            _ => Top,
        })
    }
}

/// Closest class both arguments are assignable to
///
/// The class being assembled does not exist yet as far as the hierarchy is concerned, so it is
/// replaced by its superclass. Interfaces are not tracked precisely: if neither side is
/// assignable to the other, the result is `java/lang/Object` (the verifier treats interface types
/// like `Object` anyway).
pub fn common_superclass(class1: &str, class2: &str, class: &ClassContext<'_>) -> String {
    let resolve = |name: &str| -> String {
        if name == class.this_class {
            class.super_class.to_owned()
        } else {
            name.to_owned()
        }
    };
    let class1 = resolve(class1);
    let class2 = resolve(class2);

    if class1 == class2 {
        return class1;
    }

    if is_array_class(&class1) || is_array_class(&class2) {
        return match (array_element(&class1), array_element(&class2)) {
            (Some(elem1), Some(elem2)) => match (elem1.class_name(), elem2.class_name()) {
                (Some(elem1), Some(elem2)) if elem1 != elem2 => {
                    array_class_name(&common_superclass(&elem1, &elem2, class))
                }
                _ => names::OBJECT.to_owned(),
            },
            _ => names::OBJECT.to_owned(),
        };
    }

    let hierarchy = class.hierarchy;
    if hierarchy.is_assignable(&class1, &class2) {
        return class2;
    }
    if hierarchy.is_assignable(&class2, &class1) {
        return class1;
    }
    if hierarchy.is_interface(&class1) || hierarchy.is_interface(&class2) {
        return names::OBJECT.to_owned();
    }

    let mut current = class1;
    while let Some(parent) = hierarchy.superclass_of(&current) {
        let parent = parent.to_owned();
        if hierarchy.is_assignable(&class2, &parent) {
            return parent;
        }
        current = parent;
    }
    names::OBJECT.to_owned()
}

impl Serialize for VerificationType {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            VerificationType::Top => 0u8.serialize(writer)?,
            VerificationType::Integer => 1u8.serialize(writer)?,
            VerificationType::Float => 2u8.serialize(writer)?,
            VerificationType::Double => 3u8.serialize(writer)?,
            VerificationType::Long => 4u8.serialize(writer)?,
            VerificationType::Null => 5u8.serialize(writer)?,
            VerificationType::UninitializedThis => 6u8.serialize(writer)?,
            VerificationType::Object(cls) => {
                7u8.serialize(writer)?;
                cls.serialize(writer)?;
            }
            VerificationType::Uninitialized(off) => {
                8u8.serialize(writer)?;
                off.serialize(writer)?;
            }
        };
        Ok(())
    }
}

impl Width for VerificationType {
    fn width(&self) -> usize {
        match self {
            VerificationType::Double | VerificationType::Long => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::ConstantIndex;
    use crate::jvm::verifier::{ClassGraph, ClassHierarchy};
    use VerificationType::*;

    fn context(graph: &ClassGraph) -> ClassContext<'_> {
        ClassContext {
            this_class: "me/Current",
            super_class: "java/lang/Exception",
            hierarchy: graph,
        }
    }

    #[test]
    fn merge_primitives() {
        let graph = ClassGraph::new();
        let class = context(&graph);
        let mut constants = ConstantPool::new();
        let string = Object(constants.get_class(names::STRING).unwrap());

        for typ in [Top, Integer, Float, Long, Double, Null, UninitializedThis, string] {
            assert_eq!(typ.merge(typ, &mut constants, &class).unwrap(), typ);
            assert_eq!(typ.merge(Top, &mut constants, &class).unwrap(), Top);
            assert_eq!(Top.merge(typ, &mut constants, &class).unwrap(), Top);
        }
        assert_eq!(Integer.merge(Float, &mut constants, &class).unwrap(), Top);
        assert_eq!(Long.merge(Double, &mut constants, &class).unwrap(), Top);
        assert_eq!(Null.merge(string, &mut constants, &class).unwrap(), string);
        assert_eq!(string.merge(Null, &mut constants, &class).unwrap(), string);
        assert_eq!(
            Uninitialized(3).merge(Uninitialized(7), &mut constants, &class).unwrap(),
            Top
        );
        assert_eq!(Null.merge(UninitializedThis, &mut constants, &class).unwrap(), Top);
    }

    #[test]
    fn merge_objects() {
        let graph = ClassGraph::new();
        let class = context(&graph);
        let mut constants = ConstantPool::new();
        let object = |name: &str, constants: &mut ConstantPool| {
            Object(constants.get_class(name).unwrap())
        };

        let string = object(names::STRING, &mut constants);
        let integer = object("java/lang/Integer", &mut constants);
        let runtime = object("java/lang/RuntimeException", &mut constants);
        let error = object("java/lang/Error", &mut constants);
        let throwable = object(names::THROWABLE, &mut constants);
        let current = object("me/Current", &mut constants);
        let java_object = object(names::OBJECT, &mut constants);

        assert_eq!(string.merge(integer, &mut constants, &class).unwrap(), java_object);
        assert_eq!(runtime.merge(error, &mut constants, &class).unwrap(), throwable);
        assert_eq!(error.merge(throwable, &mut constants, &class).unwrap(), throwable);

        // The class being built is treated like its superclass
        let exception = object("java/lang/Exception", &mut constants);
        assert_eq!(current.merge(runtime, &mut constants, &class).unwrap(), exception);
        assert_eq!(current.merge(current, &mut constants, &class).unwrap(), current);
    }

    #[test]
    fn boxed_types() {
        let graph = ClassGraph::new();
        let class = context(&graph);
        let number = "java/lang/Number";
        for boxed in ["Byte", "Short", "Long", "Float", "Double"] {
            let boxed = format!("java/lang/{}", boxed);
            assert_eq!(common_superclass("java/lang/Integer", &boxed, &class), number);
            assert_eq!(common_superclass(&boxed, "java/lang/Integer", &class), number);
        }
        assert_eq!(
            common_superclass("java/lang/Long", "java/lang/Number", &class),
            number
        );
        assert_eq!(
            common_superclass("java/lang/Character", "java/lang/Boolean", &class),
            names::OBJECT
        );
        assert_eq!(
            common_superclass("java/lang/Double", "java/lang/Character", &class),
            names::OBJECT
        );
        assert!(graph.is_assignable("java/lang/Boolean", names::SERIALIZABLE));
        assert!(graph.is_assignable("java/lang/Long", "java/lang/Comparable"));

        let mut constants = ConstantPool::new();
        let integer = Object(constants.get_class("java/lang/Integer").unwrap());
        let long = Object(constants.get_class("java/lang/Long").unwrap());
        let number = Object(constants.get_class(number).unwrap());
        assert_eq!(integer.merge(long, &mut constants, &class).unwrap(), number);
    }

    #[test]
    fn merge_arrays() {
        let graph = ClassGraph::new();
        let class = context(&graph);
        let mut constants = ConstantPool::new();
        let object = |name: &str, constants: &mut ConstantPool| {
            Object(constants.get_class(name).unwrap())
        };

        let ints = object("[I", &mut constants);
        let longs = object("[J", &mut constants);
        let strings = object("[Ljava/lang/String;", &mut constants);
        let integers = object("[Ljava/lang/Integer;", &mut constants);
        let objects = object("[Ljava/lang/Object;", &mut constants);
        let java_object = object(names::OBJECT, &mut constants);

        assert_eq!(ints.merge(longs, &mut constants, &class).unwrap(), java_object);
        assert_eq!(ints.merge(strings, &mut constants, &class).unwrap(), java_object);
        assert_eq!(strings.merge(integers, &mut constants, &class).unwrap(), objects);
    }

    #[test]
    fn field_types() {
        let mut constants = ConstantPool::new();
        let typ = VerificationType::from_field_type(&FieldType::boolean(), &mut constants);
        assert_eq!(typ.unwrap(), Integer);

        let array = FieldType::array(FieldType::int());
        let typ = VerificationType::from_field_type(&array, &mut constants).unwrap();
        let class = constants.get_class("[I").unwrap();
        assert_eq!(typ, Object(class));
        assert_eq!(Long.width(), 2);
        assert_eq!(typ.width(), 1);
    }

    #[test]
    fn serialized_tags() {
        let mut bytes = vec![];
        let class = ClassConstantIndex(ConstantIndex(3));
        for typ in [Top, Integer, Null, Object(class), Uninitialized(0x102)] {
            typ.serialize(&mut bytes).unwrap();
        }
        assert_eq!(bytes, vec![0, 1, 5, 7, 0, 3, 8, 1, 2]);
    }
}
