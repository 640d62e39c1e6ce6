use crate::jvm::descriptors::{FieldType, ParseDescriptor};
use std::borrow::Cow;

pub const OBJECT: &str = "java/lang/Object";
pub const THROWABLE: &str = "java/lang/Throwable";
pub const STRING: &str = "java/lang/String";
pub const CLASS: &str = "java/lang/Class";
pub const STRING_BUILDER: &str = "java/lang/StringBuilder";
pub const CLONEABLE: &str = "java/lang/Cloneable";
pub const SERIALIZABLE: &str = "java/io/Serializable";

/// Name of constructors
pub const INIT: &str = "<init>";

/// Convert a class name into its internal form (`java.lang.String` becomes `java/lang/String`)
///
/// Array class names (eg. `[Ljava.lang.String;`) are converted too.
pub fn canonical_class_name(name: &str) -> Cow<'_, str> {
    if name.contains('.') {
        Cow::Owned(name.replace('.', "/"))
    } else {
        Cow::Borrowed(name)
    }
}

/// Is this the name of an array class?
pub fn is_array_class(name: &str) -> bool {
    name.starts_with('[')
}

/// Class name of an array whose elements are of the given class
///
/// `java/lang/String` becomes `[Ljava/lang/String;` and `[I` becomes `[[I`.
pub fn array_class_name(element_class: &str) -> String {
    if is_array_class(element_class) {
        format!("[{}", element_class)
    } else {
        format!("[L{};", element_class)
    }
}

/// Element type of an array class name (`None` if this is not an array class)
pub fn array_element(array_class: &str) -> Option<FieldType> {
    array_class
        .strip_prefix('[')
        .and_then(|element| FieldType::parse(element).ok())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn canonical_names() {
        assert_eq!(canonical_class_name("java.lang.String"), "java/lang/String");
        assert_eq!(canonical_class_name("java/lang/String"), "java/lang/String");
        assert_eq!(canonical_class_name("Foo"), "Foo");
        assert!(matches!(canonical_class_name("a/b"), Cow::Borrowed(_)));
    }

    #[test]
    fn array_names() {
        assert_eq!(array_class_name("java/lang/String"), "[Ljava/lang/String;");
        assert_eq!(array_class_name("[I"), "[[I");
        assert_eq!(array_element("[I"), Some(FieldType::int()));
        assert_eq!(
            array_element("[[Ljava/lang/String;"),
            Some(FieldType::array(FieldType::object("java/lang/String")))
        );
        assert_eq!(array_element("java/lang/String"), None);
    }
}
