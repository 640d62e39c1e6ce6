use crate::jvm::names::{self, array_element, is_array_class};
use crate::jvm::FieldType;
use std::collections::{HashMap, HashSet};

/// Questions about the class hierarchy the verifier needs answered
///
/// Class names are in internal form (`java/lang/String`, `[I`).
pub trait ClassHierarchy {
    /// Can a value of class `sub_class` be used where `super_class` is expected?
    fn is_assignable(&self, sub_class: &str, super_class: &str) -> bool;

    fn is_interface(&self, class: &str) -> bool;

    /// Direct superclass (`None` for `java/lang/Object` and for interfaces)
    fn superclass_of(&self, class: &str) -> Option<&str>;
}

/// Information tracked about one class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassData {
    pub superclass: Option<String>,
    pub interfaces: Vec<String>,
    pub is_interface: bool,
}

impl ClassData {
    pub fn class(superclass: &str) -> ClassData {
        ClassData {
            superclass: Some(superclass.to_owned()),
            interfaces: vec![],
            is_interface: false,
        }
    }

    pub fn interface() -> ClassData {
        ClassData {
            superclass: None,
            interfaces: vec![],
            is_interface: true,
        }
    }

    pub fn implementing(mut self, interfaces: &[&str]) -> ClassData {
        self.interfaces
            .extend(interfaces.iter().map(|name| (*name).to_owned()));
        self
    }
}

/// Name-keyed class hierarchy
///
/// Starts out knowing about the handful of `java.lang` and `java.io` types that show up in
/// generated code. Classes that were never added are assumed to be plain subclasses of
/// `java/lang/Object` that implement nothing.
#[derive(Debug, Clone)]
pub struct ClassGraph {
    classes: HashMap<String, ClassData>,
}

impl ClassGraph {
    pub fn new() -> ClassGraph {
        let mut graph = ClassGraph {
            classes: HashMap::new(),
        };
        graph.insert_java_library_types();
        graph
    }

    /// Register a class (replacing anything previously known about it)
    pub fn add_class(&mut self, name: &str, data: ClassData) {
        self.classes
            .insert(names::canonical_class_name(name).into_owned(), data);
    }

    pub fn get(&self, name: &str) -> Option<&ClassData> {
        self.classes.get(name)
    }

    fn insert_java_library_types(&mut self) {
        let object = names::OBJECT;
        self.classes.insert(
            object.to_owned(),
            ClassData {
                superclass: None,
                interfaces: vec![],
                is_interface: false,
            },
        );

        for interface in [
            names::CLONEABLE,
            names::SERIALIZABLE,
            "java/lang/CharSequence",
            "java/lang/Comparable",
        ] {
            self.add_class(interface, ClassData::interface());
        }

        let string_like = [names::SERIALIZABLE, "java/lang/CharSequence"];
        self.add_class(
            names::STRING,
            ClassData::class(object).implementing(&[
                names::SERIALIZABLE,
                "java/lang/CharSequence",
                "java/lang/Comparable",
            ]),
        );
        self.add_class(
            names::STRING_BUILDER,
            ClassData::class(object).implementing(&string_like),
        );
        self.add_class(
            names::CLASS,
            ClassData::class(object).implementing(&[names::SERIALIZABLE]),
        );
        self.add_class(
            "java/lang/Number",
            ClassData::class(object).implementing(&[names::SERIALIZABLE]),
        );
        for boxed in [
            "java/lang/Byte",
            "java/lang/Short",
            "java/lang/Integer",
            "java/lang/Long",
            "java/lang/Float",
            "java/lang/Double",
        ] {
            self.add_class(
                boxed,
                ClassData::class("java/lang/Number").implementing(&["java/lang/Comparable"]),
            );
        }
        for boxed in ["java/lang/Character", "java/lang/Boolean"] {
            self.add_class(
                boxed,
                ClassData::class(object)
                    .implementing(&[names::SERIALIZABLE, "java/lang/Comparable"]),
            );
        }

        self.add_class(
            names::THROWABLE,
            ClassData::class(object).implementing(&[names::SERIALIZABLE]),
        );
        self.add_class("java/lang/Exception", ClassData::class(names::THROWABLE));
        self.add_class("java/lang/Error", ClassData::class(names::THROWABLE));
        self.add_class(
            "java/lang/RuntimeException",
            ClassData::class("java/lang/Exception"),
        );
    }

    /// Does `class` (or one of its superclasses) implement `interface`?
    fn implements(&self, class: &str, interface: &str) -> bool {
        let mut seen = HashSet::new();
        let mut to_visit = vec![class.to_owned()];
        while let Some(name) = to_visit.pop() {
            if name == interface {
                return true;
            }
            if !seen.insert(name.clone()) {
                continue;
            }
            if let Some(data) = self.classes.get(&name) {
                to_visit.extend(data.interfaces.iter().cloned());
                to_visit.extend(data.superclass.iter().cloned());
            } else if name != names::OBJECT {
                to_visit.push(names::OBJECT.to_owned());
            }
        }
        false
    }
}

impl Default for ClassGraph {
    fn default() -> Self {
        ClassGraph::new()
    }
}

impl ClassHierarchy for ClassGraph {
    fn is_assignable(&self, sub_class: &str, super_class: &str) -> bool {
        if sub_class == super_class || super_class == names::OBJECT {
            return true;
        }

        if is_array_class(sub_class) {
            if super_class == names::CLONEABLE || super_class == names::SERIALIZABLE {
                return true;
            }
            return match (array_element(sub_class), array_element(super_class)) {
                (Some(FieldType::Base(elem1)), Some(FieldType::Base(elem2))) => elem1 == elem2,
                (Some(elem1), Some(elem2)) => match (elem1.class_name(), elem2.class_name()) {
                    (Some(elem1), Some(elem2)) => self.is_assignable(&elem1, &elem2),
                    _ => false,
                },
                _ => false,
            };
        }
        if is_array_class(super_class) {
            return false;
        }

        if self.is_interface(super_class) {
            return self.implements(sub_class, super_class);
        }

        let mut current = sub_class;
        while let Some(parent) = self.superclass_of(current) {
            if parent == super_class {
                return true;
            }
            current = parent;
        }
        false
    }

    fn is_interface(&self, class: &str) -> bool {
        self.classes
            .get(class)
            .map_or(false, |data| data.is_interface)
    }

    fn superclass_of(&self, class: &str) -> Option<&str> {
        if class == names::OBJECT {
            return None;
        }
        match self.classes.get(class) {
            Some(data) => data.superclass.as_deref(),
            None => Some(names::OBJECT),
        }
    }
}
