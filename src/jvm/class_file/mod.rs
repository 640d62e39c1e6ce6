//! Binary representation of class files
//!
//! Everything here is close to the format described in [chapter 4 of the JVM specification][0].
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html

mod attribute;
mod class;
mod constants;
mod member;
mod serialize;
mod version;

pub use attribute::*;
pub use class::*;
pub use constants::*;
pub use member::*;
pub use serialize::*;
pub use version::*;
