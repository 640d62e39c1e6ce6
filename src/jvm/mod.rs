//! Assembling JVM class files
//!
//! ### Structure
//!
//! A class is built with a [`ClassAssembler`], which owns the constant pool and the class file
//! being built. Methods are opened one at a time; their code is emitted through a
//! [`code::CodeBuilder`] and, when the method is closed, its stack map frames are synthesized by
//! the [`verifier`] so the JVM accepts the class without falling back to the old type-inferring
//! verifier.
//!
//! ```
//! use jvm_assembler::jvm::code::Opcode;
//! use jvm_assembler::jvm::verifier::ClassGraph;
//! use jvm_assembler::jvm::{ClassAccessFlags, ClassAssembler, MethodAccessFlags, Settings};
//!
//! let hierarchy = ClassGraph::new();
//! let mut class = ClassAssembler::new(
//!     Settings::default(),
//!     &hierarchy,
//!     ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
//!     "demo/Sign",
//!     "java/lang/Object",
//! )?;
//!
//! // static int sign(int a) { return a > 0 ? 1 : -1; }
//! let flags = MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC;
//! class.open_method(flags, "sign", "(I)I")?;
//! let mut code = class.code()?;
//! let negative = code.acquire_label();
//! code.emit(Opcode::ILOAD_0, &[])?;
//! code.emit_jump(Opcode::IFLE, negative)?;
//! code.push_int(1)?;
//! code.emit(Opcode::IRETURN, &[])?;
//! code.mark_label(negative)?;
//! code.push_int(-1)?;
//! code.emit(Opcode::IRETURN, &[])?;
//! class.close_method()?;
//!
//! let bytes: Vec<u8> = class.finish()?;
//! assert_eq!(&bytes[0..4], &[0xCA, 0xFE, 0xBA, 0xBE]);
//! # Ok::<(), jvm_assembler::jvm::Error>(())
//! ```

mod access_flags;
mod class_builder;
pub mod class_file;
pub mod code;
mod descriptors;
mod errors;
pub mod names;
pub mod verifier;

pub use access_flags::*;
pub use class_builder::*;
pub use descriptors::*;
pub use errors::*;
