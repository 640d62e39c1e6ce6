//! Assemble JVM class files from a stream of low-level instructions
//!
//! The interesting work happens when a method is closed: the emitted bytecode is split into super
//! blocks, an abstract interpreter computes the verification types at the entry of every block,
//! unreachable code is rewritten into something the verifier accepts, and the resulting frames are
//! encoded into a `StackMapTable`. See [`jvm`] for an example.

pub mod jvm;
pub mod util;
