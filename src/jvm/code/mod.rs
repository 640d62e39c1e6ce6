//! Bytecode emission
//!
//! ### Structure
//!
//! Method bodies are emitted top to bottom into a [`CodeBuffer`], which encodes instructions as
//! they come in and keeps just enough bookkeeping to catch mistakes early: the running stack depth
//! (so underflows are reported at the offending instruction), label state (so forward branches can
//! be patched once their target is known), and the jump edges later used to partition the code
//! into super blocks.
//!
//! Every opcode the assembler knows about is described once, in the static table behind
//! [`Opcode::info`]. Emission uses it for operand counts and stack deltas, and the verifier uses
//! it to drive abstract interpretation.
//!
//! A [`MethodBuffer`] wraps the code buffer with everything else that ends up in the `Code`
//! attribute (exception table, line numbers, local variable names) and [`CodeBuilder`] is the
//! typed front end that interns constants as it emits.

mod code_buffer;
mod code_builder;
mod label;
mod method_buffer;
pub mod opcodes;

pub use code_buffer::*;
pub use code_builder::*;
pub use label::*;
pub use method_buffer::*;
pub use opcodes::{Opcode, Slot};
