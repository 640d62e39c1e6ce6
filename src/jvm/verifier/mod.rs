//! Stack map frame inference
//!
//! For any specific instruction inside a method body, the stack and locals should have the same
//! structure, regardless of which control flow was used to reach that instruction. In other words:
//! although the values on the stack and in the locals may obviously be different, the types and
//! order of the stack and local variables cannot. This information is referred to as the _stack
//! map frame_ (represented using [`Frame`]) and the set of stack map frames for all offsets that
//! can be reached other than by falling through is the _stack map table_.
//!
//! The "types" used in verification (represented using [`VerificationType`]) are slightly
//! augmented to take into account initialization and null.
//!
//! Since the assembler lets callers emit raw instructions, frames are not known while the code is
//! being emitted. Instead, once the method is complete:
//!
//!   1. the code is partitioned into super blocks ([`SuperBlockGraph`]): single-entry regions that
//!      may be exited from the middle by conditional branches or exceptions
//!   2. frames at the start of every super block are found by a fix-point iteration over the
//!      graph, merging types with [`VerificationType::merge`] whenever a block is reached from
//!      several places
//!   3. blocks that were never reached are replaced by `nop ... athrow` so they still verify
//!   4. the frames are compressed into a [`crate::jvm::class_file::StackMapTable`]
//!
//! See [`synthesize_stack_map`] for the entry point.

mod frame;
mod hierarchy;
mod super_block;
mod synthesizer;
mod types;

pub use frame::*;
pub use hierarchy::*;
pub use super_block::*;
pub use synthesizer::*;
pub use types::*;

/// Information about the class whose method is being verified
#[derive(Clone, Copy)]
pub struct ClassContext<'a> {
    /// Internal name of the class being assembled
    pub this_class: &'a str,

    /// Internal name of its superclass
    pub super_class: &'a str,

    pub hierarchy: &'a dyn ClassHierarchy,
}

impl<'a> std::fmt::Debug for ClassContext<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassContext")
            .field("this_class", &self.this_class)
            .field("super_class", &self.super_class)
            .finish()
    }
}
