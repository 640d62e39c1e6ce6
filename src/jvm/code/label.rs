use std::fmt;

/// Opaque handle to a position in the method body
///
/// Labels are handed out by [`crate::jvm::code::CodeBuffer::acquire_label`] and must be bound
/// (with `mark_label`) exactly once before the method is closed.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Label(pub(crate) u32);

impl Label {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("l{}", self.0))
    }
}

impl fmt::Display for Label {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, formatter)
    }
}

/// Target of a branch instruction
#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub enum JumpTarget {
    /// Offset is computed once the label is bound
    Label(Label),

    /// Offset relative to the branch instruction, used as-is
    RawOffset(i16),
}

impl From<Label> for JumpTarget {
    fn from(label: Label) -> JumpTarget {
        JumpTarget::Label(label)
    }
}
