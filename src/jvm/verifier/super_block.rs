use super::Frame;
use crate::jvm::class_file::ExceptionHandler;
use crate::jvm::code::opcodes::{decode, decode_table_switch, instruction_starts, Flow, Opcode};
use crate::jvm::Error;

/// Maximal single-entry region of a method body
///
/// Control only ever enters a super block at its first instruction, but it may leave from the
/// middle (through a conditional branch or a thrown exception). Blocks refer to each other by
/// index into [`SuperBlockGraph::blocks`].
#[derive(Debug, Clone)]
pub struct SuperBlock {
    pub index: usize,

    /// Offset of the first instruction
    pub start: usize,

    /// Offset one past the last instruction
    pub end: usize,

    /// Blocks control can flow into from this one (deduplicated, in order of first appearance)
    pub successors: Vec<usize>,

    /// Frame on entry into the block, or `None` if the block hasn't been reached yet
    pub frame: Option<Frame>,

    /// Is the block currently on the work list?
    pub queued: bool,

    /// Is the block the target of a jump, switch, or exception handler?
    pub targeted: bool,
}

impl SuperBlock {
    pub fn is_reached(&self) -> bool {
        self.frame.is_some()
    }

    pub fn contains(&self, pc: usize) -> bool {
        self.start <= pc && pc < self.end
    }
}

/// Partition of a method body into super blocks
#[derive(Debug, Clone)]
pub struct SuperBlockGraph {
    pub blocks: Vec<SuperBlock>,
}

impl SuperBlockGraph {
    /// Partition code using the facts recorded while it was emitted
    ///
    /// Blocks start at offset 0, at every jump or switch target in `jumps`, at every offset in
    /// `block_starts` (instructions following unconditional transfers of control), and at every
    /// exception handler. Every one of those offsets must be the start of an instruction.
    pub fn build(
        code: &[u8],
        jumps: &[(usize, isize)],
        block_starts: &[usize],
        handlers: &[ExceptionHandler],
    ) -> Result<SuperBlockGraph, Error> {
        let starts = instruction_starts(code)?;
        let is_instruction = |pc: usize| starts.binary_search(&pc).is_ok();
        let code_len = code.len();

        let mut boundaries = vec![0];
        let mut targets = vec![];

        for &(source, target) in jumps {
            if target < 0 || target as usize >= code_len || !is_instruction(target as usize) {
                return Err(Error::InvalidJumpTarget { source, target });
            }
            boundaries.push(target as usize);
            targets.push(target as usize);
        }

        for handler in handlers {
            let (start, end) = (handler.start_pc as usize, handler.end_pc as usize);
            let handler_pc = handler.handler_pc as usize;
            if start >= end
                || end > code_len
                || !is_instruction(start)
                || (end < code_len && !is_instruction(end))
            {
                return Err(Error::InvalidExceptionRange { start, end });
            }
            if handler_pc >= code_len || !is_instruction(handler_pc) {
                return Err(Error::InvalidJumpTarget {
                    source: start,
                    target: handler_pc as isize,
                });
            }
            boundaries.push(handler_pc);
            targets.push(handler_pc);
        }

        for &pc in block_starts {
            if pc < code_len && !is_instruction(pc) {
                return Err(Error::InvalidJumpTarget {
                    source: pc,
                    target: pc as isize,
                });
            }
            boundaries.push(pc);
        }

        boundaries.sort_unstable();
        boundaries.dedup();
        boundaries.retain(|pc| *pc < code_len);
        targets.sort_unstable();
        targets.dedup();

        let mut blocks: Vec<SuperBlock> = boundaries
            .iter()
            .enumerate()
            .map(|(index, &start)| SuperBlock {
                index,
                start,
                end: boundaries.get(index + 1).copied().unwrap_or(code_len),
                successors: vec![],
                frame: None,
                queued: false,
                targeted: targets.binary_search(&start).is_ok(),
            })
            .collect();

        for block in &mut blocks {
            block.successors = successors(code, block, handlers, &boundaries)?;
        }
        let graph = SuperBlockGraph { blocks };

        log::trace!(
            "partitioned {} bytes of code into {} super blocks",
            code_len,
            graph.blocks.len()
        );
        Ok(graph)
    }

    /// Index of the block starting exactly at `pc`
    pub fn block_at(&self, pc: usize) -> Option<usize> {
        self.blocks
            .binary_search_by_key(&pc, |block| block.start)
            .ok()
    }

    /// Index of the block containing `pc`
    pub fn block_containing(&self, pc: usize) -> Option<usize> {
        let idx = match self.blocks.binary_search_by_key(&pc, |block| block.start) {
            Ok(idx) => idx,
            Err(0) => return None,
            Err(idx) => idx - 1,
        };
        Some(idx).filter(|idx| self.blocks[*idx].contains(pc))
    }

    /// Blocks with an edge into `index`
    pub fn predecessors(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.blocks
            .iter()
            .filter(move |block| block.successors.contains(&index))
            .map(|block| block.index)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Outgoing edges of a block, found by decoding its instructions
fn successors(
    code: &[u8],
    block: &SuperBlock,
    handlers: &[ExceptionHandler],
    boundaries: &[usize],
) -> Result<Vec<usize>, Error> {
    let block_index = |pc: usize| boundaries.binary_search(&pc).ok();
    let mut successors = vec![];
    let mut add = |target: Option<usize>| {
        if let Some(target) = target {
            if !successors.contains(&target) {
                successors.push(target);
            }
        }
    };

    let mut pc = block.start;
    let mut falls_through = true;
    while pc < block.end {
        let insn = decode(code, pc)?;
        for handler in handlers {
            if handler.start_pc as usize <= pc && pc < handler.end_pc as usize {
                add(block_index(handler.handler_pc as usize));
            }
        }

        let flow = insn.opcode.require_info()?.flow;
        match flow {
            Flow::Branch | Flow::Goto => {
                add(block_index((pc as isize + insn.operands[0] as isize) as usize));
            }
            Flow::Switch if insn.opcode == Opcode::TABLESWITCH => {
                let table = decode_table_switch(code, pc)?;
                add(block_index((pc as i64 + table.default as i64) as usize));
                for offset in table.offsets {
                    add(block_index((pc as i64 + offset as i64) as usize));
                }
            }
            _ => (),
        }
        falls_through = !flow.is_unconditional();
        pc += insn.length;
    }

    if falls_through && block.end < code.len() {
        add(block_index(block.end));
    }
    Ok(successors)
}
