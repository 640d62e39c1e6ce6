use super::{ClassContext, CompressedFrame, Frame, SuperBlockGraph, VerificationType};
use crate::jvm::class_file::{ConstantPool, ExceptionHandler, StackMapFrame};
use crate::jvm::code::opcodes::{decode, decode_table_switch, Flow, Opcode};
use crate::jvm::names;
use crate::jvm::{Error, MethodDescriptor, VerifierErrorKind};
use crate::util::Width;
use std::collections::VecDeque;

/// What the synthesizer needs to know about the method whose code it is analyzing
#[derive(Debug, Clone, Copy)]
pub struct MethodSignature<'a> {
    pub name: &'a str,
    pub descriptor: &'a MethodDescriptor,
    pub is_static: bool,
}

/// Code of a method, along with the parts of the `Code` attribute that depend on it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodCode {
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionHandler>,
    pub max_stack: u16,
    pub max_locals: u16,
}

/// Result of running the synthesizer
#[derive(Debug)]
pub struct SynthesizedCode {
    /// Code with unreachable blocks neutralized (and handlers into them dropped)
    pub code: MethodCode,

    /// Frames for the `StackMapTable`, in order of increasing offset
    pub frames: Vec<StackMapFrame>,

    /// Number of unreachable blocks that were rewritten
    pub dead_blocks: usize,
}

/// Compute the stack map frames of a method body
///
/// `jumps` and `block_starts` are the control flow facts recorded while the code was emitted (see
/// [`crate::jvm::code::CodeBuffer::jumps`]). The code is partitioned into super blocks, the frame
/// at the entry of every block is inferred, unreachable blocks are replaced by `nop ... athrow`,
/// and finally frames are compressed against each other.
pub fn synthesize_stack_map(
    method: MethodCode,
    jumps: &[(usize, isize)],
    block_starts: &[usize],
    signature: MethodSignature<'_>,
    constants: &mut ConstantPool,
    class: &ClassContext<'_>,
) -> Result<SynthesizedCode, Error> {
    let graph = SuperBlockGraph::build(
        &method.code,
        jumps,
        block_starts,
        &method.exception_table,
    )?;

    let mut synthesizer = StackMapSynthesizer {
        method,
        graph,
        worklist: VecDeque::new(),
        constants,
        class,
    };
    let initial_frame = synthesizer.initial_frame(signature)?;
    synthesizer.merge_into(0, &initial_frame)?;
    synthesizer.run_to_fixpoint()?;

    let dead_blocks = synthesizer.neutralize_dead_code()?;
    if dead_blocks > 0 {
        synthesizer.run_to_fixpoint()?;
    }

    let frames = synthesizer.stack_map_frames(&initial_frame);
    Ok(SynthesizedCode {
        code: synthesizer.method,
        frames,
        dead_blocks,
    })
}

/// Fix-point iteration over the super blocks of one method
struct StackMapSynthesizer<'a, 'c> {
    method: MethodCode,
    graph: SuperBlockGraph,

    /// Blocks whose entry frame changed since they were last interpreted
    worklist: VecDeque<usize>,

    constants: &'a mut ConstantPool,
    class: &'a ClassContext<'c>,
}

impl<'a, 'c> StackMapSynthesizer<'a, 'c> {
    /// Frame on entry to the method
    ///
    /// The receiver comes first (uninitialized in constructors), then parameters. Every other
    /// local starts out unusable.
    fn initial_frame(&mut self, signature: MethodSignature<'_>) -> Result<Frame, Error> {
        let mut frame = Frame::empty(self.method.max_locals as usize);
        let mut locals = vec![];

        if !signature.is_static {
            if signature.name == names::INIT {
                locals.push(VerificationType::UninitializedThis);
            } else {
                let this_class = self.constants.get_class(self.class.this_class)?;
                locals.push(VerificationType::Object(this_class));
            }
        }
        for parameter in &signature.descriptor.parameters {
            let typ = VerificationType::from_field_type(parameter, self.constants)?;
            locals.push(typ);
            if typ.width() == 2 {
                locals.push(VerificationType::Top);
            }
        }

        if frame.locals.len() < locals.len() {
            frame.locals.resize(locals.len(), VerificationType::Top);
        }
        frame.locals[..locals.len()].copy_from_slice(&locals);
        Ok(frame)
    }

    /// Merge a frame into the entry frame of a block, queueing the block if that changed anything
    fn merge_into(&mut self, index: usize, frame: &Frame) -> Result<(), Error> {
        let block = &mut self.graph.blocks[index];
        let changed = match &mut block.frame {
            None => {
                block.frame = Some(frame.clone());
                true
            }
            Some(existing) => existing.merge(frame, block.start, self.constants, self.class)?,
        };

        if changed && !block.queued {
            log::trace!("queueing block {} at {}", index, block.start);
            block.queued = true;
            self.worklist.push_back(index);
        }
        Ok(())
    }

    /// Merge a frame into the block starting at some offset
    fn merge_into_offset(
        &mut self,
        source: usize,
        target: isize,
        frame: &Frame,
    ) -> Result<(), Error> {
        let index = usize::try_from(target)
            .ok()
            .and_then(|target| self.graph.block_at(target))
            .ok_or(Error::InvalidJumpTarget { source, target })?;
        self.merge_into(index, frame)
    }

    fn run_to_fixpoint(&mut self) -> Result<(), Error> {
        while let Some(index) = self.worklist.pop_front() {
            self.interpret_block(index)?;
        }
        Ok(())
    }

    /// Symbolically execute one block from its entry frame, propagating to successors
    fn interpret_block(&mut self, index: usize) -> Result<(), Error> {
        let block = &mut self.graph.blocks[index];
        block.queued = false;
        let (start, end) = (block.start, block.end);
        let mut frame = match &block.frame {
            Some(frame) => frame.clone(),
            None => return Ok(()),
        };

        let mut pc = start;
        while pc < end {
            let insn = decode(&self.method.code, pc)?;
            self.propagate_to_handlers(pc, &frame)?;
            frame.execute(&insn, pc, &self.method.code, self.constants, self.class)?;

            let flow = insn.opcode.require_info()?.flow;
            match flow {
                Flow::Branch | Flow::Goto => {
                    let target = pc as isize + insn.operands[0] as isize;
                    self.merge_into_offset(pc, target, &frame)?;
                }
                Flow::Switch if insn.opcode == Opcode::TABLESWITCH => {
                    let table = decode_table_switch(&self.method.code, pc)?;
                    let targets = std::iter::once(table.default).chain(table.offsets);
                    for offset in targets {
                        let target = pc as isize + offset as isize;
                        self.merge_into_offset(pc, target, &frame)?;
                    }
                }
                _ => (),
            }

            if flow.is_unconditional() {
                return Ok(());
            }
            pc += insn.length;
        }

        // Control falls through into the next block
        if end >= self.method.code.len() {
            return Err(Error::VerifierError {
                offset: end,
                kind: VerifierErrorKind::FallsOffEnd,
            });
        }
        self.merge_into(index + 1, &frame)
    }

    /// Send the state before the instruction at `pc` to every handler covering it
    ///
    /// Handlers see the locals from before the instruction and a stack holding just the caught
    /// exception.
    fn propagate_to_handlers(&mut self, pc: usize, frame: &Frame) -> Result<(), Error> {
        let pc16 = pc as u16;
        let covering: Vec<ExceptionHandler> = self
            .method
            .exception_table
            .iter()
            .filter(|handler| handler.start_pc <= pc16 && pc16 < handler.end_pc)
            .copied()
            .collect();

        for handler in covering {
            let exception = match handler.catch_type {
                Some(catch_type) => VerificationType::Object(catch_type),
                None => VerificationType::Object(self.constants.get_class(names::THROWABLE)?),
            };
            let handler_frame = Frame {
                locals: frame.locals.clone(),
                stack: vec![exception],
            };
            self.merge_into_offset(pc, handler.handler_pc as isize, &handler_frame)?;
        }
        Ok(())
    }

    /// Rewrite every unreached block into `nop ... athrow` and give it a frame
    ///
    /// Handlers that start in unreached blocks are removed. The new frames are queued, so the
    /// fix-point must be run again afterwards. Returns the number of blocks rewritten.
    fn neutralize_dead_code(&mut self) -> Result<usize, Error> {
        let dead: Vec<usize> = self
            .graph
            .blocks
            .iter()
            .filter(|block| !block.is_reached())
            .map(|block| block.index)
            .collect();
        if dead.is_empty() {
            return Ok(0);
        }

        let graph = &self.graph;
        self.method.exception_table.retain(|handler| {
            let handler_pc = handler.handler_pc as usize;
            let live = graph
                .block_at(handler_pc)
                .map_or(false, |index| graph.blocks[index].is_reached());
            if !live {
                log::debug!(
                    "dropping exception handler at {} for [{}, {}): handler is unreachable",
                    handler_pc,
                    handler.start_pc,
                    handler.end_pc
                );
            }
            live
        });

        let throwable = VerificationType::Object(self.constants.get_class(names::THROWABLE)?);
        let max_locals = self.method.max_locals as usize;
        for &index in &dead {
            let (start, end) = (self.graph.blocks[index].start, self.graph.blocks[index].end);
            log::debug!("neutralizing unreachable code in [{}, {})", start, end);

            for byte in &mut self.method.code[start..end - 1] {
                *byte = Opcode::NOP.0;
            }
            self.method.code[end - 1] = Opcode::ATHROW.0;

            // Borrow the locals of a live handler covering this code, so the `athrow` is
            // compatible with that handler's frame
            let locals = self
                .method
                .exception_table
                .iter()
                .filter(|handler| {
                    (handler.start_pc as usize) <= start && start < handler.end_pc as usize
                })
                .filter_map(|handler| self.graph.block_at(handler.handler_pc as usize))
                .find_map(|handler_block| self.graph.blocks[handler_block].frame.as_ref())
                .map_or_else(|| Frame::empty(max_locals).locals, |frame| frame.locals.clone());

            let block = &mut self.graph.blocks[index];
            block.frame = Some(Frame {
                locals,
                stack: vec![throwable],
            });
            block.queued = true;
            self.worklist.push_back(index);
        }

        self.method.max_stack = self.method.max_stack.max(1);
        Ok(dead.len())
    }

    /// Compress the frames of every block into `StackMapTable` entries
    ///
    /// The first block only gets a frame if something jumps to it: otherwise its frame is implied
    /// by the method descriptor.
    fn stack_map_frames(&self, initial_frame: &Frame) -> Vec<StackMapFrame> {
        let mut previous_frame = CompressedFrame::from(initial_frame);
        let mut previous_offset: Option<usize> = None;
        let mut frames = vec![];

        for block in &self.graph.blocks {
            if block.index == 0 && !block.targeted {
                continue;
            }
            let frame = match &block.frame {
                Some(frame) => CompressedFrame::from(frame),
                None => continue,
            };
            let offset_delta = match previous_offset {
                None => block.start,
                Some(previous) => block.start - previous - 1,
            };
            frames.push(frame.stack_map_frame(offset_delta as u16, &previous_frame));
            previous_frame = frame;
            previous_offset = Some(block.start);
        }
        frames
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::verifier::ClassGraph;
    use crate::jvm::ParseDescriptor;
    use VerificationType::*;

    fn context(graph: &ClassGraph) -> ClassContext<'_> {
        ClassContext {
            this_class: "me/Current",
            super_class: names::OBJECT,
            hierarchy: graph,
        }
    }

    fn synthesize(
        code: Vec<u8>,
        jumps: &[(usize, isize)],
        block_starts: &[usize],
        exception_table: Vec<ExceptionHandler>,
        descriptor: &str,
        max_locals: u16,
        constants: &mut ConstantPool,
    ) -> Result<SynthesizedCode, Error> {
        let graph = ClassGraph::new();
        let class = context(&graph);
        let descriptor = MethodDescriptor::parse(descriptor).unwrap();
        let signature = MethodSignature {
            name: "f",
            descriptor: &descriptor,
            is_static: true,
        };
        let method = MethodCode {
            code,
            exception_table,
            max_stack: 1,
            max_locals,
        };
        synthesize_stack_map(method, jumps, block_starts, signature, constants, &class)
    }

    #[test]
    fn sign() {
        // 0: iload_0; 1: ifle +5 (-> 6); 4: iconst_1; 5: ireturn; 6: iconst_m1; 7: ireturn
        let code = vec![0x1a, 0x9e, 0x00, 0x05, 0x04, 0xac, 0x02, 0xac];
        let mut constants = ConstantPool::new();
        let result = synthesize(code.clone(), &[(1, 6)], &[6, 8], vec![], "(I)I", 1, &mut constants);
        let result = result.unwrap();
        assert_eq!(result.code.code, code);
        assert_eq!(result.dead_blocks, 0);
        assert_eq!(
            result.frames,
            vec![StackMapFrame::SameLocalsNoStack { offset_delta: 6 }]
        );
    }

    #[test]
    fn join_widens_locals() {
        // 0: iload_0
        // 1: ifle +8 (-> 9)
        // 4: iconst_5; 5: istore_2; 6: goto +3 (-> 9)
        // 9: iconst_0; 10: ireturn
        let code = vec![
            0x1a, 0x9e, 0x00, 0x08, 0x08, 0x3d, 0xa7, 0x00, 0x03, 0x03, 0xac,
        ];
        let mut constants = ConstantPool::new();
        let result = synthesize(code, &[(1, 9), (6, 9)], &[9], vec![], "(IF)I", 3, &mut constants)
            .unwrap();
        assert_eq!(
            result.frames,
            vec![StackMapFrame::SameLocalsNoStack { offset_delta: 9 }]
        );
    }

    #[test]
    fn backwards_jump_to_start() {
        // 0: iinc 0 1; 3: goto -3 (-> 0)
        let code = vec![0x84, 0x00, 0x01, 0xa7, 0xff, 0xfd];
        let mut constants = ConstantPool::new();
        let result = synthesize(code, &[(3, 0)], &[6], vec![], "(I)V", 1, &mut constants).unwrap();
        assert_eq!(
            result.frames,
            vec![StackMapFrame::SameLocalsNoStack { offset_delta: 0 }]
        );
    }

    #[test]
    fn dead_code() {
        // 0: iconst_0; 1: ireturn; 2: iconst_1; 3: iconst_2; 4: iadd; 5: ireturn
        let code = vec![0x03, 0xac, 0x04, 0x05, 0x60, 0xac];
        let mut constants = ConstantPool::new();
        let result = synthesize(code, &[], &[2, 6], vec![], "()I", 0, &mut constants).unwrap();
        assert_eq!(result.dead_blocks, 1);
        assert_eq!(result.code.code, vec![0x03, 0xac, 0x00, 0x00, 0x00, 0xbf]);
        assert_eq!(result.code.max_stack, 1);

        let throwable = Object(constants.get_class(names::THROWABLE).unwrap());
        assert_eq!(
            result.frames,
            vec![StackMapFrame::SameLocalsOneStack {
                offset_delta: 2,
                stack: throwable,
            }]
        );
    }

    #[test]
    fn dead_handler_is_dropped() {
        // 0: iconst_0; 1: ireturn; 2: astore_0; 3: iconst_1; 4: ireturn
        let code = vec![0x03, 0xac, 0x4b, 0x04, 0xac];
        let handler = ExceptionHandler {
            start_pc: 2,
            end_pc: 3,
            handler_pc: 2,
            catch_type: None,
        };
        let mut constants = ConstantPool::new();
        let result =
            synthesize(code, &[], &[2, 5], vec![handler], "()I", 1, &mut constants).unwrap();
        assert_eq!(result.dead_blocks, 1);
        assert!(result.code.exception_table.is_empty());
        assert_eq!(result.code.code, vec![0x03, 0xac, 0x00, 0x00, 0xbf]);
    }

    #[test]
    fn handlers() {
        // 0: iconst_0; 1: istore_0; 2: iconst_1; 3: ireturn
        // 4: astore_0; 5: iconst_m1; 6: ireturn
        let code = vec![0x03, 0x3b, 0x04, 0xac, 0x4b, 0x02, 0xac];
        let mut constants = ConstantPool::new();
        let runtime = constants.get_class("java/lang/RuntimeException").unwrap();
        let handler = ExceptionHandler {
            start_pc: 0,
            end_pc: 4,
            handler_pc: 4,
            catch_type: Some(runtime),
        };
        let result =
            synthesize(code, &[], &[4, 7], vec![handler], "()I", 1, &mut constants).unwrap();
        assert_eq!(result.dead_blocks, 0);

        // Slot 0 is `Top` before the store and `int` after it
        assert_eq!(
            result.frames,
            vec![StackMapFrame::SameLocalsOneStack {
                offset_delta: 4,
                stack: Object(runtime),
            }]
        );
    }

    #[test]
    fn falls_off_end() {
        // iconst_0; pop
        let code = vec![0x03, 0x57];
        let mut constants = ConstantPool::new();
        let result = synthesize(code, &[], &[], vec![], "()V", 0, &mut constants);
        assert!(matches!(
            result,
            Err(Error::VerifierError {
                offset: 2,
                kind: VerifierErrorKind::FallsOffEnd
            })
        ));
    }

    #[test]
    fn inconsistent_heights() {
        // 0: iload_0; 1: ifeq +6 (-> 7); 4: iconst_1; 5: iconst_2; 6: nop; 7: return
        let code = vec![0x1a, 0x99, 0x00, 0x06, 0x04, 0x05, 0x00, 0xb1];
        let mut constants = ConstantPool::new();
        let result = synthesize(code, &[(1, 7)], &[8], vec![], "(I)V", 1, &mut constants);
        assert!(matches!(
            result,
            Err(Error::VerifierError {
                kind: VerifierErrorKind::InconsistentStackHeight { .. },
                ..
            })
        ));
    }

    #[test]
    fn constructor_receiver() {
        let graph = ClassGraph::new();
        let class = context(&graph);
        let mut constants = ConstantPool::new();
        let descriptor = MethodDescriptor::parse("(J)V").unwrap();
        let signature = MethodSignature {
            name: names::INIT,
            descriptor: &descriptor,
            is_static: false,
        };
        let method = MethodCode {
            code: vec![0xb1],
            exception_table: vec![],
            max_stack: 0,
            max_locals: 3,
        };
        let mut synthesizer = StackMapSynthesizer {
            method,
            graph: SuperBlockGraph { blocks: vec![] },
            worklist: VecDeque::new(),
            constants: &mut constants,
            class: &class,
        };
        let frame = synthesizer.initial_frame(signature).unwrap();
        assert_eq!(frame.locals, vec![UninitializedThis, Long, Top]);
        assert!(frame.stack.is_empty());
    }
}
