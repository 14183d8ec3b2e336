use std::collections::{HashMap, HashSet};

use crate::bytecode::Label;
use crate::stack_ops::StackOperation;

pub(crate) type BlockId = usize;

/// Basic block graph for one method; block 0 is the entry.
#[derive(Clone, Debug)]
pub(crate) struct ControlFlowGraph {
    pub(crate) blocks: Vec<BasicBlock>,
}

impl ControlFlowGraph {
    pub(crate) const ENTRY: BlockId = 0;

    pub(crate) fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id]
    }
}

/// Straight-line run of stack operations.
#[derive(Clone, Debug)]
pub(crate) struct BasicBlock {
    pub(crate) id: BlockId,
    pub(crate) operations: Vec<StackOperation>,
    pub(crate) successors: Vec<FlowEdge>,
    /// Set once a return or throw is appended; the block is frozen afterwards.
    pub(crate) is_terminal: bool,
}

/// Edge to a successor block.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct FlowEdge {
    pub(crate) to: BlockId,
    pub(crate) kind: EdgeKind,
}

/// Edge classification used for CFG inspection.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub(crate) enum EdgeKind {
    FallThrough,
    Branch,
    Exception,
}

/// Partitions a method's stack operations into basic blocks as control
/// events arrive in program order.
#[derive(Debug)]
pub(crate) struct CfgBuilder {
    blocks: Vec<BasicBlock>,
    current: Option<BlockId>,
    lookahead: HashMap<Label, BlockId>,
    seeded: HashSet<Label>,
}

impl CfgBuilder {
    pub(crate) fn new() -> Self {
        let mut builder = Self {
            blocks: Vec::new(),
            current: None,
            lookahead: HashMap::new(),
            seeded: HashSet::new(),
        };
        let entry = builder.new_block();
        builder.current = Some(entry);
        builder
    }

    pub(crate) fn add_op(&mut self, operation: StackOperation) {
        let current = self.ensure_current();
        let terminal = operation.is_terminal();
        let block = &mut self.blocks[current];
        block.operations.push(operation);
        if terminal {
            block.is_terminal = true;
            self.current = None;
        }
    }

    /// Close the current block with a fall-through and a branch edge.
    pub(crate) fn conditional_goto(&mut self, target: Label) {
        let current = self.ensure_current();
        let target = self.lookahead(target);
        let next = self.new_block();
        self.add_edge(current, next, EdgeKind::FallThrough);
        self.add_edge(current, target, EdgeKind::Branch);
        self.current = Some(next);
    }

    pub(crate) fn unconditional_goto(&mut self, target: Label) {
        let current = self.ensure_current();
        let target = self.lookahead(target);
        self.add_edge(current, target, EdgeKind::Branch);
        self.current = None;
    }

    /// `jsr`: the subroutine starts with its return address, and execution
    /// resumes after the call once the subroutine's `ret` completes.
    pub(crate) fn subroutine_call(&mut self, target: Label, return_address: StackOperation) {
        let current = self.ensure_current();
        let subroutine = self.seed(target, return_address);
        let next = self.new_block();
        self.add_edge(current, next, EdgeKind::FallThrough);
        self.add_edge(current, subroutine, EdgeKind::Branch);
        self.current = Some(next);
    }

    pub(crate) fn switch(&mut self, default: Label, cases: &[Label]) {
        let current = self.ensure_current();
        for label in cases.iter().chain(std::iter::once(&default)) {
            let target = self.lookahead(*label);
            self.add_edge(current, target, EdgeKind::Branch);
        }
        self.current = None;
    }

    /// A jump target or exception boundary starts its own block.
    pub(crate) fn label(&mut self, label: Label) {
        let block = self.lookahead(label);
        if let Some(current) = self.current.filter(|current| *current != block) {
            self.add_edge(current, block, EdgeKind::FallThrough);
        }
        self.current = Some(block);
    }

    /// Link a protected region to its handler, which starts with the caught exception.
    pub(crate) fn try_catch(&mut self, start: Label, handler: Label, exception: StackOperation) {
        let start = self.lookahead(start);
        let handler = self.seed(handler, exception);
        self.add_edge(start, handler, EdgeKind::Exception);
    }

    pub(crate) fn finish(self) -> ControlFlowGraph {
        ControlFlowGraph {
            blocks: self.blocks,
        }
    }

    fn ensure_current(&mut self) -> BlockId {
        match self.current {
            Some(current) => current,
            None => {
                // unreachable code after an unconditional transfer
                let block = self.new_block();
                self.current = Some(block);
                block
            }
        }
    }

    fn new_block(&mut self) -> BlockId {
        let id = self.blocks.len();
        self.blocks.push(BasicBlock {
            id,
            operations: Vec::new(),
            successors: Vec::new(),
            is_terminal: false,
        });
        id
    }

    fn lookahead(&mut self, label: Label) -> BlockId {
        if let Some(block) = self.lookahead.get(&label) {
            return *block;
        }
        let block = self.new_block();
        self.lookahead.insert(label, block);
        block
    }

    /// Start the block at `label` with `operation`, once per label.
    fn seed(&mut self, label: Label, operation: StackOperation) -> BlockId {
        let block = self.lookahead(label);
        if self.seeded.insert(label) {
            self.blocks[block].operations.insert(0, operation);
        }
        block
    }

    fn add_edge(&mut self, from: BlockId, to: BlockId, kind: EdgeKind) {
        let block = &mut self.blocks[from];
        let edge = FlowEdge { to, kind };
        if block.is_terminal || block.successors.contains(&edge) {
            return;
        }
        block.successors.push(edge);
    }
}
