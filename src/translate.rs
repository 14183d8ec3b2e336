use std::collections::{HashMap, HashSet};

use crate::cfg::{BlockId, ControlFlowGraph, EdgeKind};
use crate::error::AnalysisError;
use crate::ir::{Operation, Variable};
use crate::multi_stack::KeyedMultiStack;

/// Operand stacks live on a block while it is translated and on each edge
/// leaving it until the successor joins them.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
enum StackKey {
    Block(BlockId),
    Edge {
        from: BlockId,
        to: BlockId,
        kind: EdgeKind,
    },
}

/// Replace stack effects with explicit-variable operations.
///
/// Reachable blocks are translated once each, in reverse postorder, so every
/// forward predecessor of a block has handed its stacks over before the block
/// joins them. Stacks flowing along back edges are dropped. A block reached
/// along several paths pops every distinct combination of values, so one
/// instruction may emit several operations.
pub(crate) fn translate(graph: &ControlFlowGraph) -> Result<Vec<Operation>, AnalysisError> {
    let mut stack: KeyedMultiStack<StackKey, Variable> = KeyedMultiStack::new();
    let mut operations = Vec::new();
    let mut processed = HashSet::new();
    let mut incoming: HashMap<BlockId, Vec<StackKey>> = HashMap::new();

    stack.init(StackKey::Block(ControlFlowGraph::ENTRY));
    for id in reverse_postorder(graph) {
        let key = StackKey::Block(id);
        if let Some(edges) = incoming.remove(&id) {
            stack.join(&edges, key)?;
        }
        processed.insert(id);

        let block = graph.block(id);
        for operation in &block.operations {
            stack.pop(&key, operation.operand_count(), |_, input| {
                if let Some(emitted) = operation.to_operation(&input) {
                    operations.push(emitted);
                }
                let output = operation.apply(&input);
                assert_valid(&output)?;
                Ok::<_, AnalysisError>(output)
            })?;
        }

        let mut targets = Vec::new();
        for edge in &block.successors {
            if processed.contains(&edge.to) {
                continue;
            }
            let edge_key = StackKey::Edge {
                from: id,
                to: edge.to,
                kind: edge.kind,
            };
            match edge.kind {
                // handlers start over with only the caught exception
                EdgeKind::Exception => stack.init(edge_key),
                EdgeKind::FallThrough | EdgeKind::Branch => targets.push(edge_key),
            }
            incoming.entry(edge.to).or_default().push(edge_key);
        }
        if targets.is_empty() {
            stack.remove(&key)?;
        } else {
            stack.split(&key, &targets)?;
        }
    }
    Ok(operations)
}

/// Blocks reachable from the entry; every block follows the sources of its
/// forward edges.
fn reverse_postorder(graph: &ControlFlowGraph) -> Vec<BlockId> {
    let mut order = Vec::new();
    let mut visited = HashSet::from([ControlFlowGraph::ENTRY]);
    // (block, index of the next successor to try)
    let mut path = vec![(ControlFlowGraph::ENTRY, 0)];
    while let Some((id, next)) = path.last_mut() {
        let successors = &graph.block(*id).successors;
        // the last successor is explored first so fall-through code precedes
        // branch targets in the final order
        match successors.len().checked_sub(*next + 1) {
            Some(index) => {
                *next += 1;
                let to = successors[index].to;
                if visited.insert(to) {
                    path.push((to, 0));
                }
            }
            None => {
                order.push(*id);
                path.pop();
            }
        }
    }
    order.reverse();
    order
}

/// Each wide value must be immediately followed by its duplicate.
fn assert_valid(values: &[Variable]) -> Result<(), AnalysisError> {
    let mut index = 0;
    while index < values.len() {
        let value = &values[index];
        if value.ty().is_wide() {
            if values.get(index + 1) != Some(value) {
                return Err(AnalysisError::WideValueMismatch(value.to_string()));
            }
            index += 2;
        } else {
            index += 1;
        }
    }
    Ok(())
}
