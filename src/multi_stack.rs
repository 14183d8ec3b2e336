use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use crate::error::StackError;

type NodeId = usize;

const ROOT: NodeId = 0;

/// Immutable stack entry; the root has depth -1 and no value.
#[derive(Debug)]
struct Node<V> {
    depth: isize,
    parents: Vec<NodeId>,
    value: Option<V>,
}

/// Values popped along one route through the stack graph, bottom first,
/// and the entries left underneath them.
struct Path<V> {
    bases: Vec<NodeId>,
    values: Vec<V>,
}

/// Several operand stacks sharing their common prefix, addressed by key.
///
/// Entries live in an arena and are never mutated; a key's head is the list of
/// entries on top of each of its virtual stacks. Splitting copies a head to
/// other keys, joining unions heads of equal depth.
#[derive(Debug)]
pub(crate) struct KeyedMultiStack<K, V> {
    nodes: Vec<Node<V>>,
    heads: HashMap<K, Vec<NodeId>>,
}

impl<K, V> KeyedMultiStack<K, V>
where
    K: Clone + Debug + Eq + Hash,
    V: Clone + PartialEq,
{
    pub(crate) fn new() -> Self {
        Self {
            nodes: vec![Node {
                depth: -1,
                parents: Vec::new(),
                value: None,
            }],
            heads: HashMap::new(),
        }
    }

    /// Start an empty stack under `key`, replacing any existing one.
    pub(crate) fn init(&mut self, key: K) {
        self.heads.insert(key, vec![ROOT]);
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.heads.contains_key(key)
    }

    /// Pop `count` values from every virtual stack under `key`.
    ///
    /// `apply` runs once per distinct list of popped values (bottom first) and
    /// returns the values to push back onto the stacks that list came from.
    /// Fails with underflow before anything is popped if any stack is too short.
    pub(crate) fn pop<F, E>(&mut self, key: &K, count: usize, mut apply: F) -> Result<(), E>
    where
        F: FnMut(&K, Vec<V>) -> Result<Vec<V>, E>,
        E: From<StackError>,
    {
        let head = self.head(key)?.to_vec();
        let paths = self.paths(key, &head, count)?;

        let mut new_head = Vec::new();
        for path in paths {
            let mut tops = path.bases;
            for value in apply(key, path.values)? {
                let node = self.alloc(tops, value);
                tops = vec![node];
            }
            for top in tops {
                if !new_head.contains(&top) {
                    new_head.push(top);
                }
            }
        }
        self.heads.insert(key.clone(), new_head);
        Ok(())
    }

    /// Move the stacks of `key` to each of `sub_keys`.
    ///
    /// A sub key that already holds stacks is joined with the moved ones.
    pub(crate) fn split(&mut self, key: &K, sub_keys: &[K]) -> Result<(), StackError> {
        let entries = self
            .heads
            .remove(key)
            .ok_or_else(|| StackError::KeyNotFound(format!("{key:?}")))?;
        for sub_key in sub_keys {
            let merged = match self.heads.get(sub_key) {
                Some(existing) => union(existing, &entries),
                None => entries.clone(),
            };
            self.check_depth(&format!("{sub_key:?}"), &merged)?;
            self.heads.insert(sub_key.clone(), merged);
        }
        Ok(())
    }

    /// Merge the stacks of `keys` under `new_key`; all must have the same depth.
    pub(crate) fn join(&mut self, keys: &[K], new_key: K) -> Result<(), StackError> {
        let mut merged = Vec::new();
        for key in keys {
            merged = union(&merged, self.head(key)?);
        }
        self.check_depth(&format!("{keys:?}"), &merged)?;
        for key in keys {
            self.heads.remove(key);
        }
        self.heads.insert(new_key, merged);
        Ok(())
    }

    /// Drop the stacks of `key`.
    pub(crate) fn remove(&mut self, key: &K) -> Result<(), StackError> {
        self.heads
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StackError::KeyNotFound(format!("{key:?}")))
    }

    fn head(&self, key: &K) -> Result<&[NodeId], StackError> {
        self.heads
            .get(key)
            .map(Vec::as_slice)
            .ok_or_else(|| StackError::KeyNotFound(format!("{key:?}")))
    }

    fn alloc(&mut self, parents: Vec<NodeId>, value: V) -> NodeId {
        let depth = parents
            .first()
            .map(|parent| self.nodes[*parent].depth)
            .unwrap_or(-1)
            + 1;
        self.nodes.push(Node {
            depth,
            parents,
            value: Some(value),
        });
        self.nodes.len() - 1
    }

    fn paths(&self, key: &K, entries: &[NodeId], count: usize) -> Result<Vec<Path<V>>, StackError> {
        if count == 0 {
            return Ok(vec![Path {
                bases: entries.to_vec(),
                values: Vec::new(),
            }]);
        }

        let mut paths: Vec<Path<V>> = Vec::new();
        for entry in entries {
            let node = &self.nodes[*entry];
            let value = match &node.value {
                Some(value) if node.depth >= count as isize - 1 => value,
                _ => {
                    return Err(StackError::Underflow {
                        key: format!("{key:?}"),
                        requested: count,
                    });
                }
            };
            for mut path in self.paths(key, &node.parents, count - 1)? {
                path.values.push(value.clone());
                match paths.iter_mut().find(|known| known.values == path.values) {
                    Some(known) => known.bases = union(&known.bases, &path.bases),
                    None => paths.push(path),
                }
            }
        }
        Ok(paths)
    }

    fn check_depth(&self, keys: &str, entries: &[NodeId]) -> Result<(), StackError> {
        let mut depths: Vec<isize> = entries
            .iter()
            .map(|entry| self.nodes[*entry].depth)
            .collect();
        depths.dedup();
        if depths.windows(2).any(|pair| pair[0] != pair[1]) {
            return Err(StackError::UnevenDepth {
                keys: keys.to_string(),
                depths,
            });
        }
        Ok(())
    }
}

fn union(left: &[NodeId], right: &[NodeId]) -> Vec<NodeId> {
    let mut merged = left.to_vec();
    for entry in right {
        if !merged.contains(entry) {
            merged.push(*entry);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack() -> KeyedMultiStack<&'static str, i32> {
        let mut stack = KeyedMultiStack::new();
        stack.init("root");
        stack
    }

    /// A pop of nothing that pushes `value`.
    fn push(
        stack: &mut KeyedMultiStack<&'static str, i32>,
        key: &'static str,
        value: i32,
    ) -> Result<(), StackError> {
        stack.pop(&key, 0, |_, _| Ok::<_, StackError>(vec![value]))
    }

    fn pop_all(
        stack: &mut KeyedMultiStack<&'static str, i32>,
        key: &'static str,
        count: usize,
    ) -> String {
        let mut seen = String::new();
        stack
            .pop(&key, count, |_, values| {
                seen.push_str(&format!("{values:?}"));
                Ok::<_, StackError>(Vec::new())
            })
            .expect("pop");
        seen
    }

    #[test]
    fn push_then_pop_returns_pushed_value() {
        let mut stack = stack();
        push(&mut stack, "root", 7).expect("push");

        assert_eq!("[7]", pop_all(&mut stack, "root", 1));
        assert!(matches!(
            stack.pop(&"root", 1, |_, _| Ok::<_, StackError>(Vec::new())),
            Err(StackError::Underflow { .. })
        ));
    }

    #[test]
    fn pop_beyond_depth_underflows_without_popping() {
        let mut stack = stack();
        push(&mut stack, "root", 1).expect("push");

        let error = stack
            .pop(&"root", 2, |_, _| Ok::<_, StackError>(Vec::new()))
            .expect_err("underflow");

        assert!(matches!(error, StackError::Underflow { requested: 2, .. }));
        assert_eq!("[1]", pop_all(&mut stack, "root", 1));
    }

    #[test]
    fn values_pushed_by_pop_closure_land_on_the_same_stack() {
        let mut stack = stack();
        push(&mut stack, "root", 0).expect("push");
        push(&mut stack, "root", 1).expect("push");

        stack
            .pop(&"root", 1, |_, values| {
                Ok::<_, StackError>(vec![values[0] + 10])
            })
            .expect("pop");

        assert_eq!("[0, 11]", pop_all(&mut stack, "root", 2));
    }

    #[test]
    fn split_then_join_visits_every_path() {
        let mut stack = stack();
        push(&mut stack, "root", 0).expect("push");
        stack.split(&"root", &["a", "b"]).expect("split");
        push(&mut stack, "a", 1).expect("push");
        push(&mut stack, "b", 2).expect("push");
        stack.join(&["a", "b"], "joined").expect("join");
        push(&mut stack, "joined", 3).expect("push");

        assert_eq!("[0, 1, 3][0, 2, 3]", pop_all(&mut stack, "joined", 3));
        assert!(!stack.contains(&"a"));
        assert!(!stack.contains(&"root"));
    }

    #[test]
    fn split_then_join_back_is_a_no_op() {
        let mut stack = stack();
        push(&mut stack, "root", 0).expect("push");
        push(&mut stack, "root", 1).expect("push");
        stack.split(&"root", &["a", "b"]).expect("split");
        stack.join(&["a", "b"], "root").expect("join");

        assert_eq!("[0, 1]", pop_all(&mut stack, "root", 2));
    }

    #[test]
    fn splitting_into_an_existing_key_joins() {
        let mut stack = stack();
        push(&mut stack, "root", 0).expect("push");
        stack.split(&"root", &["a", "b"]).expect("split");
        push(&mut stack, "a", 1).expect("push");
        push(&mut stack, "b", 2).expect("push");
        stack.split(&"a", &["joined"]).expect("split a");
        stack.split(&"b", &["joined"]).expect("split b");

        assert_eq!("[0, 1][0, 2]", pop_all(&mut stack, "joined", 2));
    }

    #[test]
    fn equal_values_on_different_stacks_are_applied_once() {
        let mut stack = stack();
        push(&mut stack, "root", 0).expect("push");
        stack.split(&"root", &["a", "b"]).expect("split");
        push(&mut stack, "a", 5).expect("push");
        push(&mut stack, "b", 5).expect("push");
        stack.join(&["a", "b"], "joined").expect("join");

        assert_eq!("[5]", pop_all(&mut stack, "joined", 1));
        assert_eq!("[0]", pop_all(&mut stack, "joined", 1));
    }

    #[test]
    fn joining_uneven_stacks_fails() {
        let mut stack = stack();
        stack.split(&"root", &["a", "b"]).expect("split");
        push(&mut stack, "a", 1).expect("push");

        let error = stack.join(&["a", "b"], "joined").expect_err("uneven");

        assert!(matches!(error, StackError::UnevenDepth { .. }));
        assert!(stack.contains(&"a"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut stack = stack();

        assert!(matches!(
            push(&mut stack, "missing", 1),
            Err(StackError::KeyNotFound(_))
        ));
        assert!(matches!(
            stack.split(&"missing", &["a"]),
            Err(StackError::KeyNotFound(_))
        ));
        assert!(matches!(
            stack.join(&["root", "missing"], "joined"),
            Err(StackError::KeyNotFound(_))
        ));
        assert!(matches!(
            stack.pop(&"missing", 0, |_, _| Ok::<_, StackError>(Vec::new())),
            Err(StackError::KeyNotFound(_))
        ));
    }
}
