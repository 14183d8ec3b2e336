use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::ir::{MethodInfo, Variable};

pub(crate) type MethodId = usize;

/// Call edge from a method to a callee, at a source line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct LineNumberCost {
    pub(crate) line: u32,
    pub(crate) method: MethodId,
}

/// Write to global state, at a source line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct GlobalStateCost {
    pub(crate) line: u32,
    pub(crate) variable: String,
}

/// Cost of one method: its own branching and global writes, plus the totals
/// over every distinct method it can reach once linked.
#[derive(Clone, Debug)]
pub(crate) struct MethodCost {
    pub(crate) class_name: String,
    pub(crate) signature: String,
    pub(crate) starting_line: u32,
    pub(crate) complexity_cost: u64,
    pub(crate) calls: Vec<LineNumberCost>,
    pub(crate) global_costs: Vec<GlobalStateCost>,
    total_complexity_cost: u64,
    total_global_cost: u64,
}

impl MethodCost {
    pub(crate) fn full_name(&self) -> String {
        format!("{}.{}", self.class_name, self.signature)
    }

    pub(crate) fn global_cost(&self) -> u64 {
        self.global_costs.len() as u64
    }

    pub(crate) fn total_complexity_cost(&self) -> u64 {
        self.total_complexity_cost
    }

    pub(crate) fn total_global_cost(&self) -> u64 {
        self.total_global_cost
    }
}

impl fmt::Display for MethodCost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}, {} / {}, {}]",
            self.full_name(),
            self.complexity_cost,
            self.global_cost(),
            self.total_complexity_cost,
            self.total_global_cost
        )
    }
}

/// Arena of method costs linked by call edges; cycles are allowed.
#[derive(Clone, Debug, Default)]
pub(crate) struct CostGraph {
    methods: Vec<MethodCost>,
    index: HashMap<String, MethodId>,
}

impl CostGraph {
    /// Node for `method`, created on first request.
    pub(crate) fn add(&mut self, method: &MethodInfo) -> MethodId {
        let full_name = method.full_name();
        if let Some(id) = self.index.get(&full_name) {
            return *id;
        }
        let id = self.methods.len();
        self.methods.push(MethodCost {
            class_name: method.class_name.clone(),
            signature: method.signature(),
            starting_line: method.starting_line,
            complexity_cost: method.test_cost(),
            calls: Vec::new(),
            global_costs: Vec::new(),
            total_complexity_cost: 0,
            total_global_cost: 0,
        });
        self.index.insert(full_name, id);
        id
    }

    pub(crate) fn find(&self, full_name: &str) -> Option<MethodId> {
        self.index.get(full_name).copied()
    }

    pub(crate) fn get(&self, id: MethodId) -> &MethodCost {
        &self.methods[id]
    }

    pub(crate) fn add_call(&mut self, from: MethodId, line: u32, to: MethodId) {
        self.methods[from].calls.push(LineNumberCost { line, method: to });
    }

    pub(crate) fn add_global(&mut self, from: MethodId, line: u32, variable: &Variable) {
        self.methods[from].global_costs.push(GlobalStateCost {
            line,
            variable: variable.to_string(),
        });
    }

    /// Compute totals: each method counts the own cost of every distinct
    /// method reachable from it, itself included, exactly once.
    pub(crate) fn link(&mut self) {
        for id in 0..self.methods.len() {
            let (complexity, global) = self
                .reachable(id)
                .into_iter()
                .map(|reached| &self.methods[reached])
                .fold((0, 0), |(complexity, global), method| {
                    (
                        complexity + method.complexity_cost,
                        global + method.global_cost(),
                    )
                });
            let method = &mut self.methods[id];
            method.total_complexity_cost = complexity;
            method.total_global_cost = global;
        }
    }

    /// Distinct methods reachable from `from` through call edges, `from` first.
    pub(crate) fn reachable(&self, from: MethodId) -> Vec<MethodId> {
        let mut seen = HashSet::from([from]);
        let mut order = vec![from];
        let mut worklist = vec![from];
        while let Some(id) = worklist.pop() {
            for call in &self.methods[id].calls {
                if seen.insert(call.method) {
                    order.push(call.method);
                    worklist.push(call.method);
                }
            }
        }
        order
    }
}

/// A class referenced during analysis that could not be loaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct MissingClass {
    pub(crate) class_name: String,
    pub(crate) reason: String,
}

/// Linked costs of every method declared by one class.
#[derive(Clone, Debug)]
pub(crate) struct ClassCost {
    pub(crate) class_name: String,
    graph: CostGraph,
    methods: Vec<MethodId>,
    pub(crate) missing: Vec<MissingClass>,
}

impl ClassCost {
    pub(crate) fn new(
        class_name: impl Into<String>,
        graph: CostGraph,
        methods: Vec<MethodId>,
        missing: Vec<MissingClass>,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            graph,
            methods,
            missing,
        }
    }

    pub(crate) fn graph(&self) -> &CostGraph {
        &self.graph
    }

    /// Methods of the class in declaration order.
    pub(crate) fn methods(&self) -> impl Iterator<Item = &MethodCost> {
        self.methods.iter().map(|id| self.graph.get(*id))
    }

    pub(crate) fn method_ids(&self) -> &[MethodId] {
        &self.methods
    }

    #[cfg(test)]
    pub(crate) fn method(&self, signature: &str) -> Option<&MethodCost> {
        self.methods().find(|method| method.signature == signature)
    }

    pub(crate) fn total_complexity_cost(&self) -> u64 {
        self.methods().map(MethodCost::total_complexity_cost).sum()
    }

    pub(crate) fn total_global_cost(&self) -> u64 {
        self.methods().map(MethodCost::total_global_cost).sum()
    }

    pub(crate) fn highest_method_complexity_cost(&self) -> u64 {
        self.methods()
            .map(MethodCost::total_complexity_cost)
            .max()
            .unwrap_or(0)
    }

    pub(crate) fn highest_method_global_cost(&self) -> u64 {
        self.methods()
            .map(MethodCost::total_global_cost)
            .max()
            .unwrap_or(0)
    }

    /// Highest complexity first, then highest global cost; ties keep name order.
    pub(crate) fn compare(&self, other: &ClassCost) -> Ordering {
        other
            .total_complexity_cost()
            .cmp(&self.total_complexity_cost())
            .then_with(|| other.total_global_cost().cmp(&self.total_global_cost()))
            .then_with(|| self.class_name.cmp(&other.class_name))
    }
}

impl fmt::Display for ClassCost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.class_name)?;
        for method in self.methods() {
            write!(f, "\n  {method}")?;
        }
        Ok(())
    }
}

/// Weights combining complexity and global cost into one figure.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct CostModel {
    pub(crate) cyclomatic_weight: f64,
    pub(crate) global_weight: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            cyclomatic_weight: 1.0,
            global_weight: 10.0,
        }
    }
}

impl CostModel {
    pub(crate) fn overall_cost(&self, class: &ClassCost) -> u64 {
        let weighted = self.cyclomatic_weight * class.total_complexity_cost() as f64
            + self.global_weight * class.total_global_cost() as f64;
        weighted.max(0.0).round() as u64
    }
}
