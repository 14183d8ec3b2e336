use crate::cost::{ClassCost, CostModel};

pub(crate) mod json;
pub(crate) mod sarif;
pub(crate) mod summary;
pub(crate) mod text;

/// Options shared by every output format.
#[derive(Clone, Debug)]
pub(crate) struct ReportConfig {
    /// Class or package prefixes the run was asked to analyse.
    pub(crate) entries: Vec<String>,
    pub(crate) print_depth: u32,
    pub(crate) min_cost: u64,
    pub(crate) cost_model: CostModel,
    pub(crate) max_excellent_cost: u64,
    pub(crate) max_acceptable_cost: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            entries: vec![String::new()],
            print_depth: 1,
            min_cost: 1,
            cost_model: CostModel::default(),
            max_excellent_cost: 50,
            max_acceptable_cost: 100,
        }
    }
}

/// Bucket of a class by overall cost.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Grade {
    Excellent,
    Good,
    NeedsWork,
}

impl ReportConfig {
    pub(crate) fn grade(&self, class: &ClassCost) -> Grade {
        let cost = self.cost_model.overall_cost(class);
        if cost < self.max_excellent_cost {
            Grade::Excellent
        } else if cost < self.max_acceptable_cost {
            Grade::Good
        } else {
            Grade::NeedsWork
        }
    }

    /// A class is worth reporting when one of its methods reaches the minimum cost.
    pub(crate) fn is_reported(&self, class: &ClassCost) -> bool {
        class.highest_method_complexity_cost() >= self.min_cost
            || class.highest_method_global_cost() >= self.min_cost
    }
}
