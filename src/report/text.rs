use std::collections::HashSet;
use std::io::{self, Write};

use crate::cost::{ClassCost, CostGraph, MethodId};
use crate::report::ReportConfig;

const DIVIDER: &str = "-----------------------------------------";

/// Human-readable report: one call tree per method of every reported class.
///
/// `classes` are printed in the order given; totals in the footer cover the
/// printed classes, averages divide by every analysed class.
pub(crate) fn write_text(
    out: &mut dyn Write,
    classes: &[ClassCost],
    config: &ReportConfig,
) -> io::Result<()> {
    writeln!(out, "{DIVIDER}")?;
    writeln!(out, "Packages/Classes To Enter: ")?;
    for entry in &config.entries {
        writeln!(out, "  {entry}*")?;
    }
    writeln!(out, "Max Method Print Depth: {}", config.print_depth)?;
    writeln!(out, "Min Class Cost: {}", config.min_cost)?;
    writeln!(out, "{DIVIDER}")?;

    let mut total_complexity = 0;
    let mut total_global = 0;
    for class in classes.iter().filter(|class| config.is_reported(class)) {
        let complexity = class.total_complexity_cost();
        let global = class.total_global_cost();
        total_complexity += complexity;
        total_global += global;
        writeln!(out)?;
        writeln!(
            out,
            "Testability cost for {} [ {complexity} TCC, {global} TGC ]",
            class.class_name
        )?;
        for id in class.method_ids() {
            let mut tree = CallTree {
                graph: class.graph(),
                min_cost: config.min_cost,
                seen: HashSet::new(),
            };
            tree.write(out, "  ", *id, None, config.print_depth)?;
        }
    }

    let analyzed = classes.len();
    writeln!(out)?;
    writeln!(out, "{DIVIDER}")?;
    writeln!(out, "Summary Statistics:")?;
    writeln!(out, " TCC for all classes entered: {total_complexity}")?;
    writeln!(out, " TGC for all classes entered: {total_global}")?;
    writeln!(
        out,
        " Average TCC for all classes entered: {:.2}",
        average(total_complexity, analyzed)
    )?;
    writeln!(
        out,
        " Average TGC for all classes entered: {:.2}",
        average(total_global, analyzed)
    )?;
    writeln!(out)?;
    writeln!(out, "Key:")?;
    writeln!(out, " TCC: Total Complexity Cost")?;
    writeln!(out, " TGC: Total Global Cost")?;
    writeln!(out)?;
    writeln!(
        out,
        "Analyzed {analyzed} classes (plus non-whitelisted external dependencies)"
    )?;
    Ok(())
}

fn average(total: u64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        total as f64 / count as f64
    }
}

/// Prints one method and its callees; every method appears once per tree.
struct CallTree<'a> {
    graph: &'a CostGraph,
    min_cost: u64,
    seen: HashSet<MethodId>,
}

impl CallTree<'_> {
    fn write(
        &mut self,
        out: &mut dyn Write,
        prefix: &str,
        id: MethodId,
        line: Option<u32>,
        depth: u32,
    ) -> io::Result<()> {
        if depth == 0 || !self.seen.insert(id) {
            return Ok(());
        }
        let method = self.graph.get(id);
        if method.total_complexity_cost() < self.min_cost
            && method.total_global_cost() < self.min_cost
        {
            return Ok(());
        }
        match line {
            Some(line) => writeln!(out, "{prefix}line {line}: {method}")?,
            None => writeln!(out, "{prefix}{method}")?,
        }
        let nested = format!("  {prefix}");
        for call in &method.calls {
            self.write(out, &nested, call.method, Some(call.line), depth - 1)?;
        }
        Ok(())
    }
}
