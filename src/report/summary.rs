use std::io::{self, Write};

use crate::cost::ClassCost;
use crate::report::{Grade, ReportConfig};

const GRAPH_WIDTH: usize = 50;
const DISTRIBUTION_ROWS: usize = 10;
const HIGHEST_COST_LIMIT: usize = 20;

/// Bucket counts, a breakdown bar, per-bucket histograms and the worst classes.
pub(crate) fn write_summary(
    out: &mut dyn Write,
    classes: &[ClassCost],
    config: &ReportConfig,
) -> io::Result<()> {
    let mut excellent = Vec::new();
    let mut good = Vec::new();
    let mut needs_work = Vec::new();
    for class in classes {
        let cost = config.cost_model.overall_cost(class) as f64;
        match config.grade(class) {
            Grade::Excellent => excellent.push(cost),
            Grade::Good => good.push(cost),
            Grade::NeedsWork => needs_work.push(cost),
        }
    }

    let total = classes.len();
    writeln!(out, "      Analyzed classes: {total:5}")?;
    for (label, count) in [
        (" Excellent classes (.)", excellent.len()),
        ("      Good classes (=)", good.len()),
        ("Needs work classes (@)", needs_work.len()),
    ] {
        writeln!(out, "{label}: {count:5} {:5.1}%", percent(count, total))?;
    }
    let breakdown = pie_graph(
        GRAPH_WIDTH,
        &[
            ('.', excellent.len() as u64),
            ('=', good.len() as u64),
            ('@', needs_work.len() as u64),
        ],
    );
    writeln!(out, "             Breakdown: [{breakdown}]")?;

    let excellent_max = config.max_excellent_cost as f64;
    let acceptable_max = config.max_acceptable_cost as f64;
    for (title, values, min, max, marker) in [
        ("Excellent Cost Distribution", &excellent, 0.0, Some(excellent_max), '.'),
        ("Good Cost Distribution", &good, excellent_max, Some(acceptable_max), '='),
        ("Needs Work Cost Distribution", &needs_work, acceptable_max, None, '#'),
    ] {
        writeln!(out)?;
        writeln!(out, "{title}")?;
        writeln!(out, "{}", "=".repeat(title.len()))?;
        let histogram = Histogram {
            width: GRAPH_WIDTH,
            height: DISTRIBUTION_ROWS,
            marker,
            min,
            max,
        };
        for row in histogram.graph(values) {
            writeln!(out, "{row}")?;
        }
    }

    let mut ranked: Vec<(u64, &str)> = classes
        .iter()
        .map(|class| (config.cost_model.overall_cost(class), class.class_name.as_str()))
        .collect();
    ranked.sort_by(|left, right| right.0.cmp(&left.0).then_with(|| left.1.cmp(right.1)));
    writeln!(out)?;
    writeln!(out, "Highest Cost")?;
    writeln!(out, "============")?;
    for (cost, name) in ranked.into_iter().take(HIGHEST_COST_LIMIT) {
        writeln!(out, "{cost:8} {name}")?;
    }
    Ok(())
}

fn percent(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * count as f64 / total as f64
    }
}

/// A bar of `width` columns split between the slices in proportion to their values.
pub(crate) fn pie_graph(width: usize, slices: &[(char, u64)]) -> String {
    let total: u64 = slices.iter().map(|(_, value)| value).sum();
    if total == 0 {
        return " ".repeat(width);
    }
    let mut bar = String::with_capacity(width);
    let mut cumulative = 0;
    let mut drawn = 0;
    for (marker, value) in slices {
        cumulative += value;
        let end = (cumulative as f64 * width as f64 / total as f64).round() as usize;
        for _ in drawn..end {
            bar.push(*marker);
        }
        drawn = drawn.max(end);
    }
    bar
}

/// Fixed-width text histogram over `height` equal buckets between `min` and `max`.
pub(crate) struct Histogram {
    pub(crate) width: usize,
    pub(crate) height: usize,
    pub(crate) marker: char,
    pub(crate) min: f64,
    /// Upper bound; the largest value when `None`.
    pub(crate) max: Option<f64>,
}

impl Histogram {
    /// A scale row followed by one row per bucket.
    pub(crate) fn graph(&self, values: &[f64]) -> Vec<String> {
        let max = self
            .max
            .unwrap_or_else(|| values.iter().copied().fold(0.0, f64::max))
            .trunc()
            .max(self.min);
        let counts = self.count(values, max);
        let max_count = counts.iter().copied().max().unwrap_or(0);
        let bucket_width = (max - self.min) / self.height as f64;

        let mut rows = Vec::with_capacity(self.height + 1);
        rows.push(format!("{:8} {:width$}", 0, max_count, width = self.width));
        for (index, count) in counts.iter().enumerate() {
            let bar = pie_graph(
                self.width,
                &[(self.marker, *count), (' ', max_count - count)],
            );
            let bucket = (self.min + bucket_width * index as f64 + bucket_width / 2.0) as i64;
            rows.push(format!("{bucket:6} |{bar}:{count:6}"));
        }
        rows
    }

    /// Values above `max` fall outside every bucket.
    fn count(&self, values: &[f64], max: f64) -> Vec<u64> {
        let mut counts = vec![0; self.height];
        let bin_size = (max - self.min) / self.height as f64;
        for value in values {
            let mut bin = self.min;
            for count in counts.iter_mut() {
                bin += bin_size;
                if bin >= *value {
                    *count += 1;
                    break;
                }
            }
        }
        counts
    }
}
