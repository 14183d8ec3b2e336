mod bytecode;
mod cfg;
mod classpath;
mod context;
mod cost;
mod decoder;
mod error;
mod ir;
mod metric;
mod multi_stack;
mod opcodes;
mod report;
mod repository;
mod scan;
mod stack_ops;
#[cfg(test)]
mod testing;
mod translate;
mod whitelist;

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::classpath::{Classpath, split_classpath};
use crate::cost::{ClassCost, CostModel};
use crate::metric::MetricComputer;
use crate::report::ReportConfig;
use crate::report::json::write_json;
use crate::report::sarif::{build_invocation, build_sarif};
use crate::report::summary::write_summary;
use crate::report::text::write_text;
use crate::repository::ClassRepository;
use crate::scan::dotted;
use crate::whitelist::Whitelist;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Summary,
    Sarif,
    Json,
}

/// CLI arguments for a testability run.
#[derive(Parser, Debug)]
#[command(
    name = "testability",
    about = "Testability cost of JVM classes: unavoidable branching and global state.",
    version
)]
struct Cli {
    /// Class or package prefixes to analyse; everything on the classpath when omitted.
    #[arg(value_name = "ENTRY")]
    entries: Vec<String>,
    /// Directories and jars; repeatable, each value may be `:`-separated.
    #[arg(long, visible_alias = "cp", value_name = "PATH", default_value = ".")]
    classpath: Vec<String>,
    #[arg(long, value_name = "N", default_value_t = 1)]
    print_depth: u32,
    #[arg(long, value_name = "N", default_value_t = 1)]
    min_cost: u64,
    /// `:`-separated package prefixes whose costs are ignored; `java.` is always included.
    #[arg(long, value_name = "PREFIXES")]
    whitelist: Option<String>,
    #[arg(long, value_name = "WEIGHT", default_value_t = 1.0)]
    cyclomatic_weight: f64,
    #[arg(long, value_name = "WEIGHT", default_value_t = 10.0)]
    global_weight: f64,
    #[arg(long, value_name = "N", default_value_t = 50)]
    max_excellent_cost: u64,
    #[arg(long, value_name = "N", default_value_t = 100)]
    max_acceptable_cost: u64,
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    #[arg(long, conflicts_with = "verbose")]
    quiet: bool,
    #[arg(long)]
    verbose: bool,
    #[arg(long)]
    timing: bool,
}

/// Settings derived from the command line, passed explicitly through a run.
#[derive(Debug)]
struct AnalysisConfig {
    whitelist: Whitelist,
    report: ReportConfig,
}

impl AnalysisConfig {
    fn from_cli(cli: &Cli) -> Result<Self> {
        for (flag, weight) in [
            ("--cyclomatic-weight", cli.cyclomatic_weight),
            ("--global-weight", cli.global_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                anyhow::bail!("{flag} must be a non-negative number, got {weight}");
            }
        }
        if cli.max_excellent_cost > cli.max_acceptable_cost {
            anyhow::bail!(
                "--max-excellent-cost ({}) must not exceed --max-acceptable-cost ({})",
                cli.max_excellent_cost,
                cli.max_acceptable_cost
            );
        }
        let mut entries: Vec<String> = cli.entries.iter().map(|entry| dotted(entry)).collect();
        if entries.is_empty() {
            entries.push(String::new());
        }
        Ok(Self {
            whitelist: Whitelist::parse(cli.whitelist.as_deref()),
            report: ReportConfig {
                entries,
                print_depth: cli.print_depth,
                min_cost: cli.min_cost,
                cost_model: CostModel {
                    cyclomatic_weight: cli.cyclomatic_weight,
                    global_weight: cli.global_weight,
                },
                max_excellent_cost: cli.max_excellent_cost,
                max_acceptable_cost: cli.max_acceptable_cost,
            },
        })
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);
    run(cli)
}

fn init_logging(cli: &Cli) {
    let filter = if cli.quiet {
        EnvFilter::new("error")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    // a subscriber installed by an embedding process wins
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn run(cli: Cli) -> Result<()> {
    let config = AnalysisConfig::from_cli(&cli)?;
    let started_at = Instant::now();

    let classpath = Classpath::open(&split_classpath(&cli.classpath))?;
    let class_names = classpath.class_names(&config.report.entries)?;
    let artifacts = classpath.artifacts();
    info!(classes = class_names.len(), "analysing classes");

    let mut repository = ClassRepository::new(Box::new(classpath));
    let costs = analyze(&mut repository, &config.whitelist, &class_names);

    let mut writer = output_writer(cli.output.as_deref())?;
    match cli.format {
        Format::Text => write_text(&mut *writer, &costs, &config.report)
            .context("failed to write text report")?,
        Format::Summary => write_summary(&mut *writer, &costs, &config.report)
            .context("failed to write summary report")?,
        Format::Json => write_json(&mut *writer, &costs, &config.report)
            .context("failed to write JSON report")?,
        Format::Sarif => {
            let sarif = build_sarif(&costs, &config.report, artifacts, build_invocation());
            serde_json::to_writer_pretty(&mut writer, &sarif)
                .context("failed to serialize SARIF output")?;
            writer
                .write_all(b"\n")
                .context("failed to write SARIF output")?;
        }
    }
    writer.flush().context("failed to flush output")?;

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} classes={} loaded={}",
            started_at.elapsed().as_millis(),
            costs.len(),
            repository.cached_count()
        );
    }

    Ok(())
}

/// Cost of every named class, most expensive first.
///
/// A class that fails to decode is logged and left out; the rest still run.
fn analyze(
    repository: &mut ClassRepository,
    whitelist: &Whitelist,
    class_names: &[String],
) -> Vec<ClassCost> {
    let mut computer = MetricComputer::new(repository, whitelist);
    let mut costs = Vec::with_capacity(class_names.len());
    for name in class_names {
        match computer.compute(name) {
            Ok(cost) => costs.push(cost),
            Err(error) => tracing::error!("skipping class {name}: {error}"),
        }
    }
    costs.sort_by(ClassCost::compare);
    costs
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Ok(Box::new(io::stdout())),
    }
}
