use std::io::{self, Write};

use serde::Serialize;

use crate::cost::{ClassCost, MethodCost};
use crate::report::{Grade, ReportConfig};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClassReport<'a> {
    class_name: &'a str,
    overall_cost: u64,
    grade: &'static str,
    total_complexity_cost: u64,
    total_global_cost: u64,
    methods: Vec<MethodReport<'a>>,
    missing_classes: Vec<MissingReport<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MissingReport<'a> {
    class_name: &'a str,
    reason: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MethodReport<'a> {
    signature: &'a str,
    starting_line: u32,
    complexity_cost: u64,
    global_cost: u64,
    total_complexity_cost: u64,
    total_global_cost: u64,
    calls: Vec<CallReport>,
}

#[derive(Serialize)]
struct CallReport {
    line: u32,
    method: String,
}

/// Machine-readable dump of every analysed class, reported or not.
pub(crate) fn write_json(
    out: &mut dyn Write,
    classes: &[ClassCost],
    config: &ReportConfig,
) -> io::Result<()> {
    let reports: Vec<ClassReport<'_>> = classes
        .iter()
        .map(|class| class_report(class, config))
        .collect();
    serde_json::to_writer_pretty(&mut *out, &reports)?;
    writeln!(out)
}

fn class_report<'a>(class: &'a ClassCost, config: &ReportConfig) -> ClassReport<'a> {
    let grade = match config.grade(class) {
        Grade::Excellent => "excellent",
        Grade::Good => "good",
        Grade::NeedsWork => "needs-work",
    };
    ClassReport {
        class_name: &class.class_name,
        overall_cost: config.cost_model.overall_cost(class),
        grade,
        total_complexity_cost: class.total_complexity_cost(),
        total_global_cost: class.total_global_cost(),
        methods: class
            .methods()
            .map(|method| method_report(class, method))
            .collect(),
        missing_classes: class
            .missing
            .iter()
            .map(|missing| MissingReport {
                class_name: &missing.class_name,
                reason: &missing.reason,
            })
            .collect(),
    }
}

fn method_report<'a>(class: &'a ClassCost, method: &'a MethodCost) -> MethodReport<'a> {
    MethodReport {
        signature: &method.signature,
        starting_line: method.starting_line,
        complexity_cost: method.complexity_cost,
        global_cost: method.global_cost(),
        total_complexity_cost: method.total_complexity_cost(),
        total_global_cost: method.total_global_cost(),
        calls: method
            .calls
            .iter()
            .map(|call| CallReport {
                line: call.line,
                method: class.graph().get(call.method).full_name(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::fixtures;

    #[test]
    fn json_lists_methods_and_calls() {
        let classes = [fixtures::sample("com.example.Sample")];
        let mut out = Vec::new();

        write_json(&mut out, &classes, &ReportConfig::default()).expect("write json");
        let value: serde_json::Value = serde_json::from_slice(&out).expect("parse json");

        let class = &value[0];
        assert_eq!(class["className"], "com.example.Sample");
        assert_eq!(class["overallCost"], 13);
        assert_eq!(class["grade"], "excellent");
        assert_eq!(class["methods"][0]["signature"], "run()V");
        assert_eq!(class["methods"][0]["totalComplexityCost"], 3);
        assert_eq!(
            class["methods"][0]["calls"][0]["method"],
            "com.example.Helper.helper()V"
        );
        assert_eq!(class["methods"][0]["calls"][0]["line"], 11);
        assert!(class["missingClasses"].as_array().expect("array").is_empty());
    }
}
