use std::collections::BTreeMap;

use serde_json::json;
use serde_sarif::sarif::{
    Artifact, Invocation, Location, LogicalLocation, Message, MultiformatMessageString,
    PropertyBag, ReportingDescriptor, Result as SarifResult, ResultLevel, Run, SCHEMA_URL, Sarif,
    Tool, ToolComponent,
};

use crate::cost::ClassCost;
use crate::report::{Grade, ReportConfig};

pub(crate) const RULE_ID: &str = "testability-cost";

pub(crate) fn build_invocation() -> Invocation {
    let arguments: Vec<String> = std::env::args().collect();
    let command_line = arguments.join(" ");

    Invocation::builder()
        .execution_successful(true)
        .arguments(arguments)
        .command_line(command_line)
        .build()
}

/// One result per reported class; the level follows the cost bucket.
pub(crate) fn build_sarif(
    classes: &[ClassCost],
    config: &ReportConfig,
    artifacts: Vec<Artifact>,
    invocation: Invocation,
) -> Sarif {
    let rule = ReportingDescriptor::builder()
        .id(RULE_ID)
        .name("TestabilityCost")
        .short_description(
            MultiformatMessageString::builder()
                .text("Cost of getting a class under test: unavoidable branching and global state.")
                .build(),
        )
        .build();
    let driver = ToolComponent::builder()
        .name("testability")
        .version(env!("CARGO_PKG_VERSION"))
        .rules(vec![rule])
        .build();
    let tool = Tool {
        driver,
        extensions: None,
        properties: None,
    };
    let results: Vec<SarifResult> = classes
        .iter()
        .filter(|class| config.is_reported(class))
        .map(|class| class_result(class, config))
        .collect();
    let run = if artifacts.is_empty() {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .build()
    } else {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .artifacts(artifacts)
            .build()
    };

    Sarif::builder()
        .schema(SCHEMA_URL)
        .runs(vec![run])
        .version(json!("2.1.0"))
        .build()
}

fn class_result(class: &ClassCost, config: &ReportConfig) -> SarifResult {
    let overall = config.cost_model.overall_cost(class);
    let complexity = class.total_complexity_cost();
    let global = class.total_global_cost();
    let level = match config.grade(class) {
        Grade::Excellent => ResultLevel::Note,
        Grade::Good => ResultLevel::Warning,
        Grade::NeedsWork => ResultLevel::Error,
    };
    let message = Message::builder()
        .text(format!(
            "Testability cost for {} is {overall} ({complexity} TCC, {global} TGC)",
            class.class_name
        ))
        .build();
    let properties = PropertyBag::builder()
        .additional_properties(BTreeMap::from([
            ("overallCost".to_string(), json!(overall)),
            ("totalComplexityCost".to_string(), json!(complexity)),
            ("totalGlobalCost".to_string(), json!(global)),
        ]))
        .build();

    SarifResult::builder()
        .rule_id(RULE_ID)
        .level(level)
        .message(message)
        .locations(vec![class_location(&class.class_name)])
        .properties(properties)
        .build()
}

fn class_location(class_name: &str) -> Location {
    let logical = LogicalLocation::builder()
        .name(class_name)
        .kind("type")
        .build();
    Location::builder().logical_locations(vec![logical]).build()
}
