//! Table rendering for command results.

use rfleet_core::{Action, ClusterOutcome, ExistingResource, ReconcileOutcome, Result};
use tabled::{Table, Tabled};

#[derive(Tabled)]
pub struct TargetRow {
    #[tabled(rename = "DEVICE")]
    device: String,
    #[tabled(rename = "RESULT")]
    result: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "DETAIL")]
    detail: String,
}

impl TargetRow {
    pub fn new(device: &str, result: &Result<ReconcileOutcome>) -> Self {
        match result {
            Ok(outcome) => Self {
                device: device.to_string(),
                result: action_label(outcome.action).to_string(),
                id: outcome.identifier.clone(),
                detail: if outcome.changed.is_empty() {
                    "-".to_string()
                } else {
                    outcome.changed.iter().cloned().collect::<Vec<_>>().join(",")
                },
            },
            Err(e) => Self {
                device: device.to_string(),
                result: e.kind().to_string(),
                id: "-".to_string(),
                detail: e.to_string(),
            },
        }
    }
}

fn action_label(action: Action) -> &'static str {
    match action {
        Action::Created => "created",
        Action::Updated => "updated",
        Action::Unchanged => "unchanged",
    }
}

#[derive(Tabled)]
struct FieldRow {
    #[tabled(rename = "FIELD")]
    field: String,
    #[tabled(rename = "VALUE")]
    value: String,
}

pub fn print_rows(rows: Vec<TargetRow>) {
    let table = Table::new(rows);
    println!("{}", table);
}

pub fn cluster_rows(outcome: &ClusterOutcome<ReconcileOutcome>) -> Vec<TargetRow> {
    outcome
        .iter()
        .map(|entry| TargetRow::new(entry.target.name(), &entry.result))
        .collect()
}

/// Print a resource's attributes, masking the `hidden` fields.
pub fn print_resource(resource: &ExistingResource, hidden: &[String]) {
    let rows: Vec<FieldRow> = resource
        .attrs()
        .iter()
        .map(|(field, value)| FieldRow {
            field: field.to_string(),
            value: if hidden.iter().any(|h| h == field) {
                "********".to_string()
            } else {
                value.to_string()
            },
        })
        .collect();
    let table = Table::new(rows);
    println!("{}", table);
}
