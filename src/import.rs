use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::models::{NewMember, Role};
use crate::pipeline::Pipeline;
use crate::store::StudentDirectory;

#[derive(Debug, serde::Deserialize)]
struct CsvRow {
    full_name: String,
    email: String,
    course: Option<String>,
    year: Option<i32>,
    event_type: String,
    status: Option<String>,
    submitted: Option<bool>,
    assignment_name: Option<String>,
    score: Option<f64>,
    test_name: Option<String>,
    occurred_at: Option<DateTime<Utc>>,
}

impl CsvRow {
    /// Only the columns that were filled in end up in the payload.
    fn event_data(&self) -> Value {
        let mut data = Map::new();
        if let Some(status) = &self.status {
            data.insert("status".to_string(), Value::from(status.as_str()));
        }
        if let Some(submitted) = self.submitted {
            data.insert("submitted".to_string(), Value::from(submitted));
        }
        if let Some(name) = &self.assignment_name {
            data.insert("assignmentName".to_string(), Value::from(name.as_str()));
        }
        if let Some(score) = self.score {
            data.insert("score".to_string(), Value::from(score));
        }
        if let Some(name) = &self.test_name {
            data.insert("testName".to_string(), Value::from(name.as_str()));
        }
        Value::Object(data)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub submitted: usize,
    pub rejected: usize,
    pub mentor_alerts: usize,
}

/// Registers each row's student and pushes its event through the pipeline.
///
/// Rows the validator rejects are counted and skipped; a persistence failure
/// stops the import.
pub async fn import_csv(
    directory: &dyn StudentDirectory,
    pipeline: &Pipeline,
    csv_path: &Path,
) -> anyhow::Result<ImportSummary> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut summary = ImportSummary::default();

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let line = index + 2;
        let row = result.with_context(|| format!("malformed row on line {line}"))?;
        let event_data = row.event_data();

        let student = directory
            .register(NewMember {
                name: row.full_name,
                email: row.email,
                role: Role::Student,
                course: row.course,
                year: row.year,
            })
            .await?;

        let occurred_at = row.occurred_at.unwrap_or_else(Utc::now);
        match pipeline
            .submit_event_at(student.id, &row.event_type, event_data, occurred_at)
            .await
        {
            Ok(outcome) => {
                summary.submitted += 1;
                if outcome.notifications.mentor.is_some() {
                    summary.mentor_alerts += 1;
                }
            }
            Err(err) if err.is_validation() => {
                tracing::warn!(line, kind = err.kind(), "skipping row: {err}");
                summary.rejected += 1;
            }
            Err(err) => {
                return Err(err).with_context(|| format!("import stopped on line {line}"));
            }
        }
    }

    Ok(summary)
}
