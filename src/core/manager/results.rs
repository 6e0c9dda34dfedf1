use super::TaskManager;
use crate::core::TaskResult;
use crate::errors::Error;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::str::FromStr;

/// Column used for payloads that are not JSON objects
const SCALAR_COLUMN: &str = "value";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(Error::Validation(format!(
                "unsupported export format '{}'",
                other
            ))),
        }
    }
}

/// A rendered export, ready to be written to a file or an HTTP body
#[derive(Debug, Clone)]
pub struct ExportedResults {
    pub content_type: &'static str,
    pub filename: String,
    pub body: String,
}

impl TaskManager {
    /// All results of a task, oldest first
    pub async fn get_task_results(&self, id: i32) -> Result<Vec<TaskResult>, Error> {
        self.get_task(id).await?;
        self.with_repo(|repo| repo.list_results(id))
    }

    pub async fn export_results(&self, id: i32, format: ExportFormat) -> Result<ExportedResults, Error> {
        let results = self.get_task_results(id).await?;
        let payloads: Vec<Value> = results.into_iter().map(|result| result.payload).collect();

        Ok(match format {
            ExportFormat::Json => ExportedResults {
                content_type: "application/json",
                filename: format!("task-{}-results.json", id),
                body: serde_json::to_string_pretty(&payloads)?,
            },
            ExportFormat::Csv => ExportedResults {
                content_type: "text/csv; charset=utf-8",
                filename: format!("task-{}-results.csv", id),
                body: render_csv(&payloads),
            },
        })
    }
}

/// Renders payloads as CSV. The header is the sorted union of the payloads'
/// top-level keys; rows end with CRLF.
fn render_csv(payloads: &[Value]) -> String {
    let columns: BTreeSet<&str> = payloads
        .iter()
        .flat_map(|payload| match payload {
            Value::Object(fields) => fields.keys().map(String::as_str).collect::<Vec<_>>(),
            _ => vec![SCALAR_COLUMN],
        })
        .collect();
    if columns.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    let header: Vec<String> = columns.iter().map(|column| escape_cell(column)).collect();
    out.push_str(&header.join(","));
    out.push_str("\r\n");

    for payload in payloads {
        let row: Vec<String> = columns
            .iter()
            .map(|column| {
                let value = match payload {
                    Value::Object(fields) => fields.get(*column),
                    scalar if *column == SCALAR_COLUMN => Some(scalar),
                    _ => None,
                };
                escape_cell(&cell_text(value))
            })
            .collect();
        out.push_str(&row.join(","));
        out.push_str("\r\n");
    }
    out
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

fn escape_cell(text: &str) -> String {
    if text.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{manager_with_script, new_task};
    use super::*;
    use serde_json::json;

    #[test]
    fn csv_header_is_sorted_union_of_keys() {
        let csv = render_csv(&[
            json!({"title": "Engineer", "company": "Acme"}),
            json!({"title": "Analyst", "salary": 52000}),
        ]);
        assert_eq!(
            csv,
            "company,salary,title\r\nAcme,,Engineer\r\n,52000,Analyst\r\n"
        );
    }

    #[test]
    fn csv_cells_are_quoted_when_needed() {
        let csv = render_csv(&[json!({
            "title": "Senior \"Rust\" Dev, remote",
            "tags": ["a", "b"],
            "note": "line1\nline2"
        })]);
        let mut lines = csv.split("\r\n");
        assert_eq!(lines.next(), Some("note,tags,title"));
        assert_eq!(
            lines.next(),
            Some("\"line1\nline2\",\"[\"\"a\"\",\"\"b\"\"]\",\"Senior \"\"Rust\"\" Dev, remote\"")
        );
    }

    #[test]
    fn empty_export_has_no_header() {
        assert_eq!(render_csv(&[]), "");
    }

    #[test]
    fn format_parses_case_insensitively() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert!(matches!(
            "xml".parse::<ExportFormat>(),
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn results_are_exported_oldest_first() {
        let (_dir, manager) = manager_with_script("read line");
        let id = manager.create_task(&new_task("export")).await.unwrap();
        manager
            .database
            .with_repo(|repo| {
                repo.insert_result(id, &json!({"title": "first"}))?;
                repo.insert_result(id, &json!({"title": "second"}))
            })
            .unwrap();

        let results = manager.get_task_results(id).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].payload["title"], "first");

        let export = manager.export_results(id, ExportFormat::Json).await.unwrap();
        assert_eq!(export.content_type, "application/json");
        let parsed: Vec<Value> = serde_json::from_str(&export.body).unwrap();
        assert_eq!(parsed[1]["title"], "second");

        assert!(matches!(
            manager.get_task_results(404).await,
            Err(Error::NotFound(404))
        ));
    }
}
