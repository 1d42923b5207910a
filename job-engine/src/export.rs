use std::str::FromStr;

use common::error::AppError;
use serde_json::{Map, Value};

use crate::worker::local_log::LogEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(AppError::Validation(format!(
                "unsupported export format: {other}"
            ))),
        }
    }
}

/// Successful `(index, record)` pairs of one shard's results blob.
/// Blank and undecodable lines are skipped.
pub fn records_from_jsonl(content: &str) -> Vec<(u32, Value)> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str::<LogEntry>(line).ok())
        .filter(|entry| entry.ok)
        .filter_map(|entry| entry.data.map(|data| (entry.i, data)))
        .collect()
}

/// Merge shard results into one list ordered by record index.
pub fn merge_ordered(mut records: Vec<(u32, Value)>) -> Vec<Value> {
    records.sort_by_key(|(index, _)| *index);
    records.dedup_by_key(|(index, _)| *index);
    records.into_iter().map(|(_, record)| record).collect()
}

fn as_row(record: &Value) -> Map<String, Value> {
    match record {
        Value::Object(map) => map.clone(),
        other => {
            let mut row = Map::new();
            row.insert("value".into(), other.clone());
            row
        }
    }
}

fn escape_csv(value: Option<&Value>, delimiter: char) -> String {
    let text = match value {
        None | Some(Value::Null) => return String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    if text.contains(delimiter) || text.contains('\n') || text.contains('"') {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text
    }
}

/// Delimited text with a header of every key in first-seen order.
pub fn to_csv(records: &[Value], delimiter: char) -> String {
    let rows: Vec<Map<String, Value>> = records.iter().map(as_row).collect();

    let mut headers: Vec<&str> = Vec::new();
    for row in &rows {
        for key in row.keys() {
            if !headers.contains(&key.as_str()) {
                headers.push(key);
            }
        }
    }
    if headers.is_empty() {
        return String::new();
    }

    let separator = delimiter.to_string();
    let mut lines = vec![headers.join(&separator)];
    for row in &rows {
        let line: Vec<String> = headers
            .iter()
            .map(|header| escape_csv(row.get(*header), delimiter))
            .collect();
        lines.push(line.join(&separator));
    }
    lines.join("\n")
}

/// Rendered export body.
pub fn render(records: &[Value], format: ExportFormat) -> Result<String, AppError> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(records)?),
        ExportFormat::Csv => Ok(to_csv(records, ',')),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn csv_header_is_key_union_in_first_seen_order() {
        let records = vec![json!({"b": 1, "a": "x"}), json!({"c": true, "a": "y"}), json!(5)];
        let csv = to_csv(&records, ',');
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "b,a,c,value");
        assert_eq!(lines[1], "1,x,,");
        assert_eq!(lines[2], ",y,true,");
        assert_eq!(lines[3], ",,,5");
    }

    #[test]
    fn csv_quotes_delimiters_quotes_and_newlines() {
        let records = vec![json!({"t": "a,b", "q": "say \"hi\"", "n": "l1\nl2", "o": {"k": 1}})];
        let csv = to_csv(&records, ',');
        assert!(csv.contains("\"a,b\""));
        assert!(csv.contains("\"say \"\"hi\"\"\""));
        assert!(csv.contains("\"l1\nl2\""));
        assert!(csv.contains("\"{\"\"k\"\":1}\""));
    }

    #[test]
    fn empty_exports_are_empty() {
        assert_eq!(to_csv(&[], ','), "");
        assert_eq!(render(&[], ExportFormat::Json).expect("json"), "[]");
    }

    #[test]
    fn jsonl_results_keep_successes_in_index_order() {
        let shard_b = "{\"i\":3,\"ok\":true,\"data\":{\"n\":3}}\n{\"i\":4,\"ok\":false,\"error\":\"boom\"}\n";
        let shard_a = "{\"i\":0,\"ok\":true,\"data\":{\"n\":0}}\nnot json\n{\"i\":1,\"ok\":true,\"data\":{\"n\":1}}\n";
        let mut all = records_from_jsonl(shard_b);
        all.extend(records_from_jsonl(shard_a));
        assert_eq!(
            merge_ordered(all),
            vec![json!({"n": 0}), json!({"n": 1}), json!({"n": 3})]
        );
    }

    #[test]
    fn format_names_parse() {
        assert_eq!("CSV".parse::<ExportFormat>().expect("csv"), ExportFormat::Csv);
        assert!("xml".parse::<ExportFormat>().is_err());
    }
}
