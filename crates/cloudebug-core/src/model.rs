//! Breakpoint and hit domain types
//!
//! These are the records held by the [`BreakpointCache`](crate::cache::BreakpointCache)
//! and rendered by the [`BreakpointTree`](crate::tree::BreakpointTree).

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Server-assigned breakpoint identifier
pub type BreakpointId = u64;

/// Server-assigned hit identifier, unique within its breakpoint
pub type HitId = u64;

/// A server-tracked record point keyed by file and line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub id: BreakpointId,
    /// Path of the file, relative to the debugged project root
    pub file: String,
    /// 1-based line number
    pub line: u32,
    #[serde(default)]
    pub condition: Option<String>,
    /// Expressions evaluated every time the breakpoint triggers
    #[serde(default)]
    pub expressions: Vec<String>,
}

impl Breakpoint {
    /// Human-readable description of the breakpoint's condition
    pub fn condition_text(&self) -> String {
        match &self.condition {
            Some(condition) => format!("the condition of \"{condition}\""),
            None => "no condition".to_string(),
        }
    }
}

/// One recorded triggering of a breakpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hit {
    pub id: HitId,
    pub breakpoint_id: BreakpointId,
    /// When the hit was captured
    pub timestamp: DateTime<Utc>,
    /// One evaluated value per expression slot of the breakpoint.
    /// The length is not validated against the breakpoint's expressions.
    pub values: Vec<String>,
}

/// An expression paired with the value it evaluated to for one hit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpressionValue {
    pub expression: String,
    pub value: String,
}

/// Pair a hit's values with the breakpoint's expressions by index.
///
/// Entries past the end of either list are dropped, never padded.
pub fn zip_expression_values(expressions: &[String], values: &[String]) -> Vec<ExpressionValue> {
    expressions
        .iter()
        .zip(values)
        .map(|(expression, value)| ExpressionValue {
            expression: expression.clone(),
            value: value.clone(),
        })
        .collect()
}

/// ISO-8601 rendering used wherever a hit timestamp is shown
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_zip_equal_lengths() {
        let pairs = zip_expression_values(&strings(&["x", "y"]), &strings(&["1", "2"]));
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].expression, "x");
        assert_eq!(pairs[0].value, "1");
        assert_eq!(pairs[1].expression, "y");
        assert_eq!(pairs[1].value, "2");
    }

    #[test]
    fn test_zip_drops_excess_values() {
        let pairs = zip_expression_values(&strings(&["x"]), &strings(&["1", "2", "3"]));
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].value, "1");
    }

    #[test]
    fn test_zip_drops_missing_values() {
        let pairs = zip_expression_values(&strings(&["x", "y", "z"]), &strings(&["1"]));
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].expression, "x");
    }

    #[test]
    fn test_zip_empty_values() {
        assert!(zip_expression_values(&strings(&["x"]), &[]).is_empty());
    }

    #[test]
    fn test_format_timestamp() {
        use chrono::TimeZone;
        let timestamp = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(format_timestamp(&timestamp), "2024-01-02T03:04:05.000Z");
    }

    #[test]
    fn test_condition_text() {
        let mut breakpoint = Breakpoint {
            id: 1,
            file: "a.py".to_string(),
            line: 10,
            condition: None,
            expressions: vec![],
        };
        assert_eq!(breakpoint.condition_text(), "no condition");

        breakpoint.condition = Some("x > 1".to_string());
        assert_eq!(breakpoint.condition_text(), "the condition of \"x > 1\"");
    }

    #[test]
    fn test_breakpoint_deserialize_null_condition() {
        let json = r#"{"id":1,"file":"a.py","line":10,"condition":null,"expressions":["x"]}"#;
        let breakpoint: Breakpoint = serde_json::from_str(json).unwrap();
        assert_eq!(breakpoint.id, 1);
        assert!(breakpoint.condition.is_none());
        assert_eq!(breakpoint.expressions, vec!["x"]);
    }
}
