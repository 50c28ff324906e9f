//! Transition attempt records.
//!
//! Every transition attempt, successful or not, produces exactly one
//! [`TransitionRecord`]. The machine keeps a bounded [`TransitionHistory`] of
//! them for inspection and hands each record to its telemetry sink.

use super::context::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use uuid::Uuid;

/// Record of a single transition attempt.
///
/// # Example
///
/// ```rust
/// use statecraft::core::TransitionRecord;
///
/// let record = TransitionRecord::new("idle", "running", true);
/// assert!(record.success);
/// assert!(record.group_name.is_none());
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRecord {
    /// Unique attempt identifier
    pub id: Uuid,
    /// Source state name
    pub from: String,
    /// Requested target state name
    pub to: String,
    /// Context snapshot at the time of the attempt, if recorded
    pub context: Option<Context>,
    /// Whether the attempt committed
    pub success: bool,
    /// Full name of the first group owning the transition, if any
    pub group_name: Option<String>,
    /// When the attempt finished
    pub timestamp: DateTime<Utc>,
}

impl TransitionRecord {
    pub fn new(from: impl Into<String>, to: impl Into<String>, success: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            from: from.into(),
            to: to.into(),
            context: None,
            success,
            group_name: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_group(mut self, group: Option<String>) -> Self {
        self.group_name = group;
        self
    }
}

/// Bounded, ordered log of transition attempts.
///
/// When the limit is reached the oldest record is dropped. A limit of zero
/// keeps nothing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransitionHistory {
    records: VecDeque<TransitionRecord>,
    limit: usize,
}

impl Default for TransitionHistory {
    fn default() -> Self {
        Self::with_limit(1000)
    }
}

impl TransitionHistory {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            records: VecDeque::new(),
            limit,
        }
    }

    /// Append a record, evicting the oldest one past the limit.
    pub fn record(&mut self, record: TransitionRecord) {
        if self.limit == 0 {
            return;
        }
        while self.records.len() >= self.limit {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// All retained records, oldest first.
    pub fn records(&self) -> impl Iterator<Item = &TransitionRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// States visited by successful attempts: the first source, then each target.
    pub fn path(&self) -> Vec<&str> {
        let mut successful = self.records.iter().filter(|r| r.success);
        let mut path = Vec::new();
        if let Some(first) = successful.next() {
            path.push(first.from.as_str());
            path.push(first.to.as_str());
        }
        path.extend(successful.map(|r| r.to.as_str()));
        path
    }

    /// Time between the first and last retained record.
    pub fn duration(&self) -> Option<Duration> {
        let first = self.records.front()?;
        let last = self.records.back()?;
        last.timestamp
            .signed_duration_since(first.timestamp)
            .to_std()
            .ok()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_history_is_empty() {
        let history = TransitionHistory::default();
        assert!(history.is_empty());
        assert!(history.path().is_empty());
        assert!(history.duration().is_none());
    }

    #[test]
    fn path_skips_failed_attempts() {
        let mut history = TransitionHistory::default();
        history.record(TransitionRecord::new("a", "b", true));
        history.record(TransitionRecord::new("b", "x", false));
        history.record(TransitionRecord::new("b", "c", true));

        assert_eq!(history.path(), vec!["a", "b", "c"]);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn limit_evicts_oldest() {
        let mut history = TransitionHistory::with_limit(2);
        history.record(TransitionRecord::new("a", "b", true));
        history.record(TransitionRecord::new("b", "c", true));
        history.record(TransitionRecord::new("c", "d", true));

        let froms: Vec<_> = history.records().map(|r| r.from.as_str()).collect();
        assert_eq!(froms, vec!["b", "c"]);
    }

    #[test]
    fn zero_limit_keeps_nothing() {
        let mut history = TransitionHistory::with_limit(0);
        history.record(TransitionRecord::new("a", "b", true));
        assert!(history.is_empty());
    }

    #[test]
    fn single_record_has_zero_duration() {
        let mut history = TransitionHistory::default();
        history.record(TransitionRecord::new("a", "b", true));
        assert_eq!(history.duration(), Some(Duration::from_secs(0)));
    }

    #[test]
    fn record_serializes_with_camel_case_keys() {
        let record = TransitionRecord::new("a", "b", false)
            .with_context(json!({ "k": 1 }))
            .with_group(Some("ui:main".into()));

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["groupName"], json!("ui:main"));
        assert_eq!(json["success"], json!(false));

        let back: TransitionRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
