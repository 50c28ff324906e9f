//! Narrow interface to logging, metrics, and attempt recording.
//!
//! The machine reports through a [`Telemetry`] sink rather than owning any
//! observability stack. [`TracingTelemetry`] forwards everything to `tracing`.

use crate::core::{Context, TransitionRecord};
use std::collections::BTreeMap;
use tracing::{debug, error, info, trace, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Sink for structured logs, timing metrics, and attempt records.
pub trait Telemetry: Send + Sync {
    fn log(&self, level: LogLevel, message: &str, details: Option<&Context>);

    fn record_metric(
        &self,
        category: &str,
        key: &str,
        duration_ms: f64,
        tags: Option<&BTreeMap<String, String>>,
    );

    /// Called exactly once per transition attempt.
    fn record_attempt(&self, record: &TransitionRecord);
}

/// Default sink emitting `tracing` events.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn log(&self, level: LogLevel, message: &str, details: Option<&Context>) {
        match level {
            LogLevel::Trace => trace!(details = ?details, "{message}"),
            LogLevel::Debug => debug!(details = ?details, "{message}"),
            LogLevel::Info => info!(details = ?details, "{message}"),
            LogLevel::Warn => warn!(details = ?details, "{message}"),
            LogLevel::Error => error!(details = ?details, "{message}"),
        }
    }

    fn record_metric(
        &self,
        category: &str,
        key: &str,
        duration_ms: f64,
        tags: Option<&BTreeMap<String, String>>,
    ) {
        debug!(
            category = %category,
            key = %key,
            duration_ms = %duration_ms,
            tags = ?tags,
            "metric"
        );
    }

    fn record_attempt(&self, record: &TransitionRecord) {
        debug!(
            id = %record.id,
            from = %record.from,
            to = %record.to,
            success = record.success,
            group = ?record.group_name,
            "transition attempt"
        );
    }
}
