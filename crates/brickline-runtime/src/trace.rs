//! Per-step trace records and the sinks that receive them.
//!
//! Each step produces an entry record when it begins and a final record when
//! it finishes; sinks keyed by `(run_id, instance_id, branches)` replace the
//! entry with the final record so there is one row per attempt.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use brickline_config::BrickInvocation;
use brickline_types::{BranchTag, BrickError, ErrorKind, RunContext};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&BrickError> for TraceError {
    fn from(err: &BrickError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRecord {
    pub run_id: Uuid,
    pub instance_id: Uuid,
    pub brick_id: String,
    pub branches: Vec<BranchTag>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TraceError>,
    #[serde(default)]
    pub skipped_run: bool,
    pub is_final: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl TraceRecord {
    /// Entry record for `step` running in `ctx`.
    pub fn begin(ctx: &RunContext, step: &BrickInvocation) -> Self {
        Self {
            run_id: ctx.meta.run_id,
            instance_id: step.instance_id,
            brick_id: step.brick_id.to_string(),
            branches: ctx.meta.branches.clone(),
            timestamp: Utc::now(),
            input: None,
            output: None,
            error: None,
            skipped_run: false,
            is_final: false,
            duration_ms: None,
        }
    }

    pub fn finish_output(&mut self, output: Value) {
        self.output = Some(output);
        self.is_final = true;
    }

    pub fn finish_skipped(&mut self) {
        self.skipped_run = true;
        self.is_final = true;
    }

    pub fn finish_error(&mut self, err: &BrickError) {
        self.error = Some(TraceError::from(err));
        self.is_final = true;
    }

    /// Whether `other` describes the same attempt as `self`.
    pub fn same_attempt(&self, other: &TraceRecord) -> bool {
        self.run_id == other.run_id
            && self.instance_id == other.instance_id
            && self.branches == other.branches
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

pub trait TraceSink: Send + Sync {
    fn record(&self, record: &TraceRecord);
}

/// Discards every record.
pub struct NoopTraceSink;

impl TraceSink for NoopTraceSink {
    fn record(&self, _record: &TraceRecord) {}
}

/// Keeps records in memory. Cloning shares the underlying store.
#[derive(Clone, Default)]
pub struct MemoryTraceSink {
    records: Arc<Mutex<Vec<TraceRecord>>>,
}

impl MemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records, oldest attempt first.
    pub fn records(&self) -> Vec<TraceRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn for_run(&self, run_id: Uuid) -> Vec<TraceRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.run_id == run_id)
            .collect()
    }

    pub fn for_instance(&self, instance_id: Uuid) -> Vec<TraceRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.instance_id == instance_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl TraceSink for MemoryTraceSink {
    fn record(&self, record: &TraceRecord) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        match records
            .iter_mut()
            .rev()
            .find(|existing| !existing.is_final && existing.same_attempt(record))
        {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
    }
}

/// Fans records out over a broadcast channel.
///
/// If there are no active receivers the record is silently dropped.
#[derive(Clone)]
pub struct BroadcastTraceSink {
    sender: tokio::sync::broadcast::Sender<TraceRecord>,
}

impl BroadcastTraceSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<TraceRecord> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastTraceSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl TraceSink for BroadcastTraceSink {
    fn record(&self, record: &TraceRecord) {
        let _ = self.sender.send(record.clone());
    }
}
