//! Upstream reporting of defect-class errors.

use std::sync::{Arc, Mutex, PoisonError};

use uuid::Uuid;

use brickline_types::BrickError;

/// Receives each defect that ends a top-level run, exactly once.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, run_id: Uuid, error: &BrickError);
}

/// Logs defects at error level.
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, run_id: Uuid, error: &BrickError) {
        tracing::error!(run_id = %run_id, kind = ?error.kind(), error = %error, "Pipeline run failed with a defect");
    }
}

/// Collects reported messages in memory.
#[derive(Clone, Default)]
pub struct MemoryReporter {
    reports: Arc<Mutex<Vec<(Uuid, String)>>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<(Uuid, String)> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ErrorReporter for MemoryReporter {
    fn report(&self, run_id: Uuid, error: &BrickError) {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((run_id, error.to_string()));
    }
}
