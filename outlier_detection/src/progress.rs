//! Progress reporting for outlier detection runs.

use std::fmt;
use std::sync::Arc;

use strum_macros::Display;

/// Progress information for one pipeline stage.
#[derive(Debug, Clone)]
pub struct PipelineProgress {
    /// Units completed so far.
    pub current: usize,
    /// Total units in this stage.
    pub total: usize,
    pub stage: PipelineStage,
}

/// Stage of an outlier detection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum PipelineStage {
    /// Drizzling groups onto the output grid (one unit per group).
    Resampling,
    /// Median combine (one unit per section).
    Median,
    /// Blotting and flagging (one unit per exposure).
    Flagging,
    /// Committing outlier masks to DQ (one unit per exposure).
    Merging,
}

/// Optional shared progress callback.
#[derive(Clone, Default)]
pub struct ProgressCallback(Option<Arc<dyn Fn(PipelineProgress) + Send + Sync>>);

impl ProgressCallback {
    pub fn new(f: impl Fn(PipelineProgress) + Send + Sync + 'static) -> Self {
        Self(Some(Arc::new(f)))
    }

    pub fn none() -> Self {
        Self(None)
    }

    pub fn is_some(&self) -> bool {
        self.0.is_some()
    }
}

impl fmt::Debug for ProgressCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            None => write!(f, "ProgressCallback::None"),
            Some(_) => write!(f, "ProgressCallback::Some(...)"),
        }
    }
}

/// Report progress using the callback if set.
pub fn report_progress(
    callback: &ProgressCallback,
    current: usize,
    total: usize,
    stage: PipelineStage,
) {
    if let Some(f) = callback.0.as_ref() {
        f(PipelineProgress {
            current,
            total,
            stage,
        });
    }
}
