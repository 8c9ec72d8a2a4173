//! Faults raised inside the telemetry pipeline.
//!
//! None of these reach the caller of an instrumented query. They are logged at the
//! point where they occur.

use std::any::Any;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("histogram boundaries must be finite, non-empty and strictly increasing: {0:?}")]
    InvalidHistogramBoundaries(Vec<f64>),

    #[error("{stage} panicked: {message}")]
    Panicked { stage: &'static str, message: String },
}

impl TelemetryError {
    /// Build a [`TelemetryError::Panicked`] from a `catch_unwind` payload.
    pub(crate) fn from_panic(stage: &'static str, payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(text) = payload.downcast_ref::<&str>() {
            (*text).to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "<non-string panic payload>".to_string()
        };
        TelemetryError::Panicked { stage, message }
    }
}

/// Run `f`, turning a panic into a logged [`TelemetryError`].
///
/// Returns `None` when `f` panicked.
pub(crate) fn guarded<T>(stage: &'static str, f: impl FnOnce() -> T) -> Option<T> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            let error = TelemetryError::from_panic(stage, payload);
            tracing::error!(error = %error, stage, "Telemetry fault contained");
            None
        }
    }
}
