//! Log-sink capability for surfacing recoverable sync inconsistencies.
//!
//! The engine owns no process-wide logger. Every operation threads an
//! explicit caller-supplied sink; recoverable inconsistencies are reported
//! there and never fail the call. When a caller supplies no sink, reports go
//! to the `tracing` facade via [`TracingSink`].

/// Minimal "record warning/error" capability supplied by callers.
pub trait LogSink: Send + Sync {
    /// A recoverable inconsistency, typically left over from a previously
    /// interrupted sync cycle.
    fn warn(&self, message: &str);

    /// A data-integrity signal. Processing still continues.
    fn error(&self, message: &str);
}

/// Sink that forwards to the `tracing` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn warn(&self, message: &str) {
        tracing::warn!(target: "splice_engine", "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "splice_engine", "{message}");
    }
}

pub(crate) static DEFAULT_SINK: TracingSink = TracingSink;
