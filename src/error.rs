//! User-facing failure taxonomy for the detection pipeline.
//!
//! Internal plumbing returns `anyhow::Result`; errors are translated into a
//! `PipelineError` at the boundary where they become visible to the operator
//! (controller commands and the worker's terminal `RunSummary`).

use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// The origin cannot be opened (missing file, busy or absent device).
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// The reference does not name a recognized image, video or camera origin.
    #[error("unsupported source: {0}")]
    UnsupportedSource(String),

    /// Inference failed or produced malformed output.
    #[error("detector failure: {0}")]
    DetectorFailure(String),

    /// A start was requested while another run is active.
    #[error("a detection run is already active; stop it before starting another")]
    ConcurrentRunRejected,

    /// Persisting a frame or still image failed.
    #[error("output write failed: {0}")]
    OutputWriteFailure(String),

    /// `save_last_result` was requested before any frame was processed.
    #[error("no detection result available to save")]
    NoResultAvailable,
}

impl PipelineError {
    pub(crate) fn source_unavailable(err: anyhow::Error) -> Self {
        Self::SourceUnavailable(format!("{:#}", err))
    }

    pub(crate) fn detector(err: anyhow::Error) -> Self {
        Self::DetectorFailure(format!("{:#}", err))
    }

    pub(crate) fn output(err: anyhow::Error) -> Self {
        Self::OutputWriteFailure(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anyhow_context_is_kept_in_message() {
        let err = anyhow::anyhow!("no such file").context("open samples/wafer.png");
        let mapped = PipelineError::source_unavailable(err);
        assert_eq!(
            mapped.to_string(),
            "source unavailable: open samples/wafer.png: no such file"
        );
    }
}
