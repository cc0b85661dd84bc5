//! Progress of an ad-generation job as embedded in a chat message.
//!
//! This data is transient: it lives only on the local message while the
//! job runs and is never written to the server as its own entity.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Pipeline stage reported by the ad-generation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdGenerationStage {
    Queued,
    Analyzing,
    GeneratingCopy,
    GeneratingImages,
    Composing,
    Completed,
    Failed,
}

impl AdGenerationStage {
    /// Whether the job has stopped producing updates.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Job-progress payload carried by `ad_generation` and `agent_output`
/// chat messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdGenerationData {
    pub job_id: String,
    pub stage: AdGenerationStage,
    /// Completion percentage (0-100).
    pub progress: u8,
    /// Stage-specific data (copy drafts, image candidates, errors).
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl AdGenerationData {
    /// Start tracking a freshly queued job.
    pub fn queued(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            stage: AdGenerationStage::Queued,
            progress: 0,
            payload: serde_json::Value::Null,
        }
    }

    /// Move the job to `stage` at `progress` percent.
    pub fn advance(&mut self, stage: AdGenerationStage, progress: u8) -> Result<(), CoreError> {
        if progress > 100 {
            return Err(CoreError::Validation(format!(
                "progress must be between 0 and 100, got {progress}"
            )));
        }
        self.stage = stage;
        self.progress = progress;
        Ok(())
    }

    pub fn is_completed(&self) -> bool {
        self.stage == AdGenerationStage::Completed
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_job_starts_at_zero() {
        let data = AdGenerationData::queued("job-1");
        assert_eq!(data.stage, AdGenerationStage::Queued);
        assert_eq!(data.progress, 0);
        assert!(!data.is_completed());
    }

    #[test]
    fn advance_rejects_progress_over_100() {
        let mut data = AdGenerationData::queued("job-1");
        let err = data
            .advance(AdGenerationStage::Composing, 101)
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert_eq!(data.stage, AdGenerationStage::Queued);
    }

    #[test]
    fn terminal_stages() {
        assert!(AdGenerationStage::Completed.is_terminal());
        assert!(AdGenerationStage::Failed.is_terminal());
        assert!(!AdGenerationStage::GeneratingImages.is_terminal());
    }

    #[test]
    fn stage_serializes_snake_case() {
        let json = serde_json::to_value(AdGenerationStage::GeneratingCopy).unwrap();
        assert_eq!(json, "generating_copy");
    }
}
