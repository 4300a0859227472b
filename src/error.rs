use thiserror::Error;

/// Failures the engine reports to its callers. Plumbing failures (I/O,
/// network, sqlite) travel as `anyhow::Error` instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("match {match_id} team {team}: data incomplete: {reason}")]
    DataIncomplete {
        match_id: u64,
        team: String,
        reason: String,
    },

    #[error("zone {zone_id}: insufficient data ({samples} rows, {events} fouls; need {min_samples} rows and {min_events} fouls)")]
    InsufficientData {
        zone_id: usize,
        samples: usize,
        events: u64,
        min_samples: usize,
        min_events: u64,
    },

    #[error("zone {zone_id}: fit did not converge: {reason}")]
    Convergence { zone_id: usize, reason: String },

    #[error("no fitted zone models are available")]
    ModelUnavailable,

    #[error("feature '{feature}' is not part of the fitted design")]
    UnknownFeature { feature: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("fit deadline of {deadline_secs}s exceeded")]
    DeadlineExceeded { deadline_secs: u64 },
}

impl EngineError {
    pub fn data_incomplete(match_id: u64, team: &str, reason: impl Into<String>) -> Self {
        EngineError::DataIncomplete {
            match_id,
            team: team.to_string(),
            reason: reason.into(),
        }
    }

    /// Callers may retry later (models not ready yet).
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::ModelUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_model_unavailable_is_retryable() {
        assert!(EngineError::ModelUnavailable.is_retryable());
        assert!(
            !EngineError::UnknownFeature {
                feature: "x".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn data_incomplete_message_names_team() {
        let err = EngineError::data_incomplete(7, "Spain", "no passes");
        assert_eq!(
            err.to_string(),
            "match 7 team Spain: data incomplete: no passes"
        );
    }
}
