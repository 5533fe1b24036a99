//! Participation records and assignment results for routing requests to variants

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::{ExperimentId, TestVariant};

/// Request attributes used for hash-based assignment, kept in key order
pub type AssignmentContext = BTreeMap<String, String>;

/// Immutable record that a user was placed into a variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipationAssignment {
    pub experiment_id: ExperimentId,
    pub user_id: String,
    pub session_id: String,
    pub variant_name: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub assigned_at: DateTime<Utc>,
    #[serde(default)]
    pub assignment_context: AssignmentContext,
}

impl ParticipationAssignment {
    pub fn new(
        experiment_id: ExperimentId,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        variant_name: impl Into<String>,
    ) -> Self {
        Self {
            experiment_id,
            user_id: user_id.into(),
            session_id: session_id.into(),
            variant_name: variant_name.into(),
            assigned_at: Utc::now(),
            assignment_context: AssignmentContext::new(),
        }
    }

    pub fn with_context(mut self, context: AssignmentContext) -> Self {
        self.assignment_context = context;
        self
    }
}

/// Result of assigning a request to an experiment variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentResult {
    /// ID of the experiment
    pub experiment_id: ExperimentId,
    /// Name of the assigned variant
    pub variant_name: String,
    /// Variant payload the proxy applies to the request
    pub configuration: serde_json::Value,
    /// Optional plugin payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_config: Option<serde_json::Value>,
}

impl AssignmentResult {
    /// Build the result for an assigned variant
    pub fn from_variant(experiment_id: ExperimentId, variant: &TestVariant) -> Self {
        Self {
            experiment_id,
            variant_name: variant.name().to_string(),
            configuration: variant.configuration().clone(),
            plugin_config: variant.plugin_config().cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_result_from_variant() {
        let variant = TestVariant::new("treatment", 50.0)
            .with_configuration(serde_json::json!({"provider": "anthropic"}));

        let result = AssignmentResult::from_variant(ExperimentId::new("exp_1"), &variant);

        assert_eq!(result.experiment_id.as_str(), "exp_1");
        assert_eq!(result.variant_name, "treatment");
        assert_eq!(result.configuration["provider"], "anthropic");
        assert!(result.plugin_config.is_none());
    }

    #[test]
    fn test_participation_serializes_millis() {
        let mut context = AssignmentContext::new();
        context.insert("region".to_string(), "eu".to_string());

        let participation =
            ParticipationAssignment::new(ExperimentId::new("exp_1"), "user-1", "sess-1", "control")
                .with_context(context);

        let json = serde_json::to_value(&participation).unwrap();
        assert!(json["assigned_at"].is_i64());
        assert_eq!(json["assignment_context"]["region"], "eu");

        let parsed: ParticipationAssignment = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.variant_name, "control");
        assert_eq!(
            parsed.assigned_at.timestamp_millis(),
            participation.assigned_at.timestamp_millis()
        );
    }
}
