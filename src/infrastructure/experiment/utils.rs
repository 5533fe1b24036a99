//! Helpers for the serving path and dashboards

use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::{Experiment, ExperimentResults};

/// New random session identifier, `sess_` followed by 32 hex digits
pub fn generate_session_id() -> String {
    format!("sess_{}", Uuid::new_v4().simple())
}

/// Hex SHA-256 of a user id, for logging and tagging without the raw id
pub fn hash_user_id(user_id: &str) -> String {
    hex::encode(Sha256::digest(user_id.as_bytes()))
}

/// Compact JSON overview of an experiment and, when available, its latest results
pub fn create_experiment_summary(
    experiment: &Experiment,
    results: Option<&ExperimentResults>,
) -> Value {
    let variants: Vec<Value> = experiment
        .variants()
        .iter()
        .map(|variant| {
            let mut entry = json!({
                "name": variant.name(),
                "traffic_percentage": variant.traffic_percentage(),
                "is_control": variant.is_control(),
            });

            if let Some(summary) = results.and_then(|r| r.variant(variant.name())) {
                entry["participants"] = json!(summary.participants);
                entry["sample_count"] = json!(summary.sample_count);
                entry["primary_metric_mean"] = json!(summary.primary_metric_mean);
                entry["p_value"] = json!(summary.comparison.as_ref().map(|c| c.p_value));
            }

            entry
        })
        .collect();

    let mut summary = json!({
        "id": experiment.id(),
        "name": experiment.name(),
        "status": experiment.status().to_string(),
        "primary_metric": experiment.primary_metric(),
        "split_strategy": format!("{:?}", experiment.split_strategy()),
        "created_at": experiment.created_at().timestamp_millis(),
        "started_at": experiment.started_at().map(|t| t.timestamp_millis()),
        "ended_at": experiment.ended_at().map(|t| t.timestamp_millis()),
        "variants": variants,
    });

    if let Some(results) = results {
        summary["results"] = json!({
            "total_participants": results.total_participants,
            "overall_p_value": results.overall_p_value,
            "is_significant": results.is_significant,
            "winning_variant": results.winning_variant,
            "recommend_stop": results.recommend_stop,
            "recommend_rollback": results.recommend_rollback,
            "concerns": results.concerns,
        });
    }

    summary
}
