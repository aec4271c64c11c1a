//! Hypothesis ranking
//!
//! Every candidate is annotated with the predictive model's answer and the
//! list is sorted by `predicted_success * expected_improvement`, highest
//! first. The sort is stable so ties keep generation order.

use futures::future::join_all;
use tracing::{debug, warn};

use crate::collaborators::{PredictionContext, PredictiveModel};
use crate::error::{CycleError, CycleOutcome};
use crate::types::ImprovementHypothesis;

fn probability(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Stable sort, descending by rank key
pub fn sort_by_rank(hypotheses: &mut [ImprovementHypothesis]) {
    hypotheses.sort_by(|a, b| {
        b.rank_key()
            .partial_cmp(&a.rank_key())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Query predictions for every hypothesis concurrently, then sort
///
/// A hypothesis whose prediction fails keeps zero success and confidence,
/// so it sorts last. If no prediction succeeds the ranking is meaningless
/// and `PredictionUnavailable` is returned.
pub async fn rank(
    predictor: &dyn PredictiveModel,
    mut hypotheses: Vec<ImprovementHypothesis>,
) -> CycleOutcome<Vec<ImprovementHypothesis>> {
    if hypotheses.is_empty() {
        return Ok(hypotheses);
    }

    let contexts: Vec<PredictionContext> = hypotheses
        .iter()
        .map(|h| PredictionContext {
            target: h.target_capability.clone(),
            strategy: h.strategy.as_str().to_string(),
            expected_improvement: h.expected_improvement,
        })
        .collect();

    let predictions = join_all(
        hypotheses
            .iter()
            .zip(contexts.iter())
            .map(|(h, ctx)| predictor.predict_outcome(&h.description, ctx)),
    )
    .await;

    let mut failures = Vec::new();
    for (hypothesis, prediction) in hypotheses.iter_mut().zip(predictions) {
        match prediction {
            Ok(p) => {
                hypothesis.predicted_success = probability(p.success_probability);
                hypothesis.prediction_confidence = probability(p.confidence);
                debug!(
                    "Predicted {:.2} (confidence {:.2}) for '{}'",
                    hypothesis.predicted_success, hypothesis.prediction_confidence, hypothesis.description
                );
            }
            Err(e) => {
                warn!("Prediction failed for '{}': {:#}", hypothesis.description, e);
                hypothesis.predicted_success = 0.0;
                hypothesis.prediction_confidence = 0.0;
                failures.push(format!("{:#}", e));
            }
        }
    }

    if failures.len() == hypotheses.len() {
        return Err(CycleError::PredictionUnavailable(failures.join("; ")));
    }

    sort_by_rank(&mut hypotheses);
    Ok(hypotheses)
}
