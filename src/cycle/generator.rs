//! Hypothesis generation
//!
//! Three independent strategies, each capped to bound the branching factor.
//! A strategy whose source is unavailable contributes nothing; the others
//! still run.

use tracing::{debug, warn};

use crate::collaborators::{capability_location, Collaborators, Limitation, SuccessPattern};
use crate::config::CycleConfig;
use crate::types::{CapabilityInventory, ImprovementHypothesis, ImprovementTarget, Strategy};

pub struct HypothesisGenerator {
    max_per_strategy: usize,
    severity_factor: f64,
    composition_min_success_rate: f64,
    composition_expected_improvement: f64,
}

impl HypothesisGenerator {
    pub fn new(config: &CycleConfig) -> Self {
        Self {
            max_per_strategy: config.max_hypotheses_per_strategy,
            severity_factor: config.limitation_severity_factor,
            composition_min_success_rate: config.composition_min_success_rate,
            composition_expected_improvement: config.composition_expected_improvement,
        }
    }

    /// Candidates for `target` from the allowed strategies, in strategy order
    pub async fn generate(
        &self,
        target: &ImprovementTarget,
        inventory: &CapabilityInventory,
        collaborators: &Collaborators,
        strategies: &[Strategy],
    ) -> Vec<ImprovementHypothesis> {
        let mut hypotheses = Vec::new();

        for strategy in strategies {
            let batch = match strategy {
                Strategy::LimitationFix => match collaborators.limitations.identify_limitations().await {
                    Ok(limitations) => self.limitation_fixes(target, &limitations),
                    Err(e) => {
                        warn!("Limitation source unavailable: {:#}", e);
                        Vec::new()
                    }
                },
                Strategy::PatternApplication => {
                    match collaborators.patterns.successful_patterns(&target.name).await {
                        Ok(patterns) => self.pattern_applications(target, &patterns),
                        Err(e) => {
                            warn!("Pattern source unavailable: {:#}", e);
                            Vec::new()
                        }
                    }
                }
                Strategy::Composition => {
                    match collaborators.patterns.composable_capabilities(&target.name, inventory).await {
                        Ok(names) => self.compositions(target, inventory, &names),
                        Err(e) => {
                            warn!("Composition source unavailable: {:#}", e);
                            Vec::new()
                        }
                    }
                }
            };
            debug!("{} produced {} hypotheses for {}", strategy, batch.len(), target.name);
            hypotheses.extend(batch);
        }

        hypotheses
    }

    pub fn limitation_fixes(
        &self,
        target: &ImprovementTarget,
        limitations: &[Limitation],
    ) -> Vec<ImprovementHypothesis> {
        limitations
            .iter()
            .filter(|l| l.capability == target.name)
            .filter_map(|l| l.potential_solutions.first().map(|solution| (l, solution)))
            .take(self.max_per_strategy)
            .map(|(limitation, solution)| ImprovementHypothesis {
                description: format!("Fix {} limitation: {}", target.name, limitation.description),
                target_capability: target.name.clone(),
                strategy: Strategy::LimitationFix,
                proposed_change: solution.clone(),
                target_location: limitation
                    .location
                    .clone()
                    .unwrap_or_else(|| capability_location(&target.name, Strategy::LimitationFix.as_str())),
                rationale: format!(
                    "Limitation of severity {:.2}: {}",
                    limitation.severity, limitation.description
                ),
                expected_improvement: (limitation.severity * self.severity_factor).clamp(0.0, 1.0),
                predicted_success: 0.0,
                prediction_confidence: 0.0,
            })
            .collect()
    }

    pub fn pattern_applications(
        &self,
        target: &ImprovementTarget,
        patterns: &[SuccessPattern],
    ) -> Vec<ImprovementHypothesis> {
        patterns
            .iter()
            .take(self.max_per_strategy)
            .map(|pattern| ImprovementHypothesis {
                description: format!("Apply pattern '{}' to {}", pattern.name, target.name),
                target_capability: target.name.clone(),
                strategy: Strategy::PatternApplication,
                proposed_change: pattern.description.clone(),
                target_location: pattern
                    .location
                    .clone()
                    .unwrap_or_else(|| capability_location(&target.name, Strategy::PatternApplication.as_str())),
                rationale: format!(
                    "Pattern '{}' averaged {:+.3} before",
                    pattern.name, pattern.average_improvement
                ),
                expected_improvement: pattern.average_improvement.clamp(0.0, 1.0),
                predicted_success: 0.0,
                prediction_confidence: 0.0,
            })
            .collect()
    }

    pub fn compositions(
        &self,
        target: &ImprovementTarget,
        inventory: &CapabilityInventory,
        composable: &[String],
    ) -> Vec<ImprovementHypothesis> {
        composable
            .iter()
            .filter(|name| **name != target.name)
            .filter_map(|name| inventory.get(name))
            .filter(|record| record.success_rate >= self.composition_min_success_rate)
            .take(self.max_per_strategy)
            .map(|partner| ImprovementHypothesis {
                description: format!("Compose {} with {}", target.name, partner.name),
                target_capability: target.name.clone(),
                strategy: Strategy::Composition,
                proposed_change: format!("Route {} subtasks through {}", target.name, partner.name),
                target_location: capability_location(&target.name, Strategy::Composition.as_str()),
                rationale: format!("{} succeeds at {:.2}", partner.name, partner.success_rate),
                expected_improvement: self.composition_expected_improvement,
                predicted_success: 0.0,
                prediction_confidence: 0.0,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CapabilityRecord, TargetPriority, Trend};

    fn target() -> ImprovementTarget {
        ImprovementTarget {
            name: "coding".into(),
            current_level: 0.4,
            priority: TargetPriority::Urgent,
            reason: "declining".into(),
        }
    }

    fn limitation(capability: &str, severity: f64, solutions: &[&str]) -> Limitation {
        Limitation {
            capability: capability.into(),
            description: format!("{} issue", capability),
            severity,
            potential_solutions: solutions.iter().map(|s| s.to_string()).collect(),
            location: None,
        }
    }

    #[test]
    fn test_limitation_fix_scales_with_severity() {
        let gen = HypothesisGenerator::new(&CycleConfig::default());
        let hyps = gen.limitation_fixes(
            &target(),
            &[
                limitation("coding", 0.8, &[]),
                limitation("search", 0.9, &["x"]),
                limitation("coding", 0.6, &["split functions"]),
            ],
        );
        assert_eq!(hyps.len(), 1);
        assert!((hyps[0].expected_improvement - 0.3).abs() < 1e-12);
        assert_eq!(hyps[0].proposed_change, "split functions");
        assert_eq!(hyps[0].target_location, "capabilities/coding/limitation_fix");
    }

    #[test]
    fn test_strategies_are_capped() {
        let gen = HypothesisGenerator::new(&CycleConfig::default());
        let patterns: Vec<SuccessPattern> = (0..5)
            .map(|i| SuccessPattern {
                name: format!("p{}", i),
                description: "d".into(),
                average_improvement: 0.05,
                location: None,
            })
            .collect();
        let hyps = gen.pattern_applications(&target(), &patterns);
        assert_eq!(hyps.len(), 2);
        assert!((hyps[0].expected_improvement - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_composition_requires_strong_partner() {
        let gen = HypothesisGenerator::new(&CycleConfig::default());
        let inv = CapabilityInventory::from_records(vec![
            CapabilityRecord::new("coding", 0.4, Trend::Declining),
            CapabilityRecord::new("search", 0.9, Trend::Stable),
            CapabilityRecord::new("math", 0.5, Trend::Stable),
        ]);
        let names = vec!["coding".to_string(), "math".to_string(), "search".to_string()];
        let hyps = gen.compositions(&target(), &inv, &names);
        assert_eq!(hyps.len(), 1);
        assert_eq!(hyps[0].description, "Compose coding with search");
        assert!((hyps[0].expected_improvement - 0.1).abs() < 1e-12);
    }
}
