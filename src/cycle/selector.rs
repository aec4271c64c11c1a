//! Target selection
//!
//! First match wins: a declining capability, then a plateau reported by
//! meta-learning, then the weakest capability overall.

use crate::collaborators::PlateauReport;
use crate::types::{CapabilityInventory, CapabilityRecord, ImprovementTarget, TargetPriority, Trend};

fn by_rate_then_name(a: &&CapabilityRecord, b: &&CapabilityRecord) -> std::cmp::Ordering {
    a.success_rate
        .partial_cmp(&b.success_rate)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| a.name.cmp(&b.name))
}

/// Pick the capability to improve this cycle
pub fn select_target(
    inventory: &CapabilityInventory,
    plateau: Option<&PlateauReport>,
) -> Option<ImprovementTarget> {
    if inventory.is_empty() {
        return None;
    }

    let declining = inventory
        .capabilities
        .values()
        .filter(|c| c.trend == Trend::Declining)
        .min_by(by_rate_then_name);
    if let Some(record) = declining {
        return Some(ImprovementTarget {
            name: record.name.clone(),
            current_level: record.success_rate,
            priority: TargetPriority::Urgent,
            reason: format!("declining at {:.2}", record.success_rate),
        });
    }

    if let Some(report) = plateau.filter(|p| p.is_plateau) {
        // Capabilities the inventory does not know cannot be measured
        let affected = report
            .affected_capabilities
            .iter()
            .find_map(|name| inventory.get(name));
        if let Some(record) = affected {
            return Some(ImprovementTarget {
                name: record.name.clone(),
                current_level: record.success_rate,
                priority: TargetPriority::High,
                reason: format!("learning plateau (severity {:.2})", report.severity),
            });
        }
    }

    inventory
        .capabilities
        .values()
        .min_by(by_rate_then_name)
        .map(|record| ImprovementTarget {
            name: record.name.clone(),
            current_level: record.success_rate,
            priority: TargetPriority::Medium,
            reason: format!("weakest capability at {:.2}", record.success_rate),
        })
}
