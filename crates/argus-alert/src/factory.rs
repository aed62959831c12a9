use crate::rules::change::ChangeRule;
use crate::rules::threshold::ThresholdRule;
use crate::Rule;
use anyhow::Result;
use argus_common::types::{RuleDescriptor, RuleKind, Severity};

/// Resolve a configured rule descriptor to a concrete instance.
///
/// The rule-kind set is closed; adding a kind means extending this match.
pub fn build_rule(descriptor: &RuleDescriptor) -> Result<Box<dyn Rule>> {
    if descriptor.fact.is_empty() {
        anyhow::bail!("rule '{}': fact must not be empty", descriptor.id);
    }

    match descriptor.kind {
        RuleKind::Threshold => {
            let threshold = descriptor.threshold.ok_or_else(|| {
                anyhow::anyhow!("threshold rule '{}' requires a threshold", descriptor.id)
            })?;
            let operator = descriptor.operator.ok_or_else(|| {
                anyhow::anyhow!("threshold rule '{}' requires an operator", descriptor.id)
            })?;
            Ok(Box::new(ThresholdRule {
                id: descriptor.id.clone(),
                fact: descriptor.fact.clone(),
                operator,
                threshold,
                severity: descriptor.severity.unwrap_or(Severity::Warning),
                title: descriptor.title.clone(),
                message_template: descriptor.message_template.clone(),
            }))
        }
        RuleKind::Change => Ok(Box::new(ChangeRule {
            id: descriptor.id.clone(),
            fact: descriptor.fact.clone(),
            severity: descriptor.severity.unwrap_or(Severity::Info),
            title: descriptor.title.clone(),
            message_template: descriptor.message_template.clone(),
        })),
    }
}

/// Build a probe's full rule set, preserving configured order.
pub fn build_rules(descriptors: &[RuleDescriptor]) -> Result<Vec<Box<dyn Rule>>> {
    descriptors.iter().map(build_rule).collect()
}
