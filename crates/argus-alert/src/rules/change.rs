use crate::rules::render_template;
use crate::{Rule, RuleContext};
use anyhow::Result;
use argus_common::ident;
use argus_common::types::{Alert, Facts, RuleKind, Severity};
use serde_json::Value;
use std::collections::HashMap;

/// Fires once per transition between two distinct observed values.
///
/// The previously observed value (string form) lives in the rule's state
/// slot. The first observation is stored silently; every later observation
/// that differs by string equality emits one alert whose id hashes the
/// `old -> new` transition, so the same transition dedups across runs.
pub struct ChangeRule {
    pub id: String,
    pub fact: String,
    pub severity: Severity,
    pub title: Option<String>,
    pub message_template: Option<String>,
}

impl Rule for ChangeRule {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Change
    }

    fn fact(&self) -> &str {
        &self.fact
    }

    fn severity(&self) -> Severity {
        self.severity
    }

    fn evaluate(&self, facts: &Facts, ctx: &mut RuleContext<'_>) -> Result<Vec<Alert>> {
        // Null facts mean the probe could not observe this datum; skipping
        // them avoids value -> null -> value churn during upstream blips.
        let Some(value) = facts.get(&self.fact).filter(|v| !v.is_null()) else {
            return Ok(Vec::new());
        };
        let current = value.to_string();

        let previous = ctx
            .state
            .rule_slot(&self.id)
            .and_then(Value::as_str)
            .map(str::to_string);

        let Some(previous) = previous else {
            ctx.state
                .set_rule_slot(&self.id, Value::from(current.clone()));
            return Ok(Vec::new());
        };

        if previous == current {
            return Ok(Vec::new());
        }

        ctx.state
            .set_rule_slot(&self.id, Value::from(current.clone()));

        let message = match &self.message_template {
            Some(template) => {
                render_template(template, &[("old", &previous), ("new", &current)])
            }
            None => format!("{} changed from {previous} to {current}", self.fact),
        };

        let mut entities = HashMap::new();
        entities.insert("Old".to_string(), previous.clone());
        entities.insert("New".to_string(), current.clone());

        Ok(vec![Alert {
            id: ident::change_id(ctx.probe_id, &self.id, &previous, &current),
            probe_id: ctx.probe_id.to_string(),
            rule_id: self.id.clone(),
            severity: self.severity,
            title: self
                .title
                .clone()
                .unwrap_or_else(|| "Value Changed".to_string()),
            message,
            timestamp: ctx.now,
            entities,
            links: Vec::new(),
        }])
    }
}
