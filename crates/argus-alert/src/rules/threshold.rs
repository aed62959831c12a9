use crate::rules::render_template;
use crate::{Rule, RuleContext};
use anyhow::Result;
use argus_common::ident;
use argus_common::types::{format_number, Alert, CompareOp, Facts, RuleKind, Severity};
use serde_json::Value;
use std::collections::HashMap;

const STATUS_OK: &str = "ok";
const STATUS_TRIGGERED: &str = "triggered";

/// Edge-triggered threshold comparison with hysteresis.
///
/// The rule keeps an `"ok"`/`"triggered"` flag in its state slot and emits
/// exactly one alert on the ok → triggered edge. While the fact stays on the
/// breaching side nothing further is emitted; crossing back re-arms the rule.
pub struct ThresholdRule {
    pub id: String,
    pub fact: String,
    pub operator: CompareOp,
    pub threshold: f64,
    pub severity: Severity,
    pub title: Option<String>,
    pub message_template: Option<String>,
}

impl ThresholdRule {
    fn status<'a>(&self, ctx: &'a RuleContext<'_>) -> &'a str {
        ctx.state
            .rule_slot(&self.id)
            .and_then(Value::as_str)
            .unwrap_or(STATUS_OK)
    }
}

impl Rule for ThresholdRule {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Threshold
    }

    fn fact(&self) -> &str {
        &self.fact
    }

    fn severity(&self) -> Severity {
        self.severity
    }

    fn evaluate(&self, facts: &Facts, ctx: &mut RuleContext<'_>) -> Result<Vec<Alert>> {
        // Missing or non-numeric facts do not trigger and do not clear:
        // a probe degrading to null facts must not re-arm the rule.
        let Some(value) = facts.get(&self.fact).and_then(|v| v.as_f64()) else {
            return Ok(Vec::new());
        };

        let triggered = self.operator.check(value, self.threshold);
        let armed = self.status(ctx) == STATUS_OK;

        if !triggered {
            if !armed {
                ctx.state.set_rule_slot(&self.id, Value::from(STATUS_OK));
            }
            return Ok(Vec::new());
        }
        if !armed {
            return Ok(Vec::new());
        }

        ctx.state
            .set_rule_slot(&self.id, Value::from(STATUS_TRIGGERED));

        let value_str = format_number(value);
        let threshold_str = format_number(self.threshold);
        let message = match &self.message_template {
            Some(template) => render_template(
                template,
                &[("value", &value_str), ("threshold", &threshold_str)],
            ),
            None => format!("Value {value_str} crossed threshold {threshold_str}"),
        };

        let mut entities = HashMap::new();
        entities.insert("Value".to_string(), value_str);
        entities.insert("Threshold".to_string(), threshold_str);

        Ok(vec![Alert {
            id: ident::breach_id(ctx.probe_id, &self.id),
            probe_id: ctx.probe_id.to_string(),
            rule_id: self.id.clone(),
            severity: self.severity,
            title: self
                .title
                .clone()
                .unwrap_or_else(|| "Threshold Breached".to_string()),
            message,
            timestamp: ctx.now,
            entities,
            links: Vec::new(),
        }])
    }
}
