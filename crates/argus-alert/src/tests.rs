use crate::factory::{build_rule, build_rules};
use crate::rules::change::ChangeRule;
use crate::rules::threshold::ThresholdRule;
use crate::{Rule, RuleContext};
use argus_common::ident;
use argus_common::types::{
    CompareOp, FactValue, Facts, ProbeState, RuleDescriptor, RuleKind, Severity,
};
use chrono::Utc;

fn facts_with(key: &str, value: FactValue) -> Facts {
    let mut facts = Facts::new();
    facts.insert(key.to_string(), value);
    facts
}

fn eval(rule: &dyn Rule, state: &mut ProbeState, facts: &Facts) -> Vec<argus_common::types::Alert> {
    let mut ctx = RuleContext {
        probe_id: "p1",
        state,
        now: Utc::now(),
    };
    rule.evaluate(facts, &mut ctx).unwrap()
}

fn gt_rule(threshold: f64) -> ThresholdRule {
    ThresholdRule {
        id: "r1".into(),
        fact: "metric.x".into(),
        operator: CompareOp::GreaterThan,
        threshold,
        severity: Severity::Warning,
        title: None,
        message_template: None,
    }
}

#[test]
fn threshold_fires_once_per_upward_crossing() {
    let rule = gt_rule(15.0);
    let mut state = ProbeState::default();

    let mut all = Vec::new();
    for value in [10.0, 20.0, 30.0, 20.0, 10.0] {
        all.extend(eval(&rule, &mut state, &facts_with("metric.x", value.into())));
    }

    // One alert for the whole excursion, emitted on the 10 -> 20 edge.
    assert_eq!(all.len(), 1);
    let alert = &all[0];
    assert_eq!(alert.id, "p1:r1:breach");
    assert_eq!(alert.severity, Severity::Warning);
    assert_eq!(alert.title, "Threshold Breached");
    assert_eq!(alert.message, "Value 20 crossed threshold 15");
    assert_eq!(alert.entities.get("Value").unwrap(), "20");
    assert_eq!(alert.entities.get("Threshold").unwrap(), "15");

    // After clearing, a second excursion produces an identical id.
    let again = eval(&rule, &mut state, &facts_with("metric.x", 25.0.into()));
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].id, all[0].id);
}

#[test]
fn threshold_stays_silent_below() {
    let rule = gt_rule(90.0);
    let mut state = ProbeState::default();

    for value in [10.0, 50.0, 89.9] {
        assert!(eval(&rule, &mut state, &facts_with("metric.x", value.into())).is_empty());
    }
}

#[test]
fn threshold_skips_missing_and_non_numeric_without_clearing() {
    let rule = gt_rule(15.0);
    let mut state = ProbeState::default();

    assert_eq!(
        eval(&rule, &mut state, &facts_with("metric.x", 20.0.into())).len(),
        1
    );

    // A null observation neither fires nor re-arms.
    assert!(eval(&rule, &mut state, &facts_with("metric.x", FactValue::Null)).is_empty());
    assert!(eval(&rule, &mut state, &Facts::new()).is_empty());
    assert!(eval(&rule, &mut state, &facts_with("metric.x", 30.0.into())).is_empty());
}

#[test]
fn threshold_coerces_numeric_strings() {
    let rule = gt_rule(15.0);
    let mut state = ProbeState::default();

    let alerts = eval(&rule, &mut state, &facts_with("metric.x", "20.5".into()));
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].entities.get("Value").unwrap(), "20.5");
}

#[test]
fn threshold_message_template() {
    let rule = ThresholdRule {
        message_template: Some("APY is ${value}% (limit ${threshold}%)".into()),
        ..gt_rule(5.0)
    };
    let mut state = ProbeState::default();

    let alerts = eval(&rule, &mut state, &facts_with("metric.x", 7.5.into()));
    assert_eq!(alerts[0].message, "APY is 7.5% (limit 5%)");
}

fn change_rule() -> ChangeRule {
    ChangeRule {
        id: "r1".into(),
        fact: "evm.owner".into(),
        severity: Severity::Info,
        title: None,
        message_template: None,
    }
}

#[test]
fn change_rule_transition_sequence() {
    let rule = change_rule();
    let mut state = ProbeState::default();

    let expected: [(&str, Option<(&str, &str)>); 6] = [
        ("A", None),
        ("A", None),
        ("B", Some(("A", "B"))),
        ("B", None),
        ("C", Some(("B", "C"))),
        ("A", Some(("C", "A"))),
    ];

    for (observed, transition) in expected {
        let alerts = eval(&rule, &mut state, &facts_with("evm.owner", observed.into()));
        match transition {
            None => assert!(alerts.is_empty(), "no alert expected for {observed}"),
            Some((old, new)) => {
                assert_eq!(alerts.len(), 1);
                assert_eq!(alerts[0].id, ident::change_id("p1", "r1", old, new));
                assert_eq!(
                    alerts[0].message,
                    format!("evm.owner changed from {old} to {new}")
                );
                assert_eq!(alerts[0].severity, Severity::Info);
            }
        }
    }
}

#[test]
fn change_rule_first_touch_is_silent() {
    let rule = change_rule();
    let mut state = ProbeState::default();

    assert!(eval(&rule, &mut state, &facts_with("evm.owner", "A".into())).is_empty());
    assert_eq!(
        state.rule_slot("r1").and_then(serde_json::Value::as_str),
        Some("A")
    );
}

#[test]
fn change_rule_ignores_null_observations() {
    let rule = change_rule();
    let mut state = ProbeState::default();

    eval(&rule, &mut state, &facts_with("evm.owner", "A".into()));
    assert!(eval(&rule, &mut state, &facts_with("evm.owner", FactValue::Null)).is_empty());
    // The stored value is still "A", so re-observing it stays quiet.
    assert!(eval(&rule, &mut state, &facts_with("evm.owner", "A".into())).is_empty());
}

#[test]
fn change_rule_template() {
    let rule = ChangeRule {
        message_template: Some("owner moved: ${old} -> ${new}".into()),
        ..change_rule()
    };
    let mut state = ProbeState::default();

    eval(&rule, &mut state, &facts_with("evm.owner", "A".into()));
    let alerts = eval(&rule, &mut state, &facts_with("evm.owner", "B".into()));
    assert_eq!(alerts[0].message, "owner moved: A -> B");
}

#[test]
fn rules_only_touch_their_own_slot() {
    let threshold = gt_rule(15.0);
    let change = ChangeRule {
        id: "r2".into(),
        fact: "metric.x".into(),
        severity: Severity::Info,
        title: None,
        message_template: None,
    };
    let mut state = ProbeState::default();

    let facts = facts_with("metric.x", 20.0.into());
    eval(&threshold, &mut state, &facts);
    eval(&change, &mut state, &facts);

    assert_eq!(
        state.rule_slot("r1").and_then(serde_json::Value::as_str),
        Some("triggered")
    );
    assert_eq!(
        state.rule_slot("r2").and_then(serde_json::Value::as_str),
        Some("20")
    );
}

#[test]
fn change_ids_are_stable_across_instances() {
    let mut state_a = ProbeState::default();
    let mut state_b = ProbeState::default();
    let rule_a = change_rule();
    let rule_b = change_rule();

    eval(&rule_a, &mut state_a, &facts_with("evm.owner", "A".into()));
    eval(&rule_b, &mut state_b, &facts_with("evm.owner", "A".into()));
    let a = eval(&rule_a, &mut state_a, &facts_with("evm.owner", "B".into()));
    let b = eval(&rule_b, &mut state_b, &facts_with("evm.owner", "B".into()));

    assert_eq!(a[0].id, b[0].id);
}

fn threshold_descriptor() -> RuleDescriptor {
    RuleDescriptor {
        id: "r1".into(),
        kind: RuleKind::Threshold,
        fact: "metric.x".into(),
        threshold: Some(15.0),
        operator: Some(CompareOp::GreaterThan),
        severity: None,
        title: None,
        message_template: None,
    }
}

#[test]
fn factory_builds_closed_kinds_with_defaults() {
    let threshold = build_rule(&threshold_descriptor()).unwrap();
    assert_eq!(threshold.kind(), RuleKind::Threshold);
    assert_eq!(threshold.severity(), Severity::Warning);

    let change = build_rule(&RuleDescriptor {
        id: "r2".into(),
        kind: RuleKind::Change,
        fact: "evm.owner".into(),
        threshold: None,
        operator: None,
        severity: None,
        title: None,
        message_template: None,
    })
    .unwrap();
    assert_eq!(change.kind(), RuleKind::Change);
    assert_eq!(change.severity(), Severity::Info);
}

#[test]
fn factory_rejects_incomplete_threshold() {
    let missing_threshold = RuleDescriptor {
        threshold: None,
        ..threshold_descriptor()
    };
    assert!(build_rule(&missing_threshold).is_err());

    let missing_operator = RuleDescriptor {
        operator: None,
        ..threshold_descriptor()
    };
    assert!(build_rule(&missing_operator).is_err());

    let empty_fact = RuleDescriptor {
        fact: String::new(),
        ..threshold_descriptor()
    };
    assert!(build_rule(&empty_fact).is_err());
}

#[test]
fn factory_preserves_configured_order() {
    let descriptors = vec![
        RuleDescriptor {
            id: "first".into(),
            ..threshold_descriptor()
        },
        RuleDescriptor {
            id: "second".into(),
            kind: RuleKind::Change,
            fact: "metric.x".into(),
            threshold: None,
            operator: None,
            severity: None,
            title: None,
            message_template: None,
        },
    ];

    let rules = build_rules(&descriptors).unwrap();
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[0].id(), "first");
    assert_eq!(rules[1].id(), "second");
}
