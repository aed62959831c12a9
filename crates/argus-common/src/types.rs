use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// A single typed observation produced by a probe.
///
/// Big integers carry values that overflow `i64` (chain balances in wei);
/// `i128` covers every realistic magnitude without pulling in a bignum crate.
#[derive(Debug, Clone, PartialEq)]
pub enum FactValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    BigInt(i128),
    Str(String),
}

impl FactValue {
    /// Numeric coercion consulted by rules. `Null` and `Bool` never coerce;
    /// strings coerce only when they parse as a float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FactValue::Int(v) => Some(*v as f64),
            FactValue::Float(v) => Some(*v),
            FactValue::BigInt(v) => Some(*v as f64),
            FactValue::Str(s) => s.trim().parse::<f64>().ok(),
            FactValue::Null | FactValue::Bool(_) => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FactValue::Null)
    }
}

impl std::fmt::Display for FactValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FactValue::Null => write!(f, "null"),
            FactValue::Bool(v) => write!(f, "{v}"),
            FactValue::Int(v) => write!(f, "{v}"),
            FactValue::Float(v) => write!(f, "{}", format_number(*v)),
            FactValue::BigInt(v) => write!(f, "{v}"),
            FactValue::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for FactValue {
    fn from(s: &str) -> Self {
        FactValue::Str(s.to_string())
    }
}

impl From<f64> for FactValue {
    fn from(v: f64) -> Self {
        FactValue::Float(v)
    }
}

impl From<i64> for FactValue {
    fn from(v: i64) -> Self {
        FactValue::Int(v)
    }
}

impl From<bool> for FactValue {
    fn from(v: bool) -> Self {
        FactValue::Bool(v)
    }
}

/// Render a float the way humans write it: integral values without the
/// trailing `.0`, everything else with the shortest round-trip form.
pub fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

/// The bag of observations one probe run produces, keyed by dotted,
/// platform-namespaced fact names (`evm.block`, `http.status`).
pub type Facts = HashMap<String, FactValue>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertLink {
    pub label: String,
    pub url: String,
}

/// A structured notification flowing from rules to delivery channels.
///
/// `id` is derived deterministically from the logical event (see
/// [`crate::ident`]); two evaluations of the same event must collide.
/// On the wire `timestamp` is milliseconds since the Unix epoch, like every
/// other cross-boundary stamp in the system.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: String,
    pub probe_id: String,
    pub rule_id: String,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub entities: HashMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<AlertLink>,
}

/// Per-probe persistent continuity data.
///
/// The `probe` namespace belongs to the probe implementation; each rule owns
/// exactly the `rule[rule_id]` slot. The scheduler loads the state once per
/// run, hands out mutable references, and persists the result atomically.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeState {
    #[serde(default)]
    pub probe: serde_json::Map<String, Value>,
    #[serde(default)]
    pub rule: serde_json::Map<String, Value>,
}

pub const MUTED_UNTIL_KEY: &str = "muted_until";

impl ProbeState {
    pub fn rule_slot(&self, rule_id: &str) -> Option<&Value> {
        self.rule.get(rule_id)
    }

    pub fn set_rule_slot(&mut self, rule_id: &str, value: Value) {
        self.rule.insert(rule_id.to_string(), value);
    }

    /// Epoch-millisecond mute deadline, if one is set in the probe namespace.
    pub fn muted_until(&self) -> Option<i64> {
        self.probe.get(MUTED_UNTIL_KEY).and_then(Value::as_i64)
    }

    pub fn set_muted_until(&mut self, deadline_ms: i64) {
        self.probe
            .insert(MUTED_UNTIL_KEY.to_string(), Value::from(deadline_ms));
    }

    pub fn clear_muted(&mut self) {
        self.probe.remove(MUTED_UNTIL_KEY);
    }

    pub fn is_muted(&self, now: DateTime<Utc>) -> bool {
        self.muted_until()
            .is_some_and(|until| until > now.timestamp_millis())
    }
}

/// Static self-description supplied by each registered platform.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformDescriptor {
    pub id: String,
    pub display_name: String,
    pub version: String,
    pub supported_probe_types: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    Threshold,
    Change,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    GreaterEqual,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessEqual,
}

impl CompareOp {
    pub fn check(&self, value: f64, threshold: f64) -> bool {
        match self {
            CompareOp::GreaterThan => value > threshold,
            CompareOp::GreaterEqual => value >= threshold,
            CompareOp::LessThan => value < threshold,
            CompareOp::LessEqual => value <= threshold,
        }
    }
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompareOp::GreaterThan => write!(f, ">"),
            CompareOp::GreaterEqual => write!(f, ">="),
            CompareOp::LessThan => write!(f, "<"),
            CompareOp::LessEqual => write!(f, "<="),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDescriptor {
    pub id: String,
    pub kind: RuleKind,
    pub fact: String,
    pub threshold: Option<f64>,
    pub operator: Option<CompareOp>,
    pub severity: Option<Severity>,
    pub title: Option<String>,
    pub message_template: Option<String>,
}

pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeDescriptor {
    pub id: String,
    pub platform: String,
    #[serde(rename = "type")]
    pub probe_type: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Collection period in seconds.
    pub interval: u64,
    /// Per-run deadline in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout: u64,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub rules: Vec<RuleDescriptor>,
}

fn default_enabled() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Success => write!(f, "success"),
            RunStatus::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(RunStatus::Success),
            "error" => Ok(RunStatus::Error),
            _ => Err(format!("unknown run status: {s}")),
        }
    }
}

/// One row of the bounded run-history log.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub id: i64,
    pub probe_id: String,
    pub status: RunStatus,
    pub duration_ms: i64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A recorded delivery, used for dedup lookups and the recent-alerts view.
#[derive(Debug, Clone, Serialize)]
pub struct SentAlert {
    pub alert_id: String,
    pub probe_id: String,
    pub rule_id: String,
    pub sent_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn alert_timestamp_serializes_as_epoch_millis() {
        let timestamp = Utc.timestamp_millis_opt(1_754_000_000_123).unwrap();
        let alert = Alert {
            id: "p1:r1:breach".into(),
            probe_id: "p1".into(),
            rule_id: "r1".into(),
            severity: Severity::Warning,
            title: "Threshold Breached".into(),
            message: "Value 20 crossed threshold 15".into(),
            timestamp,
            entities: HashMap::new(),
            links: Vec::new(),
        };

        let wire = serde_json::to_value(&alert).unwrap();
        assert_eq!(wire["timestamp"], serde_json::json!(1_754_000_000_123_i64));
        assert_eq!(wire["severity"], serde_json::json!("warning"));
    }
}
