use sha2::{Digest, Sha256};

/// First 8 hex characters of the SHA-256 of `input`.
pub fn hash8(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(8);
    for byte in &digest[..4] {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Alert id for a threshold breach: one stable id per (probe, rule) pair.
pub fn breach_id(probe_id: &str, rule_id: &str) -> String {
    format!("{probe_id}:{rule_id}:breach")
}

/// Alert id for a value transition. The same `old -> new` transition always
/// yields the same id, across processes and platforms.
pub fn change_id(probe_id: &str, rule_id: &str, old: &str, new: &str) -> String {
    format!("{probe_id}:{rule_id}:{}", hash8(&format!("{old}->{new}")))
}

/// Alert id for the scheduler's stuck-run watchdog.
pub fn stuck_id(probe_id: &str) -> String {
    format!("{probe_id}:system:stuck")
}

/// Cooldown key shared by every alert a rule emits.
pub fn cooldown_key(probe_id: &str, rule_id: &str) -> String {
    format!("{probe_id}:{rule_id}")
}
