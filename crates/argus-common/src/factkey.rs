use crate::types::Facts;

/// Checks that a fact key follows the `<namespace>.<rest>` shape: a non-empty
/// namespace, a dot, and a non-empty remainder, all drawn from
/// `[a-zA-Z0-9_.-]`.
pub fn is_valid_fact_key(key: &str) -> bool {
    let Some((namespace, rest)) = key.split_once('.') else {
        return false;
    };
    if namespace.is_empty() || rest.is_empty() {
        return false;
    }
    key.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Warns about malformed fact keys. Collection never fails on a bad key;
/// the rule lookup simply won't match anything an operator expects.
pub fn warn_invalid_fact_keys(probe_id: &str, facts: &Facts) {
    for key in facts.keys() {
        if !is_valid_fact_key(key) {
            tracing::warn!(
                probe_id = %probe_id,
                fact_key = %key,
                "Fact key does not follow the <namespace>.<rest> shape"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_namespaced_keys() {
        assert!(is_valid_fact_key("evm.block"));
        assert!(is_valid_fact_key("http.status"));
        assert!(is_valid_fact_key("pendle.impliedApy"));
        assert!(is_valid_fact_key("evm.balance_wei"));
        assert!(is_valid_fact_key("a.b.c-d"));
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!(!is_valid_fact_key("block"));
        assert!(!is_valid_fact_key(".block"));
        assert!(!is_valid_fact_key("evm."));
        assert!(!is_valid_fact_key("evm block"));
        assert!(!is_valid_fact_key(""));
    }
}
