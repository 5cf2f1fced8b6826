//! Rule definition validation.
//!
//! Every rule passes through [`validate`] before it is scheduled, whether
//! it arrives from the store at reconciliation or from the API as a test
//! candidate. A rule that fails here is skipped and flagged; it never
//! reaches a task.

use vigil_core::ManagerConfig;

use crate::error::RuleError;
use crate::schema::Rule;

/// Check a rule definition against structural and platform constraints.
pub fn validate(rule: &Rule, config: &ManagerConfig) -> Result<(), RuleError> {
    if rule.id.trim().is_empty() {
        return fail("rule id must not be empty");
    }
    if rule.tenant.trim().is_empty() {
        return fail(format!("rule '{}': tenant must not be empty", rule.id));
    }
    if rule.name.trim().is_empty() {
        return fail(format!("rule '{}': name must not be empty", rule.id));
    }
    if rule.query.expr.trim().is_empty() {
        return fail(format!("rule '{}': query expression must not be empty", rule.id));
    }
    if !rule.threshold.is_finite() {
        return fail(format!(
            "rule '{}': threshold must be finite, got {}",
            rule.id, rule.threshold
        ));
    }
    // Interval floor bounds total backend load; rejecting (not clamping)
    // keeps the stored definition authoritative.
    if rule.interval < config.min_interval {
        return fail(format!(
            "rule '{}': interval {:?} is below the minimum {:?}",
            rule.id, rule.interval, config.min_interval
        ));
    }
    if rule.window.is_zero() {
        return fail(format!("rule '{}': window must be greater than zero", rule.id));
    }
    if rule.version == 0 {
        return fail(format!("rule '{}': version must be at least 1", rule.id));
    }
    Ok(())
}

fn fail(msg: impl Into<String>) -> Result<(), RuleError> {
    Err(RuleError::Validation(msg.into()))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::schema::{CompareOp, QuerySpec};

    fn valid_rule() -> Rule {
        Rule {
            id: "r1".to_string(),
            tenant: "acme".to_string(),
            name: "cpu high".to_string(),
            query: QuerySpec::new("avg(cpu_usage)"),
            compare: CompareOp::Above,
            threshold: 90.0,
            interval: Duration::from_secs(60),
            window: Duration::from_secs(300),
            for_duration: Duration::from_secs(120),
            enabled: true,
            target: "oncall".to_string(),
            version: 1,
            eval_delay: None,
            severity: Default::default(),
            annotations: Default::default(),
        }
    }

    fn config() -> ManagerConfig {
        let mut cfg = ManagerConfig::for_tests();
        cfg.min_interval = Duration::from_secs(15);
        cfg
    }

    #[test]
    fn accepts_valid_rule() {
        assert!(validate(&valid_rule(), &config()).is_ok());
    }

    #[test]
    fn rejects_empty_fields() {
        for mutate in [
            (|r: &mut Rule| r.id = "  ".to_string()) as fn(&mut Rule),
            |r| r.tenant = String::new(),
            |r| r.name = String::new(),
            |r| r.query.expr = String::new(),
        ] {
            let mut rule = valid_rule();
            mutate(&mut rule);
            assert!(matches!(
                validate(&rule, &config()),
                Err(RuleError::Validation(_))
            ));
        }
    }

    #[test]
    fn rejects_interval_below_floor() {
        let mut rule = valid_rule();
        rule.interval = Duration::from_secs(5);
        let err = validate(&rule, &config()).unwrap_err();
        assert!(err.to_string().contains("below the minimum"));
    }

    #[test]
    fn rejects_non_finite_threshold() {
        let mut rule = valid_rule();
        rule.threshold = f64::NAN;
        assert!(validate(&rule, &config()).is_err());
        rule.threshold = f64::INFINITY;
        assert!(validate(&rule, &config()).is_err());
    }

    #[test]
    fn rejects_zero_window_and_version() {
        let mut rule = valid_rule();
        rule.window = Duration::ZERO;
        assert!(validate(&rule, &config()).is_err());

        let mut rule = valid_rule();
        rule.version = 0;
        assert!(validate(&rule, &config()).is_err());
    }

    #[test]
    fn zero_for_duration_is_valid() {
        let mut rule = valid_rule();
        rule.for_duration = Duration::ZERO;
        assert!(validate(&rule, &config()).is_ok());
    }
}
