use std::time::Duration;

use super::*;

fn sample_yaml() -> &'static str {
    r#"
id: high-error-rate
tenant: acme
name: High error rate
query:
  expr: 'rate(http_errors_total[5m])'
compare: above
threshold: 100.0
interval: 1m
window: 5m
for: 2m
target: oncall
severity: critical
annotations:
  runbook: https://wiki/runbooks/high-error-rate
"#
}

#[test]
fn parses_full_rule() {
    let rule: Rule = serde_yaml::from_str(sample_yaml()).unwrap();
    assert_eq!(rule.id, "high-error-rate");
    assert_eq!(rule.tenant, "acme");
    assert_eq!(rule.compare, CompareOp::Above);
    assert_eq!(rule.interval, Duration::from_secs(60));
    assert_eq!(rule.window, Duration::from_secs(300));
    assert_eq!(rule.for_duration, Duration::from_secs(120));
    assert!(rule.enabled);
    assert_eq!(rule.version, 1);
    assert_eq!(rule.severity, Severity::Critical);
    assert_eq!(rule.eval_delay, None);
    assert_eq!(
        rule.annotations.get("runbook").map(String::as_str),
        Some("https://wiki/runbooks/high-error-rate")
    );
}

#[test]
fn for_duration_defaults_to_zero() {
    let yaml = r#"
id: r1
tenant: t
name: n
query: { expr: "up" }
compare: below
threshold: 1.0
interval: 30s
window: 1m
"#;
    let rule: Rule = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(rule.for_duration, Duration::ZERO);
    assert_eq!(rule.severity, Severity::Warning);
}

#[test]
fn durations_accept_raw_seconds() {
    let yaml = r#"
id: r1
tenant: t
name: n
query: { expr: "up" }
compare: above
threshold: 0.5
interval: 60
window: 300
for: 120
"#;
    let rule: Rule = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(rule.interval, Duration::from_secs(60));
    assert_eq!(rule.for_duration, Duration::from_secs(120));
}

#[test]
fn eval_delay_override_round_trips() {
    let yaml = r#"
id: r1
tenant: t
name: n
query: { expr: "up" }
compare: above
threshold: 0.5
interval: 1m
window: 5m
eval_delay: 5m
"#;
    let rule: Rule = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(rule.eval_delay, Some(Duration::from_secs(300)));
    assert_eq!(
        rule.effective_eval_delay(Duration::from_secs(120)),
        Duration::from_secs(300)
    );

    let back = serde_yaml::to_string(&rule).unwrap();
    let again: Rule = serde_yaml::from_str(&back).unwrap();
    assert_eq!(again, rule);
}

#[test]
fn effective_eval_delay_falls_back_to_default() {
    let rule: Rule = serde_yaml::from_str(sample_yaml()).unwrap();
    assert_eq!(
        rule.effective_eval_delay(Duration::from_secs(120)),
        Duration::from_secs(120)
    );
}

#[test]
fn bad_duration_is_rejected() {
    let yaml = r#"
id: r1
tenant: t
name: n
query: { expr: "up" }
compare: above
threshold: 0.5
interval: soon
window: 5m
"#;
    assert!(serde_yaml::from_str::<Rule>(yaml).is_err());
}

#[test]
fn compare_ops_hold() {
    assert!(CompareOp::Above.holds(150.0, 100.0));
    assert!(!CompareOp::Above.holds(100.0, 100.0));
    assert!(CompareOp::AtOrAbove.holds(100.0, 100.0));
    assert!(CompareOp::Below.holds(50.0, 100.0));
    assert!(CompareOp::AtOrBelow.holds(100.0, 100.0));
    assert!(CompareOp::Equal.holds(1.0, 1.0));
    assert!(CompareOp::NotEqual.holds(0.0, 1.0));
}
