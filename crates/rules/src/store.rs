//! Rule store contract and the in-memory implementation.
//!
//! Persistence of rule definitions is externally owned; the manager only
//! needs read access scoped by tenant. [`MemoryRuleStore`] backs tests and
//! API layers that keep definitions elsewhere; [`crate::loader::FileRuleStore`]
//! reads YAML files for local deployments.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::schema::Rule;

/// Errors from the rule store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("rule not found: {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(String),
}

/// Read access to persisted rule definitions.
#[async_trait::async_trait]
pub trait RuleStore: Send + Sync {
    /// All tenants that own at least one rule.
    async fn tenants(&self) -> Result<Vec<String>, StoreError>;

    /// All rules for one tenant, enabled or not.
    async fn list(&self, tenant: &str) -> Result<Vec<Rule>, StoreError>;

    /// Look up one rule. Ids are unique per tenant, not globally, so
    /// lookups carry both.
    async fn get(&self, tenant: &str, id: &str) -> Result<Rule, StoreError>;
}

/// In-memory rule store, keyed by `(tenant, id)`.
#[derive(Debug, Default)]
pub struct MemoryRuleStore {
    rules: RwLock<HashMap<(String, String), Rule>>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a rule. Callers bump `version` on edits; the
    /// manager restarts the task when it sees the new version.
    pub fn upsert(&self, rule: Rule) {
        self.rules
            .write()
            .expect("rules lock poisoned")
            .insert((rule.tenant.clone(), rule.id.clone()), rule);
    }

    /// Remove a rule; returns whether it existed.
    pub fn remove(&self, tenant: &str, id: &str) -> bool {
        self.rules
            .write()
            .expect("rules lock poisoned")
            .remove(&(tenant.to_string(), id.to_string()))
            .is_some()
    }
}

#[async_trait::async_trait]
impl RuleStore for MemoryRuleStore {
    async fn tenants(&self) -> Result<Vec<String>, StoreError> {
        let rules = self.rules.read().expect("rules lock poisoned");
        let mut tenants: Vec<String> = rules.values().map(|r| r.tenant.clone()).collect();
        tenants.sort();
        tenants.dedup();
        Ok(tenants)
    }

    async fn list(&self, tenant: &str) -> Result<Vec<Rule>, StoreError> {
        let rules = self.rules.read().expect("rules lock poisoned");
        Ok(rules
            .values()
            .filter(|r| r.tenant == tenant)
            .cloned()
            .collect())
    }

    async fn get(&self, tenant: &str, id: &str) -> Result<Rule, StoreError> {
        self.rules
            .read()
            .expect("rules lock poisoned")
            .get(&(tenant.to_string(), id.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("{tenant}/{id}")))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::schema::{CompareOp, QuerySpec};

    fn rule(id: &str, tenant: &str) -> Rule {
        Rule {
            id: id.to_string(),
            tenant: tenant.to_string(),
            name: id.to_string(),
            query: QuerySpec::new("up"),
            compare: CompareOp::Below,
            threshold: 1.0,
            interval: Duration::from_secs(60),
            window: Duration::from_secs(60),
            for_duration: Duration::ZERO,
            enabled: true,
            target: String::new(),
            version: 1,
            eval_delay: None,
            severity: Default::default(),
            annotations: Default::default(),
        }
    }

    #[tokio::test]
    async fn upsert_get_remove() {
        let store = MemoryRuleStore::new();
        store.upsert(rule("a", "t1"));

        let got = store.get("t1", "a").await.unwrap();
        assert_eq!(got.id, "a");

        assert!(store.remove("t1", "a"));
        assert!(matches!(
            store.get("t1", "a").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn same_id_across_tenants_stays_distinct() {
        let store = MemoryRuleStore::new();
        let mut a = rule("cpu", "t1");
        a.threshold = 80.0;
        let mut b = rule("cpu", "t2");
        b.threshold = 90.0;
        store.upsert(a);
        store.upsert(b);

        assert_eq!(store.get("t1", "cpu").await.unwrap().threshold, 80.0);
        assert_eq!(store.get("t2", "cpu").await.unwrap().threshold, 90.0);

        assert!(store.remove("t1", "cpu"));
        assert!(store.get("t2", "cpu").await.is_ok());
    }

    #[tokio::test]
    async fn list_scopes_by_tenant() {
        let store = MemoryRuleStore::new();
        store.upsert(rule("a", "t1"));
        store.upsert(rule("b", "t1"));
        store.upsert(rule("c", "t2"));

        assert_eq!(store.list("t1").await.unwrap().len(), 2);
        assert_eq!(store.list("t2").await.unwrap().len(), 1);
        assert!(store.list("t3").await.unwrap().is_empty());

        assert_eq!(store.tenants().await.unwrap(), vec!["t1", "t2"]);
    }
}
