//! File-backed rule store: one YAML document per rule in a flat directory.
//!
//! Scans are tolerant: a file that fails to parse or validate structurally
//! is logged and skipped, never fatal, so one bad rule cannot take down
//! the schedule. Writes go through a temp file plus rename so a scan never
//! observes a half-written rule.

use std::fs;
use std::path::{Path, PathBuf};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use crate::error::{Result, RuleError};
use crate::schema::Rule;
use crate::store::{RuleStore, StoreError};

/// Rule definitions stored as YAML files, `<tenant>--<rule id>.yaml` each.
/// Ids are only unique within a tenant, so the tenant is part of the
/// file name.
pub struct FileRuleStore {
    dir: PathBuf,
}

impl FileRuleStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read every rule file in the directory.
    ///
    /// Dotfiles and non-YAML extensions are ignored; unparseable files are
    /// logged and skipped.
    pub fn scan(&self) -> Result<Vec<Rule>> {
        let mut rules = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if !is_rule_file(&path) {
                continue;
            }
            match self.read_one(&path) {
                Ok(rule) => rules.push(rule),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable rule file");
                }
            }
        }
        rules.sort_by(|a, b| (&a.tenant, &a.id).cmp(&(&b.tenant, &b.id)));
        Ok(rules)
    }

    fn read_one(&self, path: &Path) -> Result<Rule> {
        let raw = fs::read_to_string(path)?;
        let rule: Rule = serde_yaml::from_str(&raw)?;
        Ok(rule)
    }

    /// Persist a rule as `<tenant>--<id>.yaml`, atomically (temp file +
    /// rename).
    pub fn write(&self, rule: &Rule) -> Result<PathBuf> {
        let yaml = serde_yaml::to_string(rule)?;
        let name = Self::file_stem(&rule.tenant, &rule.id);
        let final_path = self.dir.join(format!("{name}.yaml"));
        // Dotted temp name: scans skip it even if the rename never lands.
        let tmp_path = self.dir.join(format!(".{name}.yaml.tmp"));
        fs::write(&tmp_path, yaml)?;
        fs::rename(&tmp_path, &final_path)?;
        debug!(path = %final_path.display(), "rule file written");
        Ok(final_path)
    }

    /// Remove a rule file; returns whether it existed.
    pub fn delete(&self, tenant: &str, id: &str) -> Result<bool> {
        let path = self
            .dir
            .join(format!("{}.yaml", Self::file_stem(tenant, id)));
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(RuleError::Io(err)),
        }
    }

    /// Watch the directory and invoke `on_change` on every create, modify,
    /// or remove. The returned watcher stops when dropped; keep it alive
    /// alongside the manager.
    pub fn watch(&self, on_change: impl Fn() + Send + 'static) -> Result<RecommendedWatcher> {
        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
                Ok(event)
                    if event.kind.is_create()
                        || event.kind.is_modify()
                        || event.kind.is_remove() =>
                {
                    on_change();
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "rule directory watch error"),
            })?;
        watcher.watch(&self.dir, RecursiveMode::NonRecursive)?;
        Ok(watcher)
    }

    fn file_stem(tenant: &str, id: &str) -> String {
        format!("{tenant}--{id}")
    }
}

fn is_rule_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.starts_with('.') {
        return false;
    }
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

#[async_trait::async_trait]
impl RuleStore for FileRuleStore {
    async fn tenants(&self) -> std::result::Result<Vec<String>, StoreError> {
        let rules = self.scan().map_err(|e| StoreError::Store(e.to_string()))?;
        let mut tenants: Vec<String> = rules.into_iter().map(|r| r.tenant).collect();
        tenants.sort();
        tenants.dedup();
        Ok(tenants)
    }

    async fn list(&self, tenant: &str) -> std::result::Result<Vec<Rule>, StoreError> {
        let rules = self.scan().map_err(|e| StoreError::Store(e.to_string()))?;
        Ok(rules.into_iter().filter(|r| r.tenant == tenant).collect())
    }

    async fn get(&self, tenant: &str, id: &str) -> std::result::Result<Rule, StoreError> {
        let rules = self.scan().map_err(|e| StoreError::Store(e.to_string()))?;
        rules
            .into_iter()
            .find(|r| r.tenant == tenant && r.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("{tenant}/{id}")))
    }
}
