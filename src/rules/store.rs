//! Rule persistence
//!
//! A single JSON document owns every rule. Loads are lazy; writes go through
//! write-temp + fsync + rename so a crash never leaves a torn file. A
//! process-local mutex serialises load-modify-save cycles; cross-process
//! writers are not supported.

use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::rules::rule::{Rule, RuleDefinition};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Serialize, Deserialize)]
struct RuleFile {
    rules: Vec<Rule>,
}

pub struct RuleStore {
    path: PathBuf,
    state: Mutex<Option<Vec<Rule>>>,
}

impl RuleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load_into(&self, slot: &mut Option<Vec<Rule>>) -> Result<()> {
        if slot.is_some() {
            return Ok(());
        }

        let rules = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                let file: RuleFile = serde_json::from_str(&content)
                    .map_err(|e| EngineError::Store(format!("invalid rule file: {e}")))?;
                debug!(count = file.rules.len(), "loaded rule store");
                file.rules
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no rule file yet, starting empty");
                Vec::new()
            }
            Err(e) => return Err(EngineError::Store(format!("failed to read rule file: {e}"))),
        };

        *slot = Some(rules);
        Ok(())
    }

    async fn persist(&self, rules: &[Rule]) -> Result<()> {
        let file = RuleFile {
            rules: rules.to_vec(),
        };
        let json = serde_json::to_vec_pretty(&file)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| EngineError::Store(format!("failed to create dir: {e}")))?;
            }
        }

        // Crash safety: land the bytes in a sibling temp file, force them to
        // disk, then atomically swap it into place
        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut tmp = tokio::fs::File::create(&tmp_path)
                .await
                .map_err(|e| EngineError::Store(format!("failed to create temp file: {e}")))?;
            tmp.write_all(&json)
                .await
                .map_err(|e| EngineError::Store(format!("failed to write temp file: {e}")))?;
            tmp.sync_all()
                .await
                .map_err(|e| EngineError::Store(format!("failed to sync temp file: {e}")))?;
        }
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| EngineError::Store(format!("failed to replace rule file: {e}")))?;

        Ok(())
    }

    /// Snapshot of every stored rule.
    pub async fn list(&self) -> Result<Vec<Rule>> {
        let mut guard = self.state.lock().await;
        self.load_into(&mut guard).await?;
        Ok(guard.as_ref().expect("loaded").clone())
    }

    /// Lookup by id first, then by exact (case-sensitive) name.
    pub async fn find(&self, id_or_name: &str) -> Result<Option<Rule>> {
        let mut guard = self.state.lock().await;
        self.load_into(&mut guard).await?;
        let rules = guard.as_ref().expect("loaded");

        if let Some(rule) = rules.iter().find(|r| r.id == id_or_name) {
            return Ok(Some(rule.clone()));
        }
        Ok(rules.iter().find(|r| r.name == id_or_name).cloned())
    }

    /// Validate, assign identity, persist.
    pub async fn add(&self, definition: RuleDefinition) -> Result<Rule> {
        let rule = definition.into_rule();
        rule.validate()?;

        let mut guard = self.state.lock().await;
        self.load_into(&mut guard).await?;
        let rules = guard.as_mut().expect("loaded");

        if rules.iter().any(|r| r.name == rule.name) {
            return Err(EngineError::RuleConflict(format!(
                "a rule named '{}' already exists",
                rule.name
            )));
        }

        rules.push(rule.clone());
        self.persist(rules).await?;
        info!(rule_id = %rule.id, rule_name = %rule.name, "rule added");
        Ok(rule)
    }

    /// Remove by id or name, returning the deleted rule.
    pub async fn delete(&self, id_or_name: &str) -> Result<Rule> {
        let mut guard = self.state.lock().await;
        self.load_into(&mut guard).await?;
        let rules = guard.as_mut().expect("loaded");

        let index = rules
            .iter()
            .position(|r| r.id == id_or_name)
            .or_else(|| rules.iter().position(|r| r.name == id_or_name))
            .ok_or_else(|| EngineError::NotFound(format!("rule '{id_or_name}' not found")))?;

        let removed = rules.remove(index);
        self.persist(rules).await?;
        info!(rule_id = %removed.id, rule_name = %removed.name, "rule deleted");
        Ok(removed)
    }
}
