//! Label name resolution
//!
//! Tool inputs and rule actions refer to labels by name; the Gmail API wants
//! ids. The resolver keeps a small LRU of name→id mappings, refreshes from
//! `labels.list` on miss, and optionally creates missing user labels when an
//! action opted into that.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::client::GmailApi;
use crate::error::{EngineError, Result};

/// Ids Gmail reserves; these resolve to themselves, case-insensitively.
const SYSTEM_LABELS: &[&str] = &[
    "INBOX",
    "UNREAD",
    "STARRED",
    "IMPORTANT",
    "SENT",
    "DRAFT",
    "SPAM",
    "TRASH",
    "CATEGORY_PERSONAL",
    "CATEGORY_SOCIAL",
    "CATEGORY_PROMOTIONS",
    "CATEGORY_UPDATES",
    "CATEGORY_FORUMS",
];

const CACHE_CAPACITY: usize = 256;

pub struct LabelResolver {
    api: Arc<dyn GmailApi>,
    cache: Mutex<LruCache<String, String>>,
}

impl LabelResolver {
    pub fn new(api: Arc<dyn GmailApi>) -> Self {
        Self {
            api,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_CAPACITY).expect("non-zero cache capacity"),
            )),
        }
    }

    /// Resolve a label name to its id.
    ///
    /// Missing labels fail with `NotFound` unless `create_missing` is set, in
    /// which case a user label is created and cached.
    pub async fn resolve(&self, name: &str, create_missing: bool) -> Result<String> {
        if let Some(system) = SYSTEM_LABELS
            .iter()
            .find(|l| l.eq_ignore_ascii_case(name))
        {
            return Ok((*system).to_string());
        }

        let key = name.to_ascii_lowercase();
        {
            let mut cache = self.cache.lock().await;
            if let Some(id) = cache.get(&key) {
                return Ok(id.clone());
            }
        }

        // Miss: refresh the full mapping once, then decide
        let labels = self.api.list_labels().await?;
        let mut found = None;
        {
            let mut cache = self.cache.lock().await;
            for label in &labels {
                cache.put(label.name.to_ascii_lowercase(), label.id.clone());
                if label.name.eq_ignore_ascii_case(name) {
                    found = Some(label.id.clone());
                }
            }
        }

        if let Some(id) = found {
            return Ok(id);
        }

        if create_missing {
            info!(label = name, "creating missing label");
            let created = self.api.create_label(name).await?;
            self.cache
                .lock()
                .await
                .put(created.name.to_ascii_lowercase(), created.id.clone());
            return Ok(created.id);
        }

        debug!(label = name, "label not found");
        Err(EngineError::NotFound(format!("label '{name}' not found")))
    }

    /// Resolve a list of names, failing on the first missing one.
    pub async fn resolve_many(&self, names: &[String], create_missing: bool) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            ids.push(self.resolve(name, create_missing).await?);
        }
        Ok(ids)
    }
}
