//! Thread-granularity operations, mirroring the message surface.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::client::{GmailApi, ListParams};
use crate::error::{EngineError, Result};
use crate::labels::LabelResolver;
use crate::models::{MessageFormat, ThreadStub, ThreadView};

const MAX_RESULTS_CAP: u32 = 500;

fn default_max_results() -> u32 {
    100
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListThreadsRequest {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default)]
    pub page_token: Option<String>,
    #[serde(default)]
    pub include_spam_trash: bool,
}

#[derive(Debug, Serialize)]
pub struct ListThreadsResponse {
    pub thread_summaries: Vec<ThreadStub>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GetThreadDetailsRequest {
    pub thread_id: String,
    #[serde(default)]
    pub format: MessageFormat,
    #[serde(default)]
    pub include_headers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModifyThreadLabelsRequest {
    pub thread_id: String,
    #[serde(default)]
    pub add_label_names: Vec<String>,
    #[serde(default)]
    pub remove_label_names: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThreadIdRequest {
    pub thread_id: String,
}

#[derive(Debug, Serialize)]
pub struct ThreadMutationResponse {
    pub thread_id: String,
    pub status_message: String,
}

pub struct ThreadOps {
    api: Arc<dyn GmailApi>,
    labels: Arc<LabelResolver>,
}

impl ThreadOps {
    pub fn new(api: Arc<dyn GmailApi>, labels: Arc<LabelResolver>) -> Self {
        Self { api, labels }
    }

    pub async fn list_threads(&self, request: ListThreadsRequest) -> Result<ListThreadsResponse> {
        if request.max_results == 0 || request.max_results > MAX_RESULTS_CAP {
            return Err(EngineError::InvalidInput(format!(
                "max_results must be in 1..={MAX_RESULTS_CAP}"
            )));
        }

        let page = self
            .api
            .list_threads(ListParams {
                query: request.query,
                max_results: request.max_results,
                page_token: request.page_token,
                include_spam_trash: request.include_spam_trash,
            })
            .await?;

        Ok(ListThreadsResponse {
            thread_summaries: page.threads,
            next_page_token: page.next_page_token,
        })
    }

    pub async fn get_thread_details(&self, request: GetThreadDetailsRequest) -> Result<ThreadView> {
        let id = require_thread_id(&request.thread_id)?;
        self.api
            .get_thread(id, request.format, &request.include_headers)
            .await
    }

    pub async fn modify_thread_labels(
        &self,
        request: ModifyThreadLabelsRequest,
    ) -> Result<ThreadMutationResponse> {
        let id = require_thread_id(&request.thread_id)?;
        if request.add_label_names.is_empty() && request.remove_label_names.is_empty() {
            return Err(EngineError::InvalidInput(
                "at least one of add_label_names or remove_label_names is required".to_string(),
            ));
        }

        let add = self.labels.resolve_many(&request.add_label_names, false).await?;
        let remove = self
            .labels
            .resolve_many(&request.remove_label_names, false)
            .await?;

        self.api.modify_thread(id, &add, &remove).await?;

        Ok(ThreadMutationResponse {
            thread_id: id.to_string(),
            status_message: format!(
                "modified labels on thread (+{} -{})",
                add.len(),
                remove.len()
            ),
        })
    }

    pub async fn trash_thread(&self, request: ThreadIdRequest) -> Result<ThreadMutationResponse> {
        let id = require_thread_id(&request.thread_id)?;
        self.api.trash_thread(id).await?;
        Ok(ThreadMutationResponse {
            thread_id: id.to_string(),
            status_message: "thread moved to trash".to_string(),
        })
    }

    pub async fn delete_thread_permanently(
        &self,
        request: ThreadIdRequest,
    ) -> Result<ThreadMutationResponse> {
        let id = require_thread_id(&request.thread_id)?;
        self.api.delete_thread(id).await?;
        Ok(ThreadMutationResponse {
            thread_id: id.to_string(),
            status_message: "thread permanently deleted".to_string(),
        })
    }
}

fn require_thread_id(id: &str) -> Result<&str> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidInput(
            "thread_id must not be empty".to_string(),
        ));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockGmailApi;
    use crate::models::{LabelInfo, ThreadPage};

    fn ops(mock: MockGmailApi) -> ThreadOps {
        let api: Arc<dyn GmailApi> = Arc::new(mock);
        let labels = Arc::new(LabelResolver::new(Arc::clone(&api)));
        ThreadOps::new(api, labels)
    }

    #[tokio::test]
    async fn test_list_threads_passes_query() {
        let mut mock = MockGmailApi::new();
        mock.expect_list_threads().returning(|params| {
            assert_eq!(params.query.as_deref(), Some("is:important"));
            Ok(ThreadPage {
                threads: vec![ThreadStub {
                    id: "t1".to_string(),
                    snippet: None,
                }],
                next_page_token: Some("next".to_string()),
            })
        });

        let response = ops(mock)
            .list_threads(ListThreadsRequest {
                query: Some("is:important".to_string()),
                max_results: 50,
                page_token: None,
                include_spam_trash: false,
            })
            .await
            .unwrap();

        assert_eq!(response.thread_summaries.len(), 1);
        assert_eq!(response.next_page_token.as_deref(), Some("next"));
    }

    #[tokio::test]
    async fn test_modify_thread_labels_resolves_names() {
        let mut mock = MockGmailApi::new();
        mock.expect_list_labels().returning(|| {
            Ok(vec![LabelInfo {
                id: "Label_9".to_string(),
                name: "Archive2026".to_string(),
            }])
        });
        mock.expect_modify_thread()
            .times(1)
            .returning(|id, add, remove| {
                assert_eq!(id, "t1");
                assert_eq!(add, ["Label_9"]);
                assert_eq!(remove, ["INBOX"]);
                Ok(())
            });

        ops(mock)
            .modify_thread_labels(ModifyThreadLabelsRequest {
                thread_id: "t1".to_string(),
                add_label_names: vec!["Archive2026".to_string()],
                remove_label_names: vec!["INBOX".to_string()],
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_modify_thread_requires_labels() {
        let err = ops(MockGmailApi::new())
            .modify_thread_labels(ModifyThreadLabelsRequest {
                thread_id: "t1".to_string(),
                add_label_names: vec![],
                remove_label_names: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_empty_thread_id_invalid() {
        let err = ops(MockGmailApi::new())
            .trash_thread(ThreadIdRequest {
                thread_id: "  ".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }
}
