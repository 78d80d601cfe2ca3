//! OAuth2 authentication management for the Gmail API
//!
//! Token acquisition is a collaborator concern; this module only turns
//! persisted credentials into an authenticated hub the engine can use.

use google_gmail1::{hyper_rustls, hyper_util, yup_oauth2, Gmail};
use std::path::Path;

use crate::error::{EngineError, Result};

/// Scopes the engine operates under.
///
/// The full mail scope is required because `delete_emails_permanently` and
/// `delete_thread_permanently` bypass the trash; the narrower scopes cover
/// everything else.
pub const REQUIRED_SCOPES: &[&str] = &[
    "https://mail.google.com/",
    "https://www.googleapis.com/auth/gmail.modify",
    "https://www.googleapis.com/auth/gmail.labels",
    "https://www.googleapis.com/auth/gmail.settings.basic",
];

/// Type alias for the Gmail hub to simplify signatures
pub type GmailHub =
    Gmail<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>>;

/// Initialize the Gmail hub with OAuth2 authentication.
///
/// Uses the installed-application flow with token persistence so subsequent
/// runs refresh silently from `token_cache_path`.
pub async fn initialize_gmail_hub(
    credentials_path: &Path,
    token_cache_path: &Path,
) -> Result<GmailHub> {
    let secret = yup_oauth2::read_application_secret(credentials_path)
        .await
        .map_err(|e| EngineError::Auth(format!("Failed to read credentials: {e}")))?;

    let auth = yup_oauth2::InstalledFlowAuthenticator::builder(
        secret,
        yup_oauth2::InstalledFlowReturnMethod::HTTPRedirect,
    )
    .persist_tokens_to_disk(token_cache_path)
    .build()
    .await
    .map_err(|e| EngineError::Auth(format!("Failed to build authenticator: {e}")))?;

    // Pre-authenticate so the cached token carries the scopes concurrent
    // operations will ask for
    let _token = auth
        .token(REQUIRED_SCOPES)
        .await
        .map_err(|e| EngineError::Auth(format!("Failed to obtain token: {e}")))?;

    // HTTP/1 for compatibility with google-gmail1
    let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
        .build(
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_native_roots()
                .map_err(|e| EngineError::Auth(format!("Failed to load TLS roots: {e}")))?
                .https_or_http()
                .enable_http1()
                .build(),
        );

    Ok(Gmail::new(client, auth))
}
