//! Mailbox settings operations: vacation responder, IMAP, POP.
//! Pure passthroughs over the client views.

use std::sync::Arc;

use crate::client::GmailApi;
use crate::error::Result;
use crate::models::{ImapSettingsView, PopSettingsView, VacationSettingsView};

pub struct SettingsOps {
    api: Arc<dyn GmailApi>,
}

impl SettingsOps {
    pub fn new(api: Arc<dyn GmailApi>) -> Self {
        Self { api }
    }

    pub async fn get_vacation_settings(&self) -> Result<VacationSettingsView> {
        self.api.get_vacation().await
    }

    pub async fn update_vacation_settings(
        &self,
        settings: VacationSettingsView,
    ) -> Result<VacationSettingsView> {
        self.api.update_vacation(settings).await
    }

    pub async fn get_imap_settings(&self) -> Result<ImapSettingsView> {
        self.api.get_imap().await
    }

    pub async fn update_imap_settings(
        &self,
        settings: ImapSettingsView,
    ) -> Result<ImapSettingsView> {
        self.api.update_imap(settings).await
    }

    pub async fn get_pop_settings(&self) -> Result<PopSettingsView> {
        self.api.get_pop().await
    }

    pub async fn update_pop_settings(&self, settings: PopSettingsView) -> Result<PopSettingsView> {
        self.api.update_pop(settings).await
    }
}
