//! Thin operation layers over the Gmail client, one per resource family.
//! These produce exactly the payload shapes the tool surface returns.

pub mod drafts;
pub mod messages;
pub mod settings;
pub mod threads;

pub use drafts::{DraftContent, DraftOps};
pub use messages::{MessageOps, MarkAs};
pub use settings::SettingsOps;
pub use threads::ThreadOps;
