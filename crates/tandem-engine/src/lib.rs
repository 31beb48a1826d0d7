//! The reconciliation pipeline: reference-cache refresh, project discovery,
//! member correlation, pair discovery, three-way reconciliation, and the
//! poll driver that runs one full pass per tick.

mod discovery;
mod driver;
mod members;
mod pairing;
mod pass;
mod reconcile;
mod reference;
mod users;

pub use driver::{PollConfig, PollDriver, PollStatus, PollStatusHandle};
pub use pass::{run_pass, PassSummary};
pub use reference::RefData;
pub use users::UserDirectory;

use std::sync::{Arc, Mutex, MutexGuard};

use tandem_core::{GitlabAdapter, MappingStore, RedmineAdapter, SyncError};

/// The explicit construction graph the engine works against: two adapters
/// and the shared mapping store, plus the two configuration values the
/// pipeline itself consumes. Built once at startup, long-lived.
pub struct SyncDeps {
    pub redmine: Arc<dyn RedmineAdapter>,
    pub gitlab: Arc<dyn GitlabAdapter>,
    pub store: Mutex<MappingStore>,
    /// Name of the Redmine project custom field holding the GitLab repo URL.
    pub custom_field_name: String,
    /// Ordered category vocabulary; pairs Redmine tracker names with GitLab
    /// labels and gates seeding/creation.
    pub category_keys: Vec<String>,
}

impl SyncDeps {
    pub fn new(
        redmine: Arc<dyn RedmineAdapter>,
        gitlab: Arc<dyn GitlabAdapter>,
        store: MappingStore,
        custom_field_name: impl Into<String>,
        category_keys: Vec<String>,
    ) -> Self {
        Self {
            redmine,
            gitlab,
            store: Mutex::new(store),
            custom_field_name: custom_field_name.into(),
            category_keys,
        }
    }

    /// Short-lived store access; never held across a suspension point.
    pub(crate) fn store(&self) -> Result<MutexGuard<'_, MappingStore>, SyncError> {
        self.store
            .lock()
            .map_err(|_| SyncError::Persistence("mapping store lock poisoned".to_owned()))
    }

    pub(crate) fn is_category_key(&self, label: &str) -> bool {
        self.category_keys
            .iter()
            .any(|key| key.eq_ignore_ascii_case(label.trim()))
    }
}
