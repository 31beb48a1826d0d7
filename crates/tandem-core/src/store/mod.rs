mod codec;
mod sqlite_impl;

pub use codec::{decode_snapshot, encode_snapshot, SNAPSHOT_SCHEMA_VERSION};
pub use sqlite_impl::{MappingStore, CURRENT_SCHEMA_VERSION};

use time::OffsetDateTime;

use crate::identifiers::{
    GitlabIssueIid, GitlabProjectId, GitlabUserId, MappingRecordId, ProjectRecordId,
    RedmineIssueId, RedmineProjectId, RedmineUserId, UserRecordId,
};
use crate::issue::CanonicalSnapshot;

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectRecord {
    pub id: ProjectRecordId,
    pub external_a_id: RedmineProjectId,
    pub external_a_key: String,
    pub last_sync_at: Option<OffsetDateTime>,
}

/// One-to-one child of [`ProjectRecord`] describing the GitLab counterpart.
/// `external_b_id` stays `None` until resolution succeeds; the project is
/// *unlinked* and skipped by reconciliation until then.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteProjectRecord {
    pub project_id: ProjectRecordId,
    pub external_b_id: Option<GitlabProjectId>,
    pub path_with_namespace: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectPair {
    pub project: ProjectRecord,
    pub remote: RemoteProjectRecord,
}

impl ProjectPair {
    pub fn gitlab_id(&self) -> Option<GitlabProjectId> {
        self.remote.external_b_id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MappingRecord {
    pub id: MappingRecordId,
    pub project_id: ProjectRecordId,
    pub external_a_issue_id: RedmineIssueId,
    pub external_b_issue_id: GitlabIssueIid,
    /// `None` only between mapping creation and the first successful
    /// reconciliation.
    pub canonical: Option<CanonicalSnapshot>,
    pub last_observed_external_event_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserRecordId,
    pub external_a_user_id: Option<RedmineUserId>,
    pub external_b_user_id: Option<GitlabUserId>,
    pub display_key: String,
}

impl UserRecord {
    /// A usable pair requires both platform ids.
    pub fn is_pair(&self) -> bool {
        self.external_a_user_id.is_some() && self.external_b_user_id.is_some()
    }
}
