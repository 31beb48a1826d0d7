//! Shared domain model for the tandem synchronization engine: neutral issue
//! shapes, the platform adapter contracts, the backlink convention, and the
//! durable mapping store.

pub mod adapters;
pub mod backlink;
pub mod error;
pub mod identifiers;
pub mod issue;
pub mod store;

pub use adapters::{
    CustomFieldValue, GitlabAdapter, MemberInfo, NamedRef, RedmineAdapter, RedmineProjectInfo,
};
pub use error::{AdapterError, AdapterResult, SyncError};
pub use identifiers::{
    GitlabIssueIid, GitlabProjectId, GitlabUserId, MappingRecordId, Platform, ProjectRecordId,
    RedmineIssueId, RedmineProjectId, RedmineUserId, StatusId, TrackerId, UserRecordId,
};
pub use issue::{
    labels_equal, CanonicalSnapshot, GitlabIssueDraft, GitlabIssuePatch, IssueStatus, IssueView,
    RedmineIssueDraft, RedmineIssuePatch, SnapshotField,
};
pub use store::{
    decode_snapshot, encode_snapshot, MappingRecord, MappingStore, ProjectPair, ProjectRecord,
    RemoteProjectRecord, UserRecord, CURRENT_SCHEMA_VERSION, SNAPSHOT_SCHEMA_VERSION,
};
