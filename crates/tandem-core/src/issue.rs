use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

use crate::identifiers::{
    GitlabIssueIid, GitlabUserId, RedmineIssueId, RedmineUserId, StatusId, TrackerId, UserRecordId,
};

time::serde::format_description!(due_date_serde, Date, "[year]-[month]-[day]");

/// The neutral open/closed vocabulary. Redmine's status names and GitLab's
/// `opened`/`closed` states both collapse into this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueStatus {
    Open,
    Closed,
}

impl IssueStatus {
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Live issue state as observed through an adapter, already translated into
/// the neutral shape. `remote_id` is the Redmine issue id on platform A and
/// the project-scoped iid on platform B; `assignee_id` stays platform-local
/// until the engine translates it through the correlated user table.
#[derive(Debug, Clone, PartialEq)]
pub struct IssueView {
    pub remote_id: i64,
    pub title: String,
    /// Raw remote description, backlink line included if the remote has one.
    pub description: Option<String>,
    pub labels: Vec<String>,
    pub assignee_id: Option<i64>,
    pub due_date: Option<Date>,
    pub status: IssueStatus,
    pub updated_at: Option<OffsetDateTime>,
    pub web_url: String,
}

impl IssueView {
    pub fn redmine_id(&self) -> RedmineIssueId {
        RedmineIssueId::new(self.remote_id)
    }

    pub fn gitlab_iid(&self) -> GitlabIssueIid {
        GitlabIssueIid::new(self.remote_id)
    }
}

/// The engine's record of the last state both sides agreed on, used as the
/// three-way merge base. Assignee is the correlated user-row id, never a
/// platform-local id; the description is the backlink-stripped payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalSnapshot {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<UserRecordId>,
    #[serde(
        default,
        with = "due_date_serde::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub due_date: Option<Date>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<IssueStatus>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<OffsetDateTime>,
}

/// The six logical fields the engine converges. `updated_at` is a hint, not a
/// converged field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotField {
    Title,
    Description,
    Labels,
    Assignee,
    DueDate,
    Status,
}

impl SnapshotField {
    pub const ALL: [SnapshotField; 6] = [
        SnapshotField::Title,
        SnapshotField::Description,
        SnapshotField::Labels,
        SnapshotField::Assignee,
        SnapshotField::DueDate,
        SnapshotField::Status,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Description => "description",
            Self::Labels => "labels",
            Self::Assignee => "assignee",
            Self::DueDate => "due_date",
            Self::Status => "status",
        }
    }
}

impl CanonicalSnapshot {
    /// Field-wise value equality. Title and description compare ordinally
    /// (descriptions are stored payload-only, so backlink drift never shows
    /// up here); labels compare as a case-insensitive set; assignee and due
    /// date are nullable-equal; status compares on the neutral vocabulary.
    pub fn field_eq(&self, other: &Self, field: SnapshotField) -> bool {
        match field {
            SnapshotField::Title => self.title == other.title,
            SnapshotField::Description => self.description == other.description,
            SnapshotField::Labels => labels_equal(&self.labels, &other.labels),
            SnapshotField::Assignee => self.assignee == other.assignee,
            SnapshotField::DueDate => self.due_date == other.due_date,
            SnapshotField::Status => self.status == other.status,
        }
    }

    pub fn converged_with(&self, other: &Self) -> bool {
        SnapshotField::ALL
            .iter()
            .all(|field| self.field_eq(other, *field))
    }

    /// Copies one field's value from `source`, leaving the rest untouched.
    pub fn adopt_field(&mut self, source: &Self, field: SnapshotField) {
        match field {
            SnapshotField::Title => self.title = source.title.clone(),
            SnapshotField::Description => self.description = source.description.clone(),
            SnapshotField::Labels => self.labels = source.labels.clone(),
            SnapshotField::Assignee => self.assignee = source.assignee,
            SnapshotField::DueDate => self.due_date = source.due_date,
            SnapshotField::Status => self.status = source.status,
        }
    }
}

/// Case-insensitive set equality; label order is insignificant.
pub fn labels_equal(left: &[String], right: &[String]) -> bool {
    fn normalized(labels: &[String]) -> Vec<String> {
        let mut keys = labels
            .iter()
            .map(|label| label.trim().to_lowercase())
            .collect::<Vec<_>>();
        keys.sort();
        keys.dedup();
        keys
    }

    normalized(left) == normalized(right)
}

/// Partial update for a Redmine issue. Outer `None` means *do not touch*;
/// for the nullable fields the inner `None` means *clear on the remote*.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RedmineIssuePatch {
    pub subject: Option<String>,
    pub description: Option<String>,
    pub tracker_id: Option<TrackerId>,
    pub status_id: Option<StatusId>,
    pub assigned_to_id: Option<Option<RedmineUserId>>,
    pub due_date: Option<Option<Date>>,
}

impl RedmineIssuePatch {
    pub fn is_empty(&self) -> bool {
        self.subject.is_none()
            && self.description.is_none()
            && self.tracker_id.is_none()
            && self.status_id.is_none()
            && self.assigned_to_id.is_none()
            && self.due_date.is_none()
    }
}

/// Partial update for a GitLab issue, same present/absent discipline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GitlabIssuePatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub labels: Option<Vec<String>>,
    pub assignee_id: Option<Option<GitlabUserId>>,
    pub due_date: Option<Option<Date>>,
    pub status: Option<IssueStatus>,
}

impl GitlabIssuePatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.labels.is_none()
            && self.assignee_id.is_none()
            && self.due_date.is_none()
            && self.status.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RedmineIssueDraft {
    pub subject: String,
    pub description: Option<String>,
    pub tracker_id: Option<TrackerId>,
    pub status_id: Option<StatusId>,
    pub assigned_to_id: Option<RedmineUserId>,
    pub due_date: Option<Date>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GitlabIssueDraft {
    pub title: String,
    pub description: Option<String>,
    pub labels: Vec<String>,
    pub assignee_id: Option<GitlabUserId>,
    pub due_date: Option<Date>,
    pub status: IssueStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(title: &str) -> CanonicalSnapshot {
        CanonicalSnapshot {
            title: title.to_owned(),
            description: None,
            labels: Vec::new(),
            assignee: None,
            due_date: None,
            status: Some(IssueStatus::Open),
            updated_at: None,
        }
    }

    #[test]
    fn labels_compare_as_case_insensitive_set() {
        let left = vec!["Bug".to_owned(), "feature".to_owned()];
        let right = vec!["FEATURE".to_owned(), "bug".to_owned()];
        assert!(labels_equal(&left, &right));
        assert!(!labels_equal(&left, &["bug".to_owned()]));
        assert!(labels_equal(&[], &[]));
    }

    #[test]
    fn field_eq_is_per_field() {
        let mut left = snapshot("One");
        let right = snapshot("One");
        assert!(left.converged_with(&right));

        left.due_date = Some(time::macros::date!(2025 - 02 - 01));
        assert!(left.field_eq(&right, SnapshotField::Title));
        assert!(!left.field_eq(&right, SnapshotField::DueDate));
        assert!(!left.converged_with(&right));
    }

    #[test]
    fn adopt_field_copies_only_the_named_field() {
        let mut target = snapshot("Old");
        let mut source = snapshot("New");
        source.status = Some(IssueStatus::Closed);

        target.adopt_field(&source, SnapshotField::Title);
        assert_eq!(target.title, "New");
        assert_eq!(target.status, Some(IssueStatus::Open));
    }

    #[test]
    fn empty_patches_report_empty() {
        assert!(RedmineIssuePatch::default().is_empty());
        assert!(GitlabIssuePatch::default().is_empty());

        let patch = GitlabIssuePatch {
            assignee_id: Some(None),
            ..GitlabIssuePatch::default()
        };
        assert!(!patch.is_empty());
    }
}
