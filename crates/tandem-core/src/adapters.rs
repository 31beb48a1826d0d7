use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::AdapterResult;
use crate::identifiers::{
    GitlabIssueIid, GitlabProjectId, RedmineIssueId, RedmineProjectId,
};
use crate::issue::{
    GitlabIssueDraft, GitlabIssuePatch, IssueView, RedmineIssueDraft, RedmineIssuePatch,
};

/// A named reference row from Redmine's global vocabularies (trackers and
/// issue statuses).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedRef {
    pub id: i64,
    pub name: String,
}

/// A project member as reported by either platform. `handle` is the login
/// (GitLab username, Redmine login where exposed); `name` the display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub id: i64,
    pub handle: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomFieldValue {
    pub name: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedmineProjectInfo {
    pub id: RedmineProjectId,
    pub key: String,
    pub name: String,
    pub custom_fields: Vec<CustomFieldValue>,
}

impl RedmineProjectInfo {
    pub fn custom_field(&self, name: &str) -> Option<&str> {
        self.custom_fields
            .iter()
            .find(|field| field.name.eq_ignore_ascii_case(name))
            .and_then(|field| field.value.as_deref())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

/// Read/write contract over Redmine (platform A). Implementations hide REST
/// shape, auth, and pagination; retry policy lives in the transport below
/// this trait. Every operation observes the caller's cancellation token.
#[async_trait]
pub trait RedmineAdapter: Send + Sync {
    async fn health_check(&self, cancel: &CancellationToken) -> AdapterResult<()>;

    async fn list_projects(
        &self,
        cancel: &CancellationToken,
    ) -> AdapterResult<Vec<RedmineProjectInfo>>;

    async fn list_members(
        &self,
        project: RedmineProjectId,
        cancel: &CancellationToken,
    ) -> AdapterResult<Vec<MemberInfo>>;

    /// All issues of the project regardless of state, paged until exhaustion.
    async fn list_issues(
        &self,
        project: RedmineProjectId,
        cancel: &CancellationToken,
    ) -> AdapterResult<Vec<IssueView>>;

    async fn get_issue(
        &self,
        issue: RedmineIssueId,
        cancel: &CancellationToken,
    ) -> AdapterResult<IssueView>;

    async fn create_issue(
        &self,
        project: RedmineProjectId,
        draft: RedmineIssueDraft,
        cancel: &CancellationToken,
    ) -> AdapterResult<RedmineIssueId>;

    /// A patch with no set fields is a no-op and must not become a request.
    async fn update_issue(
        &self,
        issue: RedmineIssueId,
        patch: RedmineIssuePatch,
        cancel: &CancellationToken,
    ) -> AdapterResult<()>;

    async fn list_trackers(&self, cancel: &CancellationToken) -> AdapterResult<Vec<NamedRef>>;

    async fn list_statuses(&self, cancel: &CancellationToken) -> AdapterResult<Vec<NamedRef>>;

    /// Public URL of an issue, for composing backlinks that point at A.
    fn issue_url(&self, issue: RedmineIssueId) -> String;
}

/// Read/write contract over GitLab (platform B).
#[async_trait]
pub trait GitlabAdapter: Send + Sync {
    async fn health_check(&self, cancel: &CancellationToken) -> AdapterResult<()>;

    /// Resolves a `group/project` path to the numeric project id.
    async fn resolve_project_id(
        &self,
        path_with_namespace: &str,
        cancel: &CancellationToken,
    ) -> AdapterResult<GitlabProjectId>;

    async fn list_members(
        &self,
        project: GitlabProjectId,
        cancel: &CancellationToken,
    ) -> AdapterResult<Vec<MemberInfo>>;

    async fn list_issues(
        &self,
        project: GitlabProjectId,
        cancel: &CancellationToken,
    ) -> AdapterResult<Vec<IssueView>>;

    async fn get_issue(
        &self,
        project: GitlabProjectId,
        issue: GitlabIssueIid,
        cancel: &CancellationToken,
    ) -> AdapterResult<IssueView>;

    async fn create_issue(
        &self,
        project: GitlabProjectId,
        draft: GitlabIssueDraft,
        cancel: &CancellationToken,
    ) -> AdapterResult<GitlabIssueIid>;

    async fn update_issue(
        &self,
        project: GitlabProjectId,
        issue: GitlabIssueIid,
        patch: GitlabIssuePatch,
        cancel: &CancellationToken,
    ) -> AdapterResult<()>;

    /// Public URL of an issue, for composing backlinks that point at B.
    fn issue_url(&self, path_with_namespace: &str, issue: GitlabIssueIid) -> String;
}
