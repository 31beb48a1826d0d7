//! Redmine wire DTOs. Parsing stays inside this crate; the engine only ever
//! sees the neutral shapes from `tandem-core`.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct NamedDto {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProjectsPage {
    pub projects: Vec<ProjectDto>,
    #[serde(default)]
    pub total_count: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProjectDto {
    pub id: i64,
    pub identifier: String,
    pub name: String,
    #[serde(default)]
    pub custom_fields: Vec<CustomFieldDto>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CustomFieldDto {
    pub name: String,
    /// Redmine renders multi-value fields as arrays; single values as strings.
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MembershipsPage {
    pub memberships: Vec<MembershipDto>,
    #[serde(default)]
    pub total_count: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MembershipDto {
    /// Group memberships carry `group` instead; those are skipped.
    #[serde(default)]
    pub user: Option<NamedDto>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IssuesPage {
    pub issues: Vec<IssueDto>,
    #[serde(default)]
    pub total_count: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IssueEnvelope {
    pub issue: IssueDto,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IssueDto {
    pub id: i64,
    pub subject: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tracker: Option<NamedDto>,
    #[serde(default)]
    pub status: Option<NamedDto>,
    #[serde(default)]
    pub assigned_to: Option<NamedDto>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub updated_on: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreatedIssueEnvelope {
    pub issue: CreatedIssueDto,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreatedIssueDto {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TrackersEnvelope {
    pub trackers: Vec<NamedDto>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusesEnvelope {
    pub issue_statuses: Vec<NamedDto>,
}

impl CustomFieldDto {
    pub(crate) fn value_as_text(&self) -> Option<String> {
        match self.value.as_ref()? {
            serde_json::Value::String(text) => Some(text.clone()),
            serde_json::Value::Array(values) => values
                .iter()
                .find_map(|value| value.as_str().map(ToOwned::to_owned)),
            _ => None,
        }
    }
}
