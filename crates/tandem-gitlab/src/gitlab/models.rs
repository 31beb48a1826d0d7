//! GitLab wire DTOs. Parsing stays inside this crate.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct ProjectDto {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MemberDto {
    pub id: i64,
    pub username: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AssigneeDto {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IssueDto {
    pub iid: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub assignee: Option<AssigneeDto>,
    #[serde(default)]
    pub due_date: Option<String>,
    pub state: String,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub web_url: Option<String>,
}
