mod config;
mod models;
mod transport;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tandem_core::{
    AdapterError, AdapterResult, CustomFieldValue, IssueStatus, IssueView, MemberInfo, NamedRef,
    RedmineAdapter, RedmineIssueDraft, RedmineIssueId, RedmineIssuePatch, RedmineProjectId,
    RedmineProjectInfo,
};
use time::format_description::well_known::Rfc3339;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use tokio_util::sync::CancellationToken;

pub use config::{RedmineConfig, DEFAULT_PAGE_SIZE};
pub use transport::{
    RedmineTransport, ReqwestRedmineTransport, RestMethod, RestRequest, RestResponse,
};

use models::{
    CreatedIssueEnvelope, IssueDto, IssueEnvelope, IssuesPage, MembershipsPage, NamedDto,
    ProjectsPage, StatusesEnvelope, TrackersEnvelope,
};

const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Platform-A adapter over the Redmine REST API.
pub struct RedmineClient {
    config: RedmineConfig,
    transport: Arc<dyn RedmineTransport>,
}

impl RedmineClient {
    pub fn new(config: RedmineConfig) -> AdapterResult<Self> {
        let transport = ReqwestRedmineTransport::new(&config)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: RedmineConfig, transport: Arc<dyn RedmineTransport>) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &RedmineConfig {
        &self.config
    }

    fn decode<T: serde::de::DeserializeOwned>(body: &str, context: &str) -> AdapterResult<T> {
        serde_json::from_str(body).map_err(|err| {
            AdapterError::Decode(format!("failed to decode Redmine {context}: {err}"))
        })
    }
}

fn parse_due_date(raw: &str) -> AdapterResult<Date> {
    Date::parse(raw, DATE_FORMAT)
        .map_err(|err| AdapterError::Decode(format!("invalid Redmine due date '{raw}': {err}")))
}

fn format_due_date(date: Date) -> AdapterResult<String> {
    date.format(DATE_FORMAT)
        .map_err(|err| AdapterError::Decode(format!("failed to format due date: {err}")))
}

fn parse_updated_on(raw: &str) -> AdapterResult<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339)
        .map_err(|err| AdapterError::Decode(format!("invalid Redmine timestamp '{raw}': {err}")))
}

fn status_of(status: Option<&NamedDto>) -> IssueStatus {
    match status {
        Some(named) if named.name.eq_ignore_ascii_case("closed") => IssueStatus::Closed,
        _ => IssueStatus::Open,
    }
}

impl RedmineClient {
    fn issue_view(&self, dto: IssueDto) -> AdapterResult<IssueView> {
        let due_date = dto.due_date.as_deref().map(parse_due_date).transpose()?;
        let updated_at = dto.updated_on.as_deref().map(parse_updated_on).transpose()?;
        let labels = dto
            .tracker
            .as_ref()
            .map(|tracker| vec![tracker.name.clone()])
            .unwrap_or_default();

        Ok(IssueView {
            remote_id: dto.id,
            title: dto.subject,
            description: dto.description.filter(|text| !text.is_empty()),
            labels,
            assignee_id: dto.assigned_to.as_ref().map(|user| user.id),
            due_date,
            status: status_of(dto.status.as_ref()),
            updated_at,
            web_url: format!("{}/issues/{}", self.config.public_url, dto.id),
        })
    }
}

fn patch_body(patch: &RedmineIssuePatch) -> AdapterResult<serde_json::Value> {
    let mut issue = serde_json::Map::new();
    if let Some(subject) = &patch.subject {
        issue.insert("subject".to_owned(), json!(subject));
    }
    if let Some(description) = &patch.description {
        issue.insert("description".to_owned(), json!(description));
    }
    if let Some(tracker_id) = patch.tracker_id {
        issue.insert("tracker_id".to_owned(), json!(tracker_id.get()));
    }
    if let Some(status_id) = patch.status_id {
        issue.insert("status_id".to_owned(), json!(status_id.get()));
    }
    if let Some(assigned_to) = &patch.assigned_to_id {
        // Redmine clears the assignee on an empty string, not on null.
        match assigned_to {
            Some(id) => issue.insert("assigned_to_id".to_owned(), json!(id.get())),
            None => issue.insert("assigned_to_id".to_owned(), json!("")),
        };
    }
    if let Some(due_date) = &patch.due_date {
        match due_date {
            Some(date) => issue.insert("due_date".to_owned(), json!(format_due_date(*date)?)),
            None => issue.insert("due_date".to_owned(), json!("")),
        };
    }

    Ok(json!({ "issue": issue }))
}

fn draft_body(project: RedmineProjectId, draft: &RedmineIssueDraft) -> AdapterResult<serde_json::Value> {
    let mut issue = serde_json::Map::new();
    issue.insert("project_id".to_owned(), json!(project.get()));
    issue.insert("subject".to_owned(), json!(draft.subject));
    if let Some(description) = &draft.description {
        issue.insert("description".to_owned(), json!(description));
    }
    if let Some(tracker_id) = draft.tracker_id {
        issue.insert("tracker_id".to_owned(), json!(tracker_id.get()));
    }
    if let Some(status_id) = draft.status_id {
        issue.insert("status_id".to_owned(), json!(status_id.get()));
    }
    if let Some(assigned_to_id) = draft.assigned_to_id {
        issue.insert("assigned_to_id".to_owned(), json!(assigned_to_id.get()));
    }
    if let Some(due_date) = draft.due_date {
        issue.insert("due_date".to_owned(), json!(format_due_date(due_date)?));
    }

    Ok(json!({ "issue": issue }))
}

#[async_trait]
impl RedmineAdapter for RedmineClient {
    async fn health_check(&self, cancel: &CancellationToken) -> AdapterResult<()> {
        self.transport
            .execute(RestRequest::get("/users/current.json"), cancel)
            .await?;
        Ok(())
    }

    async fn list_projects(
        &self,
        cancel: &CancellationToken,
    ) -> AdapterResult<Vec<RedmineProjectInfo>> {
        let mut projects = Vec::new();
        let mut offset = 0_u64;

        loop {
            let request = RestRequest::get("/projects.json")
                .with_query("limit", self.config.page_size.to_string())
                .with_query("offset", offset.to_string());
            let response = self.transport.execute(request, cancel).await?;
            let page: ProjectsPage = Self::decode(&response.body, "projects page")?;

            let fetched = page.projects.len() as u64;
            for dto in page.projects {
                projects.push(RedmineProjectInfo {
                    id: RedmineProjectId::new(dto.id),
                    key: dto.identifier,
                    name: dto.name,
                    custom_fields: dto
                        .custom_fields
                        .iter()
                        .map(|field| CustomFieldValue {
                            name: field.name.clone(),
                            value: field.value_as_text(),
                        })
                        .collect(),
                });
            }

            offset += fetched;
            if fetched == 0 || offset >= page.total_count {
                break;
            }
        }

        Ok(projects)
    }

    async fn list_members(
        &self,
        project: RedmineProjectId,
        cancel: &CancellationToken,
    ) -> AdapterResult<Vec<MemberInfo>> {
        let mut members = Vec::new();
        let mut offset = 0_u64;

        loop {
            let request = RestRequest::get(format!("/projects/{}/memberships.json", project))
                .with_query("limit", self.config.page_size.to_string())
                .with_query("offset", offset.to_string());
            let response = self.transport.execute(request, cancel).await?;
            let page: MembershipsPage = Self::decode(&response.body, "memberships page")?;

            let fetched = page.memberships.len() as u64;
            for membership in page.memberships {
                if let Some(user) = membership.user {
                    // Redmine memberships expose no login; the display name
                    // doubles as the handle.
                    members.push(MemberInfo {
                        id: user.id,
                        handle: user.name.clone(),
                        name: user.name,
                    });
                }
            }

            offset += fetched;
            if fetched == 0 || offset >= page.total_count {
                break;
            }
        }

        Ok(members)
    }

    async fn list_issues(
        &self,
        project: RedmineProjectId,
        cancel: &CancellationToken,
    ) -> AdapterResult<Vec<IssueView>> {
        let mut issues = Vec::new();
        let mut offset = 0_u64;

        loop {
            let request = RestRequest::get("/issues.json")
                .with_query("project_id", project.to_string())
                .with_query("status_id", "*")
                .with_query("limit", self.config.page_size.to_string())
                .with_query("offset", offset.to_string());
            let response = self.transport.execute(request, cancel).await?;
            let page: IssuesPage = Self::decode(&response.body, "issues page")?;

            let fetched = page.issues.len() as u64;
            for dto in page.issues {
                issues.push(self.issue_view(dto)?);
            }

            offset += fetched;
            if fetched == 0 || offset >= page.total_count {
                break;
            }
        }

        Ok(issues)
    }

    async fn get_issue(
        &self,
        issue: RedmineIssueId,
        cancel: &CancellationToken,
    ) -> AdapterResult<IssueView> {
        let request = RestRequest::get(format!("/issues/{issue}.json"));
        let response = self.transport.execute(request, cancel).await?;
        let envelope: IssueEnvelope = Self::decode(&response.body, "issue")?;
        self.issue_view(envelope.issue)
    }

    async fn create_issue(
        &self,
        project: RedmineProjectId,
        draft: RedmineIssueDraft,
        cancel: &CancellationToken,
    ) -> AdapterResult<RedmineIssueId> {
        let request = RestRequest::post("/issues.json", draft_body(project, &draft)?);
        let response = self.transport.execute(request, cancel).await?;
        let envelope: CreatedIssueEnvelope = Self::decode(&response.body, "created issue")?;
        Ok(RedmineIssueId::new(envelope.issue.id))
    }

    async fn update_issue(
        &self,
        issue: RedmineIssueId,
        patch: RedmineIssuePatch,
        cancel: &CancellationToken,
    ) -> AdapterResult<()> {
        if patch.is_empty() {
            return Ok(());
        }

        let request = RestRequest::put(format!("/issues/{issue}.json"), patch_body(&patch)?);
        self.transport.execute(request, cancel).await?;
        Ok(())
    }

    async fn list_trackers(&self, cancel: &CancellationToken) -> AdapterResult<Vec<NamedRef>> {
        let response = self
            .transport
            .execute(RestRequest::get("/trackers.json"), cancel)
            .await?;
        let envelope: TrackersEnvelope = Self::decode(&response.body, "trackers")?;
        Ok(envelope
            .trackers
            .into_iter()
            .map(|dto| NamedRef {
                id: dto.id,
                name: dto.name,
            })
            .collect())
    }

    async fn list_statuses(&self, cancel: &CancellationToken) -> AdapterResult<Vec<NamedRef>> {
        let response = self
            .transport
            .execute(RestRequest::get("/issue_statuses.json"), cancel)
            .await?;
        let envelope: StatusesEnvelope = Self::decode(&response.body, "issue statuses")?;
        Ok(envelope
            .issue_statuses
            .into_iter()
            .map(|dto| NamedRef {
                id: dto.id,
                name: dto.name,
            })
            .collect())
    }

    fn issue_url(&self, issue: RedmineIssueId) -> String {
        format!("{}/issues/{}", self.config.public_url, issue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tandem_core::{StatusId, TrackerId};

    struct StubTransport {
        requests: Mutex<Vec<RestRequest>>,
        responses: Mutex<Vec<AdapterResult<RestResponse>>>,
    }

    impl StubTransport {
        fn new(responses: Vec<AdapterResult<RestResponse>>) -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                responses: Mutex::new(responses),
            }
        }

        fn ok(body: &str) -> AdapterResult<RestResponse> {
            Ok(RestResponse {
                status: 200,
                body: body.to_owned(),
            })
        }
    }

    #[async_trait]
    impl RedmineTransport for StubTransport {
        async fn execute(
            &self,
            request: RestRequest,
            _cancel: &CancellationToken,
        ) -> AdapterResult<RestResponse> {
            self.requests.lock().expect("requests lock").push(request);
            let mut responses = self.responses.lock().expect("responses lock");
            if responses.is_empty() {
                panic!("stub transport exhausted");
            }
            responses.remove(0)
        }
    }

    fn client_with(responses: Vec<AdapterResult<RestResponse>>) -> (RedmineClient, Arc<StubTransport>) {
        let transport = Arc::new(StubTransport::new(responses));
        let config = RedmineConfig::new("https://redmine.example.com", "key")
            .with_public_url("https://redmine.example.com");
        (
            RedmineClient::with_transport(config, Arc::clone(&transport) as Arc<dyn RedmineTransport>),
            transport,
        )
    }

    #[tokio::test]
    async fn issues_page_until_exhaustion_and_translate() {
        let page_one = r#"{
            "issues": [{
                "id": 10,
                "subject": "Fix crash",
                "description": "boom",
                "tracker": {"id": 2, "name": "Bug"},
                "status": {"id": 5, "name": "Closed"},
                "assigned_to": {"id": 5, "name": "Alice"},
                "due_date": "2025-02-01",
                "updated_on": "2025-01-10T12:00:00Z"
            }],
            "total_count": 2
        }"#;
        let page_two = r#"{
            "issues": [{
                "id": 11,
                "subject": "Add login",
                "tracker": {"id": 1, "name": "Feature"},
                "status": {"id": 1, "name": "New"}
            }],
            "total_count": 2
        }"#;

        let (client, transport) = client_with(vec![
            StubTransport::ok(page_one),
            StubTransport::ok(page_two),
        ]);
        let cancel = CancellationToken::new();
        let issues = client
            .list_issues(RedmineProjectId::new(3), &cancel)
            .await
            .expect("list issues");

        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].remote_id, 10);
        assert_eq!(issues[0].labels, vec!["Bug".to_owned()]);
        assert_eq!(issues[0].status, IssueStatus::Closed);
        assert_eq!(issues[0].assignee_id, Some(5));
        assert_eq!(
            issues[0].due_date,
            Some(time::macros::date!(2025 - 02 - 01))
        );
        assert_eq!(
            issues[0].web_url,
            "https://redmine.example.com/issues/10"
        );
        assert_eq!(issues[1].status, IssueStatus::Open);
        assert!(issues[1].description.is_none());

        let requests = transport.requests.lock().expect("requests");
        assert_eq!(requests.len(), 2);
        assert!(requests[0]
            .query
            .iter()
            .any(|(key, value)| key == "status_id" && value == "*"));
    }

    #[tokio::test]
    async fn empty_patch_is_a_no_op_not_a_request() {
        let (client, transport) = client_with(Vec::new());
        let cancel = CancellationToken::new();
        client
            .update_issue(RedmineIssueId::new(10), RedmineIssuePatch::default(), &cancel)
            .await
            .expect("no-op update");
        assert!(transport.requests.lock().expect("requests").is_empty());
    }

    #[tokio::test]
    async fn patch_serializes_clears_as_empty_strings() {
        let (client, transport) = client_with(vec![StubTransport::ok("{}")]);
        let cancel = CancellationToken::new();
        let patch = RedmineIssuePatch {
            subject: Some("New title".to_owned()),
            tracker_id: Some(TrackerId::new(2)),
            status_id: Some(StatusId::new(5)),
            assigned_to_id: Some(None),
            due_date: Some(None),
            ..RedmineIssuePatch::default()
        };
        client
            .update_issue(RedmineIssueId::new(10), patch, &cancel)
            .await
            .expect("update");

        let requests = transport.requests.lock().expect("requests");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, RestMethod::Put);
        let body = requests[0].body.as_ref().expect("body");
        assert_eq!(body["issue"]["subject"], "New title");
        assert_eq!(body["issue"]["tracker_id"], 2);
        assert_eq!(body["issue"]["status_id"], 5);
        assert_eq!(body["issue"]["assigned_to_id"], "");
        assert_eq!(body["issue"]["due_date"], "");
    }

    #[tokio::test]
    async fn missing_issue_surfaces_not_found() {
        let (client, _transport) = client_with(vec![Err(AdapterError::NotFound)]);
        let cancel = CancellationToken::new();
        let error = client
            .get_issue(RedmineIssueId::new(999), &cancel)
            .await
            .expect_err("missing issue");
        assert!(error.is_not_found());
    }

    #[tokio::test]
    async fn memberships_skip_group_rows() {
        let body = r#"{
            "memberships": [
                {"user": {"id": 5, "name": "Alice Smith"}},
                {"group": {"id": 9, "name": "Developers"}}
            ],
            "total_count": 2
        }"#;
        let (client, _transport) = client_with(vec![StubTransport::ok(body)]);
        let cancel = CancellationToken::new();
        let members = client
            .list_members(RedmineProjectId::new(3), &cancel)
            .await
            .expect("members");
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].name, "Alice Smith");
    }

    #[tokio::test]
    async fn custom_field_text_prefers_strings() {
        let body = r#"{
            "projects": [{
                "id": 3,
                "identifier": "app",
                "name": "App",
                "custom_fields": [
                    {"id": 7, "name": "Gitlab Repo", "value": "https://gitlab.example.com/team/app.git"},
                    {"id": 8, "name": "Tags", "value": ["one", "two"]}
                ]
            }],
            "total_count": 1
        }"#;
        let (client, _transport) = client_with(vec![StubTransport::ok(body)]);
        let cancel = CancellationToken::new();
        let projects = client.list_projects(&cancel).await.expect("projects");
        assert_eq!(projects.len(), 1);
        assert_eq!(
            projects[0].custom_field("gitlab repo"),
            Some("https://gitlab.example.com/team/app.git")
        );
        assert_eq!(projects[0].custom_field("Tags"), Some("one"));
        assert_eq!(projects[0].custom_field("absent"), None);
    }
}
