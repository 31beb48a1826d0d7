mod config;
mod models;
mod transport;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tandem_core::{
    AdapterError, AdapterResult, GitlabAdapter, GitlabIssueDraft, GitlabIssueIid,
    GitlabIssuePatch, GitlabProjectId, IssueStatus, IssueView, MemberInfo,
};
use time::format_description::well_known::Rfc3339;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use tokio_util::sync::CancellationToken;

pub use config::{GitlabConfig, DEFAULT_PAGE_SIZE};
pub use transport::{
    GitlabTransport, ReqwestGitlabTransport, RestMethod, RestRequest, RestResponse,
};

use models::{IssueDto, MemberDto, ProjectDto};

const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Platform-B adapter over the GitLab REST API (v4).
pub struct GitlabClient {
    config: GitlabConfig,
    transport: Arc<dyn GitlabTransport>,
}

impl GitlabClient {
    pub fn new(config: GitlabConfig) -> AdapterResult<Self> {
        let transport = ReqwestGitlabTransport::new(&config)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: GitlabConfig, transport: Arc<dyn GitlabTransport>) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &GitlabConfig {
        &self.config
    }

    fn decode<T: serde::de::DeserializeOwned>(body: &str, context: &str) -> AdapterResult<T> {
        serde_json::from_str(body).map_err(|err| {
            AdapterError::Decode(format!("failed to decode GitLab {context}: {err}"))
        })
    }

    /// Folds the issue's label list down to the first label that is one of
    /// the configured category keys. Everything else is invisible to the
    /// engine by design.
    fn fold_labels(&self, labels: &[String]) -> Vec<String> {
        labels
            .iter()
            .find(|label| self.config.is_category_label(label))
            .map(|label| vec![label.clone()])
            .unwrap_or_default()
    }

    fn issue_view(&self, dto: IssueDto) -> AdapterResult<IssueView> {
        let due_date = dto.due_date.as_deref().map(parse_due_date).transpose()?;
        let updated_at = dto
            .updated_at
            .as_deref()
            .map(parse_timestamp)
            .transpose()?;
        let status = if dto.state.eq_ignore_ascii_case("closed") {
            IssueStatus::Closed
        } else {
            IssueStatus::Open
        };
        let labels = self.fold_labels(&dto.labels);
        let web_url = dto
            .web_url
            .unwrap_or_else(|| format!("{}/-/issues/{}", self.config.public_url, dto.iid));

        Ok(IssueView {
            remote_id: dto.iid,
            title: dto.title,
            description: dto.description.filter(|text| !text.is_empty()),
            labels,
            assignee_id: dto.assignee.as_ref().map(|assignee| assignee.id),
            due_date,
            status,
            updated_at,
            web_url,
        })
    }

    async fn paged_get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        context: &str,
        cancel: &CancellationToken,
    ) -> AdapterResult<Vec<T>> {
        let mut collected = Vec::new();
        let mut page = 1_u32;

        loop {
            let request = RestRequest::get(path.to_owned())
                .with_query("per_page", self.config.page_size.to_string())
                .with_query("page", page.to_string());
            let response = self.transport.execute(request, cancel).await?;
            let mut items: Vec<T> = Self::decode(&response.body, context)?;
            let fetched = items.len();
            collected.append(&mut items);

            match response.next_page {
                Some(next) if fetched > 0 => page = next,
                _ => break,
            }
        }

        Ok(collected)
    }
}

fn parse_due_date(raw: &str) -> AdapterResult<Date> {
    Date::parse(raw, DATE_FORMAT)
        .map_err(|err| AdapterError::Decode(format!("invalid GitLab due date '{raw}': {err}")))
}

fn format_due_date(date: Date) -> AdapterResult<String> {
    date.format(DATE_FORMAT)
        .map_err(|err| AdapterError::Decode(format!("failed to format due date: {err}")))
}

fn parse_timestamp(raw: &str) -> AdapterResult<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339)
        .map_err(|err| AdapterError::Decode(format!("invalid GitLab timestamp '{raw}': {err}")))
}

fn encode_path(path_with_namespace: &str) -> String {
    path_with_namespace.replace('/', "%2F")
}

fn patch_body(patch: &GitlabIssuePatch) -> AdapterResult<serde_json::Value> {
    let mut body = serde_json::Map::new();
    if let Some(title) = &patch.title {
        body.insert("title".to_owned(), json!(title));
    }
    if let Some(description) = &patch.description {
        body.insert("description".to_owned(), json!(description));
    }
    if let Some(labels) = &patch.labels {
        body.insert("labels".to_owned(), json!(labels.join(",")));
    }
    if let Some(assignee) = &patch.assignee_id {
        // An empty id list unassigns.
        match assignee {
            Some(id) => body.insert("assignee_ids".to_owned(), json!([id.get()])),
            None => body.insert("assignee_ids".to_owned(), json!([])),
        };
    }
    if let Some(due_date) = &patch.due_date {
        match due_date {
            Some(date) => body.insert("due_date".to_owned(), json!(format_due_date(*date)?)),
            None => body.insert("due_date".to_owned(), serde_json::Value::Null),
        };
    }
    if let Some(status) = patch.status {
        let event = if status.is_closed() { "close" } else { "reopen" };
        body.insert("state_event".to_owned(), json!(event));
    }

    Ok(serde_json::Value::Object(body))
}

#[async_trait]
impl GitlabAdapter for GitlabClient {
    async fn health_check(&self, cancel: &CancellationToken) -> AdapterResult<()> {
        self.transport
            .execute(RestRequest::get("/user"), cancel)
            .await?;
        Ok(())
    }

    async fn resolve_project_id(
        &self,
        path_with_namespace: &str,
        cancel: &CancellationToken,
    ) -> AdapterResult<GitlabProjectId> {
        let request = RestRequest::get(format!("/projects/{}", encode_path(path_with_namespace)));
        let response = self.transport.execute(request, cancel).await?;
        let project: ProjectDto = Self::decode(&response.body, "project")?;
        Ok(GitlabProjectId::new(project.id))
    }

    async fn list_members(
        &self,
        project: GitlabProjectId,
        cancel: &CancellationToken,
    ) -> AdapterResult<Vec<MemberInfo>> {
        let members: Vec<MemberDto> = self
            .paged_get(
                &format!("/projects/{}/members/all", project),
                "members page",
                cancel,
            )
            .await?;

        Ok(members
            .into_iter()
            .map(|member| MemberInfo {
                id: member.id,
                handle: member.username,
                name: member.name,
            })
            .collect())
    }

    async fn list_issues(
        &self,
        project: GitlabProjectId,
        cancel: &CancellationToken,
    ) -> AdapterResult<Vec<IssueView>> {
        let issues: Vec<IssueDto> = self
            .paged_get(
                &format!("/projects/{}/issues", project),
                "issues page",
                cancel,
            )
            .await?;

        issues
            .into_iter()
            .map(|dto| self.issue_view(dto))
            .collect()
    }

    async fn get_issue(
        &self,
        project: GitlabProjectId,
        issue: GitlabIssueIid,
        cancel: &CancellationToken,
    ) -> AdapterResult<IssueView> {
        let request = RestRequest::get(format!("/projects/{}/issues/{}", project, issue));
        let response = self.transport.execute(request, cancel).await?;
        let dto: IssueDto = Self::decode(&response.body, "issue")?;
        self.issue_view(dto)
    }

    async fn create_issue(
        &self,
        project: GitlabProjectId,
        draft: GitlabIssueDraft,
        cancel: &CancellationToken,
    ) -> AdapterResult<GitlabIssueIid> {
        let mut body = serde_json::Map::new();
        body.insert("title".to_owned(), json!(draft.title));
        if let Some(description) = &draft.description {
            body.insert("description".to_owned(), json!(description));
        }
        if !draft.labels.is_empty() {
            body.insert("labels".to_owned(), json!(draft.labels.join(",")));
        }
        if let Some(assignee_id) = draft.assignee_id {
            body.insert("assignee_ids".to_owned(), json!([assignee_id.get()]));
        }
        if let Some(due_date) = draft.due_date {
            body.insert("due_date".to_owned(), json!(format_due_date(due_date)?));
        }

        let request = RestRequest::post(
            format!("/projects/{}/issues", project),
            serde_json::Value::Object(body),
        );
        let response = self.transport.execute(request, cancel).await?;
        let created: IssueDto = Self::decode(&response.body, "created issue")?;
        let iid = GitlabIssueIid::new(created.iid);

        // Issues are born open; a closed draft needs a follow-up state event.
        if draft.status.is_closed() {
            let close = RestRequest::put(
                format!("/projects/{}/issues/{}", project, iid),
                json!({ "state_event": "close" }),
            );
            self.transport.execute(close, cancel).await?;
        }

        Ok(iid)
    }

    async fn update_issue(
        &self,
        project: GitlabProjectId,
        issue: GitlabIssueIid,
        patch: GitlabIssuePatch,
        cancel: &CancellationToken,
    ) -> AdapterResult<()> {
        if patch.is_empty() {
            return Ok(());
        }

        let request = RestRequest::put(
            format!("/projects/{}/issues/{}", project, issue),
            patch_body(&patch)?,
        );
        self.transport.execute(request, cancel).await?;
        Ok(())
    }

    fn issue_url(&self, path_with_namespace: &str, issue: GitlabIssueIid) -> String {
        format!(
            "{}/{}/-/issues/{}",
            self.config.public_url, path_with_namespace, issue
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tandem_core::GitlabUserId;

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
            Self::ok_with_next(body, None)
        }

        fn ok_with_next(body: &str, next_page: Option<u32>) -> AdapterResult<RestResponse> {
            Ok(RestResponse {
                status: 200,
                body: body.to_owned(),
                next_page,
            })
        }
    }

    #[async_trait]
    impl GitlabTransport for StubTransport {
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

    fn client_with(
        responses: Vec<AdapterResult<RestResponse>>,
    ) -> (GitlabClient, Arc<StubTransport>) {
        let transport = Arc::new(StubTransport::new(responses));
        let config = GitlabConfig::new(
            "https://gitlab.example.com",
            "token",
            vec!["Feature".to_owned(), "Bug".to_owned(), "Task".to_owned()],
        );
        (
            GitlabClient::with_transport(config, Arc::clone(&transport) as Arc<dyn GitlabTransport>),
            transport,
        )
    }

    #[tokio::test]
    async fn issues_follow_next_page_until_exhaustion() {
        let page_one = r#"[{
            "iid": 3,
            "title": "Add login",
            "description": "Source: https://redmine.example.com/issues/7\n\nbody",
            "labels": ["backend", "Feature", "Bug"],
            "assignee": {"id": 42, "username": "alice"},
            "due_date": "2025-02-01",
            "state": "opened",
            "updated_at": "2025-01-10T12:00:00.000Z",
            "web_url": "https://gitlab.example.com/team/app/-/issues/3"
        }]"#;
        let page_two = r#"[{
            "iid": 4,
            "title": "Old bug",
            "labels": ["wontfix"],
            "state": "closed"
        }]"#;

        let (client, transport) = client_with(vec![
            StubTransport::ok_with_next(page_one, Some(2)),
            StubTransport::ok(page_two),
        ]);
        let cancel = CancellationToken::new();
        let issues = client
            .list_issues(GitlabProjectId::new(77), &cancel)
            .await
            .expect("issues");

        assert_eq!(issues.len(), 2);
        // First matching category key wins the fold; non-category labels drop.
        assert_eq!(issues[0].labels, vec!["Feature".to_owned()]);
        assert_eq!(issues[0].assignee_id, Some(42));
        assert_eq!(issues[0].status, IssueStatus::Open);
        assert_eq!(issues[1].labels, Vec::<String>::new());
        assert_eq!(issues[1].status, IssueStatus::Closed);

        let requests = transport.requests.lock().expect("requests");
        assert_eq!(requests.len(), 2);
        assert!(requests[1]
            .query
            .iter()
            .any(|(key, value)| key == "page" && value == "2"));
    }

    #[tokio::test]
    async fn patch_translates_status_and_clears() {
        let (client, transport) = client_with(vec![StubTransport::ok("{}")]);
        let cancel = CancellationToken::new();
        let patch = GitlabIssuePatch {
            title: Some("New title".to_owned()),
            labels: Some(vec!["Bug".to_owned()]),
            assignee_id: Some(None),
            due_date: Some(None),
            status: Some(IssueStatus::Closed),
            ..GitlabIssuePatch::default()
        };
        client
            .update_issue(GitlabProjectId::new(77), GitlabIssueIid::new(3), patch, &cancel)
            .await
            .expect("update");

        let requests = transport.requests.lock().expect("requests");
        assert_eq!(requests.len(), 1);
        let body = requests[0].body.as_ref().expect("body");
        assert_eq!(body["title"], "New title");
        assert_eq!(body["labels"], "Bug");
        assert_eq!(body["assignee_ids"], json!([]));
        assert_eq!(body["due_date"], serde_json::Value::Null);
        assert_eq!(body["state_event"], "close");
    }

    #[tokio::test]
    async fn empty_patch_is_a_no_op_not_a_request() {
        let (client, transport) = client_with(Vec::new());
        let cancel = CancellationToken::new();
        client
            .update_issue(
                GitlabProjectId::new(77),
                GitlabIssueIid::new(3),
                GitlabIssuePatch::default(),
                &cancel,
            )
            .await
            .expect("no-op");
        assert!(transport.requests.lock().expect("requests").is_empty());
    }

    #[tokio::test]
    async fn closed_draft_sends_follow_up_state_event() {
        let created = r#"{"iid": 9, "title": "Fix crash", "labels": [], "state": "opened"}"#;
        let (client, transport) = client_with(vec![
            StubTransport::ok(created),
            StubTransport::ok("{}"),
        ]);
        let cancel = CancellationToken::new();
        let draft = GitlabIssueDraft {
            title: "Fix crash".to_owned(),
            description: Some("Source: https://redmine.example.com/issues/10".to_owned()),
            labels: vec!["Bug".to_owned()],
            assignee_id: Some(GitlabUserId::new(42)),
            due_date: Some(time::macros::date!(2025 - 02 - 01)),
            status: IssueStatus::Closed,
        };
        let iid = client
            .create_issue(GitlabProjectId::new(77), draft, &cancel)
            .await
            .expect("create");
        assert_eq!(iid, GitlabIssueIid::new(9));

        let requests = transport.requests.lock().expect("requests");
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].method, RestMethod::Post);
        let create_body = requests[0].body.as_ref().expect("create body");
        assert_eq!(create_body["assignee_ids"], json!([42]));
        assert_eq!(create_body["due_date"], "2025-02-01");
        assert_eq!(requests[1].body.as_ref().expect("close body")["state_event"], "close");
    }

    #[tokio::test]
    async fn project_resolution_encodes_the_path() {
        let (client, transport) = client_with(vec![StubTransport::ok(r#"{"id": 77}"#)]);
        let cancel = CancellationToken::new();
        let id = client
            .resolve_project_id("team/app", &cancel)
            .await
            .expect("resolve");
        assert_eq!(id, GitlabProjectId::new(77));

        let requests = transport.requests.lock().expect("requests");
        assert_eq!(requests[0].path, "/projects/team%2Fapp");
    }

    #[tokio::test]
    async fn unknown_project_resolution_is_not_found() {
        let (client, _transport) = client_with(vec![Err(AdapterError::NotFound)]);
        let cancel = CancellationToken::new();
        let error = client
            .resolve_project_id("team/missing", &cancel)
            .await
            .expect_err("missing project");
        assert!(error.is_not_found());
    }
}
