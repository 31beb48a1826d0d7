use tandem_core::{
    CanonicalSnapshot, GitlabIssueIid, GitlabProjectId, GitlabUserId, IssueStatus, MappingStore,
    NamedRef, RedmineIssueId, RedmineProjectId, RedmineUserId, SyncError, CURRENT_SCHEMA_VERSION,
};

fn snapshot(title: &str) -> CanonicalSnapshot {
    CanonicalSnapshot {
        title: title.to_owned(),
        description: Some("body".to_owned()),
        labels: vec!["Bug".to_owned()],
        assignee: None,
        due_date: None,
        status: Some(IssueStatus::Open),
        updated_at: None,
    }
}

fn linked_project(store: &mut MappingStore) -> tandem_core::ProjectRecordId {
    let pair = store
        .upsert_project(
            RedmineProjectId::new(11),
            "app",
            "team/app",
            "https://gitlab.example.com/team/app",
        )
        .expect("upsert project");
    store
        .set_remote_project_id(pair.project.id, GitlabProjectId::new(77))
        .expect("link project");
    pair.project.id
}

#[test]
fn bootstrap_creates_schema_and_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("tandem.db");

    let first = MappingStore::open(&path).expect("first open");
    assert_eq!(first.schema_version().expect("version"), CURRENT_SCHEMA_VERSION);
    drop(first);

    let second = MappingStore::open(&path).expect("second open");
    assert_eq!(second.schema_version().expect("version"), CURRENT_SCHEMA_VERSION);
    drop(second);

    let conn = rusqlite::Connection::open(&path).expect("raw open");
    let migrations: i64 = conn
        .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| {
            row.get(0)
        })
        .expect("count migrations");
    assert_eq!(migrations, i64::from(CURRENT_SCHEMA_VERSION));
}

#[test]
fn project_upsert_preserves_resolved_gitlab_id() {
    let mut store = MappingStore::in_memory().expect("store");
    let id = linked_project(&mut store);

    // A later discovery pass rewrites path/url but must not unlink.
    let pair = store
        .upsert_project(
            RedmineProjectId::new(11),
            "app-renamed",
            "team/app-renamed",
            "https://gitlab.example.com/team/app-renamed",
        )
        .expect("re-upsert");
    assert_eq!(pair.project.id, id);
    assert_eq!(pair.project.external_a_key, "app-renamed");
    assert_eq!(pair.gitlab_id(), Some(GitlabProjectId::new(77)));
}

#[test]
fn unlinked_projects_are_invisible_to_reconciliation() {
    let mut store = MappingStore::in_memory().expect("store");
    store
        .upsert_project(
            RedmineProjectId::new(12),
            "dark",
            "team/dark",
            "https://gitlab.example.com/team/dark",
        )
        .expect("upsert");

    assert!(store.linked_projects().expect("linked").is_empty());

    let error = store
        .create_mapping(
            tandem_core::ProjectRecordId::new(1),
            RedmineIssueId::new(1),
            GitlabIssueIid::new(1),
        )
        .expect_err("mapping against unlinked project");
    assert!(error.is_conflict());
}

#[test]
fn mapping_side_ids_are_globally_unique() {
    let mut store = MappingStore::in_memory().expect("store");
    let project = linked_project(&mut store);

    store
        .create_mapping(project, RedmineIssueId::new(7), GitlabIssueIid::new(3))
        .expect("first mapping");

    let dup_a = store
        .create_mapping(project, RedmineIssueId::new(7), GitlabIssueIid::new(4))
        .expect_err("duplicate redmine id");
    assert!(matches!(dup_a, SyncError::Conflict(_)));

    let dup_b = store
        .create_mapping(project, RedmineIssueId::new(8), GitlabIssueIid::new(3))
        .expect_err("duplicate gitlab id");
    assert!(matches!(dup_b, SyncError::Conflict(_)));

    assert_eq!(store.count_mappings().expect("count"), 1);
}

#[test]
fn canonical_round_trips_through_advancement() {
    let mut store = MappingStore::in_memory().expect("store");
    let project = linked_project(&mut store);

    let mapping = store
        .create_mapping(project, RedmineIssueId::new(7), GitlabIssueIid::new(3))
        .expect("mapping");
    assert!(mapping.canonical.is_none());

    let canonical = snapshot("Add login");
    store
        .advance_canonical(mapping.id, &canonical, Some("2025-01-10T12:00:00Z"))
        .expect("advance");

    let reloaded = store
        .find_mapping_by_redmine_issue(RedmineIssueId::new(7))
        .expect("lookup")
        .expect("present");
    assert_eq!(reloaded.canonical, Some(canonical));
    assert_eq!(
        reloaded.last_observed_external_event_id.as_deref(),
        Some("2025-01-10T12:00:00Z")
    );

    store.delete_mapping(reloaded.id).expect("delete");
    assert_eq!(store.count_mappings().expect("count"), 0);
}

#[test]
fn user_pairs_are_unique_per_platform_id() {
    let mut store = MappingStore::in_memory().expect("store");

    store
        .insert_user_pair(RedmineUserId::new(5), GitlabUserId::new(42), "alice")
        .expect("insert");

    let dup_a = store
        .insert_user_pair(RedmineUserId::new(5), GitlabUserId::new(43), "alice2")
        .expect_err("duplicate redmine user");
    assert!(dup_a.is_conflict());

    let dup_b = store
        .insert_user_pair(RedmineUserId::new(6), GitlabUserId::new(42), "alice3")
        .expect_err("duplicate gitlab user");
    assert!(dup_b.is_conflict());

    let users = store.users().expect("users");
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].display_key, "alice");
    assert!(users[0].is_pair());
}

#[test]
fn reference_refresh_overwrites_names_on_id_collision() {
    let mut store = MappingStore::in_memory().expect("store");

    store
        .upsert_tracker(&NamedRef {
            id: 1,
            name: "Feature".to_owned(),
        })
        .expect("tracker");
    store
        .upsert_tracker(&NamedRef {
            id: 1,
            name: "Feature Request".to_owned(),
        })
        .expect("tracker rename");
    store
        .upsert_status(&NamedRef {
            id: 1,
            name: "New".to_owned(),
        })
        .expect("status");

    let trackers = store.trackers().expect("trackers");
    assert_eq!(trackers.len(), 1);
    assert_eq!(trackers[0].name, "Feature Request");
    assert_eq!(store.statuses().expect("statuses").len(), 1);
}
