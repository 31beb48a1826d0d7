use tandem_core::backlink::{compose_description, payload_of};
use tandem_core::{
    labels_equal, AdapterError, CanonicalSnapshot, GitlabIssuePatch, IssueView, MappingRecord,
    MappingRecordId, Platform, ProjectPair, RedmineIssuePatch, SnapshotField, SyncError,
};
use time::format_description::well_known::Rfc3339;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::reference::RefData;
use crate::users::UserDirectory;
use crate::SyncDeps;

/// What reconciling one mapping did to the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReconcileOutcome {
    /// Both sides already matched the canonical snapshot.
    Unchanged,
    /// Converged; carries the number of patches actually sent.
    Patched(u32),
    /// A counterpart was confirmed gone; the mapping row was removed.
    Deleted,
    /// A remote failure left the canonical unadvanced; retried next pass.
    Skipped,
}

/// Projects a live view into the neutral snapshot shape: description reduced
/// to its backlink-stripped payload, assignee translated to the correlated
/// user-row id (uncorrelated assignees read as absent).
pub(crate) fn neutralize(
    view: &IssueView,
    platform: Platform,
    users: &UserDirectory,
) -> CanonicalSnapshot {
    CanonicalSnapshot {
        title: view.title.clone(),
        description: payload_of(view.description.as_deref()),
        labels: view.labels.clone(),
        assignee: users.row_for(platform, view.assignee_id),
        due_date: view.due_date,
        status: Some(view.status),
        updated_at: view.updated_at,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Classification {
    InSync,
    RedmineWrote,
    GitlabWrote,
    Conflict,
}

fn classify(
    canonical: &CanonicalSnapshot,
    redmine: &CanonicalSnapshot,
    gitlab: &CanonicalSnapshot,
) -> Classification {
    let redmine_differs = !redmine.converged_with(canonical);
    let gitlab_differs = !gitlab.converged_with(canonical);
    match (redmine_differs, gitlab_differs) {
        (false, false) => Classification::InSync,
        (true, false) => Classification::RedmineWrote,
        (false, true) => Classification::GitlabWrote,
        (true, true) => Classification::Conflict,
    }
}

/// Per-field last-writer-wins merge. A field only moves off the canonical
/// value when a side actually changed it; when both sides changed the same
/// field the greater `updated_at` wins, ties going to GitLab.
fn merge_conflict(
    canonical: &CanonicalSnapshot,
    redmine: &CanonicalSnapshot,
    gitlab: &CanonicalSnapshot,
) -> CanonicalSnapshot {
    let redmine_is_newer = match (redmine.updated_at, gitlab.updated_at) {
        (Some(a), Some(b)) => a > b,
        (Some(_), None) => true,
        _ => false,
    };

    let mut winner = canonical.clone();
    for field in SnapshotField::ALL {
        let redmine_changed = !redmine.field_eq(canonical, field);
        let gitlab_changed = !gitlab.field_eq(canonical, field);
        match (redmine_changed, gitlab_changed) {
            (true, false) => winner.adopt_field(redmine, field),
            (false, true) => winner.adopt_field(gitlab, field),
            (true, true) => {
                let source = if redmine_is_newer { redmine } else { gitlab };
                debug!(
                    field = field.label(),
                    redmine_wins = redmine_is_newer,
                    "both sides wrote the same field; later write wins"
                );
                winner.adopt_field(source, field);
            }
            (false, false) => {}
        }
    }

    winner.updated_at = match (redmine.updated_at, gitlab.updated_at) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };
    winner
}

/// Builds the Redmine-directed patch from a live view toward the winner.
/// Vocabulary translation happens here, at patch time: first label name to
/// tracker id, neutral status to the "New"/"Closed" status id, winner
/// assignee to the Redmine user id. An untranslatable field is logged and
/// omitted rather than failing the pair.
pub(crate) fn build_redmine_patch(
    view: &IssueView,
    view_neutral: &CanonicalSnapshot,
    winner: &CanonicalSnapshot,
    refs: &RefData,
    users: &UserDirectory,
    counterpart_url: &str,
) -> RedmineIssuePatch {
    let mut patch = RedmineIssuePatch::default();

    if view.title != winner.title {
        patch.subject = Some(winner.title.clone());
    }

    let desired_description = compose_description(winner.description.as_deref(), counterpart_url);
    if view.description.as_deref() != Some(desired_description.as_str()) {
        patch.description = Some(desired_description);
    }

    if !labels_equal(&view.labels, &winner.labels) {
        match winner.labels.first() {
            Some(name) => match refs.tracker_id_by_name(name) {
                Some(tracker_id) => patch.tracker_id = Some(tracker_id),
                None => warn!(
                    label = %name,
                    "no Redmine tracker matches the winning label; omitting tracker from patch"
                ),
            },
            None => debug!("winner carries no label; leaving Redmine tracker untouched"),
        }
    }

    if view_neutral.status != winner.status {
        if let Some(status) = winner.status {
            match refs.status_id_for(status) {
                Some(status_id) => patch.status_id = Some(status_id),
                None => warn!(
                    status = ?status,
                    "Redmine lacks a status named New/Closed; omitting status from patch"
                ),
            }
        }
    }

    if view_neutral.assignee != winner.assignee {
        match winner.assignee {
            None => patch.assigned_to_id = Some(None),
            Some(row) => match users.redmine_id(row) {
                Some(redmine_id) => patch.assigned_to_id = Some(Some(redmine_id)),
                None => warn!(
                    user_row = %row,
                    "winning assignee has no Redmine id; omitting assignee from patch"
                ),
            },
        }
    }

    if view_neutral.due_date != winner.due_date {
        patch.due_date = Some(winner.due_date);
    }

    patch
}

/// Symmetric GitLab-directed patch builder.
pub(crate) fn build_gitlab_patch(
    view: &IssueView,
    view_neutral: &CanonicalSnapshot,
    winner: &CanonicalSnapshot,
    users: &UserDirectory,
    counterpart_url: &str,
) -> GitlabIssuePatch {
    let mut patch = GitlabIssuePatch::default();

    if view.title != winner.title {
        patch.title = Some(winner.title.clone());
    }

    let desired_description = compose_description(winner.description.as_deref(), counterpart_url);
    if view.description.as_deref() != Some(desired_description.as_str()) {
        patch.description = Some(desired_description);
    }

    if !labels_equal(&view.labels, &winner.labels) && !winner.labels.is_empty() {
        patch.labels = Some(winner.labels.clone());
    }

    if view_neutral.status != winner.status {
        patch.status = winner.status;
    }

    if view_neutral.assignee != winner.assignee {
        match winner.assignee {
            None => patch.assignee_id = Some(None),
            Some(row) => match users.gitlab_id(row) {
                Some(gitlab_id) => patch.assignee_id = Some(Some(gitlab_id)),
                None => warn!(
                    user_row = %row,
                    "winning assignee has no GitLab id; omitting assignee from patch"
                ),
            },
        }
    }

    if view_neutral.due_date != winner.due_date {
        patch.due_date = Some(winner.due_date);
    }

    patch
}

fn observation_marker(winner: &CanonicalSnapshot) -> Option<String> {
    winner
        .updated_at
        .and_then(|instant| instant.format(&Rfc3339).ok())
}

enum Observed {
    Found(IssueView),
    Missing,
    Failed,
}

fn observed_from(result: Result<IssueView, AdapterError>, side: &str) -> Result<Observed, SyncError> {
    match result {
        Ok(view) => Ok(Observed::Found(view)),
        Err(AdapterError::NotFound) => Ok(Observed::Missing),
        Err(AdapterError::Cancelled) => Err(SyncError::Cancelled),
        Err(err) => {
            warn!(side, error = %err, "could not observe live issue state");
            Ok(Observed::Failed)
        }
    }
}

async fn apply_redmine_patch(
    deps: &SyncDeps,
    mapping: &MappingRecord,
    patch: RedmineIssuePatch,
    cancel: &CancellationToken,
) -> Result<Option<bool>, SyncError> {
    if patch.is_empty() {
        return Ok(Some(false));
    }
    match deps
        .redmine
        .update_issue(mapping.external_a_issue_id, patch, cancel)
        .await
    {
        Ok(()) => Ok(Some(true)),
        Err(AdapterError::Cancelled) => Err(SyncError::Cancelled),
        Err(err) => {
            warn!(
                issue = %mapping.external_a_issue_id,
                error = %err,
                "Redmine patch failed; canonical not advanced"
            );
            Ok(None)
        }
    }
}

async fn apply_gitlab_patch(
    deps: &SyncDeps,
    project: &ProjectPair,
    mapping: &MappingRecord,
    patch: GitlabIssuePatch,
    cancel: &CancellationToken,
) -> Result<Option<bool>, SyncError> {
    let Some(gitlab_project) = project.gitlab_id() else {
        return Err(SyncError::Configuration(format!(
            "project {} lost its GitLab link mid-pass",
            project.project.external_a_key
        )));
    };
    if patch.is_empty() {
        return Ok(Some(false));
    }
    match deps
        .gitlab
        .update_issue(gitlab_project, mapping.external_b_issue_id, patch, cancel)
        .await
    {
        Ok(()) => Ok(Some(true)),
        Err(AdapterError::Cancelled) => Err(SyncError::Cancelled),
        Err(err) => {
            warn!(
                issue = %mapping.external_b_issue_id,
                error = %err,
                "GitLab patch failed; canonical not advanced"
            );
            Ok(None)
        }
    }
}

fn advance_canonical(
    deps: &SyncDeps,
    mapping_id: MappingRecordId,
    winner: &CanonicalSnapshot,
) -> Result<(), SyncError> {
    deps.store()?
        .advance_canonical(mapping_id, winner, observation_marker(winner).as_deref())
}

/// First observation of a freshly created pair: GitLab is the source of
/// truth, Redmine is pushed toward it, and the canonical snapshot starts as
/// the GitLab view.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn first_observe(
    deps: &SyncDeps,
    mapping: &MappingRecord,
    redmine_view: &IssueView,
    gitlab_view: &IssueView,
    refs: &RefData,
    users: &UserDirectory,
    cancel: &CancellationToken,
) -> Result<ReconcileOutcome, SyncError> {
    let gitlab_neutral = neutralize(gitlab_view, Platform::Gitlab, users);
    let redmine_neutral = neutralize(redmine_view, Platform::Redmine, users);

    let patch = build_redmine_patch(
        redmine_view,
        &redmine_neutral,
        &gitlab_neutral,
        refs,
        users,
        &gitlab_view.web_url,
    );

    match apply_redmine_patch(deps, mapping, patch, cancel).await? {
        Some(sent) => {
            advance_canonical(deps, mapping.id, &gitlab_neutral)?;
            if sent {
                Ok(ReconcileOutcome::Patched(1))
            } else {
                Ok(ReconcileOutcome::Unchanged)
            }
        }
        None => Ok(ReconcileOutcome::Skipped),
    }
}

/// Reconciles one mapping: observe both sides (listing hints avoid refetch),
/// classify against the canonical snapshot, push the minimal patch to the
/// losing side (or per-field merge on a two-sided conflict), and advance the
/// snapshot. The observe→patch→advance sequence for a mapping never
/// interleaves with other work on that mapping; per-project work is
/// sequential.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn reconcile_mapping(
    deps: &SyncDeps,
    project: &ProjectPair,
    refs: &RefData,
    users: &UserDirectory,
    mapping: &MappingRecord,
    redmine_hint: Option<IssueView>,
    gitlab_hint: Option<IssueView>,
    cancel: &CancellationToken,
) -> Result<ReconcileOutcome, SyncError> {
    if cancel.is_cancelled() {
        return Err(SyncError::Cancelled);
    }
    let Some(gitlab_project) = project.gitlab_id() else {
        return Err(SyncError::Configuration(format!(
            "project {} is not linked; reconciliation should not see it",
            project.project.external_a_key
        )));
    };

    let redmine_view = match redmine_hint {
        Some(view) => view,
        None => {
            let fetched = deps
                .redmine
                .get_issue(mapping.external_a_issue_id, cancel)
                .await;
            match observed_from(fetched, "redmine")? {
                Observed::Found(view) => view,
                Observed::Missing => {
                    info!(
                        redmine_issue = %mapping.external_a_issue_id,
                        gitlab_issue = %mapping.external_b_issue_id,
                        "Redmine issue is gone; deleting mapping without touching the counterpart"
                    );
                    deps.store()?.delete_mapping(mapping.id)?;
                    return Ok(ReconcileOutcome::Deleted);
                }
                Observed::Failed => return Ok(ReconcileOutcome::Skipped),
            }
        }
    };

    let gitlab_view = match gitlab_hint {
        Some(view) => view,
        None => {
            let fetched = deps
                .gitlab
                .get_issue(gitlab_project, mapping.external_b_issue_id, cancel)
                .await;
            match observed_from(fetched, "gitlab")? {
                Observed::Found(view) => view,
                Observed::Missing => {
                    info!(
                        redmine_issue = %mapping.external_a_issue_id,
                        gitlab_issue = %mapping.external_b_issue_id,
                        "GitLab issue is gone; deleting mapping without touching the counterpart"
                    );
                    deps.store()?.delete_mapping(mapping.id)?;
                    return Ok(ReconcileOutcome::Deleted);
                }
                Observed::Failed => return Ok(ReconcileOutcome::Skipped),
            }
        }
    };

    let Some(canonical) = &mapping.canonical else {
        return first_observe(
            deps,
            mapping,
            &redmine_view,
            &gitlab_view,
            refs,
            users,
            cancel,
        )
        .await;
    };

    let redmine_neutral = neutralize(&redmine_view, Platform::Redmine, users);
    let gitlab_neutral = neutralize(&gitlab_view, Platform::Gitlab, users);
    let redmine_url = deps.redmine.issue_url(mapping.external_a_issue_id);

    match classify(canonical, &redmine_neutral, &gitlab_neutral) {
        Classification::InSync => Ok(ReconcileOutcome::Unchanged),
        Classification::RedmineWrote => {
            let winner = redmine_neutral.clone();
            let patch = build_gitlab_patch(
                &gitlab_view,
                &gitlab_neutral,
                &winner,
                users,
                &redmine_url,
            );
            match apply_gitlab_patch(deps, project, mapping, patch, cancel).await? {
                Some(sent) => {
                    advance_canonical(deps, mapping.id, &winner)?;
                    Ok(ReconcileOutcome::Patched(u32::from(sent)))
                }
                None => Ok(ReconcileOutcome::Skipped),
            }
        }
        Classification::GitlabWrote => {
            let winner = gitlab_neutral.clone();
            let patch = build_redmine_patch(
                &redmine_view,
                &redmine_neutral,
                &winner,
                refs,
                users,
                &gitlab_view.web_url,
            );
            match apply_redmine_patch(deps, mapping, patch, cancel).await? {
                Some(sent) => {
                    advance_canonical(deps, mapping.id, &winner)?;
                    Ok(ReconcileOutcome::Patched(u32::from(sent)))
                }
                None => Ok(ReconcileOutcome::Skipped),
            }
        }
        Classification::Conflict => {
            let winner = merge_conflict(canonical, &redmine_neutral, &gitlab_neutral);
            debug!(
                redmine_issue = %mapping.external_a_issue_id,
                gitlab_issue = %mapping.external_b_issue_id,
                "two-sided conflict; composing per-field winner"
            );

            let redmine_patch = build_redmine_patch(
                &redmine_view,
                &redmine_neutral,
                &winner,
                refs,
                users,
                &gitlab_view.web_url,
            );
            let gitlab_patch = build_gitlab_patch(
                &gitlab_view,
                &gitlab_neutral,
                &winner,
                users,
                &redmine_url,
            );

            let redmine_sent = apply_redmine_patch(deps, mapping, redmine_patch, cancel).await?;
            let gitlab_sent =
                apply_gitlab_patch(deps, project, mapping, gitlab_patch, cancel).await?;

            match (redmine_sent, gitlab_sent) {
                (Some(a), Some(b)) => {
                    advance_canonical(deps, mapping.id, &winner)?;
                    Ok(ReconcileOutcome::Patched(u32::from(a) + u32::from(b)))
                }
                _ => Ok(ReconcileOutcome::Skipped),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::{GitlabUserId, IssueStatus, RedmineUserId, UserRecord, UserRecordId};
    use time::macros::datetime;

    fn view(title: &str) -> IssueView {
        IssueView {
            remote_id: 1,
            title: title.to_owned(),
            description: None,
            labels: vec!["Bug".to_owned()],
            assignee_id: None,
            due_date: None,
            status: IssueStatus::Open,
            updated_at: Some(datetime!(2025-01-10 12:00:00 UTC)),
            web_url: "https://gitlab.example.com/team/app/-/issues/1".to_owned(),
        }
    }

    fn neutral(title: &str) -> CanonicalSnapshot {
        CanonicalSnapshot {
            title: title.to_owned(),
            description: None,
            labels: vec!["Bug".to_owned()],
            assignee: None,
            due_date: None,
            status: Some(IssueStatus::Open),
            updated_at: Some(datetime!(2025-01-10 12:00:00 UTC)),
        }
    }

    fn directory() -> UserDirectory {
        UserDirectory::from_records(&[UserRecord {
            id: UserRecordId::new(1),
            external_a_user_id: Some(RedmineUserId::new(5)),
            external_b_user_id: Some(GitlabUserId::new(42)),
            display_key: "alice".to_owned(),
        }])
    }

    fn refs() -> RefData {
        RefData::new(
            vec![
                tandem_core::NamedRef {
                    id: 1,
                    name: "Feature".to_owned(),
                },
                tandem_core::NamedRef {
                    id: 2,
                    name: "Bug".to_owned(),
                },
            ],
            vec![
                tandem_core::NamedRef {
                    id: 1,
                    name: "New".to_owned(),
                },
                tandem_core::NamedRef {
                    id: 5,
                    name: "Closed".to_owned(),
                },
            ],
        )
    }

    #[test]
    fn classification_covers_all_quadrants() {
        let canonical = neutral("T0");
        let unchanged = neutral("T0");
        let changed = neutral("T1");

        assert_eq!(
            classify(&canonical, &unchanged, &unchanged),
            Classification::InSync
        );
        assert_eq!(
            classify(&canonical, &changed, &unchanged),
            Classification::RedmineWrote
        );
        assert_eq!(
            classify(&canonical, &unchanged, &changed),
            Classification::GitlabWrote
        );
        assert_eq!(
            classify(&canonical, &changed, &changed),
            Classification::Conflict
        );
    }

    #[test]
    fn merge_takes_the_single_writer_per_field_regardless_of_time() {
        let canonical = neutral("T0");
        // Redmine changed only the title and is older; GitLab changed only
        // the due date and is newer. Each keeps its own field.
        let mut redmine = neutral("Ta");
        redmine.updated_at = Some(datetime!(2025-01-11 09:00:00 UTC));
        let mut gitlab = neutral("T0");
        gitlab.due_date = Some(time::macros::date!(2025 - 04 - 01));
        gitlab.updated_at = Some(datetime!(2025-01-12 09:00:00 UTC));

        let winner = merge_conflict(&canonical, &redmine, &gitlab);
        assert_eq!(winner.title, "Ta");
        assert_eq!(winner.due_date, Some(time::macros::date!(2025 - 04 - 01)));
    }

    #[test]
    fn merge_resolves_double_writes_by_updated_at_with_gitlab_tiebreak() {
        let canonical = neutral("T0");
        let mut redmine = neutral("Ta");
        redmine.due_date = Some(time::macros::date!(2025 - 03 - 01));
        redmine.updated_at = Some(datetime!(2025-01-11 09:00:00 UTC));
        let mut gitlab = neutral("Tb");
        gitlab.due_date = Some(time::macros::date!(2025 - 04 - 01));
        gitlab.updated_at = Some(datetime!(2025-01-12 09:00:00 UTC));

        let winner = merge_conflict(&canonical, &redmine, &gitlab);
        assert_eq!(winner.title, "Tb");
        assert_eq!(winner.due_date, Some(time::macros::date!(2025 - 04 - 01)));

        // Tie goes to GitLab.
        redmine.updated_at = gitlab.updated_at;
        let tied = merge_conflict(&canonical, &redmine, &gitlab);
        assert_eq!(tied.title, "Tb");

        // A strictly newer Redmine write wins the double-written fields.
        redmine.updated_at = Some(datetime!(2025-01-13 09:00:00 UTC));
        let redmine_newer = merge_conflict(&canonical, &redmine, &gitlab);
        assert_eq!(redmine_newer.title, "Ta");
        assert_eq!(
            redmine_newer.due_date,
            Some(time::macros::date!(2025 - 03 - 01))
        );
    }

    #[test]
    fn redmine_patch_translates_vocabulary_at_patch_time() {
        let users = directory();
        let refs = refs();
        let mut redmine_view = view("Old");
        redmine_view.labels = vec!["Feature".to_owned()];
        let redmine_neutral = neutralize(&redmine_view, Platform::Redmine, &users);

        let mut winner = neutral("New");
        winner.labels = vec!["Bug".to_owned()];
        winner.status = Some(IssueStatus::Closed);
        winner.assignee = Some(UserRecordId::new(1));
        winner.due_date = Some(time::macros::date!(2025 - 02 - 01));

        let patch = build_redmine_patch(
            &redmine_view,
            &redmine_neutral,
            &winner,
            &refs,
            &users,
            "https://gitlab.example.com/team/app/-/issues/1",
        );

        assert_eq!(patch.subject.as_deref(), Some("New"));
        assert_eq!(patch.tracker_id, Some(tandem_core::TrackerId::new(2)));
        assert_eq!(patch.status_id, Some(tandem_core::StatusId::new(5)));
        assert_eq!(patch.assigned_to_id, Some(Some(RedmineUserId::new(5))));
        assert_eq!(
            patch.due_date,
            Some(Some(time::macros::date!(2025 - 02 - 01)))
        );
        assert_eq!(
            patch.description.as_deref(),
            Some("Source: https://gitlab.example.com/team/app/-/issues/1")
        );
    }

    #[test]
    fn missing_vocabulary_is_omitted_not_fatal() {
        let users = directory();
        let refs = RefData::default();
        let redmine_view = view("Same");
        let redmine_neutral = neutralize(&redmine_view, Platform::Redmine, &users);

        let mut winner = redmine_neutral.clone();
        winner.labels = vec!["Support".to_owned()];
        winner.status = Some(IssueStatus::Closed);

        let patch = build_redmine_patch(
            &redmine_view,
            &redmine_neutral,
            &winner,
            &refs,
            &users,
            &redmine_view.web_url,
        );
        assert_eq!(patch.tracker_id, None);
        assert_eq!(patch.status_id, None);
        // Description backlink is still normalized.
        assert!(patch.description.is_some());
    }

    #[test]
    fn in_sync_views_produce_empty_patches() {
        let users = directory();
        let refs = refs();
        let mut gitlab_view = view("Same");
        gitlab_view.description = Some(
            "Source: https://redmine.example.com/issues/1".to_owned(),
        );
        let gitlab_neutral = neutralize(&gitlab_view, Platform::Gitlab, &users);
        let winner = gitlab_neutral.clone();

        let patch = build_gitlab_patch(
            &gitlab_view,
            &gitlab_neutral,
            &winner,
            &users,
            "https://redmine.example.com/issues/1",
        );
        assert!(patch.is_empty(), "{patch:?}");

        let mut redmine_view = view("Same");
        redmine_view.description =
            Some("Source: https://gitlab.example.com/team/app/-/issues/1".to_owned());
        let redmine_neutral = neutralize(&redmine_view, Platform::Redmine, &users);
        let patch = build_redmine_patch(
            &redmine_view,
            &redmine_neutral,
            &winner,
            &refs,
            &users,
            "https://gitlab.example.com/team/app/-/issues/1",
        );
        assert!(patch.is_empty(), "{patch:?}");
    }
}
