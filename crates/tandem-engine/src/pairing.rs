use std::collections::{HashMap, HashSet};

use tandem_core::backlink::{compose_description, payload_of};
use tandem_core::{
    AdapterError, GitlabIssueDraft, IssueView, MappingRecord, Platform, ProjectPair,
    RedmineIssueDraft, SyncError,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::reconcile::{first_observe, neutralize};
use crate::reference::RefData;
use crate::users::UserDirectory;
use crate::SyncDeps;

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct PairingSummary {
    pub seeded: u32,
    pub created_gitlab: u32,
    pub created_redmine: u32,
    pub deleted: u32,
    pub patches: u32,
    pub errors: u32,
}

fn in_category(deps: &SyncDeps, view: &IssueView) -> bool {
    view.labels
        .first()
        .map(|label| deps.is_category_key(label))
        .unwrap_or(false)
}

fn title_key(title: &str) -> String {
    title.trim().to_lowercase()
}

/// Runs the four discovery steps for one project, in order: title seeding,
/// stale-mapping sweep, create-missing toward GitLab, create-missing toward
/// Redmine. The sweep runs before create-missing so a deleted remote is not
/// resurrected as a fresh counterpart.
pub(crate) async fn discover_pairs(
    deps: &SyncDeps,
    project: &ProjectPair,
    refs: &RefData,
    users: &UserDirectory,
    redmine_issues: &[IssueView],
    gitlab_issues: &[IssueView],
    cancel: &CancellationToken,
) -> Result<PairingSummary, SyncError> {
    let mut summary = PairingSummary::default();

    seed_pairs_by_title(
        deps,
        project,
        refs,
        users,
        redmine_issues,
        gitlab_issues,
        cancel,
        &mut summary,
    )
    .await?;
    let swept = sweep_stale_mappings(
        deps,
        project,
        redmine_issues,
        gitlab_issues,
        cancel,
        &mut summary,
    )
    .await?;
    create_missing_gitlab(
        deps,
        project,
        users,
        redmine_issues,
        &swept,
        cancel,
        &mut summary,
    )
    .await?;
    create_missing_redmine(
        deps,
        project,
        refs,
        users,
        gitlab_issues,
        &swept,
        cancel,
        &mut summary,
    )
    .await?;

    Ok(summary)
}

/// Side ids of mappings deleted by this pass's sweep. Their surviving
/// counterparts are excluded from create-missing for the rest of the pass,
/// so a remote deletion is not answered by an immediate resurrection.
#[derive(Debug, Default)]
struct SweptPairs {
    redmine: HashSet<i64>,
    gitlab: HashSet<i64>,
}

#[allow(clippy::too_many_arguments)]
async fn seed_pairs_by_title(
    deps: &SyncDeps,
    project: &ProjectPair,
    refs: &RefData,
    users: &UserDirectory,
    redmine_issues: &[IssueView],
    gitlab_issues: &[IssueView],
    cancel: &CancellationToken,
    summary: &mut PairingSummary,
) -> Result<(), SyncError> {
    let Some(gitlab_project) = project.gitlab_id() else {
        return Ok(());
    };

    let mut by_title: HashMap<String, Vec<&IssueView>> = HashMap::new();
    for issue in gitlab_issues.iter().filter(|view| in_category(deps, view)) {
        by_title.entry(title_key(&issue.title)).or_default().push(issue);
    }

    for redmine_issue in redmine_issues.iter().filter(|view| in_category(deps, view)) {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        if deps
            .store()?
            .find_mapping_by_redmine_issue(redmine_issue.redmine_id())?
            .is_some()
        {
            continue;
        }

        let Some(candidates) = by_title.get(&title_key(&redmine_issue.title)) else {
            continue;
        };
        // Only a unique title match may seed; ambiguity waits for a human.
        if candidates.len() != 1 {
            debug!(
                title = %redmine_issue.title,
                candidates = candidates.len(),
                "skipping ambiguous title match"
            );
            continue;
        }
        let gitlab_issue = candidates[0];
        if deps
            .store()?
            .find_mapping_by_gitlab_issue(gitlab_issue.gitlab_iid())?
            .is_some()
        {
            continue;
        }

        let mapping = {
            let mut store = deps.store()?;
            match store.create_mapping(
                project.project.id,
                redmine_issue.redmine_id(),
                gitlab_issue.gitlab_iid(),
            ) {
                Ok(mapping) => mapping,
                Err(err) if err.is_conflict() => {
                    warn!(
                        title = %redmine_issue.title,
                        error = %err,
                        "skipping seed that would overlap an existing mapping"
                    );
                    summary.errors += 1;
                    continue;
                }
                Err(err) => return Err(err),
            }
        };
        summary.seeded += 1;
        info!(
            redmine_issue = %mapping.external_a_issue_id,
            gitlab_issue = %mapping.external_b_issue_id,
            title = %redmine_issue.title,
            "seeded issue pair by unique title match"
        );

        // First observation runs against the live GitLab view, not the
        // listing hint.
        let live = match deps
            .gitlab
            .get_issue(gitlab_project, mapping.external_b_issue_id, cancel)
            .await
        {
            Ok(view) => view,
            Err(AdapterError::Cancelled) => return Err(SyncError::Cancelled),
            Err(err) => {
                warn!(
                    gitlab_issue = %mapping.external_b_issue_id,
                    error = %err,
                    "could not fetch seeded issue; first observation deferred to next pass"
                );
                summary.errors += 1;
                continue;
            }
        };

        match first_observe(deps, &mapping, redmine_issue, &live, refs, users, cancel).await? {
            crate::reconcile::ReconcileOutcome::Patched(count) => summary.patches += count,
            crate::reconcile::ReconcileOutcome::Skipped => summary.errors += 1,
            _ => {}
        }
    }

    Ok(())
}

/// Confirms both sides of every existing mapping still exist. A side absent
/// from the listings is probed directly; a NotFound probe deletes the
/// mapping. Deletion never propagates to the surviving counterpart.
async fn sweep_stale_mappings(
    deps: &SyncDeps,
    project: &ProjectPair,
    redmine_issues: &[IssueView],
    gitlab_issues: &[IssueView],
    cancel: &CancellationToken,
    summary: &mut PairingSummary,
) -> Result<SweptPairs, SyncError> {
    let mut swept = SweptPairs::default();
    let Some(gitlab_project) = project.gitlab_id() else {
        return Ok(swept);
    };

    let redmine_listed: HashSet<i64> = redmine_issues.iter().map(|view| view.remote_id).collect();
    let gitlab_listed: HashSet<i64> = gitlab_issues.iter().map(|view| view.remote_id).collect();

    let mappings = deps.store()?.mappings_for_project(project.project.id)?;
    for mapping in mappings {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        if !redmine_listed.contains(&mapping.external_a_issue_id.get()) {
            match deps
                .redmine
                .get_issue(mapping.external_a_issue_id, cancel)
                .await
            {
                Ok(_) => {}
                Err(AdapterError::NotFound) => {
                    delete_stale(deps, &mapping, "redmine", &mut swept, summary)?;
                    continue;
                }
                Err(AdapterError::Cancelled) => return Err(SyncError::Cancelled),
                Err(err) => {
                    warn!(
                        redmine_issue = %mapping.external_a_issue_id,
                        error = %err,
                        "existence probe failed; keeping mapping for now"
                    );
                    summary.errors += 1;
                    continue;
                }
            }
        }

        if !gitlab_listed.contains(&mapping.external_b_issue_id.get()) {
            match deps
                .gitlab
                .get_issue(gitlab_project, mapping.external_b_issue_id, cancel)
                .await
            {
                Ok(_) => {}
                Err(AdapterError::NotFound) => {
                    delete_stale(deps, &mapping, "gitlab", &mut swept, summary)?;
                }
                Err(AdapterError::Cancelled) => return Err(SyncError::Cancelled),
                Err(err) => {
                    warn!(
                        gitlab_issue = %mapping.external_b_issue_id,
                        error = %err,
                        "existence probe failed; keeping mapping for now"
                    );
                    summary.errors += 1;
                }
            }
        }
    }

    Ok(swept)
}

fn delete_stale(
    deps: &SyncDeps,
    mapping: &MappingRecord,
    side: &str,
    swept: &mut SweptPairs,
    summary: &mut PairingSummary,
) -> Result<(), SyncError> {
    info!(
        redmine_issue = %mapping.external_a_issue_id,
        gitlab_issue = %mapping.external_b_issue_id,
        side,
        "counterpart confirmed gone; deleting mapping"
    );
    deps.store()?.delete_mapping(mapping.id)?;
    swept.redmine.insert(mapping.external_a_issue_id.get());
    swept.gitlab.insert(mapping.external_b_issue_id.get());
    summary.deleted += 1;
    Ok(())
}

/// Creates GitLab counterparts for in-category Redmine issues that remained
/// unmapped after seeding and sweeping.
#[allow(clippy::too_many_arguments)]
async fn create_missing_gitlab(
    deps: &SyncDeps,
    project: &ProjectPair,
    users: &UserDirectory,
    redmine_issues: &[IssueView],
    swept: &SweptPairs,
    cancel: &CancellationToken,
    summary: &mut PairingSummary,
) -> Result<(), SyncError> {
    let Some(gitlab_project) = project.gitlab_id() else {
        return Ok(());
    };

    for redmine_issue in redmine_issues.iter().filter(|view| in_category(deps, view)) {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        if swept.redmine.contains(&redmine_issue.remote_id) {
            continue;
        }
        if deps
            .store()?
            .find_mapping_by_redmine_issue(redmine_issue.redmine_id())?
            .is_some()
        {
            continue;
        }

        let backlink = deps.redmine.issue_url(redmine_issue.redmine_id());
        let draft = GitlabIssueDraft {
            title: redmine_issue.title.clone(),
            description: Some(compose_description(
                payload_of(redmine_issue.description.as_deref()).as_deref(),
                &backlink,
            )),
            labels: redmine_issue.labels.clone(),
            assignee_id: users
                .row_for(Platform::Redmine, redmine_issue.assignee_id)
                .and_then(|row| users.gitlab_id(row)),
            due_date: redmine_issue.due_date,
            status: redmine_issue.status,
        };

        let created = match deps.gitlab.create_issue(gitlab_project, draft, cancel).await {
            Ok(iid) => iid,
            Err(AdapterError::Cancelled) => return Err(SyncError::Cancelled),
            Err(err) => {
                warn!(
                    redmine_issue = %redmine_issue.remote_id,
                    error = %err,
                    "could not create GitLab counterpart"
                );
                summary.errors += 1;
                continue;
            }
        };

        let mapping = {
            let mut store = deps.store()?;
            match store.create_mapping(project.project.id, redmine_issue.redmine_id(), created) {
                Ok(mapping) => mapping,
                Err(err) if err.is_conflict() => {
                    warn!(
                        redmine_issue = %redmine_issue.remote_id,
                        gitlab_issue = %created,
                        error = %err,
                        "created GitLab issue could not be mapped; leaving it for operators"
                    );
                    summary.errors += 1;
                    continue;
                }
                Err(err) => return Err(err),
            }
        };
        summary.created_gitlab += 1;
        info!(
            redmine_issue = %mapping.external_a_issue_id,
            gitlab_issue = %mapping.external_b_issue_id,
            "created missing GitLab counterpart"
        );

        match deps.gitlab.get_issue(gitlab_project, created, cancel).await {
            Ok(live) => {
                let canonical = neutralize(&live, Platform::Gitlab, users);
                deps.store()?.advance_canonical(
                    mapping.id,
                    &canonical,
                    observation_marker_of(&live).as_deref(),
                )?;
            }
            Err(AdapterError::Cancelled) => return Err(SyncError::Cancelled),
            Err(err) => {
                warn!(
                    gitlab_issue = %created,
                    error = %err,
                    "could not fetch created issue; first observation deferred to next pass"
                );
                summary.errors += 1;
            }
        }
    }

    Ok(())
}

/// Creates Redmine counterparts for in-category GitLab issues that remained
/// unmapped. The matched category key picks the tracker; OPEN maps to "New"
/// and CLOSED to "Closed".
#[allow(clippy::too_many_arguments)]
async fn create_missing_redmine(
    deps: &SyncDeps,
    project: &ProjectPair,
    refs: &RefData,
    users: &UserDirectory,
    gitlab_issues: &[IssueView],
    swept: &SweptPairs,
    cancel: &CancellationToken,
    summary: &mut PairingSummary,
) -> Result<(), SyncError> {
    for gitlab_issue in gitlab_issues.iter().filter(|view| in_category(deps, view)) {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        if swept.gitlab.contains(&gitlab_issue.remote_id) {
            continue;
        }
        if deps
            .store()?
            .find_mapping_by_gitlab_issue(gitlab_issue.gitlab_iid())?
            .is_some()
        {
            continue;
        }

        let tracker_id = gitlab_issue
            .labels
            .first()
            .and_then(|label| refs.tracker_id_by_name(label));
        if tracker_id.is_none() {
            warn!(
                gitlab_issue = %gitlab_issue.remote_id,
                label = ?gitlab_issue.labels.first(),
                "no Redmine tracker matches the category label; creating without tracker"
            );
        }
        let status_id = refs.status_id_for(gitlab_issue.status);
        if status_id.is_none() {
            warn!(
                gitlab_issue = %gitlab_issue.remote_id,
                "Redmine lacks a status named New/Closed; creating with default status"
            );
        }

        let draft = RedmineIssueDraft {
            subject: gitlab_issue.title.clone(),
            description: Some(compose_description(
                payload_of(gitlab_issue.description.as_deref()).as_deref(),
                &gitlab_issue.web_url,
            )),
            tracker_id,
            status_id,
            assigned_to_id: users
                .row_for(Platform::Gitlab, gitlab_issue.assignee_id)
                .and_then(|row| users.redmine_id(row)),
            due_date: gitlab_issue.due_date,
        };

        let created = match deps
            .redmine
            .create_issue(project.project.external_a_id, draft, cancel)
            .await
        {
            Ok(id) => id,
            Err(AdapterError::Cancelled) => return Err(SyncError::Cancelled),
            Err(err) => {
                warn!(
                    gitlab_issue = %gitlab_issue.remote_id,
                    error = %err,
                    "could not create Redmine counterpart"
                );
                summary.errors += 1;
                continue;
            }
        };

        let mapping = {
            let mut store = deps.store()?;
            match store.create_mapping(project.project.id, created, gitlab_issue.gitlab_iid()) {
                Ok(mapping) => mapping,
                Err(err) if err.is_conflict() => {
                    warn!(
                        redmine_issue = %created,
                        gitlab_issue = %gitlab_issue.remote_id,
                        error = %err,
                        "created Redmine issue could not be mapped; leaving it for operators"
                    );
                    summary.errors += 1;
                    continue;
                }
                Err(err) => return Err(err),
            }
        };
        summary.created_redmine += 1;
        info!(
            redmine_issue = %mapping.external_a_issue_id,
            gitlab_issue = %mapping.external_b_issue_id,
            "created missing Redmine counterpart"
        );

        match deps.redmine.get_issue(created, cancel).await {
            Ok(live) => {
                let canonical = neutralize(&live, Platform::Redmine, users);
                deps.store()?.advance_canonical(
                    mapping.id,
                    &canonical,
                    observation_marker_of(&live).as_deref(),
                )?;
            }
            Err(AdapterError::Cancelled) => return Err(SyncError::Cancelled),
            Err(err) => {
                warn!(
                    redmine_issue = %created,
                    error = %err,
                    "could not fetch created issue; first observation deferred to next pass"
                );
                summary.errors += 1;
            }
        }
    }

    Ok(())
}

fn observation_marker_of(view: &IssueView) -> Option<String> {
    view.updated_at.and_then(|instant| {
        instant
            .format(&time::format_description::well_known::Rfc3339)
            .ok()
    })
}
