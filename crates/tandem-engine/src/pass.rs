use std::collections::HashMap;

use tandem_core::{IssueView, ProjectPair, SyncError};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::pairing::{discover_pairs, PairingSummary};
use crate::reconcile::{reconcile_mapping, ReconcileOutcome};
use crate::reference::{self, RefData};
use crate::users::UserDirectory;
use crate::{discovery, members, SyncDeps};

/// Counters for one full pass, logged at info level when the pass ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    pub projects_synced: u32,
    pub pairs_seeded: u32,
    pub created_gitlab: u32,
    pub created_redmine: u32,
    pub mappings_reconciled: u32,
    pub patches_applied: u32,
    pub mappings_deleted: u32,
    pub errors: u32,
}

impl PassSummary {
    fn absorb_pairing(&mut self, pairing: PairingSummary) {
        self.pairs_seeded += pairing.seeded;
        self.created_gitlab += pairing.created_gitlab;
        self.created_redmine += pairing.created_redmine;
        self.mappings_deleted += pairing.deleted;
        self.patches_applied += pairing.patches;
        self.errors += pairing.errors;
    }

    fn absorb_outcome(&mut self, outcome: ReconcileOutcome) {
        self.mappings_reconciled += 1;
        match outcome {
            ReconcileOutcome::Patched(count) => self.patches_applied += count,
            ReconcileOutcome::Deleted => self.mappings_deleted += 1,
            ReconcileOutcome::Skipped => self.errors += 1,
            ReconcileOutcome::Unchanged => {}
        }
    }
}

/// One full pass: reference-cache refresh, project discovery, then per
/// linked project member correlation, pair discovery, and reconciliation.
/// Per-project failures are logged and the pass moves on; storage and
/// configuration errors (and cancellation) abort the pass.
pub async fn run_pass(
    deps: &SyncDeps,
    cancel: &CancellationToken,
) -> Result<PassSummary, SyncError> {
    let refs = reference::refresh(deps, cancel).await?;
    let projects = discovery::discover_projects(deps, cancel).await?;

    let mut summary = PassSummary::default();
    for project in &projects {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        match sync_project(deps, project, &refs, cancel, &mut summary).await {
            Ok(()) => summary.projects_synced += 1,
            Err(err) if err.is_fatal_for_pass() => return Err(err),
            Err(err) => {
                warn!(
                    project = %project.project.external_a_key,
                    error = %err,
                    "project sync failed; continuing with the next project"
                );
                summary.errors += 1;
            }
        }
    }

    info!(
        projects = summary.projects_synced,
        seeded = summary.pairs_seeded,
        created_gitlab = summary.created_gitlab,
        created_redmine = summary.created_redmine,
        reconciled = summary.mappings_reconciled,
        patches = summary.patches_applied,
        deleted = summary.mappings_deleted,
        errors = summary.errors,
        "pass complete"
    );
    Ok(summary)
}

async fn sync_project(
    deps: &SyncDeps,
    project: &ProjectPair,
    refs: &RefData,
    cancel: &CancellationToken,
    summary: &mut PassSummary,
) -> Result<(), SyncError> {
    let Some(gitlab_project) = project.gitlab_id() else {
        return Err(SyncError::Configuration(format!(
            "project {} reached sync without a GitLab link",
            project.project.external_a_key
        )));
    };

    let redmine_members = deps
        .redmine
        .list_members(project.project.external_a_id, cancel)
        .await?;
    let gitlab_members = deps.gitlab.list_members(gitlab_project, cancel).await?;
    members::correlate_members(deps, &redmine_members, &gitlab_members)?;

    let redmine_issues = deps
        .redmine
        .list_issues(project.project.external_a_id, cancel)
        .await?;
    let gitlab_issues = deps.gitlab.list_issues(gitlab_project, cancel).await?;

    // Correlation may have added rows; the directory must see them before
    // any assignee translation this pass.
    let users = {
        let store = deps.store()?;
        UserDirectory::from_records(&store.users()?)
    };

    // Mappings created during pair discovery get their canonical snapshot
    // from a live fetch; reconciling them again in the same pass against the
    // (older) listing hints could bounce state back. Only pairs that existed
    // before discovery are reconciled this pass.
    let preexisting = deps.store()?.mappings_for_project(project.project.id)?;

    let pairing = discover_pairs(
        deps,
        project,
        refs,
        &users,
        &redmine_issues,
        &gitlab_issues,
        cancel,
    )
    .await?;
    summary.absorb_pairing(pairing);

    let redmine_by_id: HashMap<i64, &IssueView> = redmine_issues
        .iter()
        .map(|view| (view.remote_id, view))
        .collect();
    let gitlab_by_iid: HashMap<i64, &IssueView> = gitlab_issues
        .iter()
        .map(|view| (view.remote_id, view))
        .collect();

    for earlier in preexisting {
        // The sweep may have deleted it meanwhile.
        let Some(mapping) = deps.store()?.mapping_by_pk(earlier.id)? else {
            continue;
        };

        let redmine_hint = redmine_by_id
            .get(&mapping.external_a_issue_id.get())
            .map(|view| (*view).clone());
        let gitlab_hint = gitlab_by_iid
            .get(&mapping.external_b_issue_id.get())
            .map(|view| (*view).clone());

        let outcome = reconcile_mapping(
            deps,
            project,
            refs,
            &users,
            &mapping,
            redmine_hint,
            gitlab_hint,
            cancel,
        )
        .await?;
        summary.absorb_outcome(outcome);
    }

    deps.store()?
        .stamp_project_synced(project.project.id, OffsetDateTime::now_utc())?;
    Ok(())
}
