use tandem_core::{ProjectPair, SyncError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::SyncDeps;

/// Extracts `(repository url, path_with_namespace)` from a custom-field
/// value. Accepts absolute http(s) URLs only, strips a trailing `.git`, and
/// requires a non-empty namespaced path.
pub(crate) fn parse_repo_url(raw: &str) -> Option<(String, String)> {
    let trimmed = raw.trim().trim_end_matches('/');
    let lowered = trimmed.to_ascii_lowercase();
    let scheme_len = if lowered.starts_with("https://") {
        "https://".len()
    } else if lowered.starts_with("http://") {
        "http://".len()
    } else {
        return None;
    };

    let url = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    let url = url.trim_end_matches('/');

    let rest = &url[scheme_len..];
    let slash = rest.find('/')?;
    let host = &rest[..slash];
    let path = rest[slash + 1..].trim_matches('/');
    if host.is_empty() || path.is_empty() {
        return None;
    }

    Some((url.to_owned(), path.to_owned()))
}

/// Reads Redmine's projects, upserts every project whose configured custom
/// field carries a parseable GitLab repo URL, and resolves missing GitLab
/// project ids. Unresolvable projects stay unlinked and are retried on the
/// next pass; projects without the field are silently skipped.
pub(crate) async fn discover_projects(
    deps: &SyncDeps,
    cancel: &CancellationToken,
) -> Result<Vec<ProjectPair>, SyncError> {
    let projects = deps.redmine.list_projects(cancel).await?;

    for info in &projects {
        let Some(raw) = info.custom_field(&deps.custom_field_name) else {
            continue;
        };
        let Some((url, path_with_namespace)) = parse_repo_url(raw) else {
            debug!(
                project = %info.key,
                value = raw,
                "custom field value is not an absolute repository URL; skipping"
            );
            continue;
        };

        let pair = {
            let mut store = deps.store()?;
            store.upsert_project(info.id, &info.key, &path_with_namespace, &url)?
        };

        if pair.gitlab_id().is_none() {
            match deps
                .gitlab
                .resolve_project_id(&path_with_namespace, cancel)
                .await
            {
                Ok(gitlab_id) => {
                    let mut store = deps.store()?;
                    store.set_remote_project_id(pair.project.id, gitlab_id)?;
                }
                Err(err) if matches!(err, tandem_core::AdapterError::Cancelled) => {
                    return Err(SyncError::Cancelled);
                }
                Err(err) => {
                    warn!(
                        project = %info.key,
                        path = %path_with_namespace,
                        error = %err,
                        "could not resolve GitLab project id; project stays unlinked"
                    );
                }
            }
        }
    }

    deps.store()?.linked_projects()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_absolute_urls_and_strips_git_suffix() {
        let (url, path) =
            parse_repo_url("https://gitlab.example.com/team/app.git").expect("parse");
        assert_eq!(url, "https://gitlab.example.com/team/app");
        assert_eq!(path, "team/app");

        let (_, nested) =
            parse_repo_url(" https://gitlab.example.com/group/sub/app/ ").expect("parse");
        assert_eq!(nested, "group/sub/app");
    }

    #[test]
    fn rejects_relative_and_malformed_values() {
        assert_eq!(parse_repo_url("team/app"), None);
        assert_eq!(parse_repo_url("git@gitlab.example.com:team/app.git"), None);
        assert_eq!(parse_repo_url("https://gitlab.example.com"), None);
        assert_eq!(parse_repo_url("https:///team/app"), None);
        assert_eq!(parse_repo_url(""), None);
    }
}
