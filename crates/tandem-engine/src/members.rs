use std::sync::OnceLock;

use regex::Regex;
use tandem_core::{GitlabUserId, MemberInfo, RedmineUserId, SyncError};
use tracing::debug;

use crate::SyncDeps;

fn bot_handle_regex() -> &'static Regex {
    static BOT: OnceLock<Regex> = OnceLock::new();
    BOT.get_or_init(|| {
        Regex::new(r"(?i)^(project|group)_\d+_bot(_|$)").expect("bot handle pattern compiles")
    })
}

/// Platform-synthetic service accounts are never correlated.
pub(crate) fn is_synthetic_bot(handle: &str) -> bool {
    bot_handle_regex().is_match(handle)
}

/// Derives the substring used to find a GitLab member inside Redmine display
/// names. Deliberately crude but deterministic for a fixed handle corpus:
/// the last dotted/underscored/dashed segment, else the handle minus its
/// first character, else the handle itself.
pub(crate) fn search_key(handle: &str) -> String {
    let parts = handle
        .split(['.', '_', '-'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>();
    if parts.len() >= 2 {
        return parts[parts.len() - 1].to_owned();
    }

    if handle.chars().count() >= 4 {
        let mut chars = handle.chars();
        chars.next();
        return chars.as_str().to_owned();
    }

    handle.to_owned()
}

/// First-write-wins correlation: for every non-bot GitLab member whose
/// search key appears in a Redmine member's display name, insert a user
/// pair unless that Redmine id is already correlated. Existing rows are
/// never touched; uniqueness collisions are skipped.
pub(crate) fn correlate_members(
    deps: &SyncDeps,
    redmine_members: &[MemberInfo],
    gitlab_members: &[MemberInfo],
) -> Result<u32, SyncError> {
    let mut inserted = 0;

    for gitlab_member in gitlab_members {
        if is_synthetic_bot(&gitlab_member.handle) {
            continue;
        }
        let key = search_key(&gitlab_member.handle).to_lowercase();
        if key.is_empty() {
            continue;
        }

        for redmine_member in redmine_members {
            if !redmine_member.name.to_lowercase().contains(&key) {
                continue;
            }

            let mut store = deps.store()?;
            if store
                .find_user_by_redmine_id(RedmineUserId::new(redmine_member.id))?
                .is_some()
            {
                continue;
            }

            match store.insert_user_pair(
                RedmineUserId::new(redmine_member.id),
                GitlabUserId::new(gitlab_member.id),
                &gitlab_member.handle,
            ) {
                Ok(_) => inserted += 1,
                Err(err) if err.is_conflict() => {
                    debug!(
                        handle = %gitlab_member.handle,
                        redmine_member = %redmine_member.name,
                        "skipping user correlation that would overlap an existing pair"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_key_prefers_the_last_segment() {
        assert_eq!(search_key("john.smith"), "smith");
        assert_eq!(search_key("anna_k-lee"), "lee");
        assert_eq!(search_key("trailing_"), "railing_");
    }

    #[test]
    fn search_key_drops_first_char_of_plain_handles() {
        assert_eq!(search_key("alice"), "lice");
        assert_eq!(search_key("jdoe"), "doe");
    }

    #[test]
    fn search_key_keeps_short_handles_whole() {
        assert_eq!(search_key("bob"), "bob");
        assert_eq!(search_key("ed"), "ed");
    }

    #[test]
    fn synthetic_bot_handles_are_excluded() {
        assert!(is_synthetic_bot("project_123_bot"));
        assert!(is_synthetic_bot("GROUP_9_BOT_extra"));
        assert!(!is_synthetic_bot("project_bot"));
        assert!(!is_synthetic_bot("botanist"));
        assert!(!is_synthetic_bot("my_project_123_bot"));
    }
}
