use std::collections::HashMap;

use tandem_core::{GitlabUserId, Platform, RedmineUserId, UserRecord, UserRecordId};

/// In-memory index over the correlated user table, rebuilt whenever the
/// table may have changed. Translates platform-local assignee ids to the
/// neutral user-row id and back; an uncorrelated platform id translates to
/// nothing, which the engine treats the same as an absent assignee.
#[derive(Debug, Default)]
pub struct UserDirectory {
    by_redmine: HashMap<i64, UserRecordId>,
    by_gitlab: HashMap<i64, UserRecordId>,
    redmine_by_row: HashMap<UserRecordId, RedmineUserId>,
    gitlab_by_row: HashMap<UserRecordId, GitlabUserId>,
}

impl UserDirectory {
    pub fn from_records(records: &[UserRecord]) -> Self {
        let mut directory = Self::default();
        for record in records {
            if let Some(redmine) = record.external_a_user_id {
                directory.by_redmine.insert(redmine.get(), record.id);
                directory.redmine_by_row.insert(record.id, redmine);
            }
            if let Some(gitlab) = record.external_b_user_id {
                directory.by_gitlab.insert(gitlab.get(), record.id);
                directory.gitlab_by_row.insert(record.id, gitlab);
            }
        }
        directory
    }

    pub fn row_for(&self, platform: Platform, platform_id: Option<i64>) -> Option<UserRecordId> {
        let id = platform_id?;
        match platform {
            Platform::Redmine => self.by_redmine.get(&id).copied(),
            Platform::Gitlab => self.by_gitlab.get(&id).copied(),
        }
    }

    pub fn redmine_id(&self, row: UserRecordId) -> Option<RedmineUserId> {
        self.redmine_by_row.get(&row).copied()
    }

    pub fn gitlab_id(&self, row: UserRecordId) -> Option<GitlabUserId> {
        self.gitlab_by_row.get(&row).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_both_directions() {
        let records = vec![UserRecord {
            id: UserRecordId::new(1),
            external_a_user_id: Some(RedmineUserId::new(5)),
            external_b_user_id: Some(GitlabUserId::new(42)),
            display_key: "alice".to_owned(),
        }];
        let directory = UserDirectory::from_records(&records);

        let row = directory
            .row_for(Platform::Redmine, Some(5))
            .expect("redmine row");
        assert_eq!(directory.row_for(Platform::Gitlab, Some(42)), Some(row));
        assert_eq!(directory.gitlab_id(row), Some(GitlabUserId::new(42)));
        assert_eq!(directory.redmine_id(row), Some(RedmineUserId::new(5)));

        assert_eq!(directory.row_for(Platform::Redmine, Some(6)), None);
        assert_eq!(directory.row_for(Platform::Gitlab, None), None);
    }
}
