use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! numeric_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(i64);

        impl $name {
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "{}", self.0)
            }
        }
    };
}

// Local surrogate keys.
numeric_id!(ProjectRecordId);
numeric_id!(MappingRecordId);
numeric_id!(UserRecordId);

// Redmine-side identifiers.
numeric_id!(RedmineProjectId);
numeric_id!(RedmineIssueId);
numeric_id!(RedmineUserId);
numeric_id!(TrackerId);
numeric_id!(StatusId);

// GitLab-side identifiers. Issues are addressed by project-scoped iid.
numeric_id!(GitlabProjectId);
numeric_id!(GitlabIssueIid);
numeric_id!(GitlabUserId);

/// Which platform a value came from. Used when translating platform-local
/// assignee ids through the correlated user table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    Redmine,
    Gitlab,
}
