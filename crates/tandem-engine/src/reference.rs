use tandem_core::{IssueStatus, NamedRef, StatusId, SyncError, TrackerId};
use tokio_util::sync::CancellationToken;

use crate::SyncDeps;

/// Status names Redmine must expose for the neutral vocabulary to be
/// writable. When a name is missing the status field is omitted from
/// patches instead of failing the pair.
const OPEN_STATUS_NAME: &str = "New";
const CLOSED_STATUS_NAME: &str = "Closed";

/// Pass-local view of Redmine's tracker and status vocabularies, loaded from
/// the DB cache right after it was refreshed so name→id lookups are
/// consistent with what was just observed.
#[derive(Debug, Clone, Default)]
pub struct RefData {
    trackers: Vec<NamedRef>,
    statuses: Vec<NamedRef>,
}

impl RefData {
    pub fn new(trackers: Vec<NamedRef>, statuses: Vec<NamedRef>) -> Self {
        Self { trackers, statuses }
    }

    pub fn tracker_id_by_name(&self, name: &str) -> Option<TrackerId> {
        self.trackers
            .iter()
            .find(|tracker| tracker.name.eq_ignore_ascii_case(name.trim()))
            .map(|tracker| TrackerId::new(tracker.id))
    }

    pub fn status_id_for(&self, status: IssueStatus) -> Option<StatusId> {
        let name = match status {
            IssueStatus::Open => OPEN_STATUS_NAME,
            IssueStatus::Closed => CLOSED_STATUS_NAME,
        };
        self.statuses
            .iter()
            .find(|candidate| candidate.name.eq_ignore_ascii_case(name))
            .map(|candidate| StatusId::new(candidate.id))
    }
}

/// Re-reads Redmine's full tracker and status lists and upserts them into
/// the cache tables, overwriting names on id collision. Runs before any
/// patch of the pass.
pub(crate) async fn refresh(
    deps: &SyncDeps,
    cancel: &CancellationToken,
) -> Result<RefData, SyncError> {
    let trackers = deps.redmine.list_trackers(cancel).await?;
    let statuses = deps.redmine.list_statuses(cancel).await?;

    {
        let mut store = deps.store()?;
        for tracker in &trackers {
            store.upsert_tracker(tracker)?;
        }
        for status in &statuses {
            store.upsert_status(status)?;
        }
    }

    let store = deps.store()?;
    Ok(RefData::new(store.trackers()?, store.statuses()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs() -> RefData {
        RefData::new(
            vec![
                NamedRef {
                    id: 1,
                    name: "Feature".to_owned(),
                },
                NamedRef {
                    id: 2,
                    name: "Bug".to_owned(),
                },
            ],
            vec![
                NamedRef {
                    id: 1,
                    name: "New".to_owned(),
                },
                NamedRef {
                    id: 5,
                    name: "Closed".to_owned(),
                },
            ],
        )
    }

    #[test]
    fn tracker_lookup_is_case_insensitive() {
        let refs = refs();
        assert_eq!(refs.tracker_id_by_name(" bug "), Some(TrackerId::new(2)));
        assert_eq!(refs.tracker_id_by_name("Support"), None);
    }

    #[test]
    fn neutral_status_maps_to_new_and_closed() {
        let refs = refs();
        assert_eq!(refs.status_id_for(IssueStatus::Open), Some(StatusId::new(1)));
        assert_eq!(
            refs.status_id_for(IssueStatus::Closed),
            Some(StatusId::new(5))
        );

        let bare = RefData::default();
        assert_eq!(bare.status_id_for(IssueStatus::Open), None);
    }
}
