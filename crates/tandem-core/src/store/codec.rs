//! Canonical snapshot blob codec. Snapshots are stored as a version-tagged
//! JSON envelope so schema evolution is detectable instead of silently
//! misread; serialization follows struct field order, so encoding the same
//! snapshot always yields the same bytes.

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::issue::CanonicalSnapshot;

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope {
    version: u32,
    snapshot: CanonicalSnapshot,
}

pub fn encode_snapshot(snapshot: &CanonicalSnapshot) -> Result<String, SyncError> {
    serde_json::to_string(&SnapshotEnvelope {
        version: SNAPSHOT_SCHEMA_VERSION,
        snapshot: snapshot.clone(),
    })
    .map_err(|err| SyncError::Persistence(format!("failed to encode canonical snapshot: {err}")))
}

pub fn decode_snapshot(blob: &str) -> Result<CanonicalSnapshot, SyncError> {
    let envelope: SnapshotEnvelope = serde_json::from_str(blob).map_err(|err| {
        SyncError::Persistence(format!("failed to decode canonical snapshot: {err}"))
    })?;

    if envelope.version > SNAPSHOT_SCHEMA_VERSION {
        return Err(SyncError::Persistence(format!(
            "canonical snapshot version {} is newer than supported version {}",
            envelope.version, SNAPSHOT_SCHEMA_VERSION
        )));
    }

    Ok(envelope.snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::UserRecordId;
    use crate::issue::IssueStatus;

    fn sample() -> CanonicalSnapshot {
        CanonicalSnapshot {
            title: "Fix crash".to_owned(),
            description: Some("steps to reproduce".to_owned()),
            labels: vec!["Bug".to_owned()],
            assignee: Some(UserRecordId::new(4)),
            due_date: Some(time::macros::date!(2025 - 02 - 01)),
            status: Some(IssueStatus::Open),
            updated_at: Some(time::macros::datetime!(2025-01-10 12:00:00 UTC)),
        }
    }

    #[test]
    fn round_trips_and_is_byte_stable() {
        let snapshot = sample();
        let encoded = encode_snapshot(&snapshot).expect("encode");
        let again = encode_snapshot(&snapshot).expect("encode again");
        assert_eq!(encoded, again);

        let decoded = decode_snapshot(&encoded).expect("decode");
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn absent_optionals_round_trip_as_absent() {
        let snapshot = CanonicalSnapshot {
            title: "Bare".to_owned(),
            description: None,
            labels: Vec::new(),
            assignee: None,
            due_date: None,
            status: None,
            updated_at: None,
        };
        let encoded = encode_snapshot(&snapshot).expect("encode");
        assert!(!encoded.contains("due_date"));
        assert_eq!(decode_snapshot(&encoded).expect("decode"), snapshot);
    }

    #[test]
    fn future_versions_are_rejected() {
        let blob = r#"{"version":99,"snapshot":{"title":"x"}}"#;
        let error = decode_snapshot(blob).expect_err("future version");
        assert!(error.to_string().contains("newer than supported"));
    }
}
