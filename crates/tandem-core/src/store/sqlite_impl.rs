use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::adapters::NamedRef;
use crate::error::SyncError;
use crate::identifiers::{
    GitlabIssueIid, GitlabProjectId, GitlabUserId, MappingRecordId, ProjectRecordId,
    RedmineIssueId, RedmineProjectId, RedmineUserId, UserRecordId,
};
use crate::issue::CanonicalSnapshot;
use crate::store::codec::{decode_snapshot, encode_snapshot};
use crate::store::{MappingRecord, ProjectPair, ProjectRecord, RemoteProjectRecord, UserRecord};

pub const CURRENT_SCHEMA_VERSION: u32 = 3;

/// Durable mapping store over a single SQLite connection. Mutations that
/// must be atomic (mapping creation, canonical advancement) commit as one
/// transaction; index uniqueness enforces the cross-mapping invariants.
pub struct MappingStore {
    conn: Connection,
}

fn constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn format_instant(value: OffsetDateTime) -> Result<String, SyncError> {
    value
        .format(&Rfc3339)
        .map_err(|err| SyncError::Persistence(format!("failed to format timestamp: {err}")))
}

fn parse_instant(raw: &str) -> Result<OffsetDateTime, SyncError> {
    OffsetDateTime::parse(raw, &Rfc3339)
        .map_err(|err| SyncError::Persistence(format!("invalid stored timestamp '{raw}': {err}")))
}

impl MappingStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let conn =
            Connection::open(path).map_err(|err| SyncError::Persistence(err.to_string()))?;
        let mut store = Self { conn };
        store.bootstrap()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, SyncError> {
        let conn = Connection::open_in_memory()
            .map_err(|err| SyncError::Persistence(err.to_string()))?;
        let mut store = Self { conn };
        store.bootstrap()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<u32, SyncError> {
        self.current_schema_version()
    }

    fn bootstrap(&mut self) -> Result<(), SyncError> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|err| SyncError::Persistence(err.to_string()))?;

        let current = self.current_schema_version()?;
        if current > CURRENT_SCHEMA_VERSION {
            return Err(SyncError::Persistence(format!(
                "database schema version {current} is newer than supported version {CURRENT_SCHEMA_VERSION}"
            )));
        }

        self.apply_pending_migrations(current)
    }

    fn table_exists(&self, name: &str) -> Result<bool, SyncError> {
        self.conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 LIMIT 1",
                params![name],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
            .map_err(|err| SyncError::Persistence(err.to_string()))
    }

    fn current_schema_version(&self) -> Result<u32, SyncError> {
        if !self.table_exists("schema_migrations")? {
            return Ok(0);
        }

        self.conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
                [],
                |row| row.get(0),
            )
            .map_err(|err| SyncError::Persistence(err.to_string()))
    }

    fn apply_pending_migrations(&mut self, current: u32) -> Result<(), SyncError> {
        for version in (current + 1)..=CURRENT_SCHEMA_VERSION {
            let tx = self
                .conn
                .transaction()
                .map_err(|err| SyncError::Persistence(err.to_string()))?;
            Self::apply_migration(&tx, version)?;
            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))",
                params![version],
            )
            .map_err(|err| SyncError::Persistence(err.to_string()))?;
            tx.commit()
                .map_err(|err| SyncError::Persistence(err.to_string()))?;
        }

        Ok(())
    }

    fn apply_migration(tx: &Transaction<'_>, version: u32) -> Result<(), SyncError> {
        match version {
            1 => tx
                .execute_batch(
                    "
                    CREATE TABLE schema_migrations (
                        version INTEGER PRIMARY KEY,
                        applied_at TEXT NOT NULL
                    );

                    CREATE TABLE projects (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        external_a_id INTEGER NOT NULL UNIQUE,
                        external_a_key TEXT NOT NULL,
                        last_sync_at TEXT
                    );

                    CREATE TABLE gitlab_projects (
                        project_id INTEGER PRIMARY KEY,
                        external_b_id INTEGER,
                        path_with_namespace TEXT NOT NULL,
                        url TEXT NOT NULL,
                        FOREIGN KEY(project_id) REFERENCES projects(id)
                    );

                    CREATE TABLE issue_mappings (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        project_id INTEGER NOT NULL,
                        external_a_issue_id INTEGER NOT NULL UNIQUE,
                        external_b_issue_id INTEGER NOT NULL UNIQUE,
                        canonical_snapshot TEXT,
                        FOREIGN KEY(project_id) REFERENCES projects(id)
                    );

                    CREATE TABLE users (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        external_a_user_id INTEGER,
                        external_b_user_id INTEGER,
                        display_key TEXT NOT NULL,
                        CHECK (external_a_user_id IS NOT NULL OR external_b_user_id IS NOT NULL)
                    );

                    CREATE TABLE redmine_trackers (
                        external_id INTEGER PRIMARY KEY,
                        name TEXT NOT NULL UNIQUE
                    );

                    CREATE TABLE redmine_statuses (
                        external_id INTEGER PRIMARY KEY,
                        name TEXT NOT NULL UNIQUE
                    );

                    CREATE UNIQUE INDEX idx_users_external_a
                        ON users(external_a_user_id)
                        WHERE external_a_user_id IS NOT NULL;
                    CREATE UNIQUE INDEX idx_users_external_b
                        ON users(external_b_user_id)
                        WHERE external_b_user_id IS NOT NULL;
                    ",
                )
                .map_err(|err| SyncError::Persistence(err.to_string())),
            2 => tx
                .execute_batch(
                    "
                    ALTER TABLE issue_mappings
                        ADD COLUMN last_observed_external_event_id TEXT;
                    ",
                )
                .map_err(|err| SyncError::Persistence(err.to_string())),
            3 => tx
                .execute_batch(
                    "
                    CREATE INDEX IF NOT EXISTS idx_issue_mappings_project
                        ON issue_mappings(project_id);
                    ",
                )
                .map_err(|err| SyncError::Persistence(err.to_string())),
            _ => Err(SyncError::Persistence(format!(
                "no migration implementation for version {version}"
            ))),
        }
    }

    /// Creates or updates a project and its GitLab child in one transaction.
    /// An already-resolved `external_b_id` is preserved; the path and URL
    /// follow whatever the custom field currently says.
    pub fn upsert_project(
        &mut self,
        external_a_id: RedmineProjectId,
        external_a_key: &str,
        path_with_namespace: &str,
        url: &str,
    ) -> Result<ProjectPair, SyncError> {
        let tx = self
            .conn
            .transaction()
            .map_err(|err| SyncError::Persistence(err.to_string()))?;

        tx.execute(
            "
            INSERT INTO projects (external_a_id, external_a_key)
            VALUES (?1, ?2)
            ON CONFLICT(external_a_id) DO UPDATE SET
                external_a_key = excluded.external_a_key
            ",
            params![external_a_id.get(), external_a_key],
        )
        .map_err(|err| SyncError::Persistence(err.to_string()))?;

        let project_id: i64 = tx
            .query_row(
                "SELECT id FROM projects WHERE external_a_id = ?1",
                params![external_a_id.get()],
                |row| row.get(0),
            )
            .map_err(|err| SyncError::Persistence(err.to_string()))?;

        tx.execute(
            "
            INSERT INTO gitlab_projects (project_id, external_b_id, path_with_namespace, url)
            VALUES (?1, NULL, ?2, ?3)
            ON CONFLICT(project_id) DO UPDATE SET
                path_with_namespace = excluded.path_with_namespace,
                url = excluded.url
            ",
            params![project_id, path_with_namespace, url],
        )
        .map_err(|err| SyncError::Persistence(err.to_string()))?;

        tx.commit()
            .map_err(|err| SyncError::Persistence(err.to_string()))?;

        self.project_by_pk(ProjectRecordId::new(project_id))?
            .ok_or_else(|| {
                SyncError::Persistence(format!(
                    "project {project_id} vanished during upsert"
                ))
            })
    }

    pub fn set_remote_project_id(
        &mut self,
        project: ProjectRecordId,
        external_b_id: GitlabProjectId,
    ) -> Result<(), SyncError> {
        let updated = self
            .conn
            .execute(
                "UPDATE gitlab_projects SET external_b_id = ?1 WHERE project_id = ?2",
                params![external_b_id.get(), project.get()],
            )
            .map_err(|err| SyncError::Persistence(err.to_string()))?;

        if updated == 0 {
            return Err(SyncError::Persistence(format!(
                "no gitlab project row for project {project}"
            )));
        }

        Ok(())
    }

    pub fn stamp_project_synced(
        &mut self,
        project: ProjectRecordId,
        at: OffsetDateTime,
    ) -> Result<(), SyncError> {
        self.conn
            .execute(
                "UPDATE projects SET last_sync_at = ?1 WHERE id = ?2",
                params![format_instant(at)?, project.get()],
            )
            .map_err(|err| SyncError::Persistence(err.to_string()))?;
        Ok(())
    }

    pub fn project_by_pk(
        &self,
        project: ProjectRecordId,
    ) -> Result<Option<ProjectPair>, SyncError> {
        self.conn
            .query_row(
                "
                SELECT p.id, p.external_a_id, p.external_a_key, p.last_sync_at,
                       g.external_b_id, g.path_with_namespace, g.url
                FROM projects p
                JOIN gitlab_projects g ON g.project_id = p.id
                WHERE p.id = ?1
                ",
                params![project.get()],
                Self::map_project_row,
            )
            .optional()
            .map_err(|err| SyncError::Persistence(err.to_string()))?
            .map(|row| row.into_pair())
            .transpose()
    }

    /// Projects whose GitLab counterpart has been resolved; the only ones
    /// reconciliation touches.
    pub fn linked_projects(&self) -> Result<Vec<ProjectPair>, SyncError> {
        let mut stmt = self
            .conn
            .prepare(
                "
                SELECT p.id, p.external_a_id, p.external_a_key, p.last_sync_at,
                       g.external_b_id, g.path_with_namespace, g.url
                FROM projects p
                JOIN gitlab_projects g ON g.project_id = p.id
                WHERE g.external_b_id IS NOT NULL
                ORDER BY p.id ASC
                ",
            )
            .map_err(|err| SyncError::Persistence(err.to_string()))?;

        let rows = stmt
            .query_map([], Self::map_project_row)
            .map_err(|err| SyncError::Persistence(err.to_string()))?;

        let mut pairs = Vec::new();
        for row in rows {
            let raw = row.map_err(|err| SyncError::Persistence(err.to_string()))?;
            pairs.push(raw.into_pair()?);
        }
        Ok(pairs)
    }

    fn map_project_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawProjectRow> {
        Ok(RawProjectRow {
            id: row.get(0)?,
            external_a_id: row.get(1)?,
            external_a_key: row.get(2)?,
            last_sync_at: row.get(3)?,
            external_b_id: row.get(4)?,
            path_with_namespace: row.get(5)?,
            url: row.get(6)?,
        })
    }

    /// Inserts a new mapping. Fails with [`SyncError::Conflict`] when either
    /// side id is already paired (global uniqueness) and refuses projects
    /// without a resolved GitLab id.
    pub fn create_mapping(
        &mut self,
        project: ProjectRecordId,
        external_a_issue_id: RedmineIssueId,
        external_b_issue_id: GitlabIssueIid,
    ) -> Result<MappingRecord, SyncError> {
        let linked: Option<i64> = self
            .conn
            .query_row(
                "SELECT external_b_id FROM gitlab_projects WHERE project_id = ?1",
                params![project.get()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| SyncError::Persistence(err.to_string()))?
            .flatten();
        if linked.is_none() {
            return Err(SyncError::Conflict(format!(
                "project {project} is not linked to a gitlab project"
            )));
        }

        self.conn
            .execute(
                "
                INSERT INTO issue_mappings (project_id, external_a_issue_id, external_b_issue_id)
                VALUES (?1, ?2, ?3)
                ",
                params![
                    project.get(),
                    external_a_issue_id.get(),
                    external_b_issue_id.get()
                ],
            )
            .map_err(|err| {
                if constraint_violation(&err) {
                    SyncError::Conflict(format!(
                        "issue pair ({external_a_issue_id}, {external_b_issue_id}) overlaps an existing mapping"
                    ))
                } else {
                    SyncError::Persistence(err.to_string())
                }
            })?;

        let id = self.conn.last_insert_rowid();
        self.mapping_by_pk(MappingRecordId::new(id))?.ok_or_else(|| {
            SyncError::Persistence(format!("mapping {id} vanished during insert"))
        })
    }

    pub fn mapping_by_pk(
        &self,
        mapping: MappingRecordId,
    ) -> Result<Option<MappingRecord>, SyncError> {
        self.conn
            .query_row(
                "
                SELECT id, project_id, external_a_issue_id, external_b_issue_id,
                       canonical_snapshot, last_observed_external_event_id
                FROM issue_mappings
                WHERE id = ?1
                ",
                params![mapping.get()],
                Self::map_mapping_row,
            )
            .optional()
            .map_err(|err| SyncError::Persistence(err.to_string()))?
            .map(RawMappingRow::into_record)
            .transpose()
    }

    pub fn mappings_for_project(
        &self,
        project: ProjectRecordId,
    ) -> Result<Vec<MappingRecord>, SyncError> {
        let mut stmt = self
            .conn
            .prepare(
                "
                SELECT id, project_id, external_a_issue_id, external_b_issue_id,
                       canonical_snapshot, last_observed_external_event_id
                FROM issue_mappings
                WHERE project_id = ?1
                ORDER BY id ASC
                ",
            )
            .map_err(|err| SyncError::Persistence(err.to_string()))?;

        let rows = stmt
            .query_map(params![project.get()], Self::map_mapping_row)
            .map_err(|err| SyncError::Persistence(err.to_string()))?;

        let mut records = Vec::new();
        for row in rows {
            let raw = row.map_err(|err| SyncError::Persistence(err.to_string()))?;
            records.push(raw.into_record()?);
        }
        Ok(records)
    }

    pub fn find_mapping_by_redmine_issue(
        &self,
        issue: RedmineIssueId,
    ) -> Result<Option<MappingRecord>, SyncError> {
        self.conn
            .query_row(
                "
                SELECT id, project_id, external_a_issue_id, external_b_issue_id,
                       canonical_snapshot, last_observed_external_event_id
                FROM issue_mappings
                WHERE external_a_issue_id = ?1
                ",
                params![issue.get()],
                Self::map_mapping_row,
            )
            .optional()
            .map_err(|err| SyncError::Persistence(err.to_string()))?
            .map(RawMappingRow::into_record)
            .transpose()
    }

    pub fn find_mapping_by_gitlab_issue(
        &self,
        issue: GitlabIssueIid,
    ) -> Result<Option<MappingRecord>, SyncError> {
        self.conn
            .query_row(
                "
                SELECT id, project_id, external_a_issue_id, external_b_issue_id,
                       canonical_snapshot, last_observed_external_event_id
                FROM issue_mappings
                WHERE external_b_issue_id = ?1
                ",
                params![issue.get()],
                Self::map_mapping_row,
            )
            .optional()
            .map_err(|err| SyncError::Persistence(err.to_string()))?
            .map(RawMappingRow::into_record)
            .transpose()
    }

    /// Advances the canonical snapshot (and the opaque observation marker)
    /// as one transaction. This is the only mutation an existing mapping
    /// sees besides deletion.
    pub fn advance_canonical(
        &mut self,
        mapping: MappingRecordId,
        snapshot: &CanonicalSnapshot,
        last_observed_external_event_id: Option<&str>,
    ) -> Result<(), SyncError> {
        let blob = encode_snapshot(snapshot)?;
        let updated = self
            .conn
            .execute(
                "
                UPDATE issue_mappings
                SET canonical_snapshot = ?1,
                    last_observed_external_event_id = ?2
                WHERE id = ?3
                ",
                params![blob, last_observed_external_event_id, mapping.get()],
            )
            .map_err(|err| SyncError::Persistence(err.to_string()))?;

        if updated == 0 {
            return Err(SyncError::Persistence(format!(
                "cannot advance canonical for missing mapping {mapping}"
            )));
        }
        Ok(())
    }

    pub fn delete_mapping(&mut self, mapping: MappingRecordId) -> Result<(), SyncError> {
        self.conn
            .execute(
                "DELETE FROM issue_mappings WHERE id = ?1",
                params![mapping.get()],
            )
            .map_err(|err| SyncError::Persistence(err.to_string()))?;
        Ok(())
    }

    pub fn count_mappings(&self) -> Result<usize, SyncError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM issue_mappings", [], |row| row.get(0))
            .map_err(|err| SyncError::Persistence(err.to_string()))?;
        usize::try_from(count)
            .map_err(|_| SyncError::Persistence(format!("mapping count '{count}' overflows")))
    }

    fn map_mapping_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawMappingRow> {
        Ok(RawMappingRow {
            id: row.get(0)?,
            project_id: row.get(1)?,
            external_a_issue_id: row.get(2)?,
            external_b_issue_id: row.get(3)?,
            canonical_snapshot: row.get(4)?,
            last_observed_external_event_id: row.get(5)?,
        })
    }

    pub fn users(&self) -> Result<Vec<UserRecord>, SyncError> {
        let mut stmt = self
            .conn
            .prepare(
                "
                SELECT id, external_a_user_id, external_b_user_id, display_key
                FROM users
                ORDER BY id ASC
                ",
            )
            .map_err(|err| SyncError::Persistence(err.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(UserRecord {
                    id: UserRecordId::new(row.get(0)?),
                    external_a_user_id: row
                        .get::<_, Option<i64>>(1)?
                        .map(RedmineUserId::new),
                    external_b_user_id: row
                        .get::<_, Option<i64>>(2)?
                        .map(GitlabUserId::new),
                    display_key: row.get(3)?,
                })
            })
            .map_err(|err| SyncError::Persistence(err.to_string()))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|err| SyncError::Persistence(err.to_string()))
    }

    pub fn find_user_by_redmine_id(
        &self,
        user: RedmineUserId,
    ) -> Result<Option<UserRecord>, SyncError> {
        self.conn
            .query_row(
                "
                SELECT id, external_a_user_id, external_b_user_id, display_key
                FROM users
                WHERE external_a_user_id = ?1
                ",
                params![user.get()],
                |row| {
                    Ok(UserRecord {
                        id: UserRecordId::new(row.get(0)?),
                        external_a_user_id: row
                            .get::<_, Option<i64>>(1)?
                            .map(RedmineUserId::new),
                        external_b_user_id: row
                            .get::<_, Option<i64>>(2)?
                            .map(GitlabUserId::new),
                        display_key: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(|err| SyncError::Persistence(err.to_string()))
    }

    /// Inserts a correlated pair. Existing rows are never mutated; a
    /// uniqueness collision on either platform id surfaces as
    /// [`SyncError::Conflict`] so the correlator can skip and continue.
    pub fn insert_user_pair(
        &mut self,
        external_a_user_id: RedmineUserId,
        external_b_user_id: GitlabUserId,
        display_key: &str,
    ) -> Result<UserRecordId, SyncError> {
        self.conn
            .execute(
                "
                INSERT INTO users (external_a_user_id, external_b_user_id, display_key)
                VALUES (?1, ?2, ?3)
                ",
                params![
                    external_a_user_id.get(),
                    external_b_user_id.get(),
                    display_key
                ],
            )
            .map_err(|err| {
                if constraint_violation(&err) {
                    SyncError::Conflict(format!(
                        "user pair ({external_a_user_id}, {external_b_user_id}) overlaps an existing row"
                    ))
                } else {
                    SyncError::Persistence(err.to_string())
                }
            })?;

        Ok(UserRecordId::new(self.conn.last_insert_rowid()))
    }

    pub fn upsert_tracker(&mut self, tracker: &NamedRef) -> Result<(), SyncError> {
        self.conn
            .execute(
                "
                INSERT INTO redmine_trackers (external_id, name)
                VALUES (?1, ?2)
                ON CONFLICT(external_id) DO UPDATE SET name = excluded.name
                ",
                params![tracker.id, tracker.name],
            )
            .map_err(|err| SyncError::Persistence(err.to_string()))?;
        Ok(())
    }

    pub fn upsert_status(&mut self, status: &NamedRef) -> Result<(), SyncError> {
        self.conn
            .execute(
                "
                INSERT INTO redmine_statuses (external_id, name)
                VALUES (?1, ?2)
                ON CONFLICT(external_id) DO UPDATE SET name = excluded.name
                ",
                params![status.id, status.name],
            )
            .map_err(|err| SyncError::Persistence(err.to_string()))?;
        Ok(())
    }

    pub fn trackers(&self) -> Result<Vec<NamedRef>, SyncError> {
        self.named_rows("SELECT external_id, name FROM redmine_trackers ORDER BY external_id ASC")
    }

    pub fn statuses(&self) -> Result<Vec<NamedRef>, SyncError> {
        self.named_rows("SELECT external_id, name FROM redmine_statuses ORDER BY external_id ASC")
    }

    fn named_rows(&self, sql: &str) -> Result<Vec<NamedRef>, SyncError> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|err| SyncError::Persistence(err.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(NamedRef {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })
            .map_err(|err| SyncError::Persistence(err.to_string()))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|err| SyncError::Persistence(err.to_string()))
    }
}

struct RawProjectRow {
    id: i64,
    external_a_id: i64,
    external_a_key: String,
    last_sync_at: Option<String>,
    external_b_id: Option<i64>,
    path_with_namespace: String,
    url: String,
}

impl RawProjectRow {
    fn into_pair(self) -> Result<ProjectPair, SyncError> {
        let last_sync_at = self
            .last_sync_at
            .as_deref()
            .map(parse_instant)
            .transpose()?;

        Ok(ProjectPair {
            project: ProjectRecord {
                id: ProjectRecordId::new(self.id),
                external_a_id: RedmineProjectId::new(self.external_a_id),
                external_a_key: self.external_a_key,
                last_sync_at,
            },
            remote: RemoteProjectRecord {
                project_id: ProjectRecordId::new(self.id),
                external_b_id: self.external_b_id.map(GitlabProjectId::new),
                path_with_namespace: self.path_with_namespace,
                url: self.url,
            },
        })
    }
}

struct RawMappingRow {
    id: i64,
    project_id: i64,
    external_a_issue_id: i64,
    external_b_issue_id: i64,
    canonical_snapshot: Option<String>,
    last_observed_external_event_id: Option<String>,
}

impl RawMappingRow {
    fn into_record(self) -> Result<MappingRecord, SyncError> {
        let canonical = self
            .canonical_snapshot
            .as_deref()
            .map(decode_snapshot)
            .transpose()?;

        Ok(MappingRecord {
            id: MappingRecordId::new(self.id),
            project_id: ProjectRecordId::new(self.project_id),
            external_a_issue_id: RedmineIssueId::new(self.external_a_issue_id),
            external_b_issue_id: GitlabIssueIid::new(self.external_b_issue_id),
            canonical,
            last_observed_external_event_id: self.last_observed_external_event_id,
        })
    }
}
