//! SQLite persistence for the casebook kernel.
//!
//! The store owns the relational schema and keeps every multi-row write inside
//! a single transaction: an activity batch, a group assignment, or a tenure
//! rewrite either lands completely or not at all. Domain rules live in
//! `casebook-core`; this crate loads the rows, hands them to the core
//! validators, and persists whatever survives.
//!
//! Timestamps are stored as sortable `YYYY-MM-DD HH:MM:SS` text so that
//! `ORDER BY` over status records and tenures matches chronological order
//! without any date functions in SQL.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use casebook_core::{
    validate_case_file_groups, validate_exclusive_set_members, validate_group_constraints,
    Activity, ActivityDraft, ActivityId, ActivityKind, ActivityStatus, ActivityType,
    ActivityTypeId, CaseFile, CaseFileId, CaseStatus, CoreError, EventSchedule, ExclusiveSet,
    ExclusiveSetId, Group, GroupConstraintChange, GroupId, Orientation, Organization,
    OrganizationId, Participant, ParticipantId, Resource, ResourceId, ResponsibilityLedger,
    StatusLedger, StatusRecord, StatusRecordId, TenureRecord, Topic, TopicId, User, UserGroup,
    UserGroupId, UserId, View, ViewId,
};
use rusqlite::{params, Connection, DatabaseName, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};

/// Newest schema version this build knows how to reach.
pub const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS organizations (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL UNIQUE,
  description TEXT,
  internal INTEGER NOT NULL DEFAULT 0 CHECK (internal IN (0, 1))
);

CREATE TABLE IF NOT EXISTS topics (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL UNIQUE,
  description TEXT
);

CREATE TABLE IF NOT EXISTS participants (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  firstname TEXT NOT NULL,
  lastname TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS resources (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS resource_topics (
  resource_id INTEGER NOT NULL,
  topic_id INTEGER NOT NULL,
  PRIMARY KEY (resource_id, topic_id),
  FOREIGN KEY (resource_id) REFERENCES resources(id),
  FOREIGN KEY (topic_id) REFERENCES topics(id)
);

CREATE TABLE IF NOT EXISTS usergroups (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS usergroup_status_window (
  usergroup_id INTEGER NOT NULL,
  status TEXT NOT NULL CHECK (status IN ('preadmission', 'admission', 'present', 'left')),
  PRIMARY KEY (usergroup_id, status),
  FOREIGN KEY (usergroup_id) REFERENCES usergroups(id)
);

CREATE TABLE IF NOT EXISTS users (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  participant_id INTEGER NOT NULL UNIQUE,
  usergroup_id INTEGER,
  FOREIGN KEY (participant_id) REFERENCES participants(id),
  FOREIGN KEY (usergroup_id) REFERENCES usergroups(id)
);

CREATE TABLE IF NOT EXISTS case_files (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  firstname TEXT NOT NULL,
  lastname TEXT NOT NULL,
  birthdate TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS groups (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  organization_id INTEGER NOT NULL,
  name TEXT NOT NULL,
  description TEXT,
  mandatory INTEGER NOT NULL DEFAULT 0 CHECK (mandatory IN (0, 1)),
  orientation TEXT NOT NULL CHECK (orientation IN ('organization', 'participant')),
  UNIQUE (organization_id, name),
  FOREIGN KEY (organization_id) REFERENCES organizations(id)
);

CREATE TABLE IF NOT EXISTS group_topics (
  group_id INTEGER NOT NULL,
  topic_id INTEGER NOT NULL,
  PRIMARY KEY (group_id, topic_id),
  FOREIGN KEY (group_id) REFERENCES groups(id),
  FOREIGN KEY (topic_id) REFERENCES topics(id)
);

CREATE TABLE IF NOT EXISTS exclusive_sets (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS exclusive_set_members (
  exclusive_set_id INTEGER NOT NULL,
  group_id INTEGER NOT NULL,
  PRIMARY KEY (exclusive_set_id, group_id),
  UNIQUE (group_id),
  FOREIGN KEY (exclusive_set_id) REFERENCES exclusive_sets(id),
  FOREIGN KEY (group_id) REFERENCES groups(id)
);

CREATE TABLE IF NOT EXISTS usergroup_case_file_groups (
  usergroup_id INTEGER NOT NULL,
  group_id INTEGER NOT NULL,
  PRIMARY KEY (usergroup_id, group_id),
  FOREIGN KEY (usergroup_id) REFERENCES usergroups(id),
  FOREIGN KEY (group_id) REFERENCES groups(id)
);

CREATE TABLE IF NOT EXISTS usergroup_participant_groups (
  usergroup_id INTEGER NOT NULL,
  group_id INTEGER NOT NULL,
  PRIMARY KEY (usergroup_id, group_id),
  FOREIGN KEY (usergroup_id) REFERENCES usergroups(id),
  FOREIGN KEY (group_id) REFERENCES groups(id)
);

CREATE TABLE IF NOT EXISTS case_file_groups (
  case_file_id INTEGER NOT NULL,
  group_id INTEGER NOT NULL,
  PRIMARY KEY (case_file_id, group_id),
  FOREIGN KEY (case_file_id) REFERENCES case_files(id),
  FOREIGN KEY (group_id) REFERENCES groups(id)
);

CREATE TABLE IF NOT EXISTS participant_groups (
  participant_id INTEGER NOT NULL,
  group_id INTEGER NOT NULL,
  PRIMARY KEY (participant_id, group_id),
  FOREIGN KEY (participant_id) REFERENCES participants(id),
  FOREIGN KEY (group_id) REFERENCES groups(id)
);

CREATE TABLE IF NOT EXISTS status_records (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  case_file_id INTEGER NOT NULL,
  organization_id INTEGER NOT NULL,
  status TEXT NOT NULL CHECK (status IN ('preadmission', 'admission', 'present', 'left')),
  effective_from TEXT NOT NULL,
  FOREIGN KEY (case_file_id) REFERENCES case_files(id),
  FOREIGN KEY (organization_id) REFERENCES organizations(id)
);

CREATE INDEX IF NOT EXISTS idx_status_records_scope
  ON status_records(case_file_id, organization_id, effective_from);

CREATE TABLE IF NOT EXISTS activity_types (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  kind TEXT NOT NULL CHECK (kind IN ('event', 'document')),
  category TEXT,
  name TEXT NOT NULL,
  individual INTEGER NOT NULL DEFAULT 0 CHECK (individual IN (0, 1))
);

CREATE TABLE IF NOT EXISTS activities (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  kind TEXT NOT NULL CHECK (kind IN ('event', 'document')),
  title TEXT NOT NULL,
  description TEXT,
  status TEXT NOT NULL CHECK (status IN ('scheduled', 'in_progress', 'available', 'tentative', 'confirmed', 'cancelled')),
  activity_type_id INTEGER,
  author_id INTEGER NOT NULL,
  responsible_id INTEGER,
  start_time TEXT,
  end_time TEXT,
  all_day INTEGER CHECK (all_day IN (0, 1)),
  place TEXT,
  cost INTEGER,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  FOREIGN KEY (activity_type_id) REFERENCES activity_types(id),
  FOREIGN KEY (author_id) REFERENCES participants(id),
  FOREIGN KEY (responsible_id) REFERENCES participants(id)
);

CREATE INDEX IF NOT EXISTS idx_activities_kind ON activities(kind);
CREATE INDEX IF NOT EXISTS idx_activities_start_time ON activities(start_time);

CREATE TABLE IF NOT EXISTS activity_topics (
  activity_id INTEGER NOT NULL,
  topic_id INTEGER NOT NULL,
  PRIMARY KEY (activity_id, topic_id),
  FOREIGN KEY (activity_id) REFERENCES activities(id),
  FOREIGN KEY (topic_id) REFERENCES topics(id)
);

CREATE TABLE IF NOT EXISTS activity_case_files (
  activity_id INTEGER NOT NULL,
  case_file_id INTEGER NOT NULL,
  PRIMARY KEY (activity_id, case_file_id),
  FOREIGN KEY (activity_id) REFERENCES activities(id),
  FOREIGN KEY (case_file_id) REFERENCES case_files(id)
);

CREATE INDEX IF NOT EXISTS idx_activity_case_files_case_file
  ON activity_case_files(case_file_id);

CREATE TABLE IF NOT EXISTS activity_participants (
  activity_id INTEGER NOT NULL,
  participant_id INTEGER NOT NULL,
  PRIMARY KEY (activity_id, participant_id),
  FOREIGN KEY (activity_id) REFERENCES activities(id),
  FOREIGN KEY (participant_id) REFERENCES participants(id)
);

CREATE TABLE IF NOT EXISTS activity_resources (
  activity_id INTEGER NOT NULL,
  resource_id INTEGER NOT NULL,
  PRIMARY KEY (activity_id, resource_id),
  FOREIGN KEY (activity_id) REFERENCES activities(id),
  FOREIGN KEY (resource_id) REFERENCES resources(id)
);

CREATE TABLE IF NOT EXISTS responsibility_tenures (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  activity_id INTEGER NOT NULL,
  participant_id INTEGER NOT NULL,
  attributed_at TEXT NOT NULL,
  achieved_at TEXT,
  FOREIGN KEY (activity_id) REFERENCES activities(id),
  FOREIGN KEY (participant_id) REFERENCES participants(id)
);

CREATE INDEX IF NOT EXISTS idx_responsibility_tenures_activity
  ON responsibility_tenures(activity_id);

CREATE TABLE IF NOT EXISTS views (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  kind TEXT NOT NULL CHECK (kind IN ('event', 'document')),
  name TEXT NOT NULL,
  type_filter_id INTEGER,
  FOREIGN KEY (type_filter_id) REFERENCES activity_types(id)
);

CREATE TABLE IF NOT EXISTS view_categories (
  view_id INTEGER NOT NULL,
  category TEXT NOT NULL,
  PRIMARY KEY (view_id, category),
  FOREIGN KEY (view_id) REFERENCES views(id)
);

CREATE TABLE IF NOT EXISTS view_topics (
  view_id INTEGER NOT NULL,
  topic_id INTEGER NOT NULL,
  PRIMARY KEY (view_id, topic_id),
  FOREIGN KEY (view_id) REFERENCES views(id),
  FOREIGN KEY (topic_id) REFERENCES topics(id)
);
";

const STORAGE_FORMAT: &[BorrowedFormatItem<'_>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
const STORAGE_DATE_FORMAT: &[BorrowedFormatItem<'_>] = format_description!("[year]-[month]-[day]");

/// Where the schema stands relative to this build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

/// One row of `PRAGMA foreign_key_check` output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: Option<i64>,
    pub parent: String,
    pub fk_index: i64,
}

/// Outcome of an on-demand database health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_messages: Vec<String>,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
}

impl IntegrityReport {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.quick_check_ok && self.foreign_key_violations.is_empty()
    }
}

/// Handle over one SQLite database file.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and apply the usual pragmas.
    ///
    /// # Errors
    /// Returns an error when the file cannot be opened or a pragma fails.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        conn.execute_batch(
            r"
            PRAGMA journal_mode = WAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )
        .context("failed to apply connection pragmas")?;
        Ok(Self { conn })
    }

    /// Report the schema version on disk against the version this build targets.
    ///
    /// # Errors
    /// Returns an error when the bookkeeping table cannot be read.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to ensure schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect();
        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Bring the schema up to `LATEST_SCHEMA_VERSION`. Safe to call repeatedly.
    ///
    /// # Errors
    /// Returns an error when a migration step fails or the on-disk version is
    /// newer than this build understands.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to ensure schema_migrations table")?;
        let version = current_schema_version(&self.conn)?;
        if version == 0 {
            let tx = self
                .conn
                .transaction()
                .context("failed to start migration transaction")?;
            tx.execute_batch(MIGRATION_001_SQL)
                .context("failed to apply schema version 1")?;
            tx.execute(
                "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                params![1_i64, now_storage()],
            )
            .context("failed to record schema version 1")?;
            tx.commit().context("failed to commit schema version 1")?;
            return Ok(());
        }
        if version > LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "database schema version {version} is newer than supported version {LATEST_SCHEMA_VERSION}"
            ));
        }
        Ok(())
    }

    /// Register an organization. Names are unique across the registry.
    ///
    /// # Errors
    /// Returns an error when the name is blank or already taken.
    pub fn add_organization(
        &mut self,
        name: &str,
        description: Option<&str>,
        internal: bool,
    ) -> Result<OrganizationId> {
        ensure_name(name, "organization name")?;
        self.conn
            .execute(
                "INSERT INTO organizations(name, description, internal) VALUES (?1, ?2, ?3)",
                params![name, description, internal],
            )
            .context("failed to insert organization")?;
        Ok(OrganizationId(self.conn.last_insert_rowid()))
    }

    /// # Errors
    /// Returns an error when the rows cannot be read.
    pub fn list_organizations(&self) -> Result<Vec<Organization>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, description, internal FROM organizations ORDER BY id ASC")
            .context("failed to prepare organization query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Organization {
                    id: OrganizationId(row.get(0)?),
                    name: row.get(1)?,
                    description: row.get(2)?,
                    internal: row.get(3)?,
                })
            })
            .context("failed to query organizations")?;
        let mut organizations = Vec::new();
        for row in rows {
            organizations.push(row.context("failed to decode organization row")?);
        }
        Ok(organizations)
    }

    /// # Errors
    /// Returns an error when the lookup fails.
    pub fn get_organization(&self, id: OrganizationId) -> Result<Option<Organization>> {
        self.conn
            .query_row(
                "SELECT id, name, description, internal FROM organizations WHERE id = ?1",
                params![id.0],
                |row| {
                    Ok(Organization {
                        id: OrganizationId(row.get(0)?),
                        name: row.get(1)?,
                        description: row.get(2)?,
                        internal: row.get(3)?,
                    })
                },
            )
            .optional()
            .context("failed to read organization")
    }

    /// # Errors
    /// Returns an error when the name is blank or already taken.
    pub fn add_topic(&mut self, name: &str, description: Option<&str>) -> Result<TopicId> {
        ensure_name(name, "topic name")?;
        self.conn
            .execute(
                "INSERT INTO topics(name, description) VALUES (?1, ?2)",
                params![name, description],
            )
            .context("failed to insert topic")?;
        Ok(TopicId(self.conn.last_insert_rowid()))
    }

    /// # Errors
    /// Returns an error when the rows cannot be read.
    pub fn list_topics(&self) -> Result<Vec<Topic>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, description FROM topics ORDER BY id ASC")
            .context("failed to prepare topic query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Topic {
                    id: TopicId(row.get(0)?),
                    name: row.get(1)?,
                    description: row.get(2)?,
                })
            })
            .context("failed to query topics")?;
        let mut topics = Vec::new();
        for row in rows {
            topics.push(row.context("failed to decode topic row")?);
        }
        Ok(topics)
    }

    /// # Errors
    /// Returns an error when either name is blank or the insert fails.
    pub fn add_participant(&mut self, firstname: &str, lastname: &str) -> Result<ParticipantId> {
        ensure_name(firstname, "participant firstname")?;
        ensure_name(lastname, "participant lastname")?;
        self.conn
            .execute(
                "INSERT INTO participants(firstname, lastname) VALUES (?1, ?2)",
                params![firstname, lastname],
            )
            .context("failed to insert participant")?;
        Ok(ParticipantId(self.conn.last_insert_rowid()))
    }

    /// # Errors
    /// Returns an error when the lookup fails.
    pub fn get_participant(&self, id: ParticipantId) -> Result<Option<Participant>> {
        self.conn
            .query_row(
                "SELECT id, firstname, lastname FROM participants WHERE id = ?1",
                params![id.0],
                |row| {
                    Ok(Participant {
                        id: ParticipantId(row.get(0)?),
                        firstname: row.get(1)?,
                        lastname: row.get(2)?,
                    })
                },
            )
            .optional()
            .context("failed to read participant")
    }

    /// # Errors
    /// Returns an error when the rows cannot be read.
    pub fn list_participants(&self) -> Result<Vec<Participant>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, firstname, lastname FROM participants ORDER BY id ASC")
            .context("failed to prepare participant query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Participant {
                    id: ParticipantId(row.get(0)?),
                    firstname: row.get(1)?,
                    lastname: row.get(2)?,
                })
            })
            .context("failed to query participants")?;
        let mut participants = Vec::new();
        for row in rows {
            participants.push(row.context("failed to decode participant row")?);
        }
        Ok(participants)
    }

    /// Register a bookable resource and the topics it serves.
    ///
    /// # Errors
    /// Returns an error when the name is blank or a topic does not exist.
    pub fn add_resource(&mut self, name: &str, topics: &BTreeSet<TopicId>) -> Result<ResourceId> {
        ensure_name(name, "resource name")?;
        let tx = self
            .conn
            .transaction()
            .context("failed to start resource transaction")?;
        for topic in topics {
            ensure_row(&tx, "topics", "topic", topic.0)?;
        }
        tx.execute("INSERT INTO resources(name) VALUES (?1)", params![name])
            .context("failed to insert resource")?;
        let id = tx.last_insert_rowid();
        for topic in topics {
            tx.execute(
                "INSERT INTO resource_topics(resource_id, topic_id) VALUES (?1, ?2)",
                params![id, topic.0],
            )
            .context("failed to link resource topic")?;
        }
        tx.commit().context("failed to commit resource")?;
        Ok(ResourceId(id))
    }

    /// # Errors
    /// Returns an error when the rows cannot be read.
    pub fn list_resources(&self) -> Result<Vec<Resource>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name FROM resources ORDER BY id ASC")
            .context("failed to prepare resource query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .context("failed to query resources")?;
        let mut resources = Vec::new();
        for row in rows {
            let (id, name) = row.context("failed to decode resource row")?;
            let topics = load_edge_ids(
                &self.conn,
                "SELECT topic_id FROM resource_topics WHERE resource_id = ?1 ORDER BY topic_id ASC",
                id,
            )?;
            resources.push(Resource {
                id: ResourceId(id),
                name,
                topics: topics.into_iter().map(TopicId).collect(),
            });
        }
        Ok(resources)
    }

    /// Open a case file for a person served by the facility.
    ///
    /// # Errors
    /// Returns an error when either name is blank or the insert fails.
    pub fn add_case_file(
        &mut self,
        firstname: &str,
        lastname: &str,
        birthdate: Date,
    ) -> Result<CaseFileId> {
        ensure_name(firstname, "case file firstname")?;
        ensure_name(lastname, "case file lastname")?;
        self.conn
            .execute(
                "INSERT INTO case_files(firstname, lastname, birthdate) VALUES (?1, ?2, ?3)",
                params![firstname, lastname, to_storage_date(birthdate)],
            )
            .context("failed to insert case file")?;
        Ok(CaseFileId(self.conn.last_insert_rowid()))
    }

    /// # Errors
    /// Returns an error when the lookup fails or the stored birthdate is malformed.
    pub fn get_case_file(&self, id: CaseFileId) -> Result<Option<CaseFile>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, firstname, lastname, birthdate FROM case_files WHERE id = ?1",
                params![id.0],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .context("failed to read case file")?;
        match row {
            Some((id, firstname, lastname, birthdate)) => Ok(Some(CaseFile {
                id: CaseFileId(id),
                firstname,
                lastname,
                birthdate: parse_storage_date(&birthdate)?,
            })),
            None => Ok(None),
        }
    }

    /// # Errors
    /// Returns an error when the rows cannot be read.
    pub fn list_case_files(&self) -> Result<Vec<CaseFile>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, firstname, lastname, birthdate FROM case_files ORDER BY id ASC")
            .context("failed to prepare case file query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .context("failed to query case files")?;
        let mut case_files = Vec::new();
        for row in rows {
            let (id, firstname, lastname, birthdate) =
                row.context("failed to decode case file row")?;
            case_files.push(CaseFile {
                id: CaseFileId(id),
                firstname,
                lastname,
                birthdate: parse_storage_date(&birthdate)?,
            });
        }
        Ok(case_files)
    }

    /// Register a login bound to a participant, optionally placed in a usergroup.
    ///
    /// # Errors
    /// Returns an error when the participant or usergroup does not exist, or
    /// the participant already has a login.
    pub fn add_user(
        &mut self,
        participant: ParticipantId,
        usergroup: Option<UserGroupId>,
    ) -> Result<UserId> {
        ensure_row(&self.conn, "participants", "participant", participant.0)?;
        if let Some(usergroup) = usergroup {
            ensure_row(&self.conn, "usergroups", "usergroup", usergroup.0)?;
        }
        self.conn
            .execute(
                "INSERT INTO users(participant_id, usergroup_id) VALUES (?1, ?2)",
                params![participant.0, usergroup.map(|id| id.0)],
            )
            .context("failed to insert user")?;
        Ok(UserId(self.conn.last_insert_rowid()))
    }

    /// # Errors
    /// Returns an error when the lookup fails.
    pub fn get_user(&self, id: UserId) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, participant_id, usergroup_id FROM users WHERE id = ?1",
                params![id.0],
                |row| {
                    Ok(User {
                        id: UserId(row.get(0)?),
                        participant: ParticipantId(row.get(1)?),
                        usergroup: row.get::<_, Option<i64>>(2)?.map(UserGroupId),
                    })
                },
            )
            .optional()
            .context("failed to read user")
    }

    /// # Errors
    /// Returns an error when the rows cannot be read.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, participant_id, usergroup_id FROM users ORDER BY id ASC")
            .context("failed to prepare user query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(User {
                    id: UserId(row.get(0)?),
                    participant: ParticipantId(row.get(1)?),
                    usergroup: row.get::<_, Option<i64>>(2)?.map(UserGroupId),
                })
            })
            .context("failed to query users")?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row.context("failed to decode user row")?);
        }
        Ok(users)
    }

    /// Move a user into a usergroup, or out of any with `None`.
    ///
    /// # Errors
    /// Returns an error when the user or the usergroup does not exist.
    pub fn set_user_usergroup(
        &mut self,
        user: UserId,
        usergroup: Option<UserGroupId>,
    ) -> Result<()> {
        ensure_row(&self.conn, "users", "user", user.0)?;
        if let Some(usergroup) = usergroup {
            ensure_row(&self.conn, "usergroups", "usergroup", usergroup.0)?;
        }
        self.conn
            .execute(
                "UPDATE users SET usergroup_id = ?1 WHERE id = ?2",
                params![usergroup.map(|id| id.0), user.0],
            )
            .context("failed to update user")?;
        Ok(())
    }

    /// Create a usergroup: the status window plus the group links that drive
    /// authorization. Participant-side groups must belong to internal
    /// organizations.
    ///
    /// # Errors
    /// Returns an error when the name is blank, a linked group is missing, or
    /// a participant group belongs to an external organization.
    pub fn add_usergroup(
        &mut self,
        name: &str,
        status_window: &BTreeSet<CaseStatus>,
        case_file_groups: &BTreeSet<GroupId>,
        participant_groups: &BTreeSet<GroupId>,
    ) -> Result<UserGroupId> {
        ensure_name(name, "usergroup name")?;
        for group in case_file_groups {
            ensure_row(&self.conn, "groups", "group", group.0)?;
        }
        for group in participant_groups {
            ensure_internal_group(&self.conn, *group)?;
        }
        let tx = self
            .conn
            .transaction()
            .context("failed to start usergroup transaction")?;
        tx.execute("INSERT INTO usergroups(name) VALUES (?1)", params![name])
            .context("failed to insert usergroup")?;
        let id = tx.last_insert_rowid();
        for status in status_window {
            tx.execute(
                "INSERT INTO usergroup_status_window(usergroup_id, status) VALUES (?1, ?2)",
                params![id, status.as_str()],
            )
            .context("failed to insert status window entry")?;
        }
        for group in case_file_groups {
            tx.execute(
                "INSERT INTO usergroup_case_file_groups(usergroup_id, group_id) VALUES (?1, ?2)",
                params![id, group.0],
            )
            .context("failed to link usergroup case file group")?;
        }
        for group in participant_groups {
            tx.execute(
                "INSERT INTO usergroup_participant_groups(usergroup_id, group_id) VALUES (?1, ?2)",
                params![id, group.0],
            )
            .context("failed to link usergroup participant group")?;
        }
        tx.commit().context("failed to commit usergroup")?;
        Ok(UserGroupId(id))
    }

    /// # Errors
    /// Returns an error when the lookup fails or a stored status label is unknown.
    pub fn get_usergroup(&self, id: UserGroupId) -> Result<Option<UserGroup>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name FROM usergroups WHERE id = ?1",
                params![id.0],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .context("failed to read usergroup")?;
        match row {
            Some((id, name)) => Ok(Some(self.assemble_usergroup(id, name)?)),
            None => Ok(None),
        }
    }

    /// # Errors
    /// Returns an error when the rows cannot be read.
    pub fn list_usergroups(&self) -> Result<Vec<UserGroup>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name FROM usergroups ORDER BY id ASC")
            .context("failed to prepare usergroup query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .context("failed to query usergroups")?;
        let mut usergroups = Vec::new();
        for row in rows {
            let (id, name) = row.context("failed to decode usergroup row")?;
            usergroups.push(self.assemble_usergroup(id, name)?);
        }
        Ok(usergroups)
    }

    fn assemble_usergroup(&self, id: i64, name: String) -> Result<UserGroup> {
        let mut status_window = BTreeSet::new();
        let mut stmt = self
            .conn
            .prepare("SELECT status FROM usergroup_status_window WHERE usergroup_id = ?1")
            .context("failed to prepare status window query")?;
        let rows = stmt
            .query_map(params![id], |row| row.get::<_, String>(0))
            .context("failed to query status window")?;
        for row in rows {
            let raw = row.context("failed to decode status window row")?;
            let status = CaseStatus::parse(&raw)
                .ok_or_else(|| anyhow!("unknown case status in storage: {raw}"))?;
            status_window.insert(status);
        }
        let case_file_groups = load_edge_ids(
            &self.conn,
            "SELECT group_id FROM usergroup_case_file_groups WHERE usergroup_id = ?1 ORDER BY group_id ASC",
            id,
        )?
        .into_iter()
        .map(GroupId)
        .collect();
        let participant_groups = load_edge_ids(
            &self.conn,
            "SELECT group_id FROM usergroup_participant_groups WHERE usergroup_id = ?1 ORDER BY group_id ASC",
            id,
        )?
        .into_iter()
        .map(GroupId)
        .collect();
        Ok(UserGroup {
            id: UserGroupId(id),
            name,
            status_window,
            case_file_groups,
            participant_groups,
        })
    }

    /// # Errors
    /// Returns an error when the usergroup is missing or the name is blank.
    pub fn rename_usergroup(&mut self, id: UserGroupId, name: &str) -> Result<()> {
        ensure_name(name, "usergroup name")?;
        ensure_row(&self.conn, "usergroups", "usergroup", id.0)?;
        self.conn
            .execute(
                "UPDATE usergroups SET name = ?1 WHERE id = ?2",
                params![name, id.0],
            )
            .context("failed to rename usergroup")?;
        Ok(())
    }

    /// Delete a usergroup together with its window and group links. Users
    /// pointing at it fall back to no usergroup.
    ///
    /// # Errors
    /// Returns an error when the usergroup does not exist.
    pub fn delete_usergroup(&mut self, id: UserGroupId) -> Result<()> {
        ensure_row(&self.conn, "usergroups", "usergroup", id.0)?;
        let tx = self
            .conn
            .transaction()
            .context("failed to start usergroup delete transaction")?;
        tx.execute(
            "UPDATE users SET usergroup_id = NULL WHERE usergroup_id = ?1",
            params![id.0],
        )
        .context("failed to detach users")?;
        tx.execute(
            "DELETE FROM usergroup_status_window WHERE usergroup_id = ?1",
            params![id.0],
        )
        .context("failed to clear status window")?;
        tx.execute(
            "DELETE FROM usergroup_case_file_groups WHERE usergroup_id = ?1",
            params![id.0],
        )
        .context("failed to clear case file group links")?;
        tx.execute(
            "DELETE FROM usergroup_participant_groups WHERE usergroup_id = ?1",
            params![id.0],
        )
        .context("failed to clear participant group links")?;
        tx.execute("DELETE FROM usergroups WHERE id = ?1", params![id.0])
            .context("failed to delete usergroup")?;
        tx.commit().context("failed to commit usergroup delete")?;
        Ok(())
    }

    /// Replace the status window. An empty window authorizes nothing.
    ///
    /// # Errors
    /// Returns an error when the usergroup does not exist.
    pub fn set_usergroup_status_window(
        &mut self,
        id: UserGroupId,
        status_window: &BTreeSet<CaseStatus>,
    ) -> Result<()> {
        ensure_row(&self.conn, "usergroups", "usergroup", id.0)?;
        let tx = self
            .conn
            .transaction()
            .context("failed to start status window transaction")?;
        tx.execute(
            "DELETE FROM usergroup_status_window WHERE usergroup_id = ?1",
            params![id.0],
        )
        .context("failed to clear status window")?;
        for status in status_window {
            tx.execute(
                "INSERT INTO usergroup_status_window(usergroup_id, status) VALUES (?1, ?2)",
                params![id.0, status.as_str()],
            )
            .context("failed to insert status window entry")?;
        }
        tx.commit().context("failed to commit status window")?;
        Ok(())
    }

    /// Replace the linked case-file groups. An empty set clears the links.
    ///
    /// # Errors
    /// Returns an error when the usergroup or a group is missing.
    pub fn set_usergroup_case_file_groups(
        &mut self,
        id: UserGroupId,
        groups: &BTreeSet<GroupId>,
    ) -> Result<()> {
        ensure_row(&self.conn, "usergroups", "usergroup", id.0)?;
        for group in groups {
            ensure_row(&self.conn, "groups", "group", group.0)?;
        }
        let tx = self
            .conn
            .transaction()
            .context("failed to start usergroup link transaction")?;
        tx.execute(
            "DELETE FROM usergroup_case_file_groups WHERE usergroup_id = ?1",
            params![id.0],
        )
        .context("failed to clear case file group links")?;
        for group in groups {
            tx.execute(
                "INSERT INTO usergroup_case_file_groups(usergroup_id, group_id) VALUES (?1, ?2)",
                params![id.0, group.0],
            )
            .context("failed to link usergroup case file group")?;
        }
        tx.commit().context("failed to commit usergroup links")?;
        Ok(())
    }

    /// Replace the linked participant groups. Only groups of internal
    /// organizations qualify.
    ///
    /// # Errors
    /// Returns an error when the usergroup or a group is missing, or a group
    /// belongs to an external organization.
    pub fn set_usergroup_participant_groups(
        &mut self,
        id: UserGroupId,
        groups: &BTreeSet<GroupId>,
    ) -> Result<()> {
        ensure_row(&self.conn, "usergroups", "usergroup", id.0)?;
        for group in groups {
            ensure_internal_group(&self.conn, *group)?;
        }
        let tx = self
            .conn
            .transaction()
            .context("failed to start usergroup link transaction")?;
        tx.execute(
            "DELETE FROM usergroup_participant_groups WHERE usergroup_id = ?1",
            params![id.0],
        )
        .context("failed to clear participant group links")?;
        for group in groups {
            tx.execute(
                "INSERT INTO usergroup_participant_groups(usergroup_id, group_id) VALUES (?1, ?2)",
                params![id.0, group.0],
            )
            .context("failed to link usergroup participant group")?;
        }
        tx.commit().context("failed to commit usergroup links")?;
        Ok(())
    }

    /// Create a group under an organization.
    ///
    /// # Errors
    /// Returns an error when the organization or a topic is missing, the name
    /// is blank, or the name is already taken within the organization.
    pub fn add_group(
        &mut self,
        organization: OrganizationId,
        name: &str,
        description: Option<&str>,
        mandatory: bool,
        orientation: Orientation,
        topics: &BTreeSet<TopicId>,
    ) -> Result<GroupId> {
        ensure_name(name, "group name")?;
        let tx = self
            .conn
            .transaction()
            .context("failed to start group transaction")?;
        ensure_row(&tx, "organizations", "organization", organization.0)?;
        for topic in topics {
            ensure_row(&tx, "topics", "topic", topic.0)?;
        }
        ensure_group_name_free(&tx, organization, name, None)?;
        tx.execute(
            "INSERT INTO groups(organization_id, name, description, mandatory, orientation)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                organization.0,
                name,
                description,
                mandatory,
                orientation.as_str()
            ],
        )
        .context("failed to insert group")?;
        let id = tx.last_insert_rowid();
        for topic in topics {
            tx.execute(
                "INSERT INTO group_topics(group_id, topic_id) VALUES (?1, ?2)",
                params![id, topic.0],
            )
            .context("failed to link group topic")?;
        }
        tx.commit().context("failed to commit group")?;
        Ok(GroupId(id))
    }

    /// # Errors
    /// Returns an error when the lookup fails or a stored label is unknown.
    pub fn get_group(&self, id: GroupId) -> Result<Option<Group>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, organization_id, name, description, mandatory, orientation
                 FROM groups WHERE id = ?1",
                params![id.0],
                map_group_row,
            )
            .optional()
            .context("failed to read group")?;
        match row {
            Some(raw) => Ok(Some(self.assemble_group(raw)?)),
            None => Ok(None),
        }
    }

    /// List groups, optionally narrowed to one organization.
    ///
    /// # Errors
    /// Returns an error when the rows cannot be read.
    pub fn list_groups(&self, organization: Option<OrganizationId>) -> Result<Vec<Group>> {
        let mut raws = Vec::new();
        match organization {
            Some(organization) => {
                let mut stmt = self
                    .conn
                    .prepare(
                        "SELECT id, organization_id, name, description, mandatory, orientation
                         FROM groups WHERE organization_id = ?1 ORDER BY id ASC",
                    )
                    .context("failed to prepare group query")?;
                let rows = stmt
                    .query_map(params![organization.0], map_group_row)
                    .context("failed to query groups")?;
                for row in rows {
                    raws.push(row.context("failed to decode group row")?);
                }
            }
            None => {
                let mut stmt = self
                    .conn
                    .prepare(
                        "SELECT id, organization_id, name, description, mandatory, orientation
                         FROM groups ORDER BY id ASC",
                    )
                    .context("failed to prepare group query")?;
                let rows = stmt
                    .query_map([], map_group_row)
                    .context("failed to query groups")?;
                for row in rows {
                    raws.push(row.context("failed to decode group row")?);
                }
            }
        }
        let mut groups = Vec::with_capacity(raws.len());
        for raw in raws {
            groups.push(self.assemble_group(raw)?);
        }
        Ok(groups)
    }

    /// All groups keyed by id, as the authorization resolver wants them.
    ///
    /// # Errors
    /// Returns an error when the rows cannot be read.
    pub fn groups_map(&self) -> Result<BTreeMap<GroupId, Group>> {
        Ok(self
            .list_groups(None)?
            .into_iter()
            .map(|group| (group.id, group))
            .collect())
    }

    fn assemble_group(&self, raw: GroupRow) -> Result<Group> {
        let orientation = Orientation::parse(&raw.orientation)
            .ok_or_else(|| anyhow!("unknown orientation in storage: {}", raw.orientation))?;
        let topics = load_edge_ids(
            &self.conn,
            "SELECT topic_id FROM group_topics WHERE group_id = ?1 ORDER BY topic_id ASC",
            raw.id,
        )?
        .into_iter()
        .map(TopicId)
        .collect();
        Ok(Group {
            id: GroupId(raw.id),
            organization: OrganizationId(raw.organization_id),
            name: raw.name,
            description: raw.description,
            mandatory: raw.mandatory,
            orientation,
            topics,
        })
    }

    /// Flip the mandatory flag, refusing the change for exclusive-set members.
    ///
    /// # Errors
    /// Returns an error when the group is missing or sits in an exclusive set.
    pub fn set_group_mandatory(&mut self, id: GroupId, mandatory: bool) -> Result<()> {
        let group = self
            .get_group(id)?
            .ok_or_else(|| CoreError::InvalidReference(format!("group {id} does not exist")))?;
        let membership = self.exclusive_membership_of(id)?;
        validate_group_constraints(
            &group,
            membership,
            GroupConstraintChange::SetMandatory(mandatory),
        )?;
        self.conn
            .execute(
                "UPDATE groups SET mandatory = ?1 WHERE id = ?2",
                params![mandatory, id.0],
            )
            .context("failed to update group")?;
        Ok(())
    }

    /// Rename a group or replace its description. The name stays unique
    /// within the owning organization.
    ///
    /// # Errors
    /// Returns an error when the group is missing, the name is blank, or the
    /// name is already taken within the organization.
    pub fn update_group(
        &mut self,
        id: GroupId,
        name: &str,
        description: Option<&str>,
    ) -> Result<()> {
        ensure_name(name, "group name")?;
        let group = self
            .get_group(id)?
            .ok_or_else(|| CoreError::InvalidReference(format!("group {id} does not exist")))?;
        ensure_group_name_free(&self.conn, group.organization, name, Some(id))?;
        self.conn
            .execute(
                "UPDATE groups SET name = ?1, description = ?2 WHERE id = ?3",
                params![name, description, id.0],
            )
            .context("failed to update group")?;
        Ok(())
    }

    /// Replace a group's topic set. All-or-nothing.
    ///
    /// # Errors
    /// Returns an error when the group or a topic is missing.
    pub fn set_group_topics(&mut self, id: GroupId, topics: &BTreeSet<TopicId>) -> Result<()> {
        ensure_row(&self.conn, "groups", "group", id.0)?;
        for topic in topics {
            ensure_row(&self.conn, "topics", "topic", topic.0)?;
        }
        let tx = self
            .conn
            .transaction()
            .context("failed to start group topic transaction")?;
        tx.execute("DELETE FROM group_topics WHERE group_id = ?1", params![id.0])
            .context("failed to clear group topics")?;
        for topic in topics {
            tx.execute(
                "INSERT INTO group_topics(group_id, topic_id) VALUES (?1, ?2)",
                params![id.0, topic.0],
            )
            .context("failed to link group topic")?;
        }
        tx.commit().context("failed to commit group topics")?;
        Ok(())
    }

    /// # Errors
    /// Returns an error when the group does not exist.
    pub fn set_group_orientation(&mut self, id: GroupId, orientation: Orientation) -> Result<()> {
        ensure_row(&self.conn, "groups", "group", id.0)?;
        self.conn
            .execute(
                "UPDATE groups SET orientation = ?1 WHERE id = ?2",
                params![orientation.as_str(), id.0],
            )
            .context("failed to update group")?;
        Ok(())
    }

    /// Delete a group and its assignment edges. Members of an exclusive set
    /// stay put until the set is dissolved.
    ///
    /// # Errors
    /// Returns an error when the group is missing or sits in an exclusive set.
    pub fn delete_group(&mut self, id: GroupId) -> Result<()> {
        let group = self
            .get_group(id)?
            .ok_or_else(|| CoreError::InvalidReference(format!("group {id} does not exist")))?;
        let membership = self.exclusive_membership_of(id)?;
        validate_group_constraints(&group, membership, GroupConstraintChange::DeleteGroup)?;
        let tx = self
            .conn
            .transaction()
            .context("failed to start group delete transaction")?;
        tx.execute(
            "DELETE FROM case_file_groups WHERE group_id = ?1",
            params![id.0],
        )
        .context("failed to clear case file assignments")?;
        tx.execute(
            "DELETE FROM participant_groups WHERE group_id = ?1",
            params![id.0],
        )
        .context("failed to clear participant assignments")?;
        tx.execute(
            "DELETE FROM usergroup_case_file_groups WHERE group_id = ?1",
            params![id.0],
        )
        .context("failed to clear usergroup links")?;
        tx.execute(
            "DELETE FROM usergroup_participant_groups WHERE group_id = ?1",
            params![id.0],
        )
        .context("failed to clear usergroup links")?;
        tx.execute("DELETE FROM group_topics WHERE group_id = ?1", params![id.0])
            .context("failed to clear group topics")?;
        tx.execute("DELETE FROM groups WHERE id = ?1", params![id.0])
            .context("failed to delete group")?;
        tx.commit().context("failed to commit group delete")?;
        Ok(())
    }

    /// Bind groups into an exclusive set after the core validator clears them.
    ///
    /// # Errors
    /// Returns an error when a member is missing, mandatory, already claimed by
    /// another set, or the members span organizations.
    pub fn create_exclusive_set(
        &mut self,
        name: &str,
        members: &[GroupId],
    ) -> Result<ExclusiveSetId> {
        let mut groups = Vec::with_capacity(members.len());
        for member in members {
            let group = self.get_group(*member)?.ok_or_else(|| {
                CoreError::InvalidReference(format!("group {member} does not exist"))
            })?;
            groups.push(group);
        }
        let memberships = self.exclusive_memberships()?;
        validate_exclusive_set_members(name, &groups, &memberships)?;
        let tx = self
            .conn
            .transaction()
            .context("failed to start exclusive set transaction")?;
        tx.execute(
            "INSERT INTO exclusive_sets(name) VALUES (?1)",
            params![name],
        )
        .context("failed to insert exclusive set")?;
        let id = tx.last_insert_rowid();
        for member in members {
            tx.execute(
                "INSERT INTO exclusive_set_members(exclusive_set_id, group_id) VALUES (?1, ?2)",
                params![id, member.0],
            )
            .context("failed to link exclusive set member")?;
        }
        tx.commit().context("failed to commit exclusive set")?;
        Ok(ExclusiveSetId(id))
    }

    /// Dissolve a set, releasing every member group.
    ///
    /// # Errors
    /// Returns an error when the set does not exist.
    pub fn dissolve_exclusive_set(&mut self, id: ExclusiveSetId) -> Result<()> {
        ensure_row(&self.conn, "exclusive_sets", "exclusive set", id.0)?;
        let tx = self
            .conn
            .transaction()
            .context("failed to start exclusive set transaction")?;
        tx.execute(
            "DELETE FROM exclusive_set_members WHERE exclusive_set_id = ?1",
            params![id.0],
        )
        .context("failed to clear exclusive set members")?;
        tx.execute("DELETE FROM exclusive_sets WHERE id = ?1", params![id.0])
            .context("failed to delete exclusive set")?;
        tx.commit().context("failed to commit exclusive set delete")?;
        Ok(())
    }

    /// # Errors
    /// Returns an error when the rows cannot be read.
    pub fn list_exclusive_sets(&self) -> Result<Vec<ExclusiveSet>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name FROM exclusive_sets ORDER BY id ASC")
            .context("failed to prepare exclusive set query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .context("failed to query exclusive sets")?;
        let mut sets = Vec::new();
        for row in rows {
            let (id, name) = row.context("failed to decode exclusive set row")?;
            let members = load_edge_ids(
                &self.conn,
                "SELECT group_id FROM exclusive_set_members WHERE exclusive_set_id = ?1 ORDER BY group_id ASC",
                id,
            )?
            .into_iter()
            .map(GroupId)
            .collect();
            sets.push(ExclusiveSet {
                id: ExclusiveSetId(id),
                name,
                members,
            });
        }
        Ok(sets)
    }

    /// Which exclusive set, if any, each group belongs to.
    ///
    /// # Errors
    /// Returns an error when the rows cannot be read.
    pub fn exclusive_memberships(&self) -> Result<BTreeMap<GroupId, ExclusiveSetId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT group_id, exclusive_set_id FROM exclusive_set_members")
            .context("failed to prepare membership query")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))
            .context("failed to query memberships")?;
        let mut memberships = BTreeMap::new();
        for row in rows {
            let (group, set) = row.context("failed to decode membership row")?;
            memberships.insert(GroupId(group), ExclusiveSetId(set));
        }
        Ok(memberships)
    }

    /// The exclusive set a group belongs to, members ordered by group id,
    /// or `None` when the group is in no set.
    ///
    /// # Errors
    /// Returns an error when the group is missing or the rows cannot be read.
    pub fn exclusive_set_of(&self, id: GroupId) -> Result<Option<ExclusiveSet>> {
        ensure_row(&self.conn, "groups", "group", id.0)?;
        let Some(set) = self.exclusive_membership_of(id)? else {
            return Ok(None);
        };
        let name: String = self
            .conn
            .query_row(
                "SELECT name FROM exclusive_sets WHERE id = ?1",
                params![set.0],
                |row| row.get(0),
            )
            .context("failed to read exclusive set")?;
        let members = load_edge_ids(
            &self.conn,
            "SELECT group_id FROM exclusive_set_members WHERE exclusive_set_id = ?1 ORDER BY group_id ASC",
            set.0,
        )?
        .into_iter()
        .map(GroupId)
        .collect();
        Ok(Some(ExclusiveSet {
            id: set,
            name,
            members,
        }))
    }

    fn exclusive_membership_of(&self, id: GroupId) -> Result<Option<ExclusiveSetId>> {
        let set = self
            .conn
            .query_row(
                "SELECT exclusive_set_id FROM exclusive_set_members WHERE group_id = ?1",
                params![id.0],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .context("failed to read exclusive membership")?;
        Ok(set.map(ExclusiveSetId))
    }

    /// Replace a case file's group assignments with `groups`, validated as a
    /// whole against the exclusive sets. All-or-nothing.
    ///
    /// # Errors
    /// Returns an error when a reference is missing or two requested groups
    /// share an exclusive set.
    pub fn assign_case_file_groups(
        &mut self,
        case_file: CaseFileId,
        groups: &[GroupId],
    ) -> Result<()> {
        ensure_row(&self.conn, "case_files", "case file", case_file.0)?;
        for group in groups {
            ensure_row(&self.conn, "groups", "group", group.0)?;
        }
        // Duplicates in the request collapse to a single edge.
        let requested: BTreeSet<GroupId> = groups.iter().copied().collect();
        let ordered: Vec<GroupId> = requested.iter().copied().collect();
        let memberships = self.exclusive_memberships()?;
        validate_case_file_groups(&ordered, &memberships)?;
        let tx = self
            .conn
            .transaction()
            .context("failed to start assignment transaction")?;
        tx.execute(
            "DELETE FROM case_file_groups WHERE case_file_id = ?1",
            params![case_file.0],
        )
        .context("failed to clear assignments")?;
        for group in &ordered {
            tx.execute(
                "INSERT INTO case_file_groups(case_file_id, group_id) VALUES (?1, ?2)",
                params![case_file.0, group.0],
            )
            .context("failed to insert assignment")?;
        }
        tx.commit().context("failed to commit assignments")?;
        Ok(())
    }

    /// # Errors
    /// Returns an error when the case file is missing or the rows cannot be read.
    pub fn case_file_groups_of(&self, case_file: CaseFileId) -> Result<BTreeSet<GroupId>> {
        ensure_row(&self.conn, "case_files", "case file", case_file.0)?;
        Ok(load_edge_ids(
            &self.conn,
            "SELECT group_id FROM case_file_groups WHERE case_file_id = ?1 ORDER BY group_id ASC",
            case_file.0,
        )?
        .into_iter()
        .map(GroupId)
        .collect())
    }

    /// Replace a participant's group assignments. All-or-nothing.
    ///
    /// # Errors
    /// Returns an error when the participant or a group is missing.
    pub fn assign_participant_groups(
        &mut self,
        participant: ParticipantId,
        groups: &[GroupId],
    ) -> Result<()> {
        ensure_row(&self.conn, "participants", "participant", participant.0)?;
        for group in groups {
            ensure_row(&self.conn, "groups", "group", group.0)?;
        }
        let requested: BTreeSet<GroupId> = groups.iter().copied().collect();
        let tx = self
            .conn
            .transaction()
            .context("failed to start assignment transaction")?;
        tx.execute(
            "DELETE FROM participant_groups WHERE participant_id = ?1",
            params![participant.0],
        )
        .context("failed to clear assignments")?;
        for group in &requested {
            tx.execute(
                "INSERT INTO participant_groups(participant_id, group_id) VALUES (?1, ?2)",
                params![participant.0, group.0],
            )
            .context("failed to insert assignment")?;
        }
        tx.commit().context("failed to commit assignments")?;
        Ok(())
    }

    /// # Errors
    /// Returns an error when the participant is missing or the rows cannot be read.
    pub fn participant_groups_of(&self, participant: ParticipantId) -> Result<BTreeSet<GroupId>> {
        ensure_row(&self.conn, "participants", "participant", participant.0)?;
        Ok(load_edge_ids(
            &self.conn,
            "SELECT group_id FROM participant_groups WHERE participant_id = ?1 ORDER BY group_id ASC",
            participant.0,
        )?
        .into_iter()
        .map(GroupId)
        .collect())
    }

    /// Replace a group's participant roster from the group side. The staff
    /// assignment mirror of [`Self::assign_participant_groups`].
    ///
    /// # Errors
    /// Returns an error when the group or a participant is missing.
    pub fn assign_group_participants(
        &mut self,
        group: GroupId,
        participants: &[ParticipantId],
    ) -> Result<()> {
        ensure_row(&self.conn, "groups", "group", group.0)?;
        for participant in participants {
            ensure_row(&self.conn, "participants", "participant", participant.0)?;
        }
        let requested: BTreeSet<ParticipantId> = participants.iter().copied().collect();
        let tx = self
            .conn
            .transaction()
            .context("failed to start assignment transaction")?;
        tx.execute(
            "DELETE FROM participant_groups WHERE group_id = ?1",
            params![group.0],
        )
        .context("failed to clear assignments")?;
        for participant in &requested {
            tx.execute(
                "INSERT INTO participant_groups(participant_id, group_id) VALUES (?1, ?2)",
                params![participant.0, group.0],
            )
            .context("failed to insert assignment")?;
        }
        tx.commit().context("failed to commit assignments")?;
        Ok(())
    }

    /// # Errors
    /// Returns an error when the group is missing or the rows cannot be read.
    pub fn group_participants_of(&self, group: GroupId) -> Result<BTreeSet<ParticipantId>> {
        ensure_row(&self.conn, "groups", "group", group.0)?;
        Ok(load_edge_ids(
            &self.conn,
            "SELECT participant_id FROM participant_groups WHERE group_id = ?1 ORDER BY participant_id ASC",
            group.0,
        )?
        .into_iter()
        .map(ParticipantId)
        .collect())
    }

    /// Every group's assigned case files, as the authorization resolver wants
    /// them.
    ///
    /// # Errors
    /// Returns an error when the rows cannot be read.
    pub fn group_case_files_map(&self) -> Result<BTreeMap<GroupId, BTreeSet<CaseFileId>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT group_id, case_file_id FROM case_file_groups")
            .context("failed to prepare assignment query")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))
            .context("failed to query assignments")?;
        let mut map: BTreeMap<GroupId, BTreeSet<CaseFileId>> = BTreeMap::new();
        for row in rows {
            let (group, case_file) = row.context("failed to decode assignment row")?;
            map.entry(GroupId(group))
                .or_default()
                .insert(CaseFileId(case_file));
        }
        Ok(map)
    }

    /// Append one status record to a case file's trail within an organization.
    /// The trail is never rewritten; corrections land as newer records.
    ///
    /// # Errors
    /// Returns an error when the case file or organization is missing.
    pub fn append_status(
        &mut self,
        case_file: CaseFileId,
        organization: OrganizationId,
        status: CaseStatus,
        effective_from: PrimitiveDateTime,
    ) -> Result<StatusRecordId> {
        ensure_row(&self.conn, "case_files", "case file", case_file.0)?;
        ensure_row(&self.conn, "organizations", "organization", organization.0)?;
        self.conn
            .execute(
                "INSERT INTO status_records(case_file_id, organization_id, status, effective_from)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    case_file.0,
                    organization.0,
                    status.as_str(),
                    to_storage(effective_from)
                ],
            )
            .context("failed to insert status record")?;
        Ok(StatusRecordId(self.conn.last_insert_rowid()))
    }

    /// The full status ledger across all case files and organizations.
    ///
    /// # Errors
    /// Returns an error when the rows cannot be read or decoded.
    pub fn status_records(&self) -> Result<Vec<StatusRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, case_file_id, organization_id, status, effective_from
                 FROM status_records
                 ORDER BY case_file_id ASC, organization_id ASC, effective_from ASC, id ASC",
            )
            .context("failed to prepare status query")?;
        let rows = stmt
            .query_map([], map_status_row)
            .context("failed to query status records")?;
        let mut records = Vec::new();
        for row in rows {
            let raw = row.context("failed to decode status row")?;
            records.push(finish_status_record(raw)?);
        }
        Ok(records)
    }

    /// A case file's status trail within one organization, oldest first.
    ///
    /// # Errors
    /// Returns an error when a reference is missing or a row cannot be decoded.
    pub fn status_history(
        &self,
        case_file: CaseFileId,
        organization: OrganizationId,
    ) -> Result<Vec<StatusRecord>> {
        ensure_row(&self.conn, "case_files", "case file", case_file.0)?;
        ensure_row(&self.conn, "organizations", "organization", organization.0)?;
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, case_file_id, organization_id, status, effective_from
                 FROM status_records
                 WHERE case_file_id = ?1 AND organization_id = ?2
                 ORDER BY effective_from ASC, id ASC",
            )
            .context("failed to prepare status query")?;
        let rows = stmt
            .query_map(params![case_file.0, organization.0], map_status_row)
            .context("failed to query status records")?;
        let mut records = Vec::new();
        for row in rows {
            let raw = row.context("failed to decode status row")?;
            records.push(finish_status_record(raw)?);
        }
        Ok(records)
    }

    /// Load the whole ledger into the in-memory form the resolver consumes.
    ///
    /// # Errors
    /// Returns an error when the rows cannot be read or decoded.
    pub fn status_ledger(&self) -> Result<StatusLedger> {
        Ok(StatusLedger::new(self.status_records()?))
    }

    /// Register an activity type. Categories only apply to event types.
    ///
    /// # Errors
    /// Returns an error when the name is blank or a document type carries a
    /// category.
    pub fn add_activity_type(
        &mut self,
        kind: ActivityKind,
        category: Option<&str>,
        name: &str,
        individual: bool,
    ) -> Result<ActivityTypeId> {
        ensure_name(name, "activity type name")?;
        if kind == ActivityKind::Document && category.is_some() {
            return Err(CoreError::Validation(
                "document types MUST NOT carry a category".to_string(),
            )
            .into());
        }
        self.conn
            .execute(
                "INSERT INTO activity_types(kind, category, name, individual) VALUES (?1, ?2, ?3, ?4)",
                params![kind.as_str(), category, name, individual],
            )
            .context("failed to insert activity type")?;
        Ok(ActivityTypeId(self.conn.last_insert_rowid()))
    }

    /// # Errors
    /// Returns an error when the lookup fails or a stored label is unknown.
    pub fn get_activity_type(&self, id: ActivityTypeId) -> Result<Option<ActivityType>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, kind, category, name, individual FROM activity_types WHERE id = ?1",
                params![id.0],
                map_activity_type_row,
            )
            .optional()
            .context("failed to read activity type")?;
        match row {
            Some(raw) => Ok(Some(finish_activity_type(raw)?)),
            None => Ok(None),
        }
    }

    /// List activity types, optionally narrowed to one kind.
    ///
    /// # Errors
    /// Returns an error when the rows cannot be read or decoded.
    pub fn list_activity_types(&self, kind: Option<ActivityKind>) -> Result<Vec<ActivityType>> {
        let mut raws = Vec::new();
        match kind {
            Some(kind) => {
                let mut stmt = self
                    .conn
                    .prepare(
                        "SELECT id, kind, category, name, individual FROM activity_types
                         WHERE kind = ?1 ORDER BY id ASC",
                    )
                    .context("failed to prepare activity type query")?;
                let rows = stmt
                    .query_map(params![kind.as_str()], map_activity_type_row)
                    .context("failed to query activity types")?;
                for row in rows {
                    raws.push(row.context("failed to decode activity type row")?);
                }
            }
            None => {
                let mut stmt = self
                    .conn
                    .prepare(
                        "SELECT id, kind, category, name, individual FROM activity_types
                         ORDER BY id ASC",
                    )
                    .context("failed to prepare activity type query")?;
                let rows = stmt
                    .query_map([], map_activity_type_row)
                    .context("failed to query activity types")?;
                for row in rows {
                    raws.push(row.context("failed to decode activity type row")?);
                }
            }
        }
        let mut types = Vec::with_capacity(raws.len());
        for raw in raws {
            types.push(finish_activity_type(raw)?);
        }
        Ok(types)
    }

    /// All activity types keyed by id, as the view composer wants them.
    ///
    /// # Errors
    /// Returns an error when the rows cannot be read or decoded.
    pub fn activity_types_map(&self) -> Result<BTreeMap<ActivityTypeId, ActivityType>> {
        Ok(self
            .list_activity_types(None)?
            .into_iter()
            .map(|activity_type| (activity_type.id, activity_type))
            .collect())
    }

    /// Persist a batch of drafts in one transaction; the batch is the unit of
    /// failure and the returned ids follow draft order. Recurrence expansion
    /// happens upstream, so a recurring event arrives here as one draft per
    /// occurrence.
    ///
    /// # Errors
    /// Returns an error when any draft fails validation or references a
    /// missing row; nothing is persisted in that case.
    pub fn insert_activities(
        &mut self,
        drafts: &[ActivityDraft],
        at: PrimitiveDateTime,
    ) -> Result<Vec<ActivityId>> {
        let tx = self
            .conn
            .transaction()
            .context("failed to start activity transaction")?;
        let mut ids = Vec::with_capacity(drafts.len());
        for draft in drafts {
            ids.push(insert_activity_tx(&tx, draft, at)?);
        }
        tx.commit().context("failed to commit activity batch")?;
        Ok(ids)
    }

    /// # Errors
    /// Returns an error when the lookup fails or a stored row is malformed.
    pub fn get_activity(&self, id: ActivityId) -> Result<Option<Activity>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, kind, title, description, status, activity_type_id, author_id,
                        responsible_id, start_time, end_time, all_day, place, cost
                 FROM activities WHERE id = ?1",
                params![id.0],
                map_activity_row,
            )
            .optional()
            .context("failed to read activity")?;
        match row {
            Some(raw) => Ok(Some(finish_activity(&self.conn, raw)?)),
            None => Ok(None),
        }
    }

    /// Every activity with its link sets attached, ordered by id.
    ///
    /// # Errors
    /// Returns an error when the rows cannot be read or decoded.
    pub fn list_activities(&self) -> Result<Vec<Activity>> {
        let mut raws = Vec::new();
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, kind, title, description, status, activity_type_id, author_id,
                        responsible_id, start_time, end_time, all_day, place, cost
                 FROM activities ORDER BY id ASC",
            )
            .context("failed to prepare activity query")?;
        let rows = stmt
            .query_map([], map_activity_row)
            .context("failed to query activities")?;
        for row in rows {
            raws.push(row.context("failed to decode activity row")?);
        }
        drop(stmt);
        let mut activities = Vec::with_capacity(raws.len());
        for raw in raws {
            activities.push(finish_activity(&self.conn, raw)?);
        }
        Ok(activities)
    }

    /// Rewrite an activity in place. The kind and author are immutable; a
    /// responsible or status change rolls the responsibility trail forward
    /// at `at`.
    ///
    /// # Errors
    /// Returns an error when the activity is missing, the new shape fails
    /// validation, or a referenced row does not exist.
    pub fn update_activity(&mut self, updated: &Activity, at: PrimitiveDateTime) -> Result<()> {
        let current = self.get_activity(updated.id)?.ok_or_else(|| {
            CoreError::InvalidReference(format!("activity {} does not exist", updated.id))
        })?;
        if updated.kind != current.kind {
            return Err(CoreError::Validation("an activity cannot change kind".to_string()).into());
        }
        if updated.author != current.author {
            return Err(
                CoreError::Validation("an activity cannot change its author".to_string()).into(),
            );
        }
        let draft = draft_of(updated);
        draft.validate()?;
        let entries = self.responsibility_history(updated.id)?;

        let tx = self
            .conn
            .transaction()
            .context("failed to start activity transaction")?;
        validate_draft_references(&tx, &draft)?;
        let schedule = draft.schedule.as_ref();
        tx.execute(
            "UPDATE activities SET
                title = ?1, description = ?2, status = ?3, activity_type_id = ?4,
                responsible_id = ?5, start_time = ?6, end_time = ?7, all_day = ?8,
                place = ?9, cost = ?10, updated_at = ?11
             WHERE id = ?12",
            params![
                draft.title,
                draft.description,
                draft.status.as_str(),
                draft.activity_type.map(|id| id.0),
                draft.responsible.map(|id| id.0),
                schedule.map(|schedule| to_storage(schedule.start)),
                schedule.map(|schedule| to_storage(schedule.end)),
                schedule.map(|schedule| schedule.all_day),
                schedule.and_then(|schedule| schedule.place.clone()),
                schedule.and_then(|schedule| schedule.cost),
                to_storage(at),
                updated.id.0,
            ],
        )
        .context("failed to update activity")?;
        delete_activity_edges(&tx, updated.id)?;
        insert_activity_edges(&tx, updated.id, &draft)?;

        let mut ledger = ResponsibilityLedger::from_entries(entries)?;
        ledger.on_update(updated.responsible, updated.status, at);
        write_tenures(&tx, updated.id, &ledger.history())?;

        tx.commit().context("failed to commit activity update")?;
        Ok(())
    }

    /// Delete an activity along with its link sets and responsibility trail.
    ///
    /// # Errors
    /// Returns an error when the activity does not exist.
    pub fn delete_activity(&mut self, id: ActivityId) -> Result<()> {
        ensure_row(&self.conn, "activities", "activity", id.0)?;
        let tx = self
            .conn
            .transaction()
            .context("failed to start activity delete transaction")?;
        delete_activity_edges(&tx, id)?;
        tx.execute(
            "DELETE FROM responsibility_tenures WHERE activity_id = ?1",
            params![id.0],
        )
        .context("failed to clear responsibility trail")?;
        tx.execute("DELETE FROM activities WHERE id = ?1", params![id.0])
            .context("failed to delete activity")?;
        tx.commit().context("failed to commit activity delete")?;
        Ok(())
    }

    /// The responsibility trail for one activity, in attribution order.
    ///
    /// # Errors
    /// Returns an error when the activity is missing or a row is malformed.
    pub fn responsibility_history(&self, id: ActivityId) -> Result<Vec<TenureRecord>> {
        ensure_row(&self.conn, "activities", "activity", id.0)?;
        load_tenures(&self.conn, id)
    }

    /// Create a saved view. The type filter must target the view's kind, and
    /// category filters only apply to event views.
    ///
    /// # Errors
    /// Returns an error when a reference is missing or a filter does not fit
    /// the view's kind.
    pub fn add_view(
        &mut self,
        kind: ActivityKind,
        name: &str,
        categories: &BTreeSet<String>,
        type_filter: Option<ActivityTypeId>,
        topics: &BTreeSet<TopicId>,
    ) -> Result<ViewId> {
        ensure_name(name, "view name")?;
        if kind == ActivityKind::Document && !categories.is_empty() {
            return Err(CoreError::Validation(
                "document views MUST NOT filter on categories".to_string(),
            )
            .into());
        }
        if let Some(type_id) = type_filter {
            let stored: Option<String> = self
                .conn
                .query_row(
                    "SELECT kind FROM activity_types WHERE id = ?1",
                    params![type_id.0],
                    |row| row.get(0),
                )
                .optional()
                .context("failed to probe activity type")?;
            match stored.as_deref() {
                None => {
                    return Err(CoreError::InvalidReference(format!(
                        "activity type {type_id} does not exist"
                    ))
                    .into());
                }
                Some(stored) if stored != kind.as_str() => {
                    return Err(CoreError::Validation(format!(
                        "activity type {type_id} targets `{stored}` activities"
                    ))
                    .into());
                }
                Some(_) => {}
            }
        }
        for topic in topics {
            ensure_row(&self.conn, "topics", "topic", topic.0)?;
        }
        let tx = self
            .conn
            .transaction()
            .context("failed to start view transaction")?;
        tx.execute(
            "INSERT INTO views(kind, name, type_filter_id) VALUES (?1, ?2, ?3)",
            params![kind.as_str(), name, type_filter.map(|id| id.0)],
        )
        .context("failed to insert view")?;
        let id = tx.last_insert_rowid();
        for category in categories {
            tx.execute(
                "INSERT INTO view_categories(view_id, category) VALUES (?1, ?2)",
                params![id, category],
            )
            .context("failed to link view category")?;
        }
        for topic in topics {
            tx.execute(
                "INSERT INTO view_topics(view_id, topic_id) VALUES (?1, ?2)",
                params![id, topic.0],
            )
            .context("failed to link view topic")?;
        }
        tx.commit().context("failed to commit view")?;
        Ok(ViewId(id))
    }

    /// # Errors
    /// Returns an error when the lookup fails or a stored label is unknown.
    pub fn get_view(&self, id: ViewId) -> Result<Option<View>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, kind, name, type_filter_id FROM views WHERE id = ?1",
                params![id.0],
                map_view_row,
            )
            .optional()
            .context("failed to read view")?;
        match row {
            Some(raw) => Ok(Some(self.assemble_view(raw)?)),
            None => Ok(None),
        }
    }

    /// # Errors
    /// Returns an error when the rows cannot be read or decoded.
    pub fn list_views(&self) -> Result<Vec<View>> {
        let mut raws = Vec::new();
        let mut stmt = self
            .conn
            .prepare("SELECT id, kind, name, type_filter_id FROM views ORDER BY id ASC")
            .context("failed to prepare view query")?;
        let rows = stmt
            .query_map([], map_view_row)
            .context("failed to query views")?;
        for row in rows {
            raws.push(row.context("failed to decode view row")?);
        }
        drop(stmt);
        let mut views = Vec::with_capacity(raws.len());
        for raw in raws {
            views.push(self.assemble_view(raw)?);
        }
        Ok(views)
    }

    /// # Errors
    /// Returns an error when the view is missing or the name is blank.
    pub fn rename_view(&mut self, id: ViewId, name: &str) -> Result<()> {
        ensure_name(name, "view name")?;
        ensure_row(&self.conn, "views", "view", id.0)?;
        self.conn
            .execute(
                "UPDATE views SET name = ?1 WHERE id = ?2",
                params![name, id.0],
            )
            .context("failed to rename view")?;
        Ok(())
    }

    /// # Errors
    /// Returns an error when the view does not exist.
    pub fn delete_view(&mut self, id: ViewId) -> Result<()> {
        ensure_row(&self.conn, "views", "view", id.0)?;
        let tx = self
            .conn
            .transaction()
            .context("failed to start view delete transaction")?;
        tx.execute(
            "DELETE FROM view_categories WHERE view_id = ?1",
            params![id.0],
        )
        .context("failed to clear view categories")?;
        tx.execute("DELETE FROM view_topics WHERE view_id = ?1", params![id.0])
            .context("failed to clear view topics")?;
        tx.execute("DELETE FROM views WHERE id = ?1", params![id.0])
            .context("failed to delete view")?;
        tx.commit().context("failed to commit view delete")?;
        Ok(())
    }

    fn assemble_view(&self, raw: ViewRow) -> Result<View> {
        let kind = ActivityKind::parse(&raw.kind)
            .ok_or_else(|| anyhow!("unknown activity kind in storage: {}", raw.kind))?;
        let mut categories = BTreeSet::new();
        let mut stmt = self
            .conn
            .prepare("SELECT category FROM view_categories WHERE view_id = ?1")
            .context("failed to prepare view category query")?;
        let rows = stmt
            .query_map(params![raw.id], |row| row.get::<_, String>(0))
            .context("failed to query view categories")?;
        for row in rows {
            categories.insert(row.context("failed to decode view category row")?);
        }
        let topics = load_edge_ids(
            &self.conn,
            "SELECT topic_id FROM view_topics WHERE view_id = ?1 ORDER BY topic_id ASC",
            raw.id,
        )?
        .into_iter()
        .map(TopicId)
        .collect();
        Ok(View {
            id: ViewId(raw.id),
            kind,
            name: raw.name,
            categories,
            type_filter: raw.type_filter_id.map(ActivityTypeId),
            topics,
        })
    }

    /// Copy the live database to `out_file` using the online backup API.
    ///
    /// # Errors
    /// Returns an error when the backup cannot be written.
    pub fn backup_database(&self, out_file: &Path) -> Result<()> {
        self.conn
            .backup(DatabaseName::Main, out_file, None)
            .with_context(|| format!("failed to back up database to {}", out_file.display()))?;
        Ok(())
    }

    /// Replace the live database with the contents of `in_file`, then bring
    /// the restored schema up to date.
    ///
    /// # Errors
    /// Returns an error when the restore or the follow-up migration fails.
    pub fn restore_database(&mut self, in_file: &Path) -> Result<()> {
        self.conn
            .restore(
                DatabaseName::Main,
                in_file,
                None::<fn(rusqlite::backup::Progress)>,
            )
            .with_context(|| format!("failed to restore database from {}", in_file.display()))?;
        self.migrate()
    }

    /// Run `PRAGMA quick_check` and `PRAGMA foreign_key_check` and report.
    ///
    /// # Errors
    /// Returns an error when either pragma cannot be executed.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let mut quick_check_messages = Vec::new();
        let mut stmt = self
            .conn
            .prepare("PRAGMA quick_check")
            .context("failed to prepare quick_check")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("failed to run quick_check")?;
        for row in rows {
            quick_check_messages.push(row.context("failed to decode quick_check row")?);
        }
        drop(stmt);
        let quick_check_ok = quick_check_messages.len() == 1
            && quick_check_messages
                .first()
                .is_some_and(|message| message.as_str() == "ok");

        let mut foreign_key_violations = Vec::new();
        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare foreign_key_check")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ForeignKeyViolation {
                    table: row.get(0)?,
                    rowid: row.get(1)?,
                    parent: row.get(2)?,
                    fk_index: row.get(3)?,
                })
            })
            .context("failed to run foreign_key_check")?;
        for row in rows {
            foreign_key_violations.push(row.context("failed to decode foreign_key_check row")?);
        }
        Ok(IntegrityReport {
            quick_check_ok,
            quick_check_messages,
            foreign_key_violations,
        })
    }
}

fn ensure_name(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CoreError::Validation(format!("{what} MUST be non-empty")).into());
    }
    Ok(())
}

fn ensure_row(conn: &Connection, table: &str, entity: &str, id: i64) -> Result<()> {
    let sql = format!("SELECT 1 FROM {table} WHERE id = ?1");
    let found = conn
        .query_row(&sql, params![id], |_row| Ok(()))
        .optional()
        .with_context(|| format!("failed to probe {table}"))?;
    if found.is_none() {
        return Err(CoreError::InvalidReference(format!("{entity} {id} does not exist")).into());
    }
    Ok(())
}

fn ensure_group_name_free(
    conn: &Connection,
    organization: OrganizationId,
    name: &str,
    except: Option<GroupId>,
) -> Result<()> {
    let holder: Option<i64> = conn
        .query_row(
            "SELECT id FROM groups WHERE organization_id = ?1 AND name = ?2",
            params![organization.0, name],
            |row| row.get(0),
        )
        .optional()
        .context("failed to probe group name")?;
    match holder {
        Some(id) if except != Some(GroupId(id)) => Err(CoreError::ConstraintViolation(format!(
            "group {name} already exists in organization {organization}"
        ))
        .into()),
        _ => Ok(()),
    }
}

// Participant-side usergroup links are restricted to groups of internal
// organizations.
fn ensure_internal_group(conn: &Connection, group: GroupId) -> Result<()> {
    let internal: Option<bool> = conn
        .query_row(
            "SELECT o.internal FROM groups g
             JOIN organizations o ON o.id = g.organization_id
             WHERE g.id = ?1",
            params![group.0],
            |row| row.get(0),
        )
        .optional()
        .context("failed to probe participant group")?;
    match internal {
        None => Err(CoreError::InvalidReference(format!("group {group} does not exist")).into()),
        Some(false) => Err(CoreError::ConstraintViolation(format!(
            "group {group} belongs to an external organization and cannot hold participants"
        ))
        .into()),
        Some(true) => Ok(()),
    }
}

fn load_edge_ids(conn: &Connection, sql: &str, id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(sql).context("failed to prepare edge query")?;
    let rows = stmt
        .query_map(params![id], |row| row.get::<_, i64>(0))
        .context("failed to query edges")?;
    let mut ids = Vec::new();
    for row in rows {
        ids.push(row.context("failed to decode edge row")?);
    }
    Ok(ids)
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
    .context("failed to read schema version")
}

fn to_storage(value: PrimitiveDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        value.year(),
        u8::from(value.month()),
        value.day(),
        value.hour(),
        value.minute(),
        value.second()
    )
}

fn parse_storage(raw: &str) -> Result<PrimitiveDateTime> {
    PrimitiveDateTime::parse(raw, STORAGE_FORMAT)
        .with_context(|| format!("malformed stored timestamp: {raw}"))
}

fn to_storage_date(value: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        value.year(),
        u8::from(value.month()),
        value.day()
    )
}

fn parse_storage_date(raw: &str) -> Result<Date> {
    Date::parse(raw, STORAGE_DATE_FORMAT)
        .with_context(|| format!("malformed stored date: {raw}"))
}

fn now_storage() -> String {
    let now = OffsetDateTime::now_utc();
    to_storage(PrimitiveDateTime::new(now.date(), now.time()))
}

struct GroupRow {
    id: i64,
    organization_id: i64,
    name: String,
    description: Option<String>,
    mandatory: bool,
    orientation: String,
}

fn map_group_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupRow> {
    Ok(GroupRow {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        mandatory: row.get(4)?,
        orientation: row.get(5)?,
    })
}

struct StatusRow {
    id: i64,
    case_file_id: i64,
    organization_id: i64,
    status: String,
    effective_from: String,
}

fn map_status_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StatusRow> {
    Ok(StatusRow {
        id: row.get(0)?,
        case_file_id: row.get(1)?,
        organization_id: row.get(2)?,
        status: row.get(3)?,
        effective_from: row.get(4)?,
    })
}

fn finish_status_record(raw: StatusRow) -> Result<StatusRecord> {
    let status = CaseStatus::parse(&raw.status)
        .ok_or_else(|| anyhow!("unknown case status in storage: {}", raw.status))?;
    Ok(StatusRecord {
        id: StatusRecordId(raw.id),
        case_file: CaseFileId(raw.case_file_id),
        organization: OrganizationId(raw.organization_id),
        status,
        effective_from: parse_storage(&raw.effective_from)?,
    })
}

struct ActivityTypeRow {
    id: i64,
    kind: String,
    category: Option<String>,
    name: String,
    individual: bool,
}

fn map_activity_type_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ActivityTypeRow> {
    Ok(ActivityTypeRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        category: row.get(2)?,
        name: row.get(3)?,
        individual: row.get(4)?,
    })
}

fn finish_activity_type(raw: ActivityTypeRow) -> Result<ActivityType> {
    let kind = ActivityKind::parse(&raw.kind)
        .ok_or_else(|| anyhow!("unknown activity kind in storage: {}", raw.kind))?;
    Ok(ActivityType {
        id: ActivityTypeId(raw.id),
        kind,
        category: raw.category,
        name: raw.name,
        individual: raw.individual,
    })
}

struct ViewRow {
    id: i64,
    kind: String,
    name: String,
    type_filter_id: Option<i64>,
}

fn map_view_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ViewRow> {
    Ok(ViewRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        name: row.get(2)?,
        type_filter_id: row.get(3)?,
    })
}

struct ActivityRow {
    id: i64,
    kind: String,
    title: String,
    description: Option<String>,
    status: String,
    activity_type_id: Option<i64>,
    author_id: i64,
    responsible_id: Option<i64>,
    start_time: Option<String>,
    end_time: Option<String>,
    all_day: Option<bool>,
    place: Option<String>,
    cost: Option<i64>,
}

fn map_activity_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ActivityRow> {
    Ok(ActivityRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        status: row.get(4)?,
        activity_type_id: row.get(5)?,
        author_id: row.get(6)?,
        responsible_id: row.get(7)?,
        start_time: row.get(8)?,
        end_time: row.get(9)?,
        all_day: row.get(10)?,
        place: row.get(11)?,
        cost: row.get(12)?,
    })
}

fn finish_activity(conn: &Connection, raw: ActivityRow) -> Result<Activity> {
    let kind = ActivityKind::parse(&raw.kind)
        .ok_or_else(|| anyhow!("unknown activity kind in storage: {}", raw.kind))?;
    let status = ActivityStatus::parse(&raw.status)
        .ok_or_else(|| anyhow!("unknown activity status in storage: {}", raw.status))?;
    let schedule = match (&raw.start_time, &raw.end_time) {
        (Some(start), Some(end)) => Some(EventSchedule {
            start: parse_storage(start)?,
            end: parse_storage(end)?,
            all_day: raw.all_day.unwrap_or(false),
            place: raw.place.clone(),
            cost: raw.cost,
        }),
        _ => None,
    };
    let topics = load_edge_ids(
        conn,
        "SELECT topic_id FROM activity_topics WHERE activity_id = ?1 ORDER BY topic_id ASC",
        raw.id,
    )?
    .into_iter()
    .map(TopicId)
    .collect();
    let case_files = load_edge_ids(
        conn,
        "SELECT case_file_id FROM activity_case_files WHERE activity_id = ?1 ORDER BY case_file_id ASC",
        raw.id,
    )?
    .into_iter()
    .map(CaseFileId)
    .collect();
    let participants = load_edge_ids(
        conn,
        "SELECT participant_id FROM activity_participants WHERE activity_id = ?1 ORDER BY participant_id ASC",
        raw.id,
    )?
    .into_iter()
    .map(ParticipantId)
    .collect();
    let resources = load_edge_ids(
        conn,
        "SELECT resource_id FROM activity_resources WHERE activity_id = ?1 ORDER BY resource_id ASC",
        raw.id,
    )?
    .into_iter()
    .map(ResourceId)
    .collect();
    Ok(Activity {
        id: ActivityId(raw.id),
        kind,
        title: raw.title,
        description: raw.description,
        status,
        activity_type: raw.activity_type_id.map(ActivityTypeId),
        author: ParticipantId(raw.author_id),
        responsible: raw.responsible_id.map(ParticipantId),
        schedule,
        topics,
        case_files,
        participants,
        resources,
    })
}

fn insert_activity_tx(
    tx: &Transaction<'_>,
    draft: &ActivityDraft,
    at: PrimitiveDateTime,
) -> Result<ActivityId> {
    draft.validate()?;
    validate_draft_references(tx, draft)?;

    let schedule = draft.schedule.as_ref();
    tx.execute(
        "INSERT INTO activities(
            kind, title, description, status, activity_type_id, author_id, responsible_id,
            start_time, end_time, all_day, place, cost, created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            draft.kind.as_str(),
            draft.title,
            draft.description,
            draft.status.as_str(),
            draft.activity_type.map(|id| id.0),
            draft.author.0,
            draft.responsible.map(|id| id.0),
            schedule.map(|schedule| to_storage(schedule.start)),
            schedule.map(|schedule| to_storage(schedule.end)),
            schedule.map(|schedule| schedule.all_day),
            schedule.and_then(|schedule| schedule.place.clone()),
            schedule.and_then(|schedule| schedule.cost),
            to_storage(at),
            to_storage(at),
        ],
    )
    .context("failed to insert activity")?;
    let id = ActivityId(tx.last_insert_rowid());

    insert_activity_edges(tx, id, draft)?;

    let ledger = ResponsibilityLedger::on_create(draft.responsible, at);
    write_tenures(tx, id, &ledger.history())?;

    Ok(id)
}

fn validate_draft_references(conn: &Connection, draft: &ActivityDraft) -> Result<()> {
    ensure_row(conn, "participants", "participant", draft.author.0)?;
    if let Some(responsible) = draft.responsible {
        ensure_row(conn, "participants", "participant", responsible.0)?;
    }
    if let Some(type_id) = draft.activity_type {
        let stored: Option<(String, bool)> = conn
            .query_row(
                "SELECT kind, individual FROM activity_types WHERE id = ?1",
                params![type_id.0],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("failed to probe activity type")?;
        match stored {
            None => {
                return Err(CoreError::InvalidReference(format!(
                    "activity type {type_id} does not exist"
                ))
                .into());
            }
            Some((kind, _)) if kind != draft.kind.as_str() => {
                return Err(CoreError::Validation(format!(
                    "activity type {type_id} targets `{kind}` activities"
                ))
                .into());
            }
            Some((_, individual)) if individual && draft.case_files.len() != 1 => {
                return Err(CoreError::Validation(format!(
                    "activity type {type_id} is individual and targets exactly one case file"
                ))
                .into());
            }
            Some(_) => {}
        }
    }
    for topic in &draft.topics {
        ensure_row(conn, "topics", "topic", topic.0)?;
    }
    for case_file in &draft.case_files {
        ensure_row(conn, "case_files", "case file", case_file.0)?;
    }
    for participant in &draft.participants {
        ensure_row(conn, "participants", "participant", participant.0)?;
    }
    for resource in &draft.resources {
        ensure_row(conn, "resources", "resource", resource.0)?;
    }
    Ok(())
}

fn insert_activity_edges(tx: &Transaction<'_>, id: ActivityId, draft: &ActivityDraft) -> Result<()> {
    for topic in &draft.topics {
        tx.execute(
            "INSERT INTO activity_topics(activity_id, topic_id) VALUES (?1, ?2)",
            params![id.0, topic.0],
        )
        .context("failed to link activity topic")?;
    }
    for case_file in &draft.case_files {
        tx.execute(
            "INSERT INTO activity_case_files(activity_id, case_file_id) VALUES (?1, ?2)",
            params![id.0, case_file.0],
        )
        .context("failed to link activity case file")?;
    }
    for participant in &draft.participants {
        tx.execute(
            "INSERT INTO activity_participants(activity_id, participant_id) VALUES (?1, ?2)",
            params![id.0, participant.0],
        )
        .context("failed to link activity participant")?;
    }
    for resource in &draft.resources {
        tx.execute(
            "INSERT INTO activity_resources(activity_id, resource_id) VALUES (?1, ?2)",
            params![id.0, resource.0],
        )
        .context("failed to link activity resource")?;
    }
    Ok(())
}

fn delete_activity_edges(tx: &Transaction<'_>, id: ActivityId) -> Result<()> {
    tx.execute(
        "DELETE FROM activity_topics WHERE activity_id = ?1",
        params![id.0],
    )
    .context("failed to clear activity topics")?;
    tx.execute(
        "DELETE FROM activity_case_files WHERE activity_id = ?1",
        params![id.0],
    )
    .context("failed to clear activity case files")?;
    tx.execute(
        "DELETE FROM activity_participants WHERE activity_id = ?1",
        params![id.0],
    )
    .context("failed to clear activity participants")?;
    tx.execute(
        "DELETE FROM activity_resources WHERE activity_id = ?1",
        params![id.0],
    )
    .context("failed to clear activity resources")?;
    Ok(())
}

/// The trail is rewritten from the in-memory ledger so that core stays the
/// single owner of the tenure rules.
fn write_tenures(tx: &Transaction<'_>, id: ActivityId, entries: &[TenureRecord]) -> Result<()> {
    tx.execute(
        "DELETE FROM responsibility_tenures WHERE activity_id = ?1",
        params![id.0],
    )
    .context("failed to clear responsibility trail")?;
    for entry in entries {
        tx.execute(
            "INSERT INTO responsibility_tenures(activity_id, participant_id, attributed_at, achieved_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                id.0,
                entry.responsible.0,
                to_storage(entry.attributed_at),
                entry.achieved_at.map(to_storage)
            ],
        )
        .context("failed to insert responsibility tenure")?;
    }
    Ok(())
}

fn load_tenures(conn: &Connection, id: ActivityId) -> Result<Vec<TenureRecord>> {
    let mut stmt = conn
        .prepare(
            "SELECT participant_id, attributed_at, achieved_at FROM responsibility_tenures
             WHERE activity_id = ?1 ORDER BY attributed_at ASC, id ASC",
        )
        .context("failed to prepare tenure query")?;
    let rows = stmt
        .query_map(params![id.0], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })
        .context("failed to query tenures")?;
    let mut entries = Vec::new();
    for row in rows {
        let (participant, attributed_at, achieved_at) =
            row.context("failed to decode tenure row")?;
        entries.push(TenureRecord {
            responsible: ParticipantId(participant),
            attributed_at: parse_storage(&attributed_at)?,
            achieved_at: match achieved_at {
                Some(raw) => Some(parse_storage(&raw)?),
                None => None,
            },
        });
    }
    Ok(entries)
}

fn draft_of(activity: &Activity) -> ActivityDraft {
    ActivityDraft {
        kind: activity.kind,
        title: activity.title.clone(),
        description: activity.description.clone(),
        status: activity.status,
        activity_type: activity.activity_type,
        author: activity.author,
        responsible: activity.responsible,
        schedule: activity.schedule.clone(),
        topics: activity.topics.clone(),
        case_files: activity.case_files.clone(),
        participants: activity.participants.clone(),
        resources: activity.resources.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_store() -> Result<SqliteStore> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;
        Ok(store)
    }

    fn dt(raw: &str) -> PrimitiveDateTime {
        match casebook_core::parse_wall_clock(raw) {
            Ok(value) => value,
            Err(error) => panic!("bad fixture timestamp {raw}: {error}"),
        }
    }

    fn date(raw: &str) -> Date {
        match casebook_core::parse_wall_clock_date(raw) {
            Ok(value) => value,
            Err(error) => panic!("bad fixture date {raw}: {error}"),
        }
    }

    struct World {
        organization: OrganizationId,
        author: ParticipantId,
        case_file: CaseFileId,
        topic: TopicId,
    }

    fn seed(store: &mut SqliteStore) -> Result<World> {
        let organization = store.add_organization("day centre", None, true)?;
        let author = store.add_participant("Mara", "Voss")?;
        let case_file = store.add_case_file("Ilse", "Brandt", date("14/03/2001"))?;
        let topic = store.add_topic("mobility", None)?;
        Ok(World {
            organization,
            author,
            case_file,
            topic,
        })
    }

    fn mk_event_draft(author: ParticipantId, case_file: CaseFileId) -> ActivityDraft {
        ActivityDraft {
            kind: ActivityKind::Event,
            title: "weekly sync".to_string(),
            description: None,
            status: ActivityStatus::Tentative,
            activity_type: None,
            author,
            responsible: None,
            schedule: Some(EventSchedule {
                start: dt("04/01/2016 09:00:00"),
                end: dt("04/01/2016 10:30:00"),
                all_day: false,
                place: None,
                cost: None,
            }),
            topics: BTreeSet::new(),
            case_files: BTreeSet::from([case_file]),
            participants: BTreeSet::new(),
            resources: BTreeSet::new(),
        }
    }

    fn mk_document_draft(author: ParticipantId, case_file: CaseFileId) -> ActivityDraft {
        ActivityDraft {
            kind: ActivityKind::Document,
            title: "intake report".to_string(),
            description: None,
            status: ActivityStatus::InProgress,
            activity_type: None,
            author,
            responsible: None,
            schedule: None,
            topics: BTreeSet::new(),
            case_files: BTreeSet::from([case_file]),
            participants: BTreeSet::new(),
            resources: BTreeSet::new(),
        }
    }

    fn expect_invalid_reference<T: std::fmt::Debug>(result: Result<T>) {
        match result {
            Err(error) => match error.downcast_ref::<CoreError>() {
                Some(CoreError::InvalidReference(_)) => {}
                other => panic!("expected an invalid reference error, got {other:?}"),
            },
            Ok(value) => panic!("expected failure, got {value:?}"),
        }
    }

    fn expect_constraint_violation<T: std::fmt::Debug>(result: Result<T>) {
        match result {
            Err(error) => match error.downcast_ref::<CoreError>() {
                Some(CoreError::ConstraintViolation(_)) => {}
                other => panic!("expected a constraint violation, got {other:?}"),
            },
            Ok(value) => panic!("expected failure, got {value:?}"),
        }
    }

    fn expect_validation<T: std::fmt::Debug>(result: Result<T>) {
        match result {
            Err(error) => match error.downcast_ref::<CoreError>() {
                Some(CoreError::Validation(_)) => {}
                other => panic!("expected a validation error, got {other:?}"),
            },
            Ok(value) => panic!("expected failure, got {value:?}"),
        }
    }

    #[test]
    fn migrate_is_idempotent() -> Result<()> {
        let mut store = mk_store()?;
        store.migrate()?;
        let status = store.schema_status()?;
        assert_eq!(status.current_version, LATEST_SCHEMA_VERSION);
        assert!(status.pending_versions.is_empty());
        Ok(())
    }

    #[test]
    fn registry_rows_round_trip() -> Result<()> {
        let mut store = mk_store()?;
        let world = seed(&mut store)?;
        let organizations = store.list_organizations()?;
        assert_eq!(organizations.len(), 1);
        assert_eq!(organizations[0].name, "day centre");
        assert!(organizations[0].internal);
        let case_file = match store.get_case_file(world.case_file)? {
            Some(case_file) => case_file,
            None => panic!("case file vanished"),
        };
        assert_eq!(case_file.birthdate, date("14/03/2001"));
        let participant = match store.get_participant(world.author)? {
            Some(participant) => participant,
            None => panic!("participant vanished"),
        };
        assert_eq!(participant.firstname, "Mara");
        expect_validation(store.add_organization("  ", None, true));
        Ok(())
    }

    #[test]
    fn duplicate_names_hit_the_unique_constraints() -> Result<()> {
        let mut store = mk_store()?;
        seed(&mut store)?;
        assert!(store.add_organization("day centre", None, true).is_err());
        assert!(store.add_topic("mobility", None).is_err());
        Ok(())
    }

    #[test]
    fn resources_join_their_topics() -> Result<()> {
        let mut store = mk_store()?;
        let world = seed(&mut store)?;
        let resource = store.add_resource("minibus", &BTreeSet::from([world.topic]))?;
        let resources = store.list_resources()?;
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].id, resource);
        assert!(resources[0].topics.contains(&world.topic));
        expect_invalid_reference(store.add_resource("trailer", &BTreeSet::from([TopicId(99)])));
        Ok(())
    }

    #[test]
    fn usergroups_round_trip_with_window_and_links() -> Result<()> {
        let mut store = mk_store()?;
        let world = seed(&mut store)?;
        let group = store.add_group(
            world.organization,
            "north wing",
            None,
            false,
            Orientation::Organization,
            &BTreeSet::new(),
        )?;
        let id = store.add_usergroup(
            "care staff",
            &BTreeSet::from([CaseStatus::Present, CaseStatus::Left]),
            &BTreeSet::from([group]),
            &BTreeSet::new(),
        )?;
        let usergroup = match store.get_usergroup(id)? {
            Some(usergroup) => usergroup,
            None => panic!("usergroup vanished"),
        };
        assert_eq!(usergroup.name, "care staff");
        assert_eq!(
            usergroup.status_window,
            BTreeSet::from([CaseStatus::Present, CaseStatus::Left])
        );
        assert_eq!(usergroup.case_file_groups, BTreeSet::from([group]));
        assert!(usergroup.participant_groups.is_empty());
        Ok(())
    }

    #[test]
    fn external_groups_cannot_hold_participants() -> Result<()> {
        let mut store = mk_store()?;
        seed(&mut store)?;
        let partner = store.add_organization("partner clinic", None, false)?;
        let group = store.add_group(
            partner,
            "outreach",
            None,
            false,
            Orientation::Participant,
            &BTreeSet::new(),
        )?;
        expect_constraint_violation(store.add_usergroup(
            "externals",
            &BTreeSet::from([CaseStatus::Present]),
            &BTreeSet::new(),
            &BTreeSet::from([group]),
        ));
        Ok(())
    }

    #[test]
    fn group_names_stay_unique_per_organization() -> Result<()> {
        let mut store = mk_store()?;
        let world = seed(&mut store)?;
        let partner = store.add_organization("partner clinic", None, false)?;
        let north = store.add_group(
            world.organization,
            "north wing",
            None,
            false,
            Orientation::Organization,
            &BTreeSet::new(),
        )?;
        let south = store.add_group(
            world.organization,
            "south wing",
            None,
            false,
            Orientation::Organization,
            &BTreeSet::new(),
        )?;
        // The same name under a different organization is allowed.
        store.add_group(
            partner,
            "north wing",
            None,
            false,
            Orientation::Organization,
            &BTreeSet::new(),
        )?;
        expect_constraint_violation(store.add_group(
            world.organization,
            "north wing",
            None,
            false,
            Orientation::Organization,
            &BTreeSet::new(),
        ));
        expect_constraint_violation(store.update_group(south, "north wing", None));
        store.update_group(north, "north wing", Some("ground floor"))?;
        store.update_group(south, "garden wing", None)?;
        let renamed = match store.get_group(south)? {
            Some(group) => group,
            None => panic!("group vanished"),
        };
        assert_eq!(renamed.name, "garden wing");
        Ok(())
    }

    #[test]
    fn group_topics_and_orientation_can_be_replaced() -> Result<()> {
        let mut store = mk_store()?;
        let world = seed(&mut store)?;
        let extra = store.add_topic("nutrition", None)?;
        let group = store.add_group(
            world.organization,
            "north wing",
            None,
            false,
            Orientation::Organization,
            &BTreeSet::from([world.topic]),
        )?;
        store.set_group_topics(group, &BTreeSet::from([extra]))?;
        store.set_group_orientation(group, Orientation::Participant)?;
        let group = match store.get_group(group)? {
            Some(group) => group,
            None => panic!("group vanished"),
        };
        assert_eq!(group.topics, BTreeSet::from([extra]));
        assert_eq!(group.orientation, Orientation::Participant);
        expect_invalid_reference(store.set_group_topics(GroupId(99), &BTreeSet::new()));
        Ok(())
    }

    #[test]
    fn usergroup_mutators_replace_window_and_links() -> Result<()> {
        let mut store = mk_store()?;
        let world = seed(&mut store)?;
        let partner = store.add_organization("partner clinic", None, false)?;
        let internal_group = store.add_group(
            world.organization,
            "north wing",
            None,
            false,
            Orientation::Participant,
            &BTreeSet::new(),
        )?;
        let external_group = store.add_group(
            partner,
            "outreach",
            None,
            false,
            Orientation::Participant,
            &BTreeSet::new(),
        )?;
        let id = store.add_usergroup(
            "care staff",
            &BTreeSet::from([CaseStatus::Present]),
            &BTreeSet::new(),
            &BTreeSet::new(),
        )?;
        let user = store.add_user(world.author, Some(id))?;
        store.rename_usergroup(id, "night shift")?;
        store.set_usergroup_status_window(id, &BTreeSet::from([CaseStatus::Admission]))?;
        store.set_usergroup_case_file_groups(id, &BTreeSet::from([internal_group]))?;
        expect_constraint_violation(
            store.set_usergroup_participant_groups(id, &BTreeSet::from([external_group])),
        );
        store.set_usergroup_participant_groups(id, &BTreeSet::from([internal_group]))?;
        let usergroup = match store.get_usergroup(id)? {
            Some(usergroup) => usergroup,
            None => panic!("usergroup vanished"),
        };
        assert_eq!(usergroup.name, "night shift");
        assert_eq!(usergroup.status_window, BTreeSet::from([CaseStatus::Admission]));
        assert_eq!(usergroup.case_file_groups, BTreeSet::from([internal_group]));
        assert_eq!(usergroup.participant_groups, BTreeSet::from([internal_group]));
        store.delete_usergroup(id)?;
        assert!(store.get_usergroup(id)?.is_none());
        let user = match store.get_user(user)? {
            Some(user) => user,
            None => panic!("user vanished"),
        };
        assert_eq!(user.usergroup, None);
        Ok(())
    }

    #[test]
    fn users_can_switch_usergroups() -> Result<()> {
        let mut store = mk_store()?;
        let world = seed(&mut store)?;
        let staff =
            store.add_usergroup("care staff", &BTreeSet::new(), &BTreeSet::new(), &BTreeSet::new())?;
        let user = store.add_user(world.author, None)?;
        store.set_user_usergroup(user, Some(staff))?;
        let row = match store.get_user(user)? {
            Some(row) => row,
            None => panic!("user vanished"),
        };
        assert_eq!(row.usergroup, Some(staff));
        store.set_user_usergroup(user, None)?;
        let row = match store.get_user(user)? {
            Some(row) => row,
            None => panic!("user vanished"),
        };
        assert_eq!(row.usergroup, None);
        expect_invalid_reference(store.set_user_usergroup(user, Some(UserGroupId(99))));
        Ok(())
    }

    #[test]
    fn group_rosters_mirror_participant_assignments() -> Result<()> {
        let mut store = mk_store()?;
        let world = seed(&mut store)?;
        let other = store.add_participant("Ole", "Brandt")?;
        let group = store.add_group(
            world.organization,
            "north wing",
            None,
            false,
            Orientation::Participant,
            &BTreeSet::new(),
        )?;
        store.assign_group_participants(group, &[world.author, other])?;
        assert_eq!(
            store.group_participants_of(group)?,
            BTreeSet::from([world.author, other])
        );
        assert_eq!(
            store.participant_groups_of(other)?,
            BTreeSet::from([group])
        );
        store.assign_group_participants(group, &[other])?;
        assert_eq!(store.group_participants_of(group)?, BTreeSet::from([other]));
        assert!(store.participant_groups_of(world.author)?.is_empty());
        Ok(())
    }

    #[test]
    fn status_trails_stay_ordered_per_scope() -> Result<()> {
        let mut store = mk_store()?;
        let world = seed(&mut store)?;
        store.append_status(
            world.case_file,
            world.organization,
            CaseStatus::Present,
            dt("01/02/2016"),
        )?;
        store.append_status(
            world.case_file,
            world.organization,
            CaseStatus::Admission,
            dt("01/01/2016"),
        )?;
        let history = store.status_history(world.case_file, world.organization)?;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, CaseStatus::Admission);
        assert_eq!(history[1].status, CaseStatus::Present);
        let ledger = store.status_ledger()?;
        assert_eq!(
            ledger.current_status(world.case_file, world.organization, dt("15/01/2016")),
            Some(CaseStatus::Admission)
        );
        assert_eq!(
            ledger.current_status(world.case_file, world.organization, dt("15/02/2016")),
            Some(CaseStatus::Present)
        );
        Ok(())
    }

    #[test]
    fn activity_batches_land_completely_or_not_at_all() -> Result<()> {
        let mut store = mk_store()?;
        let world = seed(&mut store)?;
        let good = mk_event_draft(world.author, world.case_file);
        let mut bad = mk_event_draft(world.author, world.case_file);
        bad.case_files = BTreeSet::from([CaseFileId(99)]);
        expect_invalid_reference(
            store.insert_activities(&[good, bad], dt("04/01/2016 08:00:00")),
        );
        assert!(store.list_activities()?.is_empty());
        Ok(())
    }

    #[test]
    fn activities_round_trip_with_their_link_sets() -> Result<()> {
        let mut store = mk_store()?;
        let world = seed(&mut store)?;
        let mut draft = mk_event_draft(world.author, world.case_file);
        draft.topics.insert(world.topic);
        let ids = store.insert_activities(&[draft], dt("04/01/2016 08:00:00"))?;
        assert_eq!(ids.len(), 1);
        let activity = match store.get_activity(ids[0])? {
            Some(activity) => activity,
            None => panic!("activity vanished"),
        };
        assert_eq!(activity.title, "weekly sync");
        assert_eq!(activity.status, ActivityStatus::Tentative);
        assert_eq!(activity.case_files, BTreeSet::from([world.case_file]));
        assert_eq!(activity.topics, BTreeSet::from([world.topic]));
        let schedule = match &activity.schedule {
            Some(schedule) => schedule,
            None => panic!("event lost its schedule"),
        };
        assert_eq!(schedule.start, dt("04/01/2016 09:00:00"));
        assert_eq!(schedule.end, dt("04/01/2016 10:30:00"));
        assert!(store.responsibility_history(ids[0])?.is_empty());
        Ok(())
    }

    #[test]
    fn creating_with_a_responsible_opens_a_tenure() -> Result<()> {
        let mut store = mk_store()?;
        let world = seed(&mut store)?;
        let mut draft = mk_event_draft(world.author, world.case_file);
        draft.responsible = Some(world.author);
        let ids = store.insert_activities(&[draft], dt("04/01/2016 08:00:00"))?;
        let trail = store.responsibility_history(ids[0])?;
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].responsible, world.author);
        assert_eq!(trail[0].attributed_at, dt("04/01/2016 08:00:00"));
        assert_eq!(trail[0].achieved_at, None);
        Ok(())
    }

    #[test]
    fn responsible_changes_close_and_reopen_tenures() -> Result<()> {
        let mut store = mk_store()?;
        let world = seed(&mut store)?;
        let second = store.add_participant("Jonas", "Weiss")?;
        let mut draft = mk_event_draft(world.author, world.case_file);
        draft.responsible = Some(world.author);
        let ids = store.insert_activities(&[draft], dt("04/01/2016 08:00:00"))?;
        let mut activity = match store.get_activity(ids[0])? {
            Some(activity) => activity,
            None => panic!("activity vanished"),
        };
        activity.responsible = Some(second);
        store.update_activity(&activity, dt("05/01/2016 09:00:00"))?;
        let trail = store.responsibility_history(ids[0])?;
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[0].responsible, world.author);
        assert_eq!(trail[0].achieved_at, Some(dt("05/01/2016 09:00:00")));
        assert_eq!(trail[1].responsible, second);
        assert_eq!(trail[1].achieved_at, None);
        Ok(())
    }

    #[test]
    fn reaching_available_closes_the_open_tenure() -> Result<()> {
        let mut store = mk_store()?;
        let world = seed(&mut store)?;
        let mut draft = mk_document_draft(world.author, world.case_file);
        draft.responsible = Some(world.author);
        let ids = store.insert_activities(&[draft], dt("04/01/2016 08:00:00"))?;
        let mut activity = match store.get_activity(ids[0])? {
            Some(activity) => activity,
            None => panic!("activity vanished"),
        };
        activity.status = ActivityStatus::Available;
        store.update_activity(&activity, dt("06/01/2016 17:00:00"))?;
        let trail = store.responsibility_history(ids[0])?;
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].achieved_at, Some(dt("06/01/2016 17:00:00")));
        Ok(())
    }

    #[test]
    fn updates_cannot_change_kind_or_author() -> Result<()> {
        let mut store = mk_store()?;
        let world = seed(&mut store)?;
        let second = store.add_participant("Jonas", "Weiss")?;
        let ids = store.insert_activities(
            &[mk_event_draft(world.author, world.case_file)],
            dt("04/01/2016 08:00:00"),
        )?;
        let activity = match store.get_activity(ids[0])? {
            Some(activity) => activity,
            None => panic!("activity vanished"),
        };
        let mut flipped = activity.clone();
        flipped.kind = ActivityKind::Document;
        expect_validation(store.update_activity(&flipped, dt("05/01/2016 09:00:00")));
        let mut reauthored = activity;
        reauthored.author = second;
        expect_validation(store.update_activity(&reauthored, dt("05/01/2016 09:00:00")));
        Ok(())
    }

    #[test]
    fn type_and_kind_must_agree() -> Result<()> {
        let mut store = mk_store()?;
        let world = seed(&mut store)?;
        let report_type = store.add_activity_type(ActivityKind::Document, None, "report", false)?;
        let mut draft = mk_event_draft(world.author, world.case_file);
        draft.activity_type = Some(report_type);
        expect_validation(store.insert_activities(&[draft], dt("04/01/2016 08:00:00")));
        expect_validation(store.add_activity_type(
            ActivityKind::Document,
            Some("session"),
            "note",
            false,
        ));
        Ok(())
    }

    #[test]
    fn individual_types_demand_exactly_one_case_file() -> Result<()> {
        let mut store = mk_store()?;
        let world = seed(&mut store)?;
        let other = store.add_case_file("Nils", "Graf", date("02/02/2002"))?;
        let visit_type = store.add_activity_type(ActivityKind::Event, None, "home visit", true)?;
        let mut draft = mk_event_draft(world.author, world.case_file);
        draft.activity_type = Some(visit_type);
        draft.case_files.insert(other);
        expect_validation(store.insert_activities(&[draft.clone()], dt("04/01/2016 08:00:00")));
        draft.case_files = BTreeSet::from([world.case_file]);
        store.insert_activities(&[draft], dt("04/01/2016 08:00:00"))?;
        Ok(())
    }

    #[test]
    fn exclusive_sets_gate_case_file_assignment() -> Result<()> {
        let mut store = mk_store()?;
        let world = seed(&mut store)?;
        let first = store.add_group(
            world.organization,
            "north wing",
            None,
            false,
            Orientation::Organization,
            &BTreeSet::new(),
        )?;
        let second = store.add_group(
            world.organization,
            "south wing",
            None,
            false,
            Orientation::Organization,
            &BTreeSet::new(),
        )?;
        store.create_exclusive_set("wings", &[first, second])?;
        expect_constraint_violation(
            store.assign_case_file_groups(world.case_file, &[first, second]),
        );
        store.assign_case_file_groups(world.case_file, &[second])?;
        assert_eq!(
            store.case_file_groups_of(world.case_file)?,
            BTreeSet::from([second])
        );
        Ok(())
    }

    #[test]
    fn deleting_an_exclusive_member_requires_dissolution() -> Result<()> {
        let mut store = mk_store()?;
        let world = seed(&mut store)?;
        let first = store.add_group(
            world.organization,
            "north wing",
            None,
            false,
            Orientation::Organization,
            &BTreeSet::new(),
        )?;
        let second = store.add_group(
            world.organization,
            "south wing",
            None,
            false,
            Orientation::Organization,
            &BTreeSet::new(),
        )?;
        let set = store.create_exclusive_set("wings", &[first, second])?;
        expect_constraint_violation(store.delete_group(first));
        expect_constraint_violation(store.set_group_mandatory(first, true));
        store.dissolve_exclusive_set(set)?;
        store.delete_group(first)?;
        assert!(store.get_group(first)?.is_none());
        Ok(())
    }

    #[test]
    fn exclusive_membership_is_exclusive_and_ordered() -> Result<()> {
        let mut store = mk_store()?;
        let world = seed(&mut store)?;
        let mut ids = Vec::new();
        for name in ["alpha", "beta", "gamma", "delta"] {
            ids.push(store.add_group(
                world.organization,
                name,
                None,
                false,
                Orientation::Organization,
                &BTreeSet::new(),
            )?);
        }
        store.create_exclusive_set("shifts", &[ids[2], ids[0], ids[1]])?;
        expect_constraint_violation(store.create_exclusive_set("rival", &[ids[0], ids[3]]));
        let set = match store.exclusive_set_of(ids[0])? {
            Some(set) => set,
            None => panic!("membership missing"),
        };
        assert_eq!(set.members, vec![ids[0], ids[1], ids[2]]);
        assert!(store.exclusive_set_of(ids[3])?.is_none());
        expect_invalid_reference(store.exclusive_set_of(GroupId(99)));
        Ok(())
    }

    #[test]
    fn participant_assignments_replace_the_previous_set() -> Result<()> {
        let mut store = mk_store()?;
        let world = seed(&mut store)?;
        let first = store.add_group(
            world.organization,
            "north wing",
            None,
            false,
            Orientation::Participant,
            &BTreeSet::new(),
        )?;
        let second = store.add_group(
            world.organization,
            "south wing",
            None,
            false,
            Orientation::Participant,
            &BTreeSet::new(),
        )?;
        store.assign_participant_groups(world.author, &[first])?;
        store.assign_participant_groups(world.author, &[second])?;
        assert_eq!(
            store.participant_groups_of(world.author)?,
            BTreeSet::from([second])
        );
        Ok(())
    }

    #[test]
    fn views_round_trip_and_validate_their_filters() -> Result<()> {
        let mut store = mk_store()?;
        let workshop = store.add_activity_type(
            ActivityKind::Event,
            Some("group session"),
            "workshop",
            false,
        )?;
        let view = store.add_view(
            ActivityKind::Event,
            "weekly board",
            &BTreeSet::from(["group session".to_string()]),
            Some(workshop),
            &BTreeSet::new(),
        )?;
        let loaded = match store.get_view(view)? {
            Some(view) => view,
            None => panic!("view vanished"),
        };
        assert_eq!(loaded.kind, ActivityKind::Event);
        assert!(loaded.categories.contains("group session"));
        assert_eq!(loaded.type_filter, Some(workshop));
        expect_validation(store.add_view(
            ActivityKind::Document,
            "files",
            &BTreeSet::from(["session".to_string()]),
            None,
            &BTreeSet::new(),
        ));
        expect_validation(store.add_view(
            ActivityKind::Document,
            "files",
            &BTreeSet::new(),
            Some(workshop),
            &BTreeSet::new(),
        ));
        store.rename_view(view, "monday board")?;
        let renamed = match store.get_view(view)? {
            Some(view) => view,
            None => panic!("view vanished"),
        };
        assert_eq!(renamed.name, "monday board");
        expect_validation(store.rename_view(view, "  "));
        Ok(())
    }

    #[test]
    fn backup_restores_into_a_fresh_store() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("casebook-store-{}", std::process::id()));
        std::fs::create_dir_all(&dir)?;
        let backup_path = dir.join("backup.db");
        let mut store = mk_store()?;
        seed(&mut store)?;
        store.backup_database(&backup_path)?;
        let mut restored = mk_store()?;
        restored.restore_database(&backup_path)?;
        assert_eq!(restored.list_organizations()?.len(), 1);
        let _ = std::fs::remove_file(&backup_path);
        Ok(())
    }

    #[test]
    fn integrity_check_reports_healthy() -> Result<()> {
        let mut store = mk_store()?;
        seed(&mut store)?;
        let report = store.integrity_check()?;
        assert!(report.is_healthy());
        assert!(report.foreign_key_violations.is_empty());
        Ok(())
    }
}
