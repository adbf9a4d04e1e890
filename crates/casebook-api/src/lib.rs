//! Operation facade over the casebook core and SQLite store.
//!
//! Every operation opens the store, brings the schema up to date, loads the
//! rows the core rules need, and hands back serializable results. The service
//! and the CLI stay thin: they deserialize a request, call one method here,
//! and serialize the outcome.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use casebook_core::{
    authorized_case_files, can_modify_activity, case_file_activities, compose_view,
    expand_activity, expand_recurrence, participant_activities, participant_report, project_with,
    wall_clock, Activity, ActivityBundle, ActivityDraft, ActivityFilters, ActivityId,
    ActivityKind, ActivityReport, ActivityType, ActivityTypeId, CaseFile, CaseFileId, CaseStatus,
    CoreError, ExclusiveSet, ExclusiveSetId, Group, GroupId, Orientation, Organization,
    OrganizationId, Participant, ParticipantId, Projection, RecurrenceRule, Resource, StatusRecord,
    TenureRecord, TenureView, TimeSlot, Topic, TopicId, User, UserGroup, UserGroupId, UserId, View,
    ViewId,
};
use casebook_store_sqlite::{IntegrityReport, SchemaStatus, SqliteStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{Date, OffsetDateTime, PrimitiveDateTime};

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddOrganizationRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub internal: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddTopicRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddParticipantRequest {
    pub firstname: String,
    pub lastname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddResourceRequest {
    pub name: String,
    #[serde(default)]
    pub topics: BTreeSet<TopicId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddCaseFileRequest {
    pub firstname: String,
    pub lastname: String,
    #[serde(with = "wall_clock::date")]
    pub birthdate: Date,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddUserRequest {
    pub participant: ParticipantId,
    #[serde(default)]
    pub usergroup: Option<UserGroupId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddUserGroupRequest {
    pub name: String,
    #[serde(default)]
    pub status_window: BTreeSet<CaseStatus>,
    #[serde(default)]
    pub case_file_groups: BTreeSet<GroupId>,
    #[serde(default)]
    pub participant_groups: BTreeSet<GroupId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenameUserGroupRequest {
    pub usergroup: UserGroupId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetUserGroupStatusWindowRequest {
    pub usergroup: UserGroupId,
    #[serde(default)]
    pub status_window: BTreeSet<CaseStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetUserGroupCaseFileGroupsRequest {
    pub usergroup: UserGroupId,
    #[serde(default)]
    pub groups: BTreeSet<GroupId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetUserGroupParticipantGroupsRequest {
    pub usergroup: UserGroupId,
    #[serde(default)]
    pub groups: BTreeSet<GroupId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetUserUserGroupRequest {
    pub user: UserId,
    #[serde(default)]
    pub usergroup: Option<UserGroupId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddGroupRequest {
    pub organization: OrganizationId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub mandatory: bool,
    pub orientation: Orientation,
    #[serde(default)]
    pub topics: BTreeSet<TopicId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateGroupRequest {
    pub group: GroupId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetGroupTopicsRequest {
    pub group: GroupId,
    #[serde(default)]
    pub topics: BTreeSet<TopicId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetGroupOrientationRequest {
    pub group: GroupId,
    pub orientation: Orientation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetGroupMandatoryRequest {
    pub group: GroupId,
    pub mandatory: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateExclusiveSetRequest {
    pub name: String,
    pub members: Vec<GroupId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssignCaseFileGroupsRequest {
    pub case_file: CaseFileId,
    #[serde(default)]
    pub groups: Vec<GroupId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaseFileGroupsResult {
    pub case_file: CaseFileId,
    pub groups: BTreeSet<GroupId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssignParticipantGroupsRequest {
    pub participant: ParticipantId,
    #[serde(default)]
    pub groups: Vec<GroupId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantGroupsResult {
    pub participant: ParticipantId,
    pub groups: BTreeSet<GroupId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssignGroupParticipantsRequest {
    pub group: GroupId,
    #[serde(default)]
    pub participants: Vec<ParticipantId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupParticipantsResult {
    pub group: GroupId,
    pub participants: BTreeSet<ParticipantId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppendStatusRequest {
    pub case_file: CaseFileId,
    pub organization: OrganizationId,
    pub status: CaseStatus,
    #[serde(with = "wall_clock")]
    pub effective_from: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurrentStatusRequest {
    pub case_file: CaseFileId,
    pub organization: OrganizationId,
    #[serde(default, with = "wall_clock::option")]
    pub at: Option<PrimitiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurrentStatusResult {
    pub case_file: CaseFileId,
    pub organization: OrganizationId,
    #[serde(with = "wall_clock")]
    pub at: PrimitiveDateTime,
    pub status: Option<CaseStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthorizedCaseFilesRequest {
    pub viewer: UserId,
    #[serde(default, with = "wall_clock::option")]
    pub at: Option<PrimitiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthorizedCaseFilesResult {
    pub viewer: UserId,
    #[serde(with = "wall_clock")]
    pub at: PrimitiveDateTime,
    pub case_files: BTreeSet<CaseFileId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddActivityTypeRequest {
    pub kind: ActivityKind,
    #[serde(default)]
    pub category: Option<String>,
    pub name: String,
    #[serde(default)]
    pub individual: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateActivityRequest {
    pub draft: ActivityDraft,
    #[serde(default)]
    pub recurrence: Option<RecurrenceRule>,
    #[serde(default, with = "wall_clock::option")]
    pub at: Option<PrimitiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateActivityResult {
    pub activity_ids: Vec<ActivityId>,
    pub occurrence_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateActivityRequest {
    pub viewer: UserId,
    pub activity: Activity,
    #[serde(default, with = "wall_clock::option")]
    pub at: Option<PrimitiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteActivityRequest {
    pub viewer: UserId,
    pub activity: ActivityId,
    #[serde(default, with = "wall_clock::option")]
    pub at: Option<PrimitiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectActivityRequest {
    pub viewer: UserId,
    pub activity: ActivityId,
    /// Field-selection tree; `None` renders every scalar.
    #[serde(default)]
    pub selection: Option<Value>,
    #[serde(default, with = "wall_clock::option")]
    pub at: Option<PrimitiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreviewRecurrenceRequest {
    #[serde(with = "wall_clock")]
    pub start: PrimitiveDateTime,
    #[serde(with = "wall_clock")]
    pub end: PrimitiveDateTime,
    pub rule: RecurrenceRule,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddViewRequest {
    pub kind: ActivityKind,
    pub name: String,
    #[serde(default)]
    pub categories: BTreeSet<String>,
    #[serde(default)]
    pub type_filter: Option<ActivityTypeId>,
    #[serde(default)]
    pub topics: BTreeSet<TopicId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenameViewRequest {
    pub view: ViewId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComposeViewRequest {
    pub view: ViewId,
    pub viewer: UserId,
    #[serde(default, with = "wall_clock::option")]
    pub at: Option<PrimitiveDateTime>,
    #[serde(default)]
    pub activity_type: Option<ActivityTypeId>,
    #[serde(default)]
    pub case_file: Option<CaseFileId>,
    #[serde(default, with = "wall_clock::option")]
    pub from: Option<PrimitiveDateTime>,
    #[serde(default, with = "wall_clock::option")]
    pub to: Option<PrimitiveDateTime>,
    /// Field-selection tree to render each listed activity with. Omitted
    /// means ids only.
    #[serde(default)]
    pub selection: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComposeViewResult {
    pub view: ViewId,
    pub activity_ids: Vec<ActivityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activities: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantActivitiesRequest {
    pub participant: ParticipantId,
    #[serde(default)]
    pub kind: Option<ActivityKind>,
    #[serde(default)]
    pub selection: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantActivitiesResult {
    pub participant: ParticipantId,
    pub activity_ids: Vec<ActivityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activities: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaseFileActivitiesRequest {
    pub case_file: CaseFileId,
    pub viewer: UserId,
    #[serde(default)]
    pub kind: Option<ActivityKind>,
    #[serde(default, with = "wall_clock::option")]
    pub at: Option<PrimitiveDateTime>,
    #[serde(default)]
    pub selection: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaseFileActivitiesResult {
    pub case_file: CaseFileId,
    pub activity_ids: Vec<ActivityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activities: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParticipantReportResult {
    pub participant: ParticipantId,
    #[serde(flatten)]
    pub report: ActivityReport,
}

/// Facade handle bound to one database path.
#[derive(Debug, Clone)]
pub struct CasebookApi {
    db_path: PathBuf,
}

impl CasebookApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.db_path)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = self.open_store()?;
        store.schema_status()
    }

    /// Apply pending migrations, or return the plan in dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = self.open_store()?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// # Errors
    /// Returns an error when the backup cannot be written.
    pub fn backup_database(&self, out_file: &Path) -> Result<()> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.backup_database(out_file)
    }

    /// # Errors
    /// Returns an error when the restore or the follow-up migration fails.
    pub fn restore_database(&self, in_file: &Path) -> Result<()> {
        let mut store = self.open_store()?;
        store.restore_database(in_file)
    }

    /// # Errors
    /// Returns an error when the health checks cannot be executed.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.integrity_check()
    }

    /// # Errors
    /// Returns an error when validation or persistence fails.
    pub fn add_organization(&self, input: AddOrganizationRequest) -> Result<Organization> {
        let mut store = self.open_store()?;
        store.migrate()?;
        let id = store.add_organization(&input.name, input.description.as_deref(), input.internal)?;
        Ok(Organization {
            id,
            name: input.name,
            description: input.description,
            internal: input.internal,
        })
    }

    /// # Errors
    /// Returns an error when the rows cannot be read.
    pub fn list_organizations(&self) -> Result<Vec<Organization>> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.list_organizations()
    }

    /// # Errors
    /// Returns an error when validation or persistence fails.
    pub fn add_topic(&self, input: AddTopicRequest) -> Result<Topic> {
        let mut store = self.open_store()?;
        store.migrate()?;
        let id = store.add_topic(&input.name, input.description.as_deref())?;
        Ok(Topic {
            id,
            name: input.name,
            description: input.description,
        })
    }

    /// # Errors
    /// Returns an error when the rows cannot be read.
    pub fn list_topics(&self) -> Result<Vec<Topic>> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.list_topics()
    }

    /// # Errors
    /// Returns an error when validation or persistence fails.
    pub fn add_participant(&self, input: AddParticipantRequest) -> Result<Participant> {
        let mut store = self.open_store()?;
        store.migrate()?;
        let id = store.add_participant(&input.firstname, &input.lastname)?;
        Ok(Participant {
            id,
            firstname: input.firstname,
            lastname: input.lastname,
        })
    }

    /// # Errors
    /// Returns an error when the rows cannot be read.
    pub fn list_participants(&self) -> Result<Vec<Participant>> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.list_participants()
    }

    /// # Errors
    /// Returns an error when validation or persistence fails.
    pub fn add_resource(&self, input: AddResourceRequest) -> Result<Resource> {
        let mut store = self.open_store()?;
        store.migrate()?;
        let id = store.add_resource(&input.name, &input.topics)?;
        Ok(Resource {
            id,
            name: input.name,
            topics: input.topics,
        })
    }

    /// # Errors
    /// Returns an error when the rows cannot be read.
    pub fn list_resources(&self) -> Result<Vec<Resource>> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.list_resources()
    }

    /// # Errors
    /// Returns an error when validation or persistence fails.
    pub fn add_case_file(&self, input: AddCaseFileRequest) -> Result<CaseFile> {
        let mut store = self.open_store()?;
        store.migrate()?;
        let id = store.add_case_file(&input.firstname, &input.lastname, input.birthdate)?;
        Ok(CaseFile {
            id,
            firstname: input.firstname,
            lastname: input.lastname,
            birthdate: input.birthdate,
        })
    }

    /// # Errors
    /// Returns an error when the rows cannot be read.
    pub fn list_case_files(&self) -> Result<Vec<CaseFile>> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.list_case_files()
    }

    /// # Errors
    /// Returns an error when the case file does not exist.
    pub fn get_case_file(&self, case_file: CaseFileId) -> Result<CaseFile> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store
            .get_case_file(case_file)?
            .ok_or_else(|| {
                CoreError::InvalidReference(format!("case file {case_file} does not exist"))
            })
            .map_err(Into::into)
    }

    /// # Errors
    /// Returns an error when a reference is missing or persistence fails.
    pub fn add_user(&self, input: AddUserRequest) -> Result<User> {
        let mut store = self.open_store()?;
        store.migrate()?;
        let id = store.add_user(input.participant, input.usergroup)?;
        Ok(User {
            id,
            participant: input.participant,
            usergroup: input.usergroup,
        })
    }

    /// # Errors
    /// Returns an error when the rows cannot be read.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.list_users()
    }

    /// # Errors
    /// Returns an error when the user does not exist.
    pub fn get_user(&self, user: UserId) -> Result<User> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store
            .get_user(user)?
            .ok_or_else(|| CoreError::InvalidReference(format!("user {user} does not exist")))
            .map_err(Into::into)
    }

    /// Move a user into a usergroup, or out of any with `None`.
    ///
    /// # Errors
    /// Returns an error when the user or the usergroup does not exist.
    pub fn set_user_usergroup(&self, input: SetUserUserGroupRequest) -> Result<User> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.set_user_usergroup(input.user, input.usergroup)?;
        store
            .get_user(input.user)?
            .ok_or_else(|| anyhow!("user {} vanished after update", input.user))
    }

    /// # Errors
    /// Returns an error when a linked group is missing or external.
    pub fn add_usergroup(&self, input: AddUserGroupRequest) -> Result<UserGroup> {
        let mut store = self.open_store()?;
        store.migrate()?;
        let id = store.add_usergroup(
            &input.name,
            &input.status_window,
            &input.case_file_groups,
            &input.participant_groups,
        )?;
        Ok(UserGroup {
            id,
            name: input.name,
            status_window: input.status_window,
            case_file_groups: input.case_file_groups,
            participant_groups: input.participant_groups,
        })
    }

    /// # Errors
    /// Returns an error when the rows cannot be read.
    pub fn list_usergroups(&self) -> Result<Vec<UserGroup>> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.list_usergroups()
    }

    /// # Errors
    /// Returns an error when the usergroup does not exist.
    pub fn get_usergroup(&self, usergroup: UserGroupId) -> Result<UserGroup> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store
            .get_usergroup(usergroup)?
            .ok_or_else(|| {
                CoreError::InvalidReference(format!("usergroup {usergroup} does not exist"))
            })
            .map_err(Into::into)
    }

    /// # Errors
    /// Returns an error when the usergroup is missing or the name is blank.
    pub fn rename_usergroup(&self, input: RenameUserGroupRequest) -> Result<UserGroup> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.rename_usergroup(input.usergroup, &input.name)?;
        store
            .get_usergroup(input.usergroup)?
            .ok_or_else(|| anyhow!("usergroup {} vanished after update", input.usergroup))
    }

    /// # Errors
    /// Returns an error when the usergroup does not exist.
    pub fn delete_usergroup(&self, usergroup: UserGroupId) -> Result<()> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.delete_usergroup(usergroup)
    }

    /// # Errors
    /// Returns an error when the usergroup does not exist.
    pub fn set_usergroup_status_window(
        &self,
        input: SetUserGroupStatusWindowRequest,
    ) -> Result<UserGroup> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.set_usergroup_status_window(input.usergroup, &input.status_window)?;
        store
            .get_usergroup(input.usergroup)?
            .ok_or_else(|| anyhow!("usergroup {} vanished after update", input.usergroup))
    }

    /// # Errors
    /// Returns an error when the usergroup or a group is missing.
    pub fn set_usergroup_case_file_groups(
        &self,
        input: SetUserGroupCaseFileGroupsRequest,
    ) -> Result<UserGroup> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.set_usergroup_case_file_groups(input.usergroup, &input.groups)?;
        store
            .get_usergroup(input.usergroup)?
            .ok_or_else(|| anyhow!("usergroup {} vanished after update", input.usergroup))
    }

    /// Replace the participant-side group links, which only accept groups of
    /// internal organizations.
    ///
    /// # Errors
    /// Returns an error when a reference is missing or a group belongs to an
    /// external organization.
    pub fn set_usergroup_participant_groups(
        &self,
        input: SetUserGroupParticipantGroupsRequest,
    ) -> Result<UserGroup> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.set_usergroup_participant_groups(input.usergroup, &input.groups)?;
        store
            .get_usergroup(input.usergroup)?
            .ok_or_else(|| anyhow!("usergroup {} vanished after update", input.usergroup))
    }

    /// # Errors
    /// Returns an error when a reference is missing or persistence fails.
    pub fn add_group(&self, input: AddGroupRequest) -> Result<Group> {
        let mut store = self.open_store()?;
        store.migrate()?;
        let id = store.add_group(
            input.organization,
            &input.name,
            input.description.as_deref(),
            input.mandatory,
            input.orientation,
            &input.topics,
        )?;
        Ok(Group {
            id,
            organization: input.organization,
            name: input.name,
            description: input.description,
            mandatory: input.mandatory,
            orientation: input.orientation,
            topics: input.topics,
        })
    }

    /// # Errors
    /// Returns an error when the rows cannot be read.
    pub fn list_groups(&self, organization: Option<OrganizationId>) -> Result<Vec<Group>> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.list_groups(organization)
    }

    /// # Errors
    /// Returns an error when the group does not exist.
    pub fn get_group(&self, group: GroupId) -> Result<Group> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store
            .get_group(group)?
            .ok_or_else(|| CoreError::InvalidReference(format!("group {group} does not exist")))
            .map_err(Into::into)
    }

    /// # Errors
    /// Returns an error when the group is missing or the new name collides
    /// within the organization.
    pub fn update_group(&self, input: UpdateGroupRequest) -> Result<Group> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.update_group(input.group, &input.name, input.description.as_deref())?;
        store
            .get_group(input.group)?
            .ok_or_else(|| anyhow!("group {} vanished after update", input.group))
    }

    /// # Errors
    /// Returns an error when the group or a topic does not exist.
    pub fn set_group_topics(&self, input: SetGroupTopicsRequest) -> Result<Group> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.set_group_topics(input.group, &input.topics)?;
        store
            .get_group(input.group)?
            .ok_or_else(|| anyhow!("group {} vanished after update", input.group))
    }

    /// # Errors
    /// Returns an error when the group does not exist.
    pub fn set_group_orientation(&self, input: SetGroupOrientationRequest) -> Result<Group> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.set_group_orientation(input.group, input.orientation)?;
        store
            .get_group(input.group)?
            .ok_or_else(|| anyhow!("group {} vanished after update", input.group))
    }

    /// # Errors
    /// Returns an error when the group is missing or the change violates an
    /// exclusive-set constraint.
    pub fn set_group_mandatory(&self, input: SetGroupMandatoryRequest) -> Result<Group> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.set_group_mandatory(input.group, input.mandatory)?;
        store
            .get_group(input.group)?
            .ok_or_else(|| anyhow!("group {} vanished after update", input.group))
    }

    /// # Errors
    /// Returns an error when the group is missing or still bound to an
    /// exclusive set.
    pub fn delete_group(&self, group: GroupId) -> Result<()> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.delete_group(group)
    }

    /// # Errors
    /// Returns an error when the members fail the exclusive-set rules.
    pub fn create_exclusive_set(&self, input: CreateExclusiveSetRequest) -> Result<ExclusiveSet> {
        let mut store = self.open_store()?;
        store.migrate()?;
        let id = store.create_exclusive_set(&input.name, &input.members)?;
        let mut members = input.members;
        members.sort_unstable();
        Ok(ExclusiveSet {
            id,
            name: input.name,
            members,
        })
    }

    /// # Errors
    /// Returns an error when the set does not exist.
    pub fn dissolve_exclusive_set(&self, set: ExclusiveSetId) -> Result<()> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.dissolve_exclusive_set(set)
    }

    /// # Errors
    /// Returns an error when the rows cannot be read.
    pub fn list_exclusive_sets(&self) -> Result<Vec<ExclusiveSet>> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.list_exclusive_sets()
    }

    /// The exclusive set holding `group`, members ordered by group id, or
    /// `None` when the group is unclaimed.
    ///
    /// # Errors
    /// Returns an error when the group does not exist.
    pub fn exclusive_set_of(&self, group: GroupId) -> Result<Option<ExclusiveSet>> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.exclusive_set_of(group)
    }

    /// Replace a case file's group assignments, all-or-nothing.
    ///
    /// # Errors
    /// Returns an error when a reference is missing or two requested groups
    /// share an exclusive set.
    pub fn assign_case_file_groups(
        &self,
        input: AssignCaseFileGroupsRequest,
    ) -> Result<CaseFileGroupsResult> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.assign_case_file_groups(input.case_file, &input.groups)?;
        Ok(CaseFileGroupsResult {
            case_file: input.case_file,
            groups: store.case_file_groups_of(input.case_file)?,
        })
    }

    /// # Errors
    /// Returns an error when the case file is missing.
    pub fn case_file_groups(&self, case_file: CaseFileId) -> Result<CaseFileGroupsResult> {
        let mut store = self.open_store()?;
        store.migrate()?;
        Ok(CaseFileGroupsResult {
            case_file,
            groups: store.case_file_groups_of(case_file)?,
        })
    }

    /// Replace a participant's group assignments, all-or-nothing.
    ///
    /// # Errors
    /// Returns an error when the participant or a group is missing.
    pub fn assign_participant_groups(
        &self,
        input: AssignParticipantGroupsRequest,
    ) -> Result<ParticipantGroupsResult> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.assign_participant_groups(input.participant, &input.groups)?;
        Ok(ParticipantGroupsResult {
            participant: input.participant,
            groups: store.participant_groups_of(input.participant)?,
        })
    }

    /// # Errors
    /// Returns an error when the participant is missing.
    pub fn participant_groups(&self, participant: ParticipantId) -> Result<ParticipantGroupsResult> {
        let mut store = self.open_store()?;
        store.migrate()?;
        Ok(ParticipantGroupsResult {
            participant,
            groups: store.participant_groups_of(participant)?,
        })
    }

    /// Replace a group's participant roster, the staff-assignment direction of
    /// the same edge set.
    ///
    /// # Errors
    /// Returns an error when the group or a participant is missing.
    pub fn assign_group_participants(
        &self,
        input: AssignGroupParticipantsRequest,
    ) -> Result<GroupParticipantsResult> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.assign_group_participants(input.group, &input.participants)?;
        Ok(GroupParticipantsResult {
            group: input.group,
            participants: store.group_participants_of(input.group)?,
        })
    }

    /// # Errors
    /// Returns an error when the group is missing or the rows cannot be read.
    pub fn group_participants(&self, group: GroupId) -> Result<GroupParticipantsResult> {
        let mut store = self.open_store()?;
        store.migrate()?;
        Ok(GroupParticipantsResult {
            group,
            participants: store.group_participants_of(group)?,
        })
    }

    /// Append one status record to a case file's trail.
    ///
    /// # Errors
    /// Returns an error when the case file or organization is missing.
    pub fn append_status(&self, input: AppendStatusRequest) -> Result<StatusRecord> {
        let mut store = self.open_store()?;
        store.migrate()?;
        let id = store.append_status(
            input.case_file,
            input.organization,
            input.status,
            input.effective_from,
        )?;
        Ok(StatusRecord {
            id,
            case_file: input.case_file,
            organization: input.organization,
            status: input.status,
            effective_from: input.effective_from,
        })
    }

    /// # Errors
    /// Returns an error when a reference is missing.
    pub fn status_history(
        &self,
        case_file: CaseFileId,
        organization: OrganizationId,
    ) -> Result<Vec<StatusRecord>> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.status_history(case_file, organization)
    }

    /// Resolve the status effective at a probe instant (`None` probes now).
    ///
    /// # Errors
    /// Returns an error when a reference is missing.
    pub fn current_status(&self, input: CurrentStatusRequest) -> Result<CurrentStatusResult> {
        let mut store = self.open_store()?;
        store.migrate()?;
        let history = store.status_history(input.case_file, input.organization)?;
        let at = resolve_at(input.at);
        let ledger = casebook_core::StatusLedger::new(history);
        Ok(CurrentStatusResult {
            case_file: input.case_file,
            organization: input.organization,
            at,
            status: ledger.current_status(input.case_file, input.organization, at),
        })
    }

    /// The case files a user may reach at a probe instant.
    ///
    /// # Errors
    /// Returns an error when the user does not exist.
    pub fn authorized_case_files_for(
        &self,
        input: AuthorizedCaseFilesRequest,
    ) -> Result<AuthorizedCaseFilesResult> {
        let mut store = self.open_store()?;
        store.migrate()?;
        let at = resolve_at(input.at);
        let (_, case_files) = viewer_context(&store, input.viewer, at)?;
        Ok(AuthorizedCaseFilesResult {
            viewer: input.viewer,
            at,
            case_files,
        })
    }

    /// # Errors
    /// Returns an error when validation or persistence fails.
    pub fn add_activity_type(&self, input: AddActivityTypeRequest) -> Result<ActivityType> {
        let mut store = self.open_store()?;
        store.migrate()?;
        let id = store.add_activity_type(
            input.kind,
            input.category.as_deref(),
            &input.name,
            input.individual,
        )?;
        Ok(ActivityType {
            id,
            kind: input.kind,
            category: input.category,
            name: input.name,
            individual: input.individual,
        })
    }

    /// # Errors
    /// Returns an error when the rows cannot be read.
    pub fn list_activity_types(&self, kind: Option<ActivityKind>) -> Result<Vec<ActivityType>> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.list_activity_types(kind)
    }

    /// Create one activity, or the whole expanded series for a recurring
    /// event. The batch lands completely or not at all.
    ///
    /// # Errors
    /// Returns an error when the draft fails validation, the recurrence is
    /// unresolvable, or any referenced row is missing.
    pub fn create_activity(&self, input: CreateActivityRequest) -> Result<CreateActivityResult> {
        let mut store = self.open_store()?;
        store.migrate()?;
        let at = resolve_at(input.at);
        let drafts = expand_activity(&input.draft, input.recurrence.as_ref())?;
        let activity_ids = store.insert_activities(&drafts, at)?;
        Ok(CreateActivityResult {
            occurrence_count: activity_ids.len(),
            activity_ids,
        })
    }

    /// # Errors
    /// Returns an error when the activity does not exist.
    pub fn get_activity(&self, id: ActivityId) -> Result<Activity> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store
            .get_activity(id)?
            .ok_or_else(|| CoreError::InvalidReference(format!("activity {id} does not exist")).into())
    }

    /// # Errors
    /// Returns an error when the rows cannot be read.
    pub fn list_activities(&self) -> Result<Vec<Activity>> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.list_activities()
    }

    /// Rewrite an activity after checking the viewer may touch it.
    ///
    /// # Errors
    /// Returns an error when the viewer lacks access, the activity is
    /// missing, or the new shape fails validation.
    pub fn update_activity(&self, input: UpdateActivityRequest) -> Result<Activity> {
        let mut store = self.open_store()?;
        store.migrate()?;
        let current = store.get_activity(input.activity.id)?.ok_or_else(|| {
            CoreError::InvalidReference(format!("activity {} does not exist", input.activity.id))
        })?;
        let at = resolve_at(input.at);
        let (viewer, authorized) = viewer_context(&store, input.viewer, at)?;
        if !can_modify_activity(&current, viewer, &authorized) {
            return Err(CoreError::NotAuthorized(format!(
                "user {} cannot modify activity {}",
                input.viewer, input.activity.id
            ))
            .into());
        }
        store.update_activity(&input.activity, at)?;
        store
            .get_activity(input.activity.id)?
            .ok_or_else(|| anyhow!("activity {} vanished after update", input.activity.id))
    }

    /// Delete an activity after checking the viewer may touch it.
    ///
    /// # Errors
    /// Returns an error when the viewer lacks access or the activity is
    /// missing.
    pub fn delete_activity(&self, input: DeleteActivityRequest) -> Result<()> {
        let mut store = self.open_store()?;
        store.migrate()?;
        let current = store.get_activity(input.activity)?.ok_or_else(|| {
            CoreError::InvalidReference(format!("activity {} does not exist", input.activity))
        })?;
        let at = resolve_at(input.at);
        let (viewer, authorized) = viewer_context(&store, input.viewer, at)?;
        if !can_modify_activity(&current, viewer, &authorized) {
            return Err(CoreError::NotAuthorized(format!(
                "user {} cannot delete activity {}",
                input.viewer, input.activity
            ))
            .into());
        }
        store.delete_activity(input.activity)
    }

    /// # Errors
    /// Returns an error when the activity does not exist.
    pub fn responsibility_history(&self, activity: ActivityId) -> Result<Vec<TenureRecord>> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.responsibility_history(activity)
    }

    /// Project an activity with all of its relations through a caller
    /// selection tree. Output field order follows the request exactly.
    ///
    /// # Errors
    /// Returns an error when the viewer lacks access, the selection names an
    /// unknown field, or the activity is missing.
    pub fn project_activity(&self, input: ProjectActivityRequest) -> Result<Value> {
        let mut store = self.open_store()?;
        store.migrate()?;
        let activity = store.get_activity(input.activity)?.ok_or_else(|| {
            CoreError::InvalidReference(format!("activity {} does not exist", input.activity))
        })?;
        let at = resolve_at(input.at);
        let (viewer, authorized) = viewer_context(&store, input.viewer, at)?;
        if !can_modify_activity(&activity, viewer, &authorized) {
            return Err(CoreError::NotAuthorized(format!(
                "user {} cannot read activity {}",
                input.viewer, input.activity
            ))
            .into());
        }
        let selection = match &input.selection {
            Some(value) => Some(Projection::from_value(value)?),
            None => None,
        };
        let rows = load_bundle_rows(&store, &activity)?;
        let bundle = assemble_bundle(&activity, &rows);
        Ok(project_with(&bundle, selection.as_ref())?)
    }

    /// Expand a recurrence rule against an anchor slot without persisting
    /// anything.
    ///
    /// # Errors
    /// Returns an error when the rule is invalid or an ordinal-weekday
    /// pattern has no slot in some target month.
    pub fn preview_recurrence(&self, input: PreviewRecurrenceRequest) -> Result<Vec<TimeSlot>> {
        Ok(expand_recurrence(input.start, input.end, &input.rule)?)
    }

    /// # Errors
    /// Returns an error when a filter reference is missing or invalid.
    pub fn add_view(&self, input: AddViewRequest) -> Result<View> {
        let mut store = self.open_store()?;
        store.migrate()?;
        let id = store.add_view(
            input.kind,
            &input.name,
            &input.categories,
            input.type_filter,
            &input.topics,
        )?;
        Ok(View {
            id,
            kind: input.kind,
            name: input.name,
            categories: input.categories,
            type_filter: input.type_filter,
            topics: input.topics,
        })
    }

    /// # Errors
    /// Returns an error when the rows cannot be read.
    pub fn list_views(&self) -> Result<Vec<View>> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.list_views()
    }

    /// # Errors
    /// Returns an error when the view does not exist.
    pub fn get_view(&self, view: ViewId) -> Result<View> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store
            .get_view(view)?
            .ok_or_else(|| CoreError::InvalidReference(format!("view {view} does not exist")))
            .map_err(Into::into)
    }

    /// # Errors
    /// Returns an error when the view is missing or the name is blank.
    pub fn rename_view(&self, input: RenameViewRequest) -> Result<View> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.rename_view(input.view, &input.name)?;
        store
            .get_view(input.view)?
            .ok_or_else(|| anyhow!("view {} vanished after update", input.view))
    }

    /// # Errors
    /// Returns an error when the view does not exist.
    pub fn delete_view(&self, view: ViewId) -> Result<()> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.delete_view(view)
    }

    /// Compose a view for a viewer: the view's filter chain runs over the
    /// activities the viewer is authorized to reach, and the result is an
    /// ascending id list.
    ///
    /// # Errors
    /// Returns an error when the view or viewer is missing.
    pub fn compose_view(&self, input: ComposeViewRequest) -> Result<ComposeViewResult> {
        let mut store = self.open_store()?;
        store.migrate()?;
        let view = store
            .get_view(input.view)?
            .ok_or_else(|| CoreError::InvalidReference(format!("view {} does not exist", input.view)))?;
        let at = resolve_at(input.at);
        let (_, authorized) = viewer_context(&store, input.viewer, at)?;
        let activities = store.list_activities()?;
        let types = store.activity_types_map()?;
        let filters = ActivityFilters {
            activity_type: input.activity_type,
            case_file: input.case_file,
            from: input.from,
            to: input.to,
        };
        let activity_ids = compose_view(&view, &activities, &types, &authorized, &filters);
        let projected = project_listed(&store, &activities, &activity_ids, input.selection.as_ref())?;
        Ok(ComposeViewResult {
            view: input.view,
            activity_ids,
            activities: projected,
        })
    }

    /// Activities a participant authored or attends, ascending by id.
    ///
    /// # Errors
    /// Returns an error when the participant does not exist.
    pub fn participant_activities_list(
        &self,
        input: ParticipantActivitiesRequest,
    ) -> Result<ParticipantActivitiesResult> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store
            .get_participant(input.participant)?
            .ok_or_else(|| {
                CoreError::InvalidReference(format!(
                    "participant {} does not exist",
                    input.participant
                ))
            })?;
        let activities = store.list_activities()?;
        let activity_ids = participant_activities(&activities, input.participant, input.kind);
        let projected = project_listed(&store, &activities, &activity_ids, input.selection.as_ref())?;
        Ok(ParticipantActivitiesResult {
            participant: input.participant,
            activity_ids,
            activities: projected,
        })
    }

    /// Activities linked to a case file, gated by the viewer's authorization.
    ///
    /// # Errors
    /// Returns an error when a reference is missing or the viewer is not
    /// authorized for the case file.
    pub fn case_file_activities_list(
        &self,
        input: CaseFileActivitiesRequest,
    ) -> Result<CaseFileActivitiesResult> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.get_case_file(input.case_file)?.ok_or_else(|| {
            CoreError::InvalidReference(format!("case file {} does not exist", input.case_file))
        })?;
        let at = resolve_at(input.at);
        let (_, authorized) = viewer_context(&store, input.viewer, at)?;
        if !authorized.contains(&input.case_file) {
            return Err(CoreError::NotAuthorized(format!(
                "user {} cannot reach case file {}",
                input.viewer, input.case_file
            ))
            .into());
        }
        let activities = store.list_activities()?;
        let activity_ids = case_file_activities(&activities, input.case_file, input.kind);
        let projected = project_listed(&store, &activities, &activity_ids, input.selection.as_ref())?;
        Ok(CaseFileActivitiesResult {
            case_file: input.case_file,
            activity_ids,
            activities: projected,
        })
    }

    /// Attendance totals for one participant across all activities.
    ///
    /// # Errors
    /// Returns an error when the participant does not exist.
    pub fn participant_report(&self, participant: ParticipantId) -> Result<ParticipantReportResult> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.get_participant(participant)?.ok_or_else(|| {
            CoreError::InvalidReference(format!("participant {participant} does not exist"))
        })?;
        let activities = store.list_activities()?;
        Ok(ParticipantReportResult {
            participant,
            report: participant_report(&activities, participant),
        })
    }
}

/// Render the listed activities through a selection tree, one object per id
/// in list order. No selection means no rendered rows.
fn project_listed(
    store: &SqliteStore,
    activities: &[Activity],
    ids: &[ActivityId],
    selection: Option<&Value>,
) -> Result<Option<Vec<Value>>> {
    let Some(selection) = selection else {
        return Ok(None);
    };
    let selection = Projection::from_value(selection)?;
    let mut rendered = Vec::with_capacity(ids.len());
    for id in ids {
        let Some(activity) = activities.iter().find(|activity| activity.id == *id) else {
            continue;
        };
        let rows = load_bundle_rows(store, activity)?;
        let bundle = assemble_bundle(activity, &rows);
        rendered.push(project_with(&bundle, Some(&selection))?);
    }
    Ok(Some(rendered))
}

fn resolve_at(at: Option<PrimitiveDateTime>) -> PrimitiveDateTime {
    at.unwrap_or_else(|| {
        let now = OffsetDateTime::now_utc();
        PrimitiveDateTime::new(now.date(), now.time())
    })
}

/// Resolve a user into their participant identity and the case files their
/// usergroup reaches at `at`.
fn viewer_context(
    store: &SqliteStore,
    viewer: UserId,
    at: PrimitiveDateTime,
) -> Result<(ParticipantId, BTreeSet<CaseFileId>)> {
    let user = store
        .get_user(viewer)?
        .ok_or_else(|| CoreError::InvalidReference(format!("user {viewer} does not exist")))?;
    let usergroup = match user.usergroup {
        Some(id) => store.get_usergroup(id)?,
        None => None,
    };
    let groups = store.groups_map()?;
    let assignments = store.group_case_files_map()?;
    let ledger = store.status_ledger()?;
    let authorized = authorized_case_files(usergroup.as_ref(), &groups, &assignments, &ledger, at);
    Ok((user.participant, authorized))
}

/// Owned rows backing one [`ActivityBundle`]; the bundle only borrows.
struct BundleRows {
    activity_type: Option<ActivityType>,
    author: Participant,
    responsible: Option<Participant>,
    topics: Vec<Topic>,
    case_files: Vec<CaseFile>,
    participants: Vec<Participant>,
    resources: Vec<Resource>,
    tenures: Vec<TenureRecord>,
    tenure_responsibles: Vec<Participant>,
}

fn load_bundle_rows(store: &SqliteStore, activity: &Activity) -> Result<BundleRows> {
    let activity_type = match activity.activity_type {
        Some(id) => store.get_activity_type(id)?,
        None => None,
    };
    let author = store.get_participant(activity.author)?.ok_or_else(|| {
        anyhow!("activity {} references missing author {}", activity.id, activity.author)
    })?;
    let responsible = match activity.responsible {
        Some(id) => Some(store.get_participant(id)?.ok_or_else(|| {
            anyhow!("activity {} references missing participant {id}", activity.id)
        })?),
        None => None,
    };
    let topics = store
        .list_topics()?
        .into_iter()
        .filter(|topic| activity.topics.contains(&topic.id))
        .collect();
    let case_files = store
        .list_case_files()?
        .into_iter()
        .filter(|case_file| activity.case_files.contains(&case_file.id))
        .collect();
    let participants = store
        .list_participants()?
        .into_iter()
        .filter(|participant| activity.participants.contains(&participant.id))
        .collect();
    let resources = store
        .list_resources()?
        .into_iter()
        .filter(|resource| activity.resources.contains(&resource.id))
        .collect();
    let tenures = store.responsibility_history(activity.id)?;
    let mut tenure_responsibles = Vec::with_capacity(tenures.len());
    for tenure in &tenures {
        let participant = store.get_participant(tenure.responsible)?.ok_or_else(|| {
            anyhow!("activity {} tenure references missing participant {}", activity.id, tenure.responsible)
        })?;
        tenure_responsibles.push(participant);
    }
    Ok(BundleRows {
        activity_type,
        author,
        responsible,
        topics,
        case_files,
        participants,
        resources,
        tenures,
        tenure_responsibles,
    })
}

fn assemble_bundle<'a>(activity: &'a Activity, rows: &'a BundleRows) -> ActivityBundle<'a> {
    ActivityBundle {
        activity,
        activity_type: rows.activity_type.as_ref(),
        author: &rows.author,
        responsible: rows.responsible.as_ref(),
        topics: rows.topics.iter().collect(),
        case_files: rows.case_files.iter().collect(),
        participants: rows.participants.iter().collect(),
        resources: rows.resources.iter().collect(),
        responsible_history: rows
            .tenures
            .iter()
            .zip(rows.tenure_responsibles.iter())
            .map(|(record, responsible)| TenureView {
                record: record.clone(),
                responsible,
            })
            .collect(),
    }
}
