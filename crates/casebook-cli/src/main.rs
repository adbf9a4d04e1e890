use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use casebook_api::{
    AddActivityTypeRequest, AddCaseFileRequest, AddGroupRequest, AddOrganizationRequest,
    AddParticipantRequest, AddResourceRequest, AddTopicRequest, AddUserGroupRequest,
    AddUserRequest, AddViewRequest, AppendStatusRequest, AssignCaseFileGroupsRequest,
    AssignGroupParticipantsRequest, AssignParticipantGroupsRequest, AuthorizedCaseFilesRequest,
    CaseFileActivitiesRequest, CasebookApi, ComposeViewRequest, CreateActivityRequest,
    CreateExclusiveSetRequest, CurrentStatusRequest, DeleteActivityRequest,
    ParticipantActivitiesRequest, PreviewRecurrenceRequest, ProjectActivityRequest,
    RenameUserGroupRequest, RenameViewRequest, SetGroupMandatoryRequest,
    SetGroupOrientationRequest, SetGroupTopicsRequest, SetUserGroupCaseFileGroupsRequest,
    SetUserGroupParticipantGroupsRequest, SetUserGroupStatusWindowRequest,
    SetUserUserGroupRequest, UpdateActivityRequest, UpdateGroupRequest,
};
use casebook_core::{
    parse_wall_clock, parse_wall_clock_date, ActivityDraft, ActivityId, ActivityKind,
    ActivityStatus, ActivityTypeId, CaseFileId, CaseStatus, EventSchedule, ExclusiveSetId,
    GroupId, MonthlyMode, Orientation, OrganizationId, ParticipantId, RecurrencePattern,
    RecurrenceRule, ResourceId, TopicId, UserGroupId, UserId, ViewId,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use time::PrimitiveDateTime;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "cb")]
#[command(about = "Casebook CLI")]
struct Cli {
    #[arg(long, default_value = "./casebook.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: Box<DbCommand>,
    },
    Registry {
        #[command(subcommand)]
        command: Box<RegistryCommand>,
    },
    Group {
        #[command(subcommand)]
        command: Box<GroupCommand>,
    },
    Status {
        #[command(subcommand)]
        command: Box<StatusCommand>,
    },
    Auth {
        #[command(subcommand)]
        command: Box<AuthCommand>,
    },
    Activity {
        #[command(subcommand)]
        command: Box<ActivityCommand>,
    },
    Recurrence {
        #[command(subcommand)]
        command: Box<RecurrenceCommand>,
    },
    View {
        #[command(subcommand)]
        command: Box<ViewCommand>,
    },
    Report {
        #[command(subcommand)]
        command: Box<ReportCommand>,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    Backup(DbBackupArgs),
    Restore(DbRestoreArgs),
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct DbBackupArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct DbRestoreArgs {
    #[arg(long = "in")]
    input: PathBuf,
}

#[derive(Debug, Subcommand)]
enum RegistryCommand {
    AddOrganization(AddOrganizationArgs),
    AddTopic(AddTopicArgs),
    AddParticipant(AddParticipantArgs),
    AddResource(AddResourceArgs),
    AddCaseFile(AddCaseFileArgs),
    AddUser(AddUserArgs),
    AddUsergroup(AddUsergroupArgs),
    GetCaseFile(GetCaseFileArgs),
    GetUser(GetUserArgs),
    GetUsergroup(GetUsergroupArgs),
    ListOrganizations,
    ListTopics,
    ListParticipants,
    ListResources,
    ListCaseFiles,
    ListUsers,
    ListUsergroups,
    SetUserUsergroup(SetUserUsergroupArgs),
    RenameUsergroup(RenameUsergroupArgs),
    DeleteUsergroup(DeleteUsergroupArgs),
    SetUsergroupStatusWindow(SetUsergroupStatusWindowArgs),
    SetUsergroupCaseFileGroups(SetUsergroupGroupsArgs),
    SetUsergroupParticipantGroups(SetUsergroupGroupsArgs),
}

#[derive(Debug, Args)]
struct AddOrganizationArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    description: Option<String>,
    #[arg(long, default_value_t = false)]
    internal: bool,
}

#[derive(Debug, Args)]
struct AddTopicArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    description: Option<String>,
}

#[derive(Debug, Args)]
struct AddParticipantArgs {
    #[arg(long)]
    firstname: String,
    #[arg(long)]
    lastname: String,
}

#[derive(Debug, Args)]
struct AddResourceArgs {
    #[arg(long)]
    name: String,
    #[arg(long = "topic")]
    topics: Vec<i64>,
}

#[derive(Debug, Args)]
struct AddCaseFileArgs {
    #[arg(long)]
    firstname: String,
    #[arg(long)]
    lastname: String,
    /// Calendar date in DD/MM/YYYY form.
    #[arg(long)]
    birthdate: String,
}

#[derive(Debug, Args)]
struct AddUserArgs {
    #[arg(long)]
    participant: i64,
    #[arg(long)]
    usergroup: Option<i64>,
}

#[derive(Debug, Args)]
struct AddUsergroupArgs {
    #[arg(long)]
    name: String,
    #[arg(long = "status", value_enum)]
    status_window: Vec<CaseStatusArg>,
    #[arg(long = "case-file-group")]
    case_file_groups: Vec<i64>,
    #[arg(long = "participant-group")]
    participant_groups: Vec<i64>,
}

#[derive(Debug, Args)]
struct GetCaseFileArgs {
    #[arg(long)]
    case_file: i64,
}

#[derive(Debug, Args)]
struct GetUserArgs {
    #[arg(long)]
    user: i64,
}

#[derive(Debug, Args)]
struct GetUsergroupArgs {
    #[arg(long)]
    usergroup: i64,
}

#[derive(Debug, Args)]
struct SetUserUsergroupArgs {
    #[arg(long)]
    user: i64,
    /// Omit to detach the user from any usergroup.
    #[arg(long)]
    usergroup: Option<i64>,
}

#[derive(Debug, Args)]
struct RenameUsergroupArgs {
    #[arg(long)]
    usergroup: i64,
    #[arg(long)]
    name: String,
}

#[derive(Debug, Args)]
struct DeleteUsergroupArgs {
    #[arg(long)]
    usergroup: i64,
}

#[derive(Debug, Args)]
struct SetUsergroupStatusWindowArgs {
    #[arg(long)]
    usergroup: i64,
    #[arg(long = "status", value_enum)]
    status_window: Vec<CaseStatusArg>,
}

#[derive(Debug, Args)]
struct SetUsergroupGroupsArgs {
    #[arg(long)]
    usergroup: i64,
    #[arg(long = "group")]
    groups: Vec<i64>,
}

#[derive(Debug, Subcommand)]
enum GroupCommand {
    Add(AddGroupArgs),
    Get(GetGroupArgs),
    List(ListGroupsArgs),
    Update(UpdateGroupArgs),
    SetTopics(SetGroupTopicsArgs),
    SetOrientation(SetGroupOrientationArgs),
    SetMandatory(SetMandatoryArgs),
    SetParticipants(SetGroupParticipantsArgs),
    Participants(GroupParticipantsArgs),
    Delete(DeleteGroupArgs),
    CreateExclusiveSet(CreateExclusiveSetArgs),
    DissolveExclusiveSet(DissolveExclusiveSetArgs),
    ListExclusiveSets,
    ExclusiveWith(GetGroupArgs),
    AssignCaseFile(AssignCaseFileArgs),
    AssignParticipant(AssignParticipantArgs),
}

#[derive(Debug, Args)]
struct AddGroupArgs {
    #[arg(long)]
    organization: i64,
    #[arg(long)]
    name: String,
    #[arg(long)]
    description: Option<String>,
    #[arg(long, default_value_t = false)]
    mandatory: bool,
    #[arg(long, value_enum)]
    orientation: OrientationArg,
    #[arg(long = "topic")]
    topics: Vec<i64>,
}

#[derive(Debug, Args)]
struct GetGroupArgs {
    #[arg(long)]
    group: i64,
}

#[derive(Debug, Args)]
struct ListGroupsArgs {
    #[arg(long)]
    organization: Option<i64>,
}

#[derive(Debug, Args)]
struct UpdateGroupArgs {
    #[arg(long)]
    group: i64,
    #[arg(long)]
    name: String,
    #[arg(long)]
    description: Option<String>,
}

#[derive(Debug, Args)]
struct SetGroupTopicsArgs {
    #[arg(long)]
    group: i64,
    #[arg(long = "topic")]
    topics: Vec<i64>,
}

#[derive(Debug, Args)]
struct SetGroupOrientationArgs {
    #[arg(long)]
    group: i64,
    #[arg(long, value_enum)]
    orientation: OrientationArg,
}

#[derive(Debug, Args)]
struct SetGroupParticipantsArgs {
    #[arg(long)]
    group: i64,
    #[arg(long = "participant")]
    participants: Vec<i64>,
}

#[derive(Debug, Args)]
struct GroupParticipantsArgs {
    #[arg(long)]
    group: i64,
}

#[derive(Debug, Args)]
struct SetMandatoryArgs {
    #[arg(long)]
    group: i64,
    #[arg(long)]
    mandatory: bool,
}

#[derive(Debug, Args)]
struct DeleteGroupArgs {
    #[arg(long)]
    group: i64,
}

#[derive(Debug, Args)]
struct CreateExclusiveSetArgs {
    #[arg(long)]
    name: String,
    #[arg(long = "member")]
    members: Vec<i64>,
}

#[derive(Debug, Args)]
struct DissolveExclusiveSetArgs {
    #[arg(long)]
    set: i64,
}

#[derive(Debug, Args)]
struct AssignCaseFileArgs {
    #[arg(long)]
    case_file: i64,
    #[arg(long = "group")]
    groups: Vec<i64>,
}

#[derive(Debug, Args)]
struct AssignParticipantArgs {
    #[arg(long)]
    participant: i64,
    #[arg(long = "group")]
    groups: Vec<i64>,
}

#[derive(Debug, Subcommand)]
enum StatusCommand {
    Append(StatusAppendArgs),
    Current(StatusCurrentArgs),
    History(StatusHistoryArgs),
}

#[derive(Debug, Args)]
struct StatusAppendArgs {
    #[arg(long)]
    case_file: i64,
    #[arg(long)]
    organization: i64,
    #[arg(long, value_enum)]
    status: CaseStatusArg,
    /// Wall-clock instant in DD/MM/YYYY HH:MM:SS form.
    #[arg(long)]
    effective_from: String,
}

#[derive(Debug, Args)]
struct StatusCurrentArgs {
    #[arg(long)]
    case_file: i64,
    #[arg(long)]
    organization: i64,
    #[arg(long)]
    at: Option<String>,
}

#[derive(Debug, Args)]
struct StatusHistoryArgs {
    #[arg(long)]
    case_file: i64,
    #[arg(long)]
    organization: i64,
}

#[derive(Debug, Subcommand)]
enum AuthCommand {
    CaseFiles(AuthCaseFilesArgs),
}

#[derive(Debug, Args)]
struct AuthCaseFilesArgs {
    #[arg(long)]
    viewer: i64,
    #[arg(long)]
    at: Option<String>,
}

#[derive(Debug, Subcommand)]
enum ActivityCommand {
    AddType(AddActivityTypeArgs),
    ListTypes(ListActivityTypesArgs),
    Create(CreateActivityArgs),
    Get(ActivityIdArgs),
    List,
    Update(UpdateActivityArgs),
    Delete(DeleteActivityArgs),
    Responsibility(ActivityIdArgs),
    Project(ProjectActivityArgs),
}

#[derive(Debug, Args)]
struct AddActivityTypeArgs {
    #[arg(long, value_enum)]
    kind: ActivityKindArg,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    name: String,
    #[arg(long, default_value_t = false)]
    individual: bool,
}

#[derive(Debug, Args)]
struct ListActivityTypesArgs {
    #[arg(long, value_enum)]
    kind: Option<ActivityKindArg>,
}

#[derive(Debug, Args)]
struct CreateActivityArgs {
    #[arg(long, value_enum)]
    kind: ActivityKindArg,
    #[arg(long)]
    title: String,
    #[arg(long)]
    description: Option<String>,
    #[arg(long, value_enum)]
    status: ActivityStatusArg,
    #[arg(long)]
    activity_type: Option<i64>,
    #[arg(long)]
    author: i64,
    #[arg(long)]
    responsible: Option<i64>,
    #[arg(long)]
    start: Option<String>,
    #[arg(long)]
    end: Option<String>,
    #[arg(long, default_value_t = false)]
    all_day: bool,
    #[arg(long)]
    place: Option<String>,
    #[arg(long)]
    cost: Option<i64>,
    #[arg(long = "topic")]
    topics: Vec<i64>,
    #[arg(long = "case-file")]
    case_files: Vec<i64>,
    #[arg(long = "participant")]
    participants: Vec<i64>,
    #[arg(long = "resource")]
    resources: Vec<i64>,
    #[arg(long, value_enum)]
    pattern: Option<PatternArg>,
    #[arg(long)]
    interval: Option<u32>,
    #[arg(long, value_enum)]
    monthly_mode: Option<MonthlyModeArg>,
    #[arg(long)]
    occurrences: Option<u32>,
    #[arg(long)]
    at: Option<String>,
}

#[derive(Debug, Args)]
struct ActivityIdArgs {
    #[arg(long)]
    id: i64,
}

#[derive(Debug, Args)]
struct UpdateActivityArgs {
    #[arg(long)]
    viewer: i64,
    #[arg(long)]
    id: i64,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long, value_enum)]
    status: Option<ActivityStatusArg>,
    #[arg(long)]
    responsible: Option<i64>,
    #[arg(long)]
    at: Option<String>,
}

#[derive(Debug, Args)]
struct DeleteActivityArgs {
    #[arg(long)]
    viewer: i64,
    #[arg(long)]
    id: i64,
    #[arg(long)]
    at: Option<String>,
}

#[derive(Debug, Args)]
struct ProjectActivityArgs {
    #[arg(long)]
    viewer: i64,
    #[arg(long)]
    id: i64,
    /// Field-selection tree as a JSON object; omit to render every scalar.
    #[arg(long)]
    selection: Option<String>,
    #[arg(long)]
    at: Option<String>,
}

#[derive(Debug, Subcommand)]
enum RecurrenceCommand {
    Preview(PreviewRecurrenceArgs),
}

#[derive(Debug, Args)]
struct PreviewRecurrenceArgs {
    #[arg(long)]
    start: String,
    #[arg(long)]
    end: String,
    #[arg(long, value_enum)]
    pattern: PatternArg,
    #[arg(long, default_value_t = 1)]
    interval: u32,
    #[arg(long, value_enum)]
    monthly_mode: Option<MonthlyModeArg>,
    #[arg(long)]
    occurrences: u32,
}

#[derive(Debug, Subcommand)]
enum ViewCommand {
    Add(AddViewArgs),
    Get(GetViewArgs),
    List,
    Rename(RenameViewArgs),
    Delete(DeleteViewArgs),
    Compose(ComposeViewArgs),
}

#[derive(Debug, Args)]
struct GetViewArgs {
    #[arg(long)]
    view: i64,
}

#[derive(Debug, Args)]
struct RenameViewArgs {
    #[arg(long)]
    view: i64,
    #[arg(long)]
    name: String,
}

#[derive(Debug, Args)]
struct AddViewArgs {
    #[arg(long, value_enum)]
    kind: ActivityKindArg,
    #[arg(long)]
    name: String,
    #[arg(long = "category")]
    categories: Vec<String>,
    #[arg(long)]
    type_filter: Option<i64>,
    #[arg(long = "topic")]
    topics: Vec<i64>,
}

#[derive(Debug, Args)]
struct DeleteViewArgs {
    #[arg(long)]
    view: i64,
}

#[derive(Debug, Args)]
struct ComposeViewArgs {
    #[arg(long)]
    view: i64,
    #[arg(long)]
    viewer: i64,
    #[arg(long)]
    at: Option<String>,
    #[arg(long)]
    activity_type: Option<i64>,
    #[arg(long)]
    case_file: Option<i64>,
    #[arg(long)]
    from: Option<String>,
    #[arg(long)]
    to: Option<String>,
    /// Field-selection tree as a JSON object; omit for ids only.
    #[arg(long)]
    selection: Option<String>,
}

#[derive(Debug, Subcommand)]
enum ReportCommand {
    ParticipantActivities(ParticipantActivitiesArgs),
    CaseFileActivities(CaseFileActivitiesArgs),
    Participant(ParticipantReportArgs),
}

#[derive(Debug, Args)]
struct ParticipantActivitiesArgs {
    #[arg(long)]
    participant: i64,
    #[arg(long, value_enum)]
    kind: Option<ActivityKindArg>,
    /// Field-selection tree as a JSON object; omit for ids only.
    #[arg(long)]
    selection: Option<String>,
}

#[derive(Debug, Args)]
struct CaseFileActivitiesArgs {
    #[arg(long)]
    case_file: i64,
    #[arg(long)]
    viewer: i64,
    #[arg(long, value_enum)]
    kind: Option<ActivityKindArg>,
    #[arg(long)]
    at: Option<String>,
    /// Field-selection tree as a JSON object; omit for ids only.
    #[arg(long)]
    selection: Option<String>,
}

#[derive(Debug, Args)]
struct ParticipantReportArgs {
    #[arg(long)]
    participant: i64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CaseStatusArg {
    Preadmission,
    Admission,
    Present,
    Left,
}

impl CaseStatusArg {
    fn into_core(self) -> CaseStatus {
        match self {
            Self::Preadmission => CaseStatus::Preadmission,
            Self::Admission => CaseStatus::Admission,
            Self::Present => CaseStatus::Present,
            Self::Left => CaseStatus::Left,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OrientationArg {
    Organization,
    Participant,
}

impl OrientationArg {
    fn into_core(self) -> Orientation {
        match self {
            Self::Organization => Orientation::Organization,
            Self::Participant => Orientation::Participant,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ActivityKindArg {
    Event,
    Document,
}

impl ActivityKindArg {
    fn into_core(self) -> ActivityKind {
        match self {
            Self::Event => ActivityKind::Event,
            Self::Document => ActivityKind::Document,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ActivityStatusArg {
    Scheduled,
    InProgress,
    Available,
    Tentative,
    Confirmed,
    Cancelled,
}

impl ActivityStatusArg {
    fn into_core(self) -> ActivityStatus {
        match self {
            Self::Scheduled => ActivityStatus::Scheduled,
            Self::InProgress => ActivityStatus::InProgress,
            Self::Available => ActivityStatus::Available,
            Self::Tentative => ActivityStatus::Tentative,
            Self::Confirmed => ActivityStatus::Confirmed,
            Self::Cancelled => ActivityStatus::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PatternArg {
    Daily,
    Weekly,
    Monthly,
}

impl PatternArg {
    fn into_core(self) -> RecurrencePattern {
        match self {
            Self::Daily => RecurrencePattern::Daily,
            Self::Weekly => RecurrencePattern::Weekly,
            Self::Monthly => RecurrencePattern::Monthly,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MonthlyModeArg {
    ByDayOfMonth,
    ByOrdinalWeekday,
}

impl MonthlyModeArg {
    fn into_core(self) -> MonthlyMode {
        match self {
            Self::ByDayOfMonth => MonthlyMode::ByDayOfMonth,
            Self::ByOrdinalWeekday => MonthlyMode::ByOrdinalWeekday,
        }
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn parse_instant(raw: &str) -> Result<PrimitiveDateTime> {
    Ok(parse_wall_clock(raw)?)
}

fn parse_optional_instant(raw: Option<&str>) -> Result<Option<PrimitiveDateTime>> {
    raw.map(parse_instant).transpose()
}

fn parse_selection(raw: Option<&str>) -> Result<Option<Value>> {
    raw.map(serde_json::from_str::<Value>)
        .transpose()
        .context("selection must be a JSON value")
}

fn topic_ids(raw: &[i64]) -> BTreeSet<TopicId> {
    raw.iter().copied().map(TopicId).collect()
}

fn group_ids(raw: &[i64]) -> Vec<GroupId> {
    raw.iter().copied().map(GroupId).collect()
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let api = CasebookApi::new(cli.db);
    match cli.command {
        Command::Db { command } => run_db(*command, &api),
        Command::Registry { command } => run_registry(*command, &api),
        Command::Group { command } => run_group(*command, &api),
        Command::Status { command } => run_status(*command, &api),
        Command::Auth { command } => run_auth(*command, &api),
        Command::Activity { command } => run_activity(*command, &api),
        Command::Recurrence { command } => run_recurrence(*command, &api),
        Command::View { command } => run_view(*command, &api),
        Command::Report { command } => run_report(*command, &api),
    }
}

fn run_db(command: DbCommand, api: &CasebookApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = api.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::Migrate(args) => {
            let result = api.migrate(args.dry_run)?;
            emit_json(serde_json::to_value(&result).context("failed to serialize migrate result")?)
        }
        DbCommand::Backup(args) => {
            api.backup_database(&args.out)?;
            emit_json(serde_json::json!({
                "backup_path": args.out,
                "status": "ok"
            }))
        }
        DbCommand::Restore(args) => {
            api.restore_database(&args.input)?;
            let status = api.schema_status()?;
            emit_json(serde_json::json!({
                "restored_from": args.input,
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions
            }))
        }
        DbCommand::IntegrityCheck => {
            let report = api.integrity_check()?;
            emit_json(
                serde_json::to_value(&report).context("failed to serialize integrity report")?,
            )
        }
    }
}

fn run_registry(command: RegistryCommand, api: &CasebookApi) -> Result<()> {
    match command {
        RegistryCommand::AddOrganization(args) => {
            let row = api.add_organization(AddOrganizationRequest {
                name: args.name,
                description: args.description,
                internal: args.internal,
            })?;
            emit_json(serde_json::to_value(&row).context("failed to serialize organization")?)
        }
        RegistryCommand::AddTopic(args) => {
            let row = api.add_topic(AddTopicRequest {
                name: args.name,
                description: args.description,
            })?;
            emit_json(serde_json::to_value(&row).context("failed to serialize topic")?)
        }
        RegistryCommand::AddParticipant(args) => {
            let row = api.add_participant(AddParticipantRequest {
                firstname: args.firstname,
                lastname: args.lastname,
            })?;
            emit_json(serde_json::to_value(&row).context("failed to serialize participant")?)
        }
        RegistryCommand::AddResource(args) => {
            let row = api.add_resource(AddResourceRequest {
                name: args.name,
                topics: topic_ids(&args.topics),
            })?;
            emit_json(serde_json::to_value(&row).context("failed to serialize resource")?)
        }
        RegistryCommand::AddCaseFile(args) => {
            let row = api.add_case_file(AddCaseFileRequest {
                firstname: args.firstname,
                lastname: args.lastname,
                birthdate: parse_wall_clock_date(&args.birthdate)?,
            })?;
            emit_json(serde_json::to_value(&row).context("failed to serialize case file")?)
        }
        RegistryCommand::AddUser(args) => {
            let row = api.add_user(AddUserRequest {
                participant: ParticipantId(args.participant),
                usergroup: args.usergroup.map(UserGroupId),
            })?;
            emit_json(serde_json::to_value(&row).context("failed to serialize user")?)
        }
        RegistryCommand::AddUsergroup(args) => {
            let row = api.add_usergroup(AddUserGroupRequest {
                name: args.name,
                status_window: args
                    .status_window
                    .iter()
                    .copied()
                    .map(CaseStatusArg::into_core)
                    .collect(),
                case_file_groups: args.case_file_groups.iter().copied().map(GroupId).collect(),
                participant_groups: args
                    .participant_groups
                    .iter()
                    .copied()
                    .map(GroupId)
                    .collect(),
            })?;
            emit_json(serde_json::to_value(&row).context("failed to serialize usergroup")?)
        }
        RegistryCommand::ListOrganizations => {
            let rows = api.list_organizations()?;
            emit_json(serde_json::json!({ "organizations": rows }))
        }
        RegistryCommand::ListTopics => {
            let rows = api.list_topics()?;
            emit_json(serde_json::json!({ "topics": rows }))
        }
        RegistryCommand::ListParticipants => {
            let rows = api.list_participants()?;
            emit_json(serde_json::json!({ "participants": rows }))
        }
        RegistryCommand::ListResources => {
            let rows = api.list_resources()?;
            emit_json(serde_json::json!({ "resources": rows }))
        }
        RegistryCommand::ListCaseFiles => {
            let rows = api.list_case_files()?;
            emit_json(serde_json::json!({ "case_files": rows }))
        }
        RegistryCommand::ListUsers => {
            let rows = api.list_users()?;
            emit_json(serde_json::json!({ "users": rows }))
        }
        RegistryCommand::ListUsergroups => {
            let rows = api.list_usergroups()?;
            emit_json(serde_json::json!({ "usergroups": rows }))
        }
        RegistryCommand::GetCaseFile(args) => {
            let row = api.get_case_file(CaseFileId(args.case_file))?;
            emit_json(serde_json::to_value(&row).context("failed to serialize case file")?)
        }
        RegistryCommand::GetUser(args) => {
            let row = api.get_user(UserId(args.user))?;
            emit_json(serde_json::to_value(&row).context("failed to serialize user")?)
        }
        RegistryCommand::GetUsergroup(args) => {
            let row = api.get_usergroup(UserGroupId(args.usergroup))?;
            emit_json(serde_json::to_value(&row).context("failed to serialize usergroup")?)
        }
        RegistryCommand::SetUserUsergroup(args) => {
            let row = api.set_user_usergroup(SetUserUserGroupRequest {
                user: UserId(args.user),
                usergroup: args.usergroup.map(UserGroupId),
            })?;
            emit_json(serde_json::to_value(&row).context("failed to serialize user")?)
        }
        RegistryCommand::RenameUsergroup(args) => {
            let row = api.rename_usergroup(RenameUserGroupRequest {
                usergroup: UserGroupId(args.usergroup),
                name: args.name,
            })?;
            emit_json(serde_json::to_value(&row).context("failed to serialize usergroup")?)
        }
        RegistryCommand::DeleteUsergroup(args) => {
            api.delete_usergroup(UserGroupId(args.usergroup))?;
            emit_json(serde_json::json!({ "usergroup": args.usergroup, "deleted": true }))
        }
        RegistryCommand::SetUsergroupStatusWindow(args) => {
            let row = api.set_usergroup_status_window(SetUserGroupStatusWindowRequest {
                usergroup: UserGroupId(args.usergroup),
                status_window: args
                    .status_window
                    .iter()
                    .copied()
                    .map(CaseStatusArg::into_core)
                    .collect(),
            })?;
            emit_json(serde_json::to_value(&row).context("failed to serialize usergroup")?)
        }
        RegistryCommand::SetUsergroupCaseFileGroups(args) => {
            let row = api.set_usergroup_case_file_groups(SetUserGroupCaseFileGroupsRequest {
                usergroup: UserGroupId(args.usergroup),
                groups: args.groups.iter().copied().map(GroupId).collect(),
            })?;
            emit_json(serde_json::to_value(&row).context("failed to serialize usergroup")?)
        }
        RegistryCommand::SetUsergroupParticipantGroups(args) => {
            let row = api.set_usergroup_participant_groups(SetUserGroupParticipantGroupsRequest {
                usergroup: UserGroupId(args.usergroup),
                groups: args.groups.iter().copied().map(GroupId).collect(),
            })?;
            emit_json(serde_json::to_value(&row).context("failed to serialize usergroup")?)
        }
    }
}

fn run_group(command: GroupCommand, api: &CasebookApi) -> Result<()> {
    match command {
        GroupCommand::Add(args) => {
            let row = api.add_group(AddGroupRequest {
                organization: OrganizationId(args.organization),
                name: args.name,
                description: args.description,
                mandatory: args.mandatory,
                orientation: args.orientation.into_core(),
                topics: topic_ids(&args.topics),
            })?;
            emit_json(serde_json::to_value(&row).context("failed to serialize group")?)
        }
        GroupCommand::Get(args) => {
            let row = api.get_group(GroupId(args.group))?;
            emit_json(serde_json::to_value(&row).context("failed to serialize group")?)
        }
        GroupCommand::List(args) => {
            let rows = api.list_groups(args.organization.map(OrganizationId))?;
            emit_json(serde_json::json!({ "groups": rows }))
        }
        GroupCommand::Update(args) => {
            let row = api.update_group(UpdateGroupRequest {
                group: GroupId(args.group),
                name: args.name,
                description: args.description,
            })?;
            emit_json(serde_json::to_value(&row).context("failed to serialize group")?)
        }
        GroupCommand::SetTopics(args) => {
            let row = api.set_group_topics(SetGroupTopicsRequest {
                group: GroupId(args.group),
                topics: topic_ids(&args.topics),
            })?;
            emit_json(serde_json::to_value(&row).context("failed to serialize group")?)
        }
        GroupCommand::SetOrientation(args) => {
            let row = api.set_group_orientation(SetGroupOrientationRequest {
                group: GroupId(args.group),
                orientation: args.orientation.into_core(),
            })?;
            emit_json(serde_json::to_value(&row).context("failed to serialize group")?)
        }
        GroupCommand::SetParticipants(args) => {
            let result = api.assign_group_participants(AssignGroupParticipantsRequest {
                group: GroupId(args.group),
                participants: args.participants.iter().copied().map(ParticipantId).collect(),
            })?;
            emit_json(
                serde_json::to_value(&result).context("failed to serialize assignment result")?,
            )
        }
        GroupCommand::Participants(args) => {
            let result = api.group_participants(GroupId(args.group))?;
            emit_json(
                serde_json::to_value(&result).context("failed to serialize assignment result")?,
            )
        }
        GroupCommand::SetMandatory(args) => {
            let row = api.set_group_mandatory(SetGroupMandatoryRequest {
                group: GroupId(args.group),
                mandatory: args.mandatory,
            })?;
            emit_json(serde_json::to_value(&row).context("failed to serialize group")?)
        }
        GroupCommand::Delete(args) => {
            api.delete_group(GroupId(args.group))?;
            emit_json(serde_json::json!({ "group": args.group, "deleted": true }))
        }
        GroupCommand::CreateExclusiveSet(args) => {
            let row = api.create_exclusive_set(CreateExclusiveSetRequest {
                name: args.name,
                members: group_ids(&args.members),
            })?;
            emit_json(serde_json::to_value(&row).context("failed to serialize exclusive set")?)
        }
        GroupCommand::DissolveExclusiveSet(args) => {
            api.dissolve_exclusive_set(ExclusiveSetId(args.set))?;
            emit_json(serde_json::json!({ "set": args.set, "dissolved": true }))
        }
        GroupCommand::ListExclusiveSets => {
            let rows = api.list_exclusive_sets()?;
            emit_json(serde_json::json!({ "exclusive_sets": rows }))
        }
        GroupCommand::ExclusiveWith(args) => {
            let set = api.exclusive_set_of(GroupId(args.group))?;
            emit_json(serde_json::json!({ "group": args.group, "exclusive_set": set }))
        }
        GroupCommand::AssignCaseFile(args) => {
            let result = api.assign_case_file_groups(AssignCaseFileGroupsRequest {
                case_file: CaseFileId(args.case_file),
                groups: group_ids(&args.groups),
            })?;
            emit_json(
                serde_json::to_value(&result).context("failed to serialize assignment result")?,
            )
        }
        GroupCommand::AssignParticipant(args) => {
            let result = api.assign_participant_groups(AssignParticipantGroupsRequest {
                participant: ParticipantId(args.participant),
                groups: group_ids(&args.groups),
            })?;
            emit_json(
                serde_json::to_value(&result).context("failed to serialize assignment result")?,
            )
        }
    }
}

fn run_status(command: StatusCommand, api: &CasebookApi) -> Result<()> {
    match command {
        StatusCommand::Append(args) => {
            let record = api.append_status(AppendStatusRequest {
                case_file: CaseFileId(args.case_file),
                organization: OrganizationId(args.organization),
                status: args.status.into_core(),
                effective_from: parse_instant(&args.effective_from)?,
            })?;
            emit_json(serde_json::to_value(&record).context("failed to serialize status record")?)
        }
        StatusCommand::Current(args) => {
            let result = api.current_status(CurrentStatusRequest {
                case_file: CaseFileId(args.case_file),
                organization: OrganizationId(args.organization),
                at: parse_optional_instant(args.at.as_deref())?,
            })?;
            emit_json(serde_json::to_value(&result).context("failed to serialize status result")?)
        }
        StatusCommand::History(args) => {
            let records = api
                .status_history(CaseFileId(args.case_file), OrganizationId(args.organization))?;
            emit_json(serde_json::json!({
                "case_file": args.case_file,
                "organization": args.organization,
                "records": records
            }))
        }
    }
}

fn run_auth(command: AuthCommand, api: &CasebookApi) -> Result<()> {
    match command {
        AuthCommand::CaseFiles(args) => {
            let result = api.authorized_case_files_for(AuthorizedCaseFilesRequest {
                viewer: UserId(args.viewer),
                at: parse_optional_instant(args.at.as_deref())?,
            })?;
            emit_json(
                serde_json::to_value(&result).context("failed to serialize authorized set")?,
            )
        }
    }
}

fn run_activity(command: ActivityCommand, api: &CasebookApi) -> Result<()> {
    match command {
        ActivityCommand::AddType(args) => {
            let row = api.add_activity_type(AddActivityTypeRequest {
                kind: args.kind.into_core(),
                category: args.category,
                name: args.name,
                individual: args.individual,
            })?;
            emit_json(serde_json::to_value(&row).context("failed to serialize activity type")?)
        }
        ActivityCommand::ListTypes(args) => {
            let rows = api.list_activity_types(args.kind.map(ActivityKindArg::into_core))?;
            emit_json(serde_json::json!({ "activity_types": rows }))
        }
        ActivityCommand::Create(args) => {
            let request = build_create_request(args)?;
            let result = api.create_activity(request)?;
            emit_json(
                serde_json::to_value(&result).context("failed to serialize creation result")?,
            )
        }
        ActivityCommand::Get(args) => {
            let row = api.get_activity(ActivityId(args.id))?;
            emit_json(serde_json::to_value(&row).context("failed to serialize activity")?)
        }
        ActivityCommand::List => {
            let rows = api.list_activities()?;
            emit_json(serde_json::json!({ "activities": rows }))
        }
        ActivityCommand::Update(args) => {
            let mut activity = api.get_activity(ActivityId(args.id))?;
            if let Some(title) = args.title {
                activity.title = title;
            }
            if let Some(description) = args.description {
                activity.description = Some(description);
            }
            if let Some(status) = args.status {
                activity.status = status.into_core();
            }
            if let Some(responsible) = args.responsible {
                activity.responsible = Some(ParticipantId(responsible));
            }
            let row = api.update_activity(UpdateActivityRequest {
                viewer: UserId(args.viewer),
                activity,
                at: parse_optional_instant(args.at.as_deref())?,
            })?;
            emit_json(serde_json::to_value(&row).context("failed to serialize activity")?)
        }
        ActivityCommand::Delete(args) => {
            api.delete_activity(DeleteActivityRequest {
                viewer: UserId(args.viewer),
                activity: ActivityId(args.id),
                at: parse_optional_instant(args.at.as_deref())?,
            })?;
            emit_json(serde_json::json!({ "activity": args.id, "deleted": true }))
        }
        ActivityCommand::Responsibility(args) => {
            let records = api.responsibility_history(ActivityId(args.id))?;
            emit_json(serde_json::json!({
                "activity": args.id,
                "tenures": records
            }))
        }
        ActivityCommand::Project(args) => {
            let selection = parse_selection(args.selection.as_deref())?;
            let rendered = api.project_activity(ProjectActivityRequest {
                viewer: UserId(args.viewer),
                activity: ActivityId(args.id),
                selection,
                at: parse_optional_instant(args.at.as_deref())?,
            })?;
            emit_json(rendered)
        }
    }
}

fn build_create_request(args: CreateActivityArgs) -> Result<CreateActivityRequest> {
    let schedule = match (args.start.as_deref(), args.end.as_deref()) {
        (Some(start), Some(end)) => Some(EventSchedule {
            start: parse_instant(start)?,
            end: parse_instant(end)?,
            all_day: args.all_day,
            place: args.place,
            cost: args.cost,
        }),
        _ => None,
    };
    let recurrence = args.pattern.map(|pattern| RecurrenceRule {
        pattern: pattern.into_core(),
        interval: args.interval.unwrap_or(1),
        monthly_mode: args.monthly_mode.map(MonthlyModeArg::into_core),
        occurrence_count: args.occurrences.unwrap_or(1),
    });

    Ok(CreateActivityRequest {
        draft: ActivityDraft {
            kind: args.kind.into_core(),
            title: args.title,
            description: args.description,
            status: args.status.into_core(),
            activity_type: args.activity_type.map(ActivityTypeId),
            author: ParticipantId(args.author),
            responsible: args.responsible.map(ParticipantId),
            schedule,
            topics: topic_ids(&args.topics),
            case_files: args.case_files.iter().copied().map(CaseFileId).collect(),
            participants: args.participants.iter().copied().map(ParticipantId).collect(),
            resources: args.resources.iter().copied().map(ResourceId).collect(),
        },
        recurrence,
        at: parse_optional_instant(args.at.as_deref())?,
    })
}

fn run_recurrence(command: RecurrenceCommand, api: &CasebookApi) -> Result<()> {
    match command {
        RecurrenceCommand::Preview(args) => {
            let slots = api.preview_recurrence(PreviewRecurrenceRequest {
                start: parse_instant(&args.start)?,
                end: parse_instant(&args.end)?,
                rule: RecurrenceRule {
                    pattern: args.pattern.into_core(),
                    interval: args.interval,
                    monthly_mode: args.monthly_mode.map(MonthlyModeArg::into_core),
                    occurrence_count: args.occurrences,
                },
            })?;
            emit_json(serde_json::json!({ "slots": slots }))
        }
    }
}

fn run_view(command: ViewCommand, api: &CasebookApi) -> Result<()> {
    match command {
        ViewCommand::Add(args) => {
            let row = api.add_view(AddViewRequest {
                kind: args.kind.into_core(),
                name: args.name,
                categories: args.categories.into_iter().collect(),
                type_filter: args.type_filter.map(ActivityTypeId),
                topics: topic_ids(&args.topics),
            })?;
            emit_json(serde_json::to_value(&row).context("failed to serialize view")?)
        }
        ViewCommand::Get(args) => {
            let row = api.get_view(ViewId(args.view))?;
            emit_json(serde_json::to_value(&row).context("failed to serialize view")?)
        }
        ViewCommand::List => {
            let rows = api.list_views()?;
            emit_json(serde_json::json!({ "views": rows }))
        }
        ViewCommand::Rename(args) => {
            let row = api.rename_view(RenameViewRequest {
                view: ViewId(args.view),
                name: args.name,
            })?;
            emit_json(serde_json::to_value(&row).context("failed to serialize view")?)
        }
        ViewCommand::Delete(args) => {
            api.delete_view(ViewId(args.view))?;
            emit_json(serde_json::json!({ "view": args.view, "deleted": true }))
        }
        ViewCommand::Compose(args) => {
            let result = api.compose_view(ComposeViewRequest {
                view: ViewId(args.view),
                viewer: UserId(args.viewer),
                at: parse_optional_instant(args.at.as_deref())?,
                activity_type: args.activity_type.map(ActivityTypeId),
                case_file: args.case_file.map(CaseFileId),
                from: parse_optional_instant(args.from.as_deref())?,
                to: parse_optional_instant(args.to.as_deref())?,
                selection: parse_selection(args.selection.as_deref())?,
            })?;
            emit_json(
                serde_json::to_value(&result).context("failed to serialize composition result")?,
            )
        }
    }
}

fn run_report(command: ReportCommand, api: &CasebookApi) -> Result<()> {
    match command {
        ReportCommand::ParticipantActivities(args) => {
            let result = api.participant_activities_list(ParticipantActivitiesRequest {
                participant: ParticipantId(args.participant),
                kind: args.kind.map(ActivityKindArg::into_core),
                selection: parse_selection(args.selection.as_deref())?,
            })?;
            emit_json(
                serde_json::to_value(&result).context("failed to serialize activity list")?,
            )
        }
        ReportCommand::CaseFileActivities(args) => {
            let result = api.case_file_activities_list(CaseFileActivitiesRequest {
                case_file: CaseFileId(args.case_file),
                viewer: UserId(args.viewer),
                kind: args.kind.map(ActivityKindArg::into_core),
                at: parse_optional_instant(args.at.as_deref())?,
                selection: parse_selection(args.selection.as_deref())?,
            })?;
            emit_json(
                serde_json::to_value(&result).context("failed to serialize activity list")?,
            )
        }
        ReportCommand::Participant(args) => {
            let result = api.participant_report(ParticipantId(args.participant))?;
            emit_json(serde_json::to_value(&result).context("failed to serialize report")?)
        }
    }
}
