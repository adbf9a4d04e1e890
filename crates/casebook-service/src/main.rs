use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use clap::Parser;
use casebook_api::{
    AddActivityTypeRequest, AddCaseFileRequest, AddGroupRequest, AddOrganizationRequest,
    AddParticipantRequest, AddResourceRequest, AddTopicRequest, AddUserGroupRequest,
    AddUserRequest, AddViewRequest, AppendStatusRequest, AssignCaseFileGroupsRequest,
    AssignParticipantGroupsRequest, AuthorizedCaseFilesRequest, CaseFileActivitiesRequest,
    CasebookApi, ComposeViewRequest, CreateActivityRequest, CreateExclusiveSetRequest,
    CurrentStatusRequest, DeleteActivityRequest, ParticipantActivitiesRequest,
    PreviewRecurrenceRequest, ProjectActivityRequest, SetGroupMandatoryRequest,
    UpdateActivityRequest, API_CONTRACT_VERSION,
};
use casebook_core::{
    ActivityId, ActivityKind, CaseFileId, CoreError, ExclusiveSetId, GroupId, OrganizationId,
    ParticipantId, ViewId,
};
use serde::{Deserialize, Serialize};
use tracing::info;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";

#[derive(Debug, Clone)]
struct ServiceState {
    api: CasebookApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Serialize)]
struct ServiceError {
    service_contract_version: &'static str,
    error: String,
    #[serde(skip)]
    status: StatusCode,
}

#[derive(Debug, Clone, Deserialize)]
struct MigrateRequest {
    dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct GroupListQuery {
    organization: Option<OrganizationId>,
}

#[derive(Debug, Clone, Deserialize)]
struct ActivityTypeListQuery {
    kind: Option<ActivityKind>,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct DeletedResponse {
    deleted: bool,
}

#[derive(Debug, Parser)]
#[command(name = "casebook-service")]
#[command(about = "Local HTTP service for Casebook")]
struct Args {
    #[arg(long, default_value = "./casebook.sqlite3")]
    db: PathBuf,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}

impl ServiceState {
    fn error(err: &anyhow::Error) -> ServiceError {
        let status = match err.downcast_ref::<CoreError>() {
            Some(CoreError::NotAuthorized(_)) => StatusCode::FORBIDDEN,
            Some(CoreError::InvalidReference(_)) => StatusCode::NOT_FOUND,
            Some(CoreError::ConstraintViolation(_)) => StatusCode::CONFLICT,
            Some(CoreError::RecurrenceUnresolvable(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            Some(CoreError::Validation(_)) => StatusCode::BAD_REQUEST,
            None => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ServiceError {
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error: err.to_string(),
            status,
        }
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/db/schema-version", post(db_schema_version))
        .route("/v1/db/migrate", post(db_migrate))
        .route("/v1/registry/organization", post(registry_add_organization))
        .route("/v1/registry/organizations", get(registry_list_organizations))
        .route("/v1/registry/topic", post(registry_add_topic))
        .route("/v1/registry/topics", get(registry_list_topics))
        .route("/v1/registry/participant", post(registry_add_participant))
        .route("/v1/registry/participants", get(registry_list_participants))
        .route("/v1/registry/resource", post(registry_add_resource))
        .route("/v1/registry/resources", get(registry_list_resources))
        .route("/v1/registry/case-file", post(registry_add_case_file))
        .route("/v1/registry/case-files", get(registry_list_case_files))
        .route("/v1/registry/user", post(registry_add_user))
        .route("/v1/registry/users", get(registry_list_users))
        .route("/v1/registry/usergroup", post(registry_add_usergroup))
        .route("/v1/registry/usergroups", get(registry_list_usergroups))
        .route("/v1/group", post(group_add))
        .route("/v1/groups", get(group_list))
        .route("/v1/group/mandatory", post(group_set_mandatory))
        .route("/v1/group/:group_id", delete(group_delete))
        .route("/v1/exclusive-set", post(exclusive_set_create))
        .route("/v1/exclusive-sets", get(exclusive_set_list))
        .route("/v1/exclusive-set/:set_id", delete(exclusive_set_dissolve))
        .route("/v1/assign/case-file-groups", post(assign_case_file_groups))
        .route("/v1/assign/participant-groups", post(assign_participant_groups))
        .route("/v1/status/append", post(status_append))
        .route("/v1/status/current", post(status_current))
        .route("/v1/status/history/:case_file_id/:organization_id", get(status_history))
        .route("/v1/authorization/case-files", post(authorization_case_files))
        .route("/v1/activity-type", post(activity_type_add))
        .route("/v1/activity-types", get(activity_type_list))
        .route("/v1/activity", post(activity_create))
        .route("/v1/activities", get(activity_list))
        .route("/v1/activity/update", post(activity_update))
        .route("/v1/activity/delete", post(activity_delete))
        .route("/v1/activity/project", post(activity_project))
        .route("/v1/activity/:activity_id", get(activity_get))
        .route("/v1/activity/:activity_id/responsibility", get(activity_responsibility))
        .route("/v1/recurrence/preview", post(recurrence_preview))
        .route("/v1/view", post(view_add))
        .route("/v1/views", get(view_list))
        .route("/v1/view/:view_id", delete(view_delete))
        .route("/v1/view/compose", post(view_compose))
        .route("/v1/report/participant-activities", post(report_participant_activities))
        .route("/v1/report/case-file-activities", post(report_case_file_activities))
        .route("/v1/report/participant/:participant_id", get(report_participant))
        .with_state(state)
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let state = ServiceState { api: CasebookApi::new(args.db) };
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    info!(bind = %args.bind, "casebook service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn db_schema_version(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<casebook_store_sqlite::SchemaStatus>>, ServiceError> {
    let status = state.api.schema_status().map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(status)))
}

async fn db_migrate(
    State(state): State<ServiceState>,
    Json(request): Json<MigrateRequest>,
) -> Result<Json<ServiceEnvelope<casebook_api::MigrateResult>>, ServiceError> {
    let result = state.api.migrate(request.dry_run).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(result)))
}

async fn registry_add_organization(
    State(state): State<ServiceState>,
    Json(request): Json<AddOrganizationRequest>,
) -> Result<Json<ServiceEnvelope<casebook_core::Organization>>, ServiceError> {
    let row = state.api.add_organization(request).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(row)))
}

async fn registry_list_organizations(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<Vec<casebook_core::Organization>>>, ServiceError> {
    let rows = state.api.list_organizations().map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(rows)))
}

async fn registry_add_topic(
    State(state): State<ServiceState>,
    Json(request): Json<AddTopicRequest>,
) -> Result<Json<ServiceEnvelope<casebook_core::Topic>>, ServiceError> {
    let row = state.api.add_topic(request).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(row)))
}

async fn registry_list_topics(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<Vec<casebook_core::Topic>>>, ServiceError> {
    let rows = state.api.list_topics().map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(rows)))
}

async fn registry_add_participant(
    State(state): State<ServiceState>,
    Json(request): Json<AddParticipantRequest>,
) -> Result<Json<ServiceEnvelope<casebook_core::Participant>>, ServiceError> {
    let row = state.api.add_participant(request).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(row)))
}

async fn registry_list_participants(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<Vec<casebook_core::Participant>>>, ServiceError> {
    let rows = state.api.list_participants().map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(rows)))
}

async fn registry_add_resource(
    State(state): State<ServiceState>,
    Json(request): Json<AddResourceRequest>,
) -> Result<Json<ServiceEnvelope<casebook_core::Resource>>, ServiceError> {
    let row = state.api.add_resource(request).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(row)))
}

async fn registry_list_resources(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<Vec<casebook_core::Resource>>>, ServiceError> {
    let rows = state.api.list_resources().map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(rows)))
}

async fn registry_add_case_file(
    State(state): State<ServiceState>,
    Json(request): Json<AddCaseFileRequest>,
) -> Result<Json<ServiceEnvelope<casebook_core::CaseFile>>, ServiceError> {
    let row = state.api.add_case_file(request).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(row)))
}

async fn registry_list_case_files(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<Vec<casebook_core::CaseFile>>>, ServiceError> {
    let rows = state.api.list_case_files().map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(rows)))
}

async fn registry_add_user(
    State(state): State<ServiceState>,
    Json(request): Json<AddUserRequest>,
) -> Result<Json<ServiceEnvelope<casebook_core::User>>, ServiceError> {
    let row = state.api.add_user(request).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(row)))
}

async fn registry_list_users(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<Vec<casebook_core::User>>>, ServiceError> {
    let rows = state.api.list_users().map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(rows)))
}

async fn registry_add_usergroup(
    State(state): State<ServiceState>,
    Json(request): Json<AddUserGroupRequest>,
) -> Result<Json<ServiceEnvelope<casebook_core::UserGroup>>, ServiceError> {
    let row = state.api.add_usergroup(request).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(row)))
}

async fn registry_list_usergroups(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<Vec<casebook_core::UserGroup>>>, ServiceError> {
    let rows = state.api.list_usergroups().map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(rows)))
}

async fn group_add(
    State(state): State<ServiceState>,
    Json(request): Json<AddGroupRequest>,
) -> Result<Json<ServiceEnvelope<casebook_core::Group>>, ServiceError> {
    let row = state.api.add_group(request).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(row)))
}

async fn group_list(
    State(state): State<ServiceState>,
    Query(query): Query<GroupListQuery>,
) -> Result<Json<ServiceEnvelope<Vec<casebook_core::Group>>>, ServiceError> {
    let rows =
        state.api.list_groups(query.organization).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(rows)))
}

async fn group_set_mandatory(
    State(state): State<ServiceState>,
    Json(request): Json<SetGroupMandatoryRequest>,
) -> Result<Json<ServiceEnvelope<casebook_core::Group>>, ServiceError> {
    let row = state.api.set_group_mandatory(request).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(row)))
}

async fn group_delete(
    State(state): State<ServiceState>,
    Path(group_id): Path<GroupId>,
) -> Result<Json<ServiceEnvelope<DeletedResponse>>, ServiceError> {
    state.api.delete_group(group_id).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(DeletedResponse { deleted: true })))
}

async fn exclusive_set_create(
    State(state): State<ServiceState>,
    Json(request): Json<CreateExclusiveSetRequest>,
) -> Result<Json<ServiceEnvelope<casebook_core::ExclusiveSet>>, ServiceError> {
    let row = state.api.create_exclusive_set(request).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(row)))
}

async fn exclusive_set_list(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<Vec<casebook_core::ExclusiveSet>>>, ServiceError> {
    let rows = state.api.list_exclusive_sets().map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(rows)))
}

async fn exclusive_set_dissolve(
    State(state): State<ServiceState>,
    Path(set_id): Path<ExclusiveSetId>,
) -> Result<Json<ServiceEnvelope<DeletedResponse>>, ServiceError> {
    state.api.dissolve_exclusive_set(set_id).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(DeletedResponse { deleted: true })))
}

async fn assign_case_file_groups(
    State(state): State<ServiceState>,
    Json(request): Json<AssignCaseFileGroupsRequest>,
) -> Result<Json<ServiceEnvelope<casebook_api::CaseFileGroupsResult>>, ServiceError> {
    let result =
        state.api.assign_case_file_groups(request).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(result)))
}

async fn assign_participant_groups(
    State(state): State<ServiceState>,
    Json(request): Json<AssignParticipantGroupsRequest>,
) -> Result<Json<ServiceEnvelope<casebook_api::ParticipantGroupsResult>>, ServiceError> {
    let result =
        state.api.assign_participant_groups(request).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(result)))
}

async fn status_append(
    State(state): State<ServiceState>,
    Json(request): Json<AppendStatusRequest>,
) -> Result<Json<ServiceEnvelope<casebook_core::StatusRecord>>, ServiceError> {
    let record = state.api.append_status(request).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(record)))
}

async fn status_current(
    State(state): State<ServiceState>,
    Json(request): Json<CurrentStatusRequest>,
) -> Result<Json<ServiceEnvelope<casebook_api::CurrentStatusResult>>, ServiceError> {
    let result = state.api.current_status(request).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(result)))
}

async fn status_history(
    State(state): State<ServiceState>,
    Path((case_file_id, organization_id)): Path<(CaseFileId, OrganizationId)>,
) -> Result<Json<ServiceEnvelope<Vec<casebook_core::StatusRecord>>>, ServiceError> {
    let records = state
        .api
        .status_history(case_file_id, organization_id)
        .map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(records)))
}

async fn authorization_case_files(
    State(state): State<ServiceState>,
    Json(request): Json<AuthorizedCaseFilesRequest>,
) -> Result<Json<ServiceEnvelope<casebook_api::AuthorizedCaseFilesResult>>, ServiceError> {
    let result =
        state.api.authorized_case_files_for(request).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(result)))
}

async fn activity_type_add(
    State(state): State<ServiceState>,
    Json(request): Json<AddActivityTypeRequest>,
) -> Result<Json<ServiceEnvelope<casebook_core::ActivityType>>, ServiceError> {
    let row = state.api.add_activity_type(request).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(row)))
}

async fn activity_type_list(
    State(state): State<ServiceState>,
    Query(query): Query<ActivityTypeListQuery>,
) -> Result<Json<ServiceEnvelope<Vec<casebook_core::ActivityType>>>, ServiceError> {
    let rows =
        state.api.list_activity_types(query.kind).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(rows)))
}

async fn activity_create(
    State(state): State<ServiceState>,
    Json(request): Json<CreateActivityRequest>,
) -> Result<Json<ServiceEnvelope<casebook_api::CreateActivityResult>>, ServiceError> {
    let result = state.api.create_activity(request).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(result)))
}

async fn activity_get(
    State(state): State<ServiceState>,
    Path(activity_id): Path<ActivityId>,
) -> Result<Json<ServiceEnvelope<casebook_core::Activity>>, ServiceError> {
    let row = state.api.get_activity(activity_id).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(row)))
}

async fn activity_list(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<Vec<casebook_core::Activity>>>, ServiceError> {
    let rows = state.api.list_activities().map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(rows)))
}

async fn activity_update(
    State(state): State<ServiceState>,
    Json(request): Json<UpdateActivityRequest>,
) -> Result<Json<ServiceEnvelope<casebook_core::Activity>>, ServiceError> {
    let row = state.api.update_activity(request).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(row)))
}

async fn activity_delete(
    State(state): State<ServiceState>,
    Json(request): Json<DeleteActivityRequest>,
) -> Result<Json<ServiceEnvelope<DeletedResponse>>, ServiceError> {
    state.api.delete_activity(request).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(DeletedResponse { deleted: true })))
}

async fn activity_project(
    State(state): State<ServiceState>,
    Json(request): Json<ProjectActivityRequest>,
) -> Result<Json<ServiceEnvelope<serde_json::Value>>, ServiceError> {
    let rendered = state.api.project_activity(request).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(rendered)))
}

async fn activity_responsibility(
    State(state): State<ServiceState>,
    Path(activity_id): Path<ActivityId>,
) -> Result<Json<ServiceEnvelope<Vec<casebook_core::TenureRecord>>>, ServiceError> {
    let records =
        state.api.responsibility_history(activity_id).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(records)))
}

async fn recurrence_preview(
    State(state): State<ServiceState>,
    Json(request): Json<PreviewRecurrenceRequest>,
) -> Result<Json<ServiceEnvelope<Vec<casebook_core::TimeSlot>>>, ServiceError> {
    let slots = state.api.preview_recurrence(request).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(slots)))
}

async fn view_add(
    State(state): State<ServiceState>,
    Json(request): Json<AddViewRequest>,
) -> Result<Json<ServiceEnvelope<casebook_core::View>>, ServiceError> {
    let row = state.api.add_view(request).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(row)))
}

async fn view_list(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<Vec<casebook_core::View>>>, ServiceError> {
    let rows = state.api.list_views().map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(rows)))
}

async fn view_delete(
    State(state): State<ServiceState>,
    Path(view_id): Path<ViewId>,
) -> Result<Json<ServiceEnvelope<DeletedResponse>>, ServiceError> {
    state.api.delete_view(view_id).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(DeletedResponse { deleted: true })))
}

async fn view_compose(
    State(state): State<ServiceState>,
    Json(request): Json<ComposeViewRequest>,
) -> Result<Json<ServiceEnvelope<casebook_api::ComposeViewResult>>, ServiceError> {
    let result = state.api.compose_view(request).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(result)))
}

async fn report_participant_activities(
    State(state): State<ServiceState>,
    Json(request): Json<ParticipantActivitiesRequest>,
) -> Result<Json<ServiceEnvelope<casebook_api::ParticipantActivitiesResult>>, ServiceError> {
    let result =
        state.api.participant_activities_list(request).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(result)))
}

async fn report_case_file_activities(
    State(state): State<ServiceState>,
    Json(request): Json<CaseFileActivitiesRequest>,
) -> Result<Json<ServiceEnvelope<casebook_api::CaseFileActivitiesResult>>, ServiceError> {
    let result =
        state.api.case_file_activities_list(request).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(result)))
}

async fn report_participant(
    State(state): State<ServiceState>,
    Path(participant_id): Path<ParticipantId>,
) -> Result<Json<ServiceEnvelope<casebook_api::ParticipantReportResult>>, ServiceError> {
    let result =
        state.api.participant_report(participant_id).map_err(|err| ServiceState::error(&err))?;
    Ok(Json(envelope(result)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use axum::body::to_bytes;
    use http::Request;
    use tower::ServiceExt;

    static DB_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn unique_temp_db_path() -> PathBuf {
        let n = DB_COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir()
            .join(format!("casebook-service-{}-{n}.sqlite3", std::process::id()))
    }

    async fn response_json(response: Response) -> serde_json::Value {
        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        let body = match String::from_utf8(bytes.to_vec()) {
            Ok(body) => body,
            Err(err) => panic!("response body is not UTF-8: {err}"),
        };
        match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(err) => panic!("response body is not JSON: {err}; body={body}"),
        }
    }

    async fn get_request(router: Router, uri: &str) -> Response {
        match router
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .method("GET")
                    .body(axum::body::Body::empty())
                    .unwrap_or_else(|err| panic!("failed to build request: {err}")),
            )
            .await
        {
            Ok(response) => response,
            Err(err) => panic!("router request failed: {err}"),
        }
    }

    async fn post_request(router: Router, uri: &str, payload: &serde_json::Value) -> Response {
        match router
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .method("POST")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(payload.to_string()))
                    .unwrap_or_else(|err| panic!("failed to build request: {err}")),
            )
            .await
        {
            Ok(response) => response,
            Err(err) => panic!("router request failed: {err}"),
        }
    }

    fn data_i64(value: &serde_json::Value, key: &str) -> i64 {
        value
            .get("data")
            .and_then(|data| data.get(key))
            .and_then(serde_json::Value::as_i64)
            .unwrap_or_else(|| panic!("missing data.{key} in response: {value}"))
    }

    // Test IDs: TSVC-001
    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let state = ServiceState { api: CasebookApi::new(unique_temp_db_path()) };
        let router = app(state);

        let response = get_request(router, "/v1/health").await;
        assert_eq!(response.status(), StatusCode::OK);

        let value = response_json(response).await;
        assert_eq!(
            value.get("service_contract_version").and_then(serde_json::Value::as_str),
            Some(SERVICE_CONTRACT_VERSION)
        );
        assert_eq!(
            value.get("api_contract_version").and_then(serde_json::Value::as_str),
            Some(API_CONTRACT_VERSION)
        );
    }

    // Test IDs: TSVC-002
    #[tokio::test]
    async fn status_append_and_current_round_trip() {
        let db_path = unique_temp_db_path();
        let state = ServiceState { api: CasebookApi::new(db_path.clone()) };
        let router = app(state);

        let org_response = post_request(
            router.clone(),
            "/v1/registry/organization",
            &serde_json::json!({ "name": "Haus Nord", "internal": true }),
        )
        .await;
        assert_eq!(org_response.status(), StatusCode::OK);
        let org_id = data_i64(&response_json(org_response).await, "id");

        let case_response = post_request(
            router.clone(),
            "/v1/registry/case-file",
            &serde_json::json!({
                "firstname": "Jona",
                "lastname": "Berg",
                "birthdate": "04/11/2009"
            }),
        )
        .await;
        assert_eq!(case_response.status(), StatusCode::OK);
        let case_id = data_i64(&response_json(case_response).await, "id");

        let append_response = post_request(
            router.clone(),
            "/v1/status/append",
            &serde_json::json!({
                "case_file": case_id,
                "organization": org_id,
                "status": "present",
                "effective_from": "01/03/2024 08:00:00"
            }),
        )
        .await;
        assert_eq!(append_response.status(), StatusCode::OK);

        let current_response = post_request(
            router.clone(),
            "/v1/status/current",
            &serde_json::json!({
                "case_file": case_id,
                "organization": org_id,
                "at": "15/03/2024 12:00:00"
            }),
        )
        .await;
        assert_eq!(current_response.status(), StatusCode::OK);
        let current = response_json(current_response).await;
        assert_eq!(
            current
                .get("data")
                .and_then(|data| data.get("status"))
                .and_then(serde_json::Value::as_str),
            Some("present")
        );

        let history_response =
            get_request(router, &format!("/v1/status/history/{case_id}/{org_id}")).await;
        assert_eq!(history_response.status(), StatusCode::OK);
        let history = response_json(history_response).await;
        assert_eq!(
            history
                .get("data")
                .and_then(serde_json::Value::as_array)
                .map(std::vec::Vec::len),
            Some(1)
        );

        let _ = std::fs::remove_file(&db_path);
    }

    // Test IDs: TSVC-003
    #[tokio::test]
    async fn recurrence_preview_expands_weekly_slots() {
        let db_path = unique_temp_db_path();
        let state = ServiceState { api: CasebookApi::new(db_path.clone()) };
        let router = app(state);

        let response = post_request(
            router,
            "/v1/recurrence/preview",
            &serde_json::json!({
                "start": "06/05/2024 09:00:00",
                "end": "06/05/2024 10:30:00",
                "rule": {
                    "pattern": "weekly",
                    "interval": 1,
                    "monthly_mode": null,
                    "occurrence_count": 3
                }
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let value = response_json(response).await;
        let slots = value
            .get("data")
            .and_then(serde_json::Value::as_array)
            .unwrap_or_else(|| panic!("data should be an array: {value}"));
        assert_eq!(slots.len(), 3);
        assert_eq!(
            slots[2].get("start").and_then(serde_json::Value::as_str),
            Some("20/05/2024 09:00:00")
        );

        let _ = std::fs::remove_file(&db_path);
    }

    // Test IDs: TSVC-004
    #[tokio::test]
    async fn missing_reference_maps_to_not_found() {
        let db_path = unique_temp_db_path();
        let state = ServiceState { api: CasebookApi::new(db_path.clone()) };
        let router = app(state);

        let migrate_response =
            post_request(router.clone(), "/v1/db/migrate", &serde_json::json!({ "dry_run": false }))
                .await;
        assert_eq!(migrate_response.status(), StatusCode::OK);

        let response = get_request(router, "/v1/activity/9001").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let value = response_json(response).await;
        assert!(value
            .get("error")
            .and_then(serde_json::Value::as_str)
            .is_some_and(|message| message.contains("does not exist")));

        let _ = std::fs::remove_file(&db_path);
    }

    // Test IDs: TSVC-005
    #[tokio::test]
    async fn authorization_failure_maps_to_forbidden() {
        let db_path = unique_temp_db_path();
        let state = ServiceState { api: CasebookApi::new(db_path.clone()) };
        let router = app(state);

        let participant_response = post_request(
            router.clone(),
            "/v1/registry/participant",
            &serde_json::json!({ "firstname": "Mara", "lastname": "Stein" }),
        )
        .await;
        assert_eq!(participant_response.status(), StatusCode::OK);
        let participant_id = data_i64(&response_json(participant_response).await, "id");

        let user_response = post_request(
            router.clone(),
            "/v1/registry/user",
            &serde_json::json!({ "participant": participant_id, "usergroup": null }),
        )
        .await;
        assert_eq!(user_response.status(), StatusCode::OK);
        let user_id = data_i64(&response_json(user_response).await, "id");

        let create_response = post_request(
            router.clone(),
            "/v1/activity",
            &serde_json::json!({
                "draft": {
                    "kind": "document",
                    "title": "Intake note",
                    "description": null,
                    "status": "available",
                    "activity_type": null,
                    "author": participant_id,
                    "responsible": null,
                    "schedule": null
                },
                "recurrence": null,
                "at": "01/02/2024 09:00:00"
            }),
        )
        .await;
        assert_eq!(create_response.status(), StatusCode::OK);
        let created = response_json(create_response).await;
        let activity_id = created
            .get("data")
            .and_then(|data| data.get("activity_ids"))
            .and_then(|ids| ids.get(0))
            .and_then(serde_json::Value::as_i64)
            .unwrap_or_else(|| panic!("missing data.activity_ids[0]: {created}"));

        // A second user who is neither author nor responsible may not delete.
        let other_participant = post_request(
            router.clone(),
            "/v1/registry/participant",
            &serde_json::json!({ "firstname": "Ole", "lastname": "Brandt" }),
        )
        .await;
        let other_participant_id = data_i64(&response_json(other_participant).await, "id");
        let other_user = post_request(
            router.clone(),
            "/v1/registry/user",
            &serde_json::json!({ "participant": other_participant_id, "usergroup": null }),
        )
        .await;
        let other_user_id = data_i64(&response_json(other_user).await, "id");

        let denied = post_request(
            router.clone(),
            "/v1/activity/delete",
            &serde_json::json!({
                "viewer": other_user_id,
                "activity": activity_id,
                "at": "02/02/2024 09:00:00"
            }),
        )
        .await;
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);

        let allowed = post_request(
            router,
            "/v1/activity/delete",
            &serde_json::json!({
                "viewer": user_id,
                "activity": activity_id,
                "at": "02/02/2024 09:00:00"
            }),
        )
        .await;
        assert_eq!(allowed.status(), StatusCode::OK);

        let _ = std::fs::remove_file(&db_path);
    }
}
