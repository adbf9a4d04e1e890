use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use jsonschema::JSONSchema;
use serde_json::Value;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|err| panic!("clock should be >= UNIX_EPOCH: {err}"))
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{}-{now}", std::process::id()));
    fs::create_dir_all(&dir)
        .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", dir.display()));
    dir
}

fn run_cb<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_cb"))
        .args(args)
        .output()
        .unwrap_or_else(|err| panic!("failed to execute cb binary: {err}"))
}

fn run_json<I, S>(args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_cb(args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "cb command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn run_failure<I, S>(args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_cb(args);
    assert!(
        !output.status.success(),
        "cb command should have failed but succeeded:\nstdout:\n{}",
        String::from_utf8_lossy(&output.stdout)
    );
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn as_i64(value: &Value, key: &str) -> i64 {
    value
        .get(key)
        .and_then(Value::as_i64)
        .unwrap_or_else(|| panic!("missing integer field `{key}` in payload: {value}"))
}

fn as_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing string field `{key}` in payload: {value}"))
}

fn as_array<'a>(value: &'a Value, key: &str) -> &'a Vec<Value> {
    value
        .get(key)
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("missing array field `{key}` in payload: {value}"))
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn repo_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .unwrap_or_else(|err| panic!("failed to canonicalize repo root: {err}"))
}

fn read_json_file(path: &Path) -> Value {
    let body = fs::read_to_string(path)
        .unwrap_or_else(|err| panic!("failed to read JSON file {}: {err}", path.display()));
    serde_json::from_str(&body)
        .unwrap_or_else(|err| panic!("failed to parse JSON file {}: {err}", path.display()))
}

fn validate_schema(schema_file: &str, instance: &Value) {
    let schema_path = repo_root().join("contracts/v1/schemas").join(schema_file);
    let schema_json = read_json_file(&schema_path);
    let compiled = JSONSchema::compile(&schema_json)
        .unwrap_or_else(|err| panic!("failed to compile schema {}: {err}", schema_path.display()));

    let errors = compiled
        .validate(instance)
        .err()
        .map(|iter| iter.map(|err| err.to_string()).collect::<Vec<_>>());
    if let Some(errors) = errors {
        panic!("schema validation failed for {}:\n{}", schema_file, errors.join("\n"));
    }
}

fn assert_golden_matches(fixture_name: &str, actual: &Value) {
    let fixture_path = repo_root().join("contracts/v1/fixtures").join(fixture_name);
    let expected = read_json_file(&fixture_path);
    assert_eq!(actual, &expected);
}

// Test IDs: TCLI-001
#[test]
fn db_commands_cover_schema_migrate_backup_restore_integrity() {
    let sandbox = unique_temp_dir("casebook-cli-db");
    let db_a = sandbox.join("a.sqlite3");
    let db_b = sandbox.join("b.sqlite3");
    let backup_file = sandbox.join("backup.sqlite3");

    let schema_before = run_json(["--db", path_str(&db_a), "db", "schema-version"]);
    validate_schema("schema_version.json", &schema_before);
    assert_eq!(as_i64(&schema_before, "current_version"), 0);
    assert_eq!(schema_before.get("up_to_date"), Some(&Value::Bool(false)));

    let dry_run = run_json(["--db", path_str(&db_a), "db", "migrate", "--dry-run"]);
    validate_schema("migrate.json", &dry_run);
    assert_eq!(as_i64(&dry_run, "current_version"), 0);
    assert_eq!(as_array(&dry_run, "would_apply_versions").len(), 1);
    assert_eq!(dry_run.get("after_version"), Some(&Value::Null));

    let schema_after_dry_run = run_json(["--db", path_str(&db_a), "db", "schema-version"]);
    assert_eq!(as_i64(&schema_after_dry_run, "current_version"), 0);

    let migrate = run_json(["--db", path_str(&db_a), "db", "migrate"]);
    validate_schema("migrate.json", &migrate);
    assert_eq!(as_i64(&migrate, "after_version"), 1);
    assert_eq!(migrate.get("up_to_date"), Some(&Value::Bool(true)));

    let integrity = run_json(["--db", path_str(&db_a), "db", "integrity-check"]);
    assert_eq!(integrity.get("quick_check_ok"), Some(&Value::Bool(true)));

    let backup =
        run_json(["--db", path_str(&db_a), "db", "backup", "--out", path_str(&backup_file)]);
    assert_eq!(as_str(&backup, "status"), "ok");
    assert!(backup_file.exists());

    let restore =
        run_json(["--db", path_str(&db_b), "db", "restore", "--in", path_str(&backup_file)]);
    assert_eq!(as_i64(&restore, "current_version"), 1);

    let _ = fs::remove_dir_all(&sandbox);
}

// Test IDs: TCLI-002
#[test]
fn status_trail_appends_and_resolves_probes() {
    let sandbox = unique_temp_dir("casebook-cli-status");
    let db = sandbox.join("status.sqlite3");

    let organization = run_json([
        "--db",
        path_str(&db),
        "registry",
        "add-organization",
        "--name",
        "Haus Nord",
        "--internal",
    ]);
    let organization_id = as_i64(&organization, "id").to_string();

    let case_file = run_json([
        "--db",
        path_str(&db),
        "registry",
        "add-case-file",
        "--firstname",
        "Jona",
        "--lastname",
        "Berg",
        "--birthdate",
        "04/11/2009",
    ]);
    let case_file_id = as_i64(&case_file, "id").to_string();

    let _present = run_json([
        "--db",
        path_str(&db),
        "status",
        "append",
        "--case-file",
        &case_file_id,
        "--organization",
        &organization_id,
        "--status",
        "present",
        "--effective-from",
        "01/03/2024 08:00:00",
    ]);
    let _left = run_json([
        "--db",
        path_str(&db),
        "status",
        "append",
        "--case-file",
        &case_file_id,
        "--organization",
        &organization_id,
        "--status",
        "left",
        "--effective-from",
        "01/06/2024 09:00:00",
    ]);

    let mid_probe = run_json([
        "--db",
        path_str(&db),
        "status",
        "current",
        "--case-file",
        &case_file_id,
        "--organization",
        &organization_id,
        "--at",
        "15/03/2024 12:00:00",
    ]);
    validate_schema("status_current.json", &mid_probe);
    assert_eq!(as_str(&mid_probe, "status"), "present");

    let late_probe = run_json([
        "--db",
        path_str(&db),
        "status",
        "current",
        "--case-file",
        &case_file_id,
        "--organization",
        &organization_id,
        "--at",
        "02/06/2024 12:00:00",
    ]);
    assert_eq!(as_str(&late_probe, "status"), "left");

    let history = run_json([
        "--db",
        path_str(&db),
        "status",
        "history",
        "--case-file",
        &case_file_id,
        "--organization",
        &organization_id,
    ]);
    assert_eq!(as_array(&history, "records").len(), 2);

    let _ = fs::remove_dir_all(&sandbox);
}

// Test IDs: TCLI-003
#[test]
fn recurrence_preview_matches_golden_and_rejects_missing_ordinal() {
    let sandbox = unique_temp_dir("casebook-cli-recurrence");
    let db = sandbox.join("recurrence.sqlite3");

    let preview = run_json([
        "--db",
        path_str(&db),
        "recurrence",
        "preview",
        "--start",
        "06/05/2024 09:00:00",
        "--end",
        "06/05/2024 10:30:00",
        "--pattern",
        "weekly",
        "--occurrences",
        "3",
    ]);
    validate_schema("recurrence_preview.json", &preview);
    assert_golden_matches("recurrence_preview_weekly.json", &preview);

    // 29/01/2024 is the fifth Monday of its month; February has no fifth
    // Monday, so the expansion fails as a whole.
    let stderr = run_failure([
        "--db",
        path_str(&db),
        "recurrence",
        "preview",
        "--start",
        "29/01/2024 18:00:00",
        "--end",
        "29/01/2024 19:00:00",
        "--pattern",
        "monthly",
        "--monthly-mode",
        "by-ordinal-weekday",
        "--occurrences",
        "2",
    ]);
    assert!(
        stderr.contains("recurrence unresolvable"),
        "expected unresolvable recurrence error, got:\n{stderr}"
    );

    let _ = fs::remove_dir_all(&sandbox);
}

// Test IDs: TCLI-004
#[allow(clippy::too_many_lines)]
#[test]
fn activity_lifecycle_enforces_authorization_and_tracks_tenures() {
    let sandbox = unique_temp_dir("casebook-cli-activity");
    let db = sandbox.join("activity.sqlite3");

    let author = run_json([
        "--db",
        path_str(&db),
        "registry",
        "add-participant",
        "--firstname",
        "Mara",
        "--lastname",
        "Stein",
    ]);
    let author_id = as_i64(&author, "id").to_string();
    let author_user = run_json([
        "--db",
        path_str(&db),
        "registry",
        "add-user",
        "--participant",
        &author_id,
    ]);
    let author_user_id = as_i64(&author_user, "id").to_string();

    let outsider = run_json([
        "--db",
        path_str(&db),
        "registry",
        "add-participant",
        "--firstname",
        "Ole",
        "--lastname",
        "Brandt",
    ]);
    let outsider_id = as_i64(&outsider, "id").to_string();
    let outsider_user = run_json([
        "--db",
        path_str(&db),
        "registry",
        "add-user",
        "--participant",
        &outsider_id,
    ]);
    let outsider_user_id = as_i64(&outsider_user, "id").to_string();

    let created = run_json([
        "--db",
        path_str(&db),
        "activity",
        "create",
        "--kind",
        "event",
        "--title",
        "Team meeting",
        "--status",
        "scheduled",
        "--author",
        &author_id,
        "--responsible",
        &author_id,
        "--start",
        "10/03/2024 10:00:00",
        "--end",
        "10/03/2024 11:00:00",
        "--at",
        "01/03/2024 09:00:00",
    ]);
    let activity_ids = as_array(&created, "activity_ids");
    assert_eq!(activity_ids.len(), 1);
    let activity_id = activity_ids[0]
        .as_i64()
        .unwrap_or_else(|| panic!("activity id should be an integer: {created}"))
        .to_string();

    let stderr = run_failure([
        "--db",
        path_str(&db),
        "activity",
        "update",
        "--viewer",
        &outsider_user_id,
        "--id",
        &activity_id,
        "--title",
        "Hijacked",
    ]);
    assert!(
        stderr.contains("not authorized"),
        "expected authorization error, got:\n{stderr}"
    );

    let updated = run_json([
        "--db",
        path_str(&db),
        "activity",
        "update",
        "--viewer",
        &author_user_id,
        "--id",
        &activity_id,
        "--title",
        "Team meeting (moved)",
        "--responsible",
        &outsider_id,
        "--at",
        "05/03/2024 09:00:00",
    ]);
    assert_eq!(as_str(&updated, "title"), "Team meeting (moved)");
    assert_eq!(as_i64(&updated, "responsible"), as_i64(&outsider, "id"));

    let trail = run_json([
        "--db",
        path_str(&db),
        "activity",
        "responsibility",
        "--id",
        &activity_id,
    ]);
    let tenures = as_array(&trail, "tenures");
    assert_eq!(tenures.len(), 2);
    assert_eq!(as_str(&tenures[0], "achieved_at"), "05/03/2024 09:00:00");
    assert_eq!(as_i64(&tenures[1], "responsible"), as_i64(&outsider, "id"));
    assert_eq!(tenures[1].get("achieved_at"), Some(&Value::Null));

    let projected = run_json([
        "--db",
        path_str(&db),
        "activity",
        "project",
        "--viewer",
        &author_user_id,
        "--id",
        &activity_id,
        "--selection",
        r#"{"title": true, "author": {"firstname": true}}"#,
    ]);
    assert_eq!(as_str(&projected, "title"), "Team meeting (moved)");
    assert_eq!(
        projected.get("author").and_then(|author| author.get("firstname")),
        Some(&Value::String("Mara".to_string()))
    );

    let stderr = run_failure([
        "--db",
        path_str(&db),
        "activity",
        "delete",
        "--viewer",
        &outsider_user_id,
        "--id",
        &activity_id,
    ]);
    assert!(
        stderr.contains("not authorized"),
        "expected authorization error, got:\n{stderr}"
    );

    let deleted = run_json([
        "--db",
        path_str(&db),
        "activity",
        "delete",
        "--viewer",
        &author_user_id,
        "--id",
        &activity_id,
    ]);
    assert_eq!(deleted.get("deleted"), Some(&Value::Bool(true)));

    let _ = fs::remove_dir_all(&sandbox);
}

// Test IDs: TCLI-005
#[test]
fn exclusive_sets_reject_mandatory_members_both_ways() {
    let sandbox = unique_temp_dir("casebook-cli-groups");
    let db = sandbox.join("groups.sqlite3");

    let organization = run_json([
        "--db",
        path_str(&db),
        "registry",
        "add-organization",
        "--name",
        "Haus Nord",
    ]);
    let organization_id = as_i64(&organization, "id").to_string();

    let add_group = |name: &str, mandatory: bool| -> String {
        let mut args = vec![
            "--db".to_string(),
            path_str(&db).to_string(),
            "group".to_string(),
            "add".to_string(),
            "--organization".to_string(),
            organization_id.clone(),
            "--name".to_string(),
            name.to_string(),
            "--orientation".to_string(),
            "organization".to_string(),
        ];
        if mandatory {
            args.push("--mandatory".to_string());
        }
        as_i64(&run_json(args), "id").to_string()
    };

    let mandatory_group = add_group("House rules", true);
    let morning_group = add_group("Morning shift", false);
    let evening_group = add_group("Evening shift", false);

    let stderr = run_failure([
        "--db",
        path_str(&db),
        "group",
        "create-exclusive-set",
        "--name",
        "Shifts",
        "--member",
        &mandatory_group,
        "--member",
        &morning_group,
    ]);
    assert!(
        stderr.contains("constraint violation"),
        "expected constraint violation, got:\n{stderr}"
    );

    let set = run_json([
        "--db",
        path_str(&db),
        "group",
        "create-exclusive-set",
        "--name",
        "Shifts",
        "--member",
        &morning_group,
        "--member",
        &evening_group,
    ]);
    let set_id = as_i64(&set, "id").to_string();

    let stderr = run_failure([
        "--db",
        path_str(&db),
        "group",
        "set-mandatory",
        "--group",
        &morning_group,
        "--mandatory",
    ]);
    assert!(
        stderr.contains("cannot be mandatory"),
        "expected mandatory rejection, got:\n{stderr}"
    );

    let stderr =
        run_failure(["--db", path_str(&db), "group", "delete", "--group", &morning_group]);
    assert!(
        stderr.contains("dissolve the set first"),
        "expected delete rejection, got:\n{stderr}"
    );

    let dissolved = run_json([
        "--db",
        path_str(&db),
        "group",
        "dissolve-exclusive-set",
        "--set",
        &set_id,
    ]);
    assert_eq!(dissolved.get("dissolved"), Some(&Value::Bool(true)));

    let deleted =
        run_json(["--db", path_str(&db), "group", "delete", "--group", &morning_group]);
    assert_eq!(deleted.get("deleted"), Some(&Value::Bool(true)));

    let _ = fs::remove_dir_all(&sandbox);
}

// Test IDs: TCLI-006
#[allow(clippy::too_many_lines)]
#[test]
fn view_compose_gates_on_status_window_authorization() {
    let sandbox = unique_temp_dir("casebook-cli-views");
    let db = sandbox.join("views.sqlite3");

    let organization = run_json([
        "--db",
        path_str(&db),
        "registry",
        "add-organization",
        "--name",
        "Haus Nord",
    ]);
    let organization_id = as_i64(&organization, "id").to_string();

    let case_file = run_json([
        "--db",
        path_str(&db),
        "registry",
        "add-case-file",
        "--firstname",
        "Jona",
        "--lastname",
        "Berg",
        "--birthdate",
        "04/11/2009",
    ]);
    let case_file_id = as_i64(&case_file, "id").to_string();

    let group = run_json([
        "--db",
        path_str(&db),
        "group",
        "add",
        "--organization",
        &organization_id,
        "--name",
        "Residents",
        "--orientation",
        "organization",
    ]);
    let group_id = as_i64(&group, "id").to_string();

    let _assignment = run_json([
        "--db",
        path_str(&db),
        "group",
        "assign-case-file",
        "--case-file",
        &case_file_id,
        "--group",
        &group_id,
    ]);

    let usergroup = run_json([
        "--db",
        path_str(&db),
        "registry",
        "add-usergroup",
        "--name",
        "Care team",
        "--status",
        "present",
        "--case-file-group",
        &group_id,
    ]);
    let usergroup_id = as_i64(&usergroup, "id").to_string();

    let staff = run_json([
        "--db",
        path_str(&db),
        "registry",
        "add-participant",
        "--firstname",
        "Mara",
        "--lastname",
        "Stein",
    ]);
    let staff_id = as_i64(&staff, "id").to_string();
    let staff_user = run_json([
        "--db",
        path_str(&db),
        "registry",
        "add-user",
        "--participant",
        &staff_id,
        "--usergroup",
        &usergroup_id,
    ]);
    let staff_user_id = as_i64(&staff_user, "id").to_string();

    let _status = run_json([
        "--db",
        path_str(&db),
        "status",
        "append",
        "--case-file",
        &case_file_id,
        "--organization",
        &organization_id,
        "--status",
        "present",
        "--effective-from",
        "01/03/2024 08:00:00",
    ]);

    let created = run_json([
        "--db",
        path_str(&db),
        "activity",
        "create",
        "--kind",
        "event",
        "--title",
        "Weekly round",
        "--status",
        "scheduled",
        "--author",
        &staff_id,
        "--start",
        "10/03/2024 10:00:00",
        "--end",
        "10/03/2024 11:00:00",
        "--case-file",
        &case_file_id,
        "--at",
        "02/03/2024 09:00:00",
    ]);
    let activity_id = as_array(&created, "activity_ids")[0]
        .as_i64()
        .unwrap_or_else(|| panic!("activity id should be an integer: {created}"));

    let authorized = run_json([
        "--db",
        path_str(&db),
        "auth",
        "case-files",
        "--viewer",
        &staff_user_id,
        "--at",
        "15/03/2024 12:00:00",
    ]);
    assert_eq!(as_array(&authorized, "case_files"), &[Value::from(as_i64(&case_file, "id"))]);

    let view = run_json([
        "--db",
        path_str(&db),
        "view",
        "add",
        "--kind",
        "event",
        "--name",
        "Calendar",
    ]);
    let view_id = as_i64(&view, "id").to_string();

    let composed = run_json([
        "--db",
        path_str(&db),
        "view",
        "compose",
        "--view",
        &view_id,
        "--viewer",
        &staff_user_id,
        "--at",
        "15/03/2024 12:00:00",
    ]);
    validate_schema("compose_view.json", &composed);
    assert_eq!(as_array(&composed, "activity_ids"), &[Value::from(activity_id)]);

    // Before the status record takes effect the viewer reaches nothing.
    let earlier = run_json([
        "--db",
        path_str(&db),
        "view",
        "compose",
        "--view",
        &view_id,
        "--viewer",
        &staff_user_id,
        "--at",
        "01/01/2024 12:00:00",
    ]);
    assert!(as_array(&earlier, "activity_ids").is_empty());

    let _ = fs::remove_dir_all(&sandbox);
}

// Test IDs: TCLI-007
#[test]
fn registry_mutators_replace_links_and_respect_internal_gating() {
    let sandbox = unique_temp_dir("casebook-cli-registry");
    let db = sandbox.join("registry.sqlite3");

    let internal_org = run_json([
        "--db",
        path_str(&db),
        "registry",
        "add-organization",
        "--name",
        "Haus Nord",
        "--internal",
    ]);
    let internal_org_id = as_i64(&internal_org, "id").to_string();
    let partner_org = run_json([
        "--db",
        path_str(&db),
        "registry",
        "add-organization",
        "--name",
        "Partner Clinic",
    ]);
    let partner_org_id = as_i64(&partner_org, "id").to_string();

    let topic = run_json([
        "--db",
        path_str(&db),
        "registry",
        "add-topic",
        "--name",
        "Mobility",
    ]);
    let topic_id = as_i64(&topic, "id").to_string();

    let group = run_json([
        "--db",
        path_str(&db),
        "group",
        "add",
        "--organization",
        &internal_org_id,
        "--name",
        "North wing",
        "--orientation",
        "organization",
    ]);
    let group_id = as_i64(&group, "id").to_string();
    let external_group = run_json([
        "--db",
        path_str(&db),
        "group",
        "add",
        "--organization",
        &partner_org_id,
        "--name",
        "Outreach",
        "--orientation",
        "participant",
    ]);
    let external_group_id = as_i64(&external_group, "id").to_string();

    // A colliding rename inside one organization is refused.
    let twin = run_json([
        "--db",
        path_str(&db),
        "group",
        "add",
        "--organization",
        &internal_org_id,
        "--name",
        "South wing",
        "--orientation",
        "organization",
    ]);
    let twin_id = as_i64(&twin, "id").to_string();
    let stderr = run_failure([
        "--db",
        path_str(&db),
        "group",
        "update",
        "--group",
        &twin_id,
        "--name",
        "North wing",
    ]);
    assert!(
        stderr.contains("constraint violation"),
        "expected constraint violation, got:\n{stderr}"
    );

    let updated = run_json([
        "--db",
        path_str(&db),
        "group",
        "update",
        "--group",
        &group_id,
        "--name",
        "North wing day care",
        "--description",
        "ground floor",
    ]);
    assert_eq!(as_str(&updated, "name"), "North wing day care");

    let retopiced = run_json([
        "--db",
        path_str(&db),
        "group",
        "set-topics",
        "--group",
        &group_id,
        "--topic",
        &topic_id,
    ]);
    assert_eq!(as_array(&retopiced, "topics"), &[Value::from(as_i64(&topic, "id"))]);

    let reoriented = run_json([
        "--db",
        path_str(&db),
        "group",
        "set-orientation",
        "--group",
        &group_id,
        "--orientation",
        "participant",
    ]);
    assert_eq!(as_str(&reoriented, "orientation"), "participant");

    let usergroup = run_json([
        "--db",
        path_str(&db),
        "registry",
        "add-usergroup",
        "--name",
        "Care team",
    ]);
    let usergroup_id = as_i64(&usergroup, "id").to_string();

    let renamed = run_json([
        "--db",
        path_str(&db),
        "registry",
        "rename-usergroup",
        "--usergroup",
        &usergroup_id,
        "--name",
        "Night shift",
    ]);
    assert_eq!(as_str(&renamed, "name"), "Night shift");

    let windowed = run_json([
        "--db",
        path_str(&db),
        "registry",
        "set-usergroup-status-window",
        "--usergroup",
        &usergroup_id,
        "--status",
        "present",
        "--status",
        "left",
    ]);
    assert_eq!(as_array(&windowed, "status_window").len(), 2);

    // Participant-side links only accept groups of internal organizations.
    let stderr = run_failure([
        "--db",
        path_str(&db),
        "registry",
        "set-usergroup-participant-groups",
        "--usergroup",
        &usergroup_id,
        "--group",
        &external_group_id,
    ]);
    assert!(
        stderr.contains("external organization"),
        "expected internal-organization rejection, got:\n{stderr}"
    );

    let linked = run_json([
        "--db",
        path_str(&db),
        "registry",
        "set-usergroup-participant-groups",
        "--usergroup",
        &usergroup_id,
        "--group",
        &group_id,
    ]);
    assert_eq!(
        as_array(&linked, "participant_groups"),
        &[Value::from(as_i64(&group, "id"))]
    );

    let staff = run_json([
        "--db",
        path_str(&db),
        "registry",
        "add-participant",
        "--firstname",
        "Mara",
        "--lastname",
        "Stein",
    ]);
    let staff_id = as_i64(&staff, "id").to_string();
    let user = run_json([
        "--db",
        path_str(&db),
        "registry",
        "add-user",
        "--participant",
        &staff_id,
    ]);
    let user_id = as_i64(&user, "id").to_string();

    let attached = run_json([
        "--db",
        path_str(&db),
        "registry",
        "set-user-usergroup",
        "--user",
        &user_id,
        "--usergroup",
        &usergroup_id,
    ]);
    assert_eq!(as_i64(&attached, "usergroup"), as_i64(&usergroup, "id"));
    let detached = run_json([
        "--db",
        path_str(&db),
        "registry",
        "set-user-usergroup",
        "--user",
        &user_id,
    ]);
    assert_eq!(detached.get("usergroup"), Some(&Value::Null));

    let roster = run_json([
        "--db",
        path_str(&db),
        "group",
        "set-participants",
        "--group",
        &group_id,
        "--participant",
        &staff_id,
    ]);
    assert_eq!(
        as_array(&roster, "participants"),
        &[Value::from(as_i64(&staff, "id"))]
    );

    let view = run_json([
        "--db",
        path_str(&db),
        "view",
        "add",
        "--kind",
        "event",
        "--name",
        "Calendar",
    ]);
    let view_id = as_i64(&view, "id").to_string();
    let renamed_view = run_json([
        "--db",
        path_str(&db),
        "view",
        "rename",
        "--view",
        &view_id,
        "--name",
        "Ward calendar",
    ]);
    assert_eq!(as_str(&renamed_view, "name"), "Ward calendar");

    let _ = fs::remove_dir_all(&sandbox);
}
