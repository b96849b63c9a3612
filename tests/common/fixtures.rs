use chrono::{DateTime, TimeZone, Utc};
use ignore_migrate::gateway::{RemoteFinding, RemoteIgnore, RemoteOrganization, RemoteProject};
use serde_json::json;

pub fn day(year: i32, month: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, d, 0, 0, 0).unwrap()
}

pub fn org(id: &str, group: &str) -> RemoteOrganization {
    RemoteOrganization {
        id: id.to_string(),
        name: format!("Org {id}"),
        slug: id.to_string(),
        group_id: Some(group.to_string()),
        raw: json!({"id": id, "name": format!("Org {id}")}),
    }
}

pub fn project(id: &str) -> RemoteProject {
    RemoteProject {
        id: id.to_string(),
        name: format!("repo/{id}"),
        origin: "github".to_string(),
        target_id: format!("target-{id}"),
        target: None,
    }
}

pub fn cli_project(id: &str) -> RemoteProject {
    RemoteProject {
        origin: "cli".to_string(),
        ..project(id)
    }
}

pub fn ignore(
    id: &str,
    issue_id: &str,
    ignore_type: &str,
    created_at: DateTime<Utc>,
) -> RemoteIgnore {
    RemoteIgnore {
        id: id.to_string(),
        issue_id: issue_id.to_string(),
        reason: format!("reason for {id}"),
        ignore_type: ignore_type.to_string(),
        created_at,
        expires_at: None,
        raw: json!({
            "id": id,
            "issueId": issue_id,
            "reason": format!("reason for {id}"),
            "reasonType": ignore_type,
            "created": created_at.to_rfc3339(),
        }),
    }
}

pub fn finding(id: &str, project_id: &str, asset_key: &str, project_key: &str) -> RemoteFinding {
    RemoteFinding {
        id: id.to_string(),
        project_id: project_id.to_string(),
        asset_key: asset_key.to_string(),
        project_key: project_key.to_string(),
        raw: json!({"id": id, "key_asset": asset_key}),
    }
}
