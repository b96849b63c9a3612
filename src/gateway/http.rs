//! Blocking HTTP implementation of the gateway contract.
//!
//! Legacy ignores and rescans go through the v1 API; organizations, projects,
//! targets, findings and policies through the versioned REST API, whose list
//! endpoints paginate with JSON:API `links.next`.

use super::{
    CreatePolicyOutcome, Gateway, GatewayError, PolicyAttributes, PolicyMeta, ProjectTarget,
    RemoteFinding, RemoteIgnore, RemoteOrganization, RemoteProject,
};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde_json::{Value, json};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("ignore-migrate/", env!("CARGO_PKG_VERSION"));
const MAX_PAGES: usize = 10_000;

/// Connection settings for [`HttpGateway`].
#[derive(Debug, Clone)]
pub struct HttpGatewayConfig {
    pub api_url: String,
    pub api_version: String,
    pub token: String,
    pub request_timeout: Duration,
    pub rate_limit_attempts: u32,
}

/// Production gateway backed by `reqwest`.
pub struct HttpGateway {
    config: HttpGatewayConfig,
    client: Client,
}

impl HttpGateway {
    /// Build a gateway.
    ///
    /// # Errors
    ///
    /// Returns an error when the token or base URL is empty, or the HTTP client
    /// cannot be initialized.
    pub fn new(config: HttpGatewayConfig) -> Result<Self, GatewayError> {
        if config.token.trim().is_empty() {
            return Err(GatewayError::InvalidInput {
                field: "token".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if config.api_url.trim().is_empty() {
            return Err(GatewayError::InvalidInput {
                field: "api_url".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(config.request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|error| GatewayError::Http {
                status: None,
                message: error.to_string(),
            })?;

        Ok(Self { config, client })
    }

    fn base(&self) -> &str {
        self.config.api_url.trim_end_matches('/')
    }

    fn rest_url(&self, path: &str) -> String {
        let sep = if path.contains('?') { '&' } else { '?' };
        format!(
            "{}/rest{path}{sep}version={}",
            self.base(),
            self.config.api_version
        )
    }

    fn v1_url(&self, path: &str) -> String {
        format!("{}/v1{path}", self.base())
    }

    fn next_url(&self, next: &str) -> String {
        if next.starts_with("http://") || next.starts_with("https://") {
            next.to_string()
        } else if next.starts_with("/rest/") {
            format!("{}{next}", self.base())
        } else {
            format!("{}/rest{next}", self.base())
        }
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("Authorization", format!("token {}", self.config.token))
            .header("Accept", "application/vnd.api+json, application/json")
    }

    /// Send a request, backing off on 429 responses.
    fn send<F>(&self, endpoint: &str, build: F) -> Result<Response, GatewayError>
    where
        F: Fn() -> RequestBuilder,
    {
        let attempts = self.config.rate_limit_attempts.max(1);
        for attempt in 1..=attempts {
            let response = self
                .authorized(build())
                .send()
                .map_err(|error| GatewayError::Http {
                    status: None,
                    message: format!("{endpoint}: {error}"),
                })?;

            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }

            let wait = retry_after(&response).unwrap_or_else(|| Duration::from_secs(u64::from(attempt) * 2));
            warn!(endpoint, attempt, wait_secs = wait.as_secs(), "Rate limited");
            if attempt < attempts {
                thread::sleep(wait);
            }
        }
        Err(GatewayError::RateLimited { attempts })
    }

    fn expect_success(endpoint: &str, response: Response) -> Result<Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .text()
            .unwrap_or_else(|_| "unable to read response body".to_string());
        Err(GatewayError::Http {
            status: Some(status.as_u16()),
            message: format!("{endpoint}: {message}"),
        })
    }

    fn get_json(&self, url: &str) -> Result<Value, GatewayError> {
        let response = self.send(url, || self.client.get(url))?;
        let response = Self::expect_success(url, response)?;
        response.json().map_err(|error| GatewayError::Decode {
            endpoint: url.to_string(),
            message: error.to_string(),
        })
    }

    /// Collect every `data` item across JSON:API pages.
    fn get_paginated(&self, first: &str) -> Result<Vec<Value>, GatewayError> {
        let mut items = Vec::new();
        let mut url = first.to_string();
        for _ in 0..MAX_PAGES {
            let page = self.get_json(&url)?;
            match page.get("data") {
                Some(Value::Array(data)) => items.extend(data.iter().cloned()),
                _ => {
                    return Err(GatewayError::Decode {
                        endpoint: url,
                        message: "missing data array".to_string(),
                    });
                }
            }
            match page.pointer("/links/next").and_then(Value::as_str) {
                Some(next) if !next.is_empty() => url = self.next_url(next),
                _ => return Ok(items),
            }
        }
        warn!(endpoint = first, "Pagination limit reached");
        Ok(items)
    }
}

impl Gateway for HttpGateway {
    fn list_orgs_in_group(&self, group: &str) -> Result<Vec<RemoteOrganization>, GatewayError> {
        let url = self.rest_url(&format!("/groups/{group}/orgs?limit=100"));
        let items = self.get_paginated(&url)?;
        items
            .iter()
            .map(|item| parse_organization(item, Some(group)))
            .collect()
    }

    fn list_projects(&self, org: &str) -> Result<Vec<RemoteProject>, GatewayError> {
        let url = self.rest_url(&format!("/orgs/{org}/projects?limit=100&expand=target"));
        let items = self.get_paginated(&url)?;
        items.iter().map(parse_project).collect()
    }

    fn list_ignores(&self, org: &str, project: &str) -> Result<Vec<RemoteIgnore>, GatewayError> {
        let url = self.v1_url(&format!("/org/{org}/project/{project}/ignores"));
        let body = self.get_json(&url)?;
        parse_ignores(project, &body)
    }

    fn list_findings(
        &self,
        org: &str,
        project: Option<&str>,
    ) -> Result<Vec<RemoteFinding>, GatewayError> {
        let path = project.map_or_else(
            || format!("/orgs/{org}/issues?limit=100"),
            |p| format!("/orgs/{org}/issues?limit=100&scan_item.id={p}&scan_item.type=project"),
        );
        let items = self.get_paginated(&self.rest_url(&path))?;
        items.iter().map(parse_finding).collect()
    }

    fn resolve_project_target(&self, org: &str, target_id: &str) -> Result<Value, GatewayError> {
        let url = self.rest_url(&format!("/orgs/{org}/targets/{target_id}"));
        let body = self.get_json(&url)?;
        body.get("data").cloned().ok_or_else(|| GatewayError::Decode {
            endpoint: url,
            message: "missing data".to_string(),
        })
    }

    fn create_policy(
        &self,
        org: &str,
        attrs: &PolicyAttributes,
        meta: &PolicyMeta,
    ) -> Result<CreatePolicyOutcome, GatewayError> {
        let url = self.rest_url(&format!("/orgs/{org}/policies"));
        let body = policy_request_body(attrs, meta);
        let response = self.send(&url, || self.client.post(&url).json(&body))?;

        if response.status() == StatusCode::CONFLICT {
            let existing = response
                .json::<Value>()
                .ok()
                .and_then(|v| existing_policy_id(&v));
            debug!(org, internal_id = %meta.internal_id, ?existing, "Policy already exists");
            return Ok(CreatePolicyOutcome::AlreadyExists { id: existing });
        }

        let response = Self::expect_success(&url, response)?;
        let created: Value = response.json().map_err(|error| GatewayError::Decode {
            endpoint: url.clone(),
            message: error.to_string(),
        })?;
        let id = created
            .pointer("/data/id")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::Decode {
                endpoint: url,
                message: "created policy has no id".to_string(),
            })?;
        Ok(CreatePolicyOutcome::Created { id: id.to_string() })
    }

    fn trigger_rescan(&self, org: &str, target: &ProjectTarget) -> Result<(), GatewayError> {
        let integration_id = target
            .descriptor
            .pointer("/relationships/integration/data/id")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::InvalidInput {
                field: "target".to_string(),
                reason: format!("target {} has no integration", target.target_id),
            })?;
        let url = self.v1_url(&format!("/org/{org}/integrations/{integration_id}/import"));
        let body = json!({
            "target": target.descriptor.get("attributes").cloned().unwrap_or(Value::Null),
        });
        let response = self.send(&url, || self.client.post(&url).json(&body))?;
        Self::expect_success(&url, response).map(|_| ())
    }

    fn delete_policy(&self, org: &str, policy_id: &str) -> Result<(), GatewayError> {
        let url = self.rest_url(&format!("/orgs/{org}/policies/{policy_id}"));
        let response = self.send(&url, || self.client.delete(&url))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::expect_success(&url, response).map(|_| ())
    }

    fn delete_ignore(
        &self,
        org: &str,
        project: &str,
        issue_id: &str,
        ignore_id: &str,
    ) -> Result<(), GatewayError> {
        let url = self.v1_url(&ignore_path(org, project, issue_id));
        debug!(org, project, ignore = ignore_id, "Deleting legacy ignore");
        let response = self.send(&url, || self.client.delete(&url))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::expect_success(&url, response).map(|_| ())
    }

    fn create_ignore(
        &self,
        org: &str,
        project: &str,
        ignore: &RemoteIgnore,
    ) -> Result<(), GatewayError> {
        let url = self.v1_url(&ignore_path(org, project, &ignore.issue_id));
        let body = ignore_request_body(ignore);
        let response = self.send(&url, || self.client.post(&url).json(&body))?;
        Self::expect_success(&url, response).map(|_| ())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn decode_err(what: &str, message: &str) -> GatewayError {
    GatewayError::Decode {
        endpoint: what.to_string(),
        message: message.to_string(),
    }
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

fn parse_time(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

pub(crate) fn parse_organization(
    item: &Value,
    group: Option<&str>,
) -> Result<RemoteOrganization, GatewayError> {
    let id = str_at(item, "/id").ok_or_else(|| decode_err("organization", "missing id"))?;
    let group_id = str_at(item, "/attributes/group_id")
        .or(group)
        .map(str::to_string);
    Ok(RemoteOrganization {
        id: id.to_string(),
        name: str_at(item, "/attributes/name").unwrap_or_default().to_string(),
        slug: str_at(item, "/attributes/slug").unwrap_or_default().to_string(),
        group_id,
        raw: item.clone(),
    })
}

pub(crate) fn parse_project(item: &Value) -> Result<RemoteProject, GatewayError> {
    let id = str_at(item, "/id").ok_or_else(|| decode_err("project", "missing id"))?;
    let target = item.pointer("/relationships/target/data");
    Ok(RemoteProject {
        id: id.to_string(),
        name: str_at(item, "/attributes/name").unwrap_or_default().to_string(),
        origin: str_at(item, "/attributes/origin").unwrap_or_default().to_string(),
        target_id: target
            .and_then(|t| str_at(t, "/id"))
            .unwrap_or_default()
            .to_string(),
        target: target.filter(|t| t.get("attributes").is_some()).cloned(),
    })
}

/// Flatten the v1 ignores map: `{ issueId: [ { path: { ... } } ] }`.
///
/// Ids are `<project>:<issue>:<path>` so they stay unique across projects.
pub(crate) fn parse_ignores(project: &str, body: &Value) -> Result<Vec<RemoteIgnore>, GatewayError> {
    let Some(map) = body.as_object() else {
        return Err(decode_err("ignores", "expected an object keyed by issue id"));
    };

    let mut ignores = Vec::new();
    for (issue_id, entries) in map {
        let Some(entries) = entries.as_array() else {
            continue;
        };
        for entry in entries {
            let Some(paths) = entry.as_object() else {
                continue;
            };
            for (path, detail) in paths {
                let created_at = parse_time(str_at(detail, "/created")).ok_or_else(|| {
                    decode_err("ignores", &format!("{issue_id}: missing or invalid 'created'"))
                })?;
                ignores.push(RemoteIgnore {
                    id: format!("{project}:{issue_id}:{path}"),
                    issue_id: issue_id.clone(),
                    reason: str_at(detail, "/reason").unwrap_or_default().to_string(),
                    ignore_type: str_at(detail, "/reasonType")
                        .unwrap_or("temporary")
                        .to_string(),
                    created_at,
                    expires_at: parse_time(str_at(detail, "/expires")),
                    raw: json!({ "issueId": issue_id, "path": path, "ignore": detail }),
                });
            }
        }
    }
    Ok(ignores)
}

pub(crate) fn parse_finding(item: &Value) -> Result<RemoteFinding, GatewayError> {
    let id = str_at(item, "/id").ok_or_else(|| decode_err("finding", "missing id"))?;
    let project_key = str_at(item, "/attributes/problems/0/id")
        .or_else(|| str_at(item, "/attributes/key"))
        .unwrap_or_default();
    Ok(RemoteFinding {
        id: id.to_string(),
        project_id: str_at(item, "/relationships/scan_item/data/id")
            .unwrap_or_default()
            .to_string(),
        asset_key: str_at(item, "/attributes/key_asset")
            .unwrap_or_default()
            .to_string(),
        project_key: project_key.to_string(),
        raw: item.clone(),
    })
}

fn policy_request_body(attrs: &PolicyAttributes, meta: &PolicyMeta) -> Value {
    json!({
        "data": {
            "type": "policy",
            "attributes": {
                "name": attrs.name,
                "action_type": "ignore",
                "action": {
                    "data": {
                        "ignore_type": attrs.ignore_type,
                        "reason": attrs.reason,
                        "expires": attrs.expires_at.map(|dt| dt.to_rfc3339()),
                    }
                },
                "conditions_group": {
                    "logical_operator": "and",
                    "conditions": [{
                        "field": "snyk/asset/finding/v1",
                        "operator": "includes",
                        "value": attrs.asset_key,
                    }]
                }
            },
            "meta": {
                "internal_id": meta.internal_id,
                "source_ignores": meta.source_ignores,
            }
        }
    })
}

fn existing_policy_id(conflict: &Value) -> Option<String> {
    str_at(conflict, "/errors/0/meta/existing_id")
        .or_else(|| str_at(conflict, "/errors/0/source/id"))
        .map(str::to_string)
}

fn ignore_request_body(ignore: &RemoteIgnore) -> Value {
    let detail = ignore.raw.get("ignore").cloned().unwrap_or(Value::Null);
    json!({
        "ignorePath": str_at(&ignore.raw, "/path").unwrap_or("*"),
        "reason": ignore.reason,
        "reasonType": ignore.ignore_type,
        "disregardIfFixable": detail.get("disregardIfFixable").and_then(Value::as_bool).unwrap_or(false),
        "expires": ignore.expires_at.map(|dt| dt.to_rfc3339()),
    })
}

/// v1 ignore endpoint for one issue; issue ids may themselves contain colons.
pub(crate) fn ignore_path(org: &str, project: &str, issue_id: &str) -> String {
    format!("/org/{org}/project/{project}/ignore/{issue_id}")
}
