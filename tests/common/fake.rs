//! Scripted in-memory gateway.

use ignore_migrate::gateway::{
    CreatePolicyOutcome, Gateway, GatewayError, PolicyAttributes, PolicyMeta, ProjectTarget,
    RemoteFinding, RemoteIgnore, RemoteOrganization, RemoteProject,
};
use serde_json::{Value, json};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::thread;
use std::time::Duration;

fn failure(what: &str) -> GatewayError {
    GatewayError::Http {
        status: Some(500),
        message: format!("scripted failure: {what}"),
    }
}

#[derive(Default)]
pub struct FakeGateway {
    pub groups: HashMap<String, Vec<RemoteOrganization>>,
    pub projects: HashMap<String, Vec<RemoteProject>>,
    /// Keyed by project id.
    pub ignores: RefCell<HashMap<String, Vec<RemoteIgnore>>>,
    pub findings: HashMap<String, Vec<RemoteFinding>>,

    /// Remote policies by asset key; a create for a known asset is a duplicate.
    pub remote_policies: RefCell<BTreeMap<String, String>>,
    /// Duplicates are reported without an id.
    pub hide_duplicate_ids: bool,
    /// Each successful create takes this long.
    pub create_delay: Duration,

    pub fail_projects: bool,
    pub fail_findings: bool,
    pub fail_ignore_listing: HashSet<String>,
    pub fail_create_for_asset: HashSet<String>,
    pub fail_rescan_for: HashSet<String>,
    pub fail_target_for: HashSet<String>,
    pub fail_delete_ignore: HashSet<String>,

    pub created: RefCell<Vec<(String, PolicyAttributes, PolicyMeta)>>,
    pub rescans: RefCell<Vec<String>>,
    pub deleted_ignores: RefCell<Vec<String>>,
    pub deleted_issue_ids: RefCell<Vec<String>>,
    pub deleted_policies: RefCell<Vec<String>>,
    pub recreated_ignores: RefCell<Vec<String>>,
    pub target_lookups: Cell<usize>,
    next_id: Cell<u32>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project(mut self, org: &str, project: RemoteProject) -> Self {
        self.projects.entry(org.to_string()).or_default().push(project);
        self
    }

    pub fn with_ignore(self, project: &str, ignore: RemoteIgnore) -> Self {
        self.ignores
            .borrow_mut()
            .entry(project.to_string())
            .or_default()
            .push(ignore);
        self
    }

    pub fn with_finding(mut self, org: &str, finding: RemoteFinding) -> Self {
        self.findings.entry(org.to_string()).or_default().push(finding);
        self
    }

    pub fn with_group(mut self, group: &str, org: RemoteOrganization) -> Self {
        self.groups.entry(group.to_string()).or_default().push(org);
        self
    }

    /// Replace what `list_ignores` returns for a project.
    pub fn set_ignores(&self, project: &str, ignores: Vec<RemoteIgnore>) {
        self.ignores.borrow_mut().insert(project.to_string(), ignores);
    }

    pub fn created_count(&self) -> usize {
        self.created.borrow().len()
    }
}

impl Gateway for FakeGateway {
    fn list_orgs_in_group(&self, group: &str) -> Result<Vec<RemoteOrganization>, GatewayError> {
        Ok(self.groups.get(group).cloned().unwrap_or_default())
    }

    fn list_projects(&self, org: &str) -> Result<Vec<RemoteProject>, GatewayError> {
        if self.fail_projects {
            return Err(failure("list_projects"));
        }
        Ok(self.projects.get(org).cloned().unwrap_or_default())
    }

    fn list_ignores(&self, _org: &str, project: &str) -> Result<Vec<RemoteIgnore>, GatewayError> {
        if self.fail_ignore_listing.contains(project) {
            return Err(failure("list_ignores"));
        }
        Ok(self.ignores.borrow().get(project).cloned().unwrap_or_default())
    }

    fn list_findings(
        &self,
        org: &str,
        project: Option<&str>,
    ) -> Result<Vec<RemoteFinding>, GatewayError> {
        if self.fail_findings {
            return Err(failure("list_findings"));
        }
        Ok(self
            .findings
            .get(org)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|f| project.is_none_or(|p| f.project_id == p))
            .collect())
    }

    fn resolve_project_target(&self, _org: &str, target_id: &str) -> Result<Value, GatewayError> {
        self.target_lookups.set(self.target_lookups.get() + 1);
        if self.fail_target_for.contains(target_id) {
            return Err(failure("resolve_project_target"));
        }
        Ok(json!({"id": target_id, "url": format!("https://example.test/{target_id}")}))
    }

    fn create_policy(
        &self,
        _org: &str,
        attrs: &PolicyAttributes,
        meta: &PolicyMeta,
    ) -> Result<CreatePolicyOutcome, GatewayError> {
        if self.fail_create_for_asset.contains(&attrs.asset_key) {
            return Err(failure("create_policy"));
        }
        if let Some(existing) = self.remote_policies.borrow().get(&attrs.asset_key) {
            let id = (!self.hide_duplicate_ids).then(|| existing.clone());
            return Ok(CreatePolicyOutcome::AlreadyExists { id });
        }

        if !self.create_delay.is_zero() {
            thread::sleep(self.create_delay);
        }
        let n = self.next_id.get() + 1;
        self.next_id.set(n);
        let id = format!("remote-{n}");
        self.remote_policies
            .borrow_mut()
            .insert(attrs.asset_key.clone(), id.clone());
        self.created
            .borrow_mut()
            .push((id.clone(), attrs.clone(), meta.clone()));
        Ok(CreatePolicyOutcome::Created { id })
    }

    fn trigger_rescan(&self, _org: &str, target: &ProjectTarget) -> Result<(), GatewayError> {
        if self.fail_rescan_for.contains(&target.project_id) {
            return Err(failure("trigger_rescan"));
        }
        self.rescans.borrow_mut().push(target.project_id.clone());
        Ok(())
    }

    fn delete_policy(&self, _org: &str, policy_id: &str) -> Result<(), GatewayError> {
        self.remote_policies
            .borrow_mut()
            .retain(|_, id| id != policy_id);
        self.deleted_policies.borrow_mut().push(policy_id.to_string());
        Ok(())
    }

    fn delete_ignore(
        &self,
        _org: &str,
        project: &str,
        issue_id: &str,
        ignore_id: &str,
    ) -> Result<(), GatewayError> {
        if let Some(known) = self
            .ignores
            .borrow()
            .get(project)
            .and_then(|list| list.iter().find(|i| i.id == ignore_id))
        {
            assert_eq!(issue_id, known.issue_id, "delete_ignore got the wrong issue id");
        }
        if self.fail_delete_ignore.contains(ignore_id) {
            return Err(failure("delete_ignore"));
        }
        self.deleted_ignores.borrow_mut().push(ignore_id.to_string());
        self.deleted_issue_ids.borrow_mut().push(issue_id.to_string());
        Ok(())
    }

    fn create_ignore(
        &self,
        _org: &str,
        _project: &str,
        ignore: &RemoteIgnore,
    ) -> Result<(), GatewayError> {
        self.recreated_ignores.borrow_mut().push(ignore.id.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}
