//! Cross-references Intune objects against a resolved group.
//!
//! Each object kind is read from one or more Graph collections, in this
//! order:
//!
//! | Kind | Endpoints | Permission |
//! |------|-----------|------------|
//! | App | `deviceAppManagement/mobileApps` | `DeviceManagementApps.Read.All` |
//! | ConfigProfile | `deviceManagement/deviceConfigurations`, `configurationPolicies`, `deviceCompliancePolicies`, `groupPolicyConfigurations`, `intents`, `deviceManagementScripts` | `DeviceManagementConfiguration.Read.All` |
//! | ManagedDevice | `deviceManagement/managedDevices` | `DeviceManagementManagedDevices.Read.All` |
//! | ServiceConfig | `deviceManagement/deviceEnrollmentConfigurations`, `windowsAutopilotDeploymentProfiles` | `DeviceManagementServiceConfig.Read.All` |
//!
//! Everything but managed devices carries assignments, read with
//! `$expand=assignments` (or from `{id}/assignments` when the collection
//! does not expand them, as `intents` never does). An object makes the
//! report when one of its assignment targets is the group, one of the
//! group's parents, or a tenant-wide sentinel. Managed devices are matched
//! through the group's member device ids.
//!
//! A permission or not-found error on one endpoint is recorded in
//! [`Summary::failures`] and every other endpoint is still read.
//! Authentication, timeout and network errors abort the whole summary.

use std::collections::{BTreeSet, HashSet};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::GraphClient;
use crate::error::{ExplorerError, Result};
use crate::groups::{Group, GroupRef};
use crate::paging::{RetryPolicy, fetch_all_with_retry};

// ── Types ───────────────────────────────────────────────────────────────

/// The kinds of Intune object in a summary, in report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectKind {
    /// Mobile and desktop apps.
    App,
    /// Device configuration, settings catalog, compliance, administrative
    /// templates, security baselines and PowerShell scripts.
    ConfigProfile,
    /// Devices enrolled in Intune.
    ManagedDevice,
    /// Enrollment configurations and Autopilot deployment profiles.
    ServiceConfig,
}

impl ObjectKind {
    /// Every kind, in report order.
    pub const ALL: [ObjectKind; 4] = [
        ObjectKind::App,
        ObjectKind::ConfigProfile,
        ObjectKind::ManagedDevice,
        ObjectKind::ServiceConfig,
    ];

    /// Collection paths relative to the Graph base URL, including the query
    /// that pulls assignments inline where the collection supports it.
    pub fn endpoints(self) -> &'static [&'static str] {
        match self {
            ObjectKind::App => &["deviceAppManagement/mobileApps?$expand=assignments"],
            ObjectKind::ConfigProfile => &[
                "deviceManagement/deviceConfigurations?$expand=assignments",
                "deviceManagement/configurationPolicies?$expand=assignments",
                "deviceManagement/deviceCompliancePolicies?$expand=assignments",
                "deviceManagement/groupPolicyConfigurations?$expand=assignments",
                "deviceManagement/intents",
                "deviceManagement/deviceManagementScripts?$expand=assignments",
            ],
            ObjectKind::ManagedDevice => &[
                "deviceManagement/managedDevices?$select=id,deviceName,azureADDeviceId,operatingSystem",
            ],
            ObjectKind::ServiceConfig => &[
                "deviceManagement/deviceEnrollmentConfigurations?$expand=assignments",
                "deviceManagement/windowsAutopilotDeploymentProfiles?$expand=assignments",
            ],
        }
    }

    /// Whether objects of this kind are matched through assignments.
    pub fn has_assignments(self) -> bool {
        !matches!(self, ObjectKind::ManagedDevice)
    }
}

/// An endpoint without its query string.
pub fn endpoint_base(endpoint: &str) -> &str {
    endpoint.split_once('?').map_or(endpoint, |(base, _)| base)
}

/// Where an assignment is deployed, decoded from its `target` object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AssignmentTarget {
    /// Deployed to the group with this id.
    Group(String),
    /// The group with this id is excluded.
    ExclusionGroup(String),
    /// Every device in the tenant.
    AllDevices,
    /// Every licensed user in the tenant.
    AllLicensedUsers,
    /// A target type this tool does not interpret, kept by its `@odata.type`.
    Other(String),
}

impl AssignmentTarget {
    /// Decodes a Graph `deviceAndAppManagementAssignmentTarget`.
    pub fn from_json(target: &Value) -> Option<Self> {
        let odata_type = target.get("@odata.type").and_then(Value::as_str)?;
        let group_id = || {
            target
                .get("groupId")
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        Some(match odata_type {
            "#microsoft.graph.groupAssignmentTarget" => AssignmentTarget::Group(group_id()?),
            "#microsoft.graph.exclusionGroupAssignmentTarget" => {
                AssignmentTarget::ExclusionGroup(group_id()?)
            }
            "#microsoft.graph.allDevicesAssignmentTarget" => AssignmentTarget::AllDevices,
            "#microsoft.graph.allLicensedUsersAssignmentTarget" => {
                AssignmentTarget::AllLicensedUsers
            }
            other => AssignmentTarget::Other(other.to_string()),
        })
    }
}

/// One decoded assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// Where the object is deployed.
    pub target: AssignmentTarget,
    /// App install intent (`required`, `available`, `uninstall`, ...).
    pub intent: Option<String>,
}

/// Why an object ended up in the summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchedVia {
    /// Assigned to the group itself.
    Direct,
    /// Assigned to a group that contains the group.
    Inherited(GroupRef),
    /// Assigned to every device.
    AllDevices,
    /// Assigned to every licensed user.
    AllLicensedUsers,
    /// A managed device that belongs to the group.
    Membership,
}

/// One line of the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntuneObjectSummary {
    /// Which section of the report the object belongs to.
    pub kind: ObjectKind,
    /// Graph object id.
    pub id: String,
    /// `displayName`, `name` or `deviceName`, whichever the object has.
    pub display_name: String,
    /// Every target the object is assigned to, not only the matching one.
    pub assignment_targets: BTreeSet<AssignmentTarget>,
    /// The reason the object applies to the group.
    pub matched_via: MatchedVia,
    /// Install intent of the matching assignment (apps only).
    pub intent: Option<String>,
    /// The group (or a parent) is excluded, but a tenant-wide target still applies.
    pub excluded: bool,
}

/// An endpoint that could not be read.
#[derive(Debug)]
pub struct ResourceFailure {
    /// The kind the endpoint feeds.
    pub kind: ObjectKind,
    /// The endpoint path, without its query.
    pub endpoint: &'static str,
    /// Why the read failed; always resource-scoped.
    pub error: ExplorerError,
}

/// Everything the report prints.
#[derive(Debug)]
pub struct Summary {
    /// The group the report is about.
    pub group: Group,
    /// Sorted by kind, then display name; at most one entry per (kind, id).
    pub objects: Vec<IntuneObjectSummary>,
    /// Endpoints skipped because of a resource-scoped error, in read order.
    pub failures: Vec<ResourceFailure>,
}

impl Summary {
    /// Matched objects of one kind, in report order.
    pub fn objects_of(&self, kind: ObjectKind) -> impl Iterator<Item = &IntuneObjectSummary> {
        self.objects.iter().filter(move |o| o.kind == kind)
    }

    /// Endpoints of one kind that could not be read.
    pub fn failures_of(&self, kind: ObjectKind) -> impl Iterator<Item = &ResourceFailure> {
        self.failures.iter().filter(move |f| f.kind == kind)
    }
}

/// Knobs for [`summarize`].
#[derive(Debug, Clone)]
pub struct SummarizeOptions {
    /// Count assignments to parent groups as applying to the group.
    pub include_inherited: bool,
    /// Retry behaviour for every collection read.
    pub retry: RetryPolicy,
}

impl Default for SummarizeOptions {
    fn default() -> Self {
        SummarizeOptions {
            include_inherited: true,
            retry: RetryPolicy::default(),
        }
    }
}

// ── Matching ────────────────────────────────────────────────────────────

/// Decodes the `assignments` array of an object, skipping malformed entries.
/// Returns `None` when the object has no `assignments` field at all.
pub fn parse_assignments(object: &Value) -> Option<Vec<Assignment>> {
    let raw = object.get("assignments")?.as_array()?;
    Some(raw.iter().filter_map(parse_assignment).collect())
}

fn parse_assignment(raw: &Value) -> Option<Assignment> {
    Some(Assignment {
        target: AssignmentTarget::from_json(raw.get("target")?)?,
        intent: raw.get("intent").and_then(Value::as_str).map(str::to_string),
    })
}

/// Decides whether assignments apply to `group`.
///
/// Precedence: direct, inherited, all devices, all licensed users. An
/// exclusion of the group (or of a parent it inherits from) cancels group
/// matches; tenant-wide sentinels always match and come back flagged as
/// excluded instead.
pub fn match_assignments(
    group: &Group,
    assignments: &[Assignment],
    include_inherited: bool,
) -> Option<(MatchedVia, Option<String>, bool)> {
    let applies_to_group = |id: &str| {
        id == group.id || (include_inherited && group.parent(id).is_some())
    };
    let excluded = assignments.iter().any(|a| {
        matches!(&a.target, AssignmentTarget::ExclusionGroup(id) if applies_to_group(id))
    });

    if !excluded {
        if let Some(a) = assignments
            .iter()
            .find(|a| matches!(&a.target, AssignmentTarget::Group(id) if *id == group.id))
        {
            return Some((MatchedVia::Direct, a.intent.clone(), false));
        }
        if include_inherited {
            let inherited = assignments.iter().find_map(|a| match &a.target {
                AssignmentTarget::Group(id) => group.parent(id).map(|p| (p, a)),
                _ => None,
            });
            if let Some((parent, a)) = inherited {
                return Some((MatchedVia::Inherited(parent.clone()), a.intent.clone(), false));
            }
        }
    }

    let sentinel = |wanted: &AssignmentTarget| assignments.iter().find(|a| &a.target == wanted);
    if let Some(a) = sentinel(&AssignmentTarget::AllDevices) {
        return Some((MatchedVia::AllDevices, a.intent.clone(), excluded));
    }
    if let Some(a) = sentinel(&AssignmentTarget::AllLicensedUsers) {
        return Some((MatchedVia::AllLicensedUsers, a.intent.clone(), excluded));
    }
    None
}

/// Best human-readable name for a Graph object.
fn display_name(object: &Value) -> String {
    ["displayName", "name", "deviceName"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .filter(|name| !name.is_empty())
        .unwrap_or("?")
        .to_string()
}

/// Builds the summary line for one assignable object, or `None` when the
/// object does not apply to the group.
pub fn summarize_object(
    group: &Group,
    kind: ObjectKind,
    object: &Value,
    assignments: &[Assignment],
    include_inherited: bool,
) -> Option<IntuneObjectSummary> {
    let id = object.get("id").and_then(Value::as_str)?;
    let (matched_via, intent, excluded) =
        match_assignments(group, assignments, include_inherited)?;
    Some(IntuneObjectSummary {
        kind,
        id: id.to_string(),
        display_name: display_name(object),
        assignment_targets: assignments.iter().map(|a| a.target.clone()).collect(),
        matched_via,
        intent,
        excluded,
    })
}

/// Builds the summary line for a managed device that belongs to the group.
pub fn summarize_device(group: &Group, device: &Value) -> Option<IntuneObjectSummary> {
    let id = device.get("id").and_then(Value::as_str)?;
    let aad_id = device.get("azureADDeviceId").and_then(Value::as_str)?;
    if !group.member_device_ids.contains(aad_id) {
        return None;
    }
    Some(IntuneObjectSummary {
        kind: ObjectKind::ManagedDevice,
        id: id.to_string(),
        display_name: display_name(device),
        assignment_targets: BTreeSet::from([AssignmentTarget::Group(group.id.clone())]),
        matched_via: MatchedVia::Membership,
        intent: None,
        excluded: false,
    })
}

/// Drops repeated (kind, id) pairs, keeping the first, then orders by kind
/// and case-insensitive display name, with the id as a tie-breaker.
pub fn finalize(objects: Vec<IntuneObjectSummary>) -> Vec<IntuneObjectSummary> {
    let mut seen = HashSet::new();
    let mut unique: Vec<IntuneObjectSummary> = objects
        .into_iter()
        .filter(|o| seen.insert((o.kind, o.id.clone())))
        .collect();
    unique.sort_by(|a, b| {
        a.kind
            .cmp(&b.kind)
            .then_with(|| {
                a.display_name
                    .to_lowercase()
                    .cmp(&b.display_name.to_lowercase())
            })
            .then_with(|| a.id.cmp(&b.id))
    });
    unique
}

// ── Aggregation ─────────────────────────────────────────────────────────

/// Reads every Intune endpoint and keeps what applies to `group`.
///
/// # Errors
///
/// Only run-scoped errors (`Auth`, `Timeout`, `Network`, `Config`) are
/// returned; resource-scoped ones land in [`Summary::failures`].
pub async fn summarize(
    client: &GraphClient,
    group: &Group,
    options: &SummarizeOptions,
) -> Result<Summary> {
    let mut objects = Vec::new();
    let mut failures = Vec::new();

    for kind in ObjectKind::ALL {
        for &endpoint in kind.endpoints() {
            match collect_endpoint(client, group, kind, endpoint, options).await {
                Ok(found) => {
                    info!(?kind, endpoint, matched = found.len(), "collected");
                    objects.extend(found);
                }
                Err(error) if error.is_resource_scoped() => {
                    warn!(?kind, endpoint, %error, "skipping endpoint");
                    failures.push(ResourceFailure {
                        kind,
                        endpoint: endpoint_base(endpoint),
                        error,
                    });
                }
                Err(error) => return Err(error),
            }
        }
    }

    Ok(Summary {
        group: group.clone(),
        objects: finalize(objects),
        failures,
    })
}

async fn collect_endpoint(
    client: &GraphClient,
    group: &Group,
    kind: ObjectKind,
    endpoint: &str,
    options: &SummarizeOptions,
) -> Result<Vec<IntuneObjectSummary>> {
    let items = fetch_all_with_retry(client, endpoint, &options.retry).await?;
    debug!(endpoint, items = items.len(), "fetched collection");

    if !kind.has_assignments() {
        return Ok(items.iter().filter_map(|d| summarize_device(group, d)).collect());
    }

    let mut found = Vec::new();
    for item in &items {
        let assignments = match parse_assignments(item) {
            Some(assignments) => assignments,
            None => fetch_assignments(client, endpoint, item, &options.retry).await?,
        };
        if let Some(summary) =
            summarize_object(group, kind, item, &assignments, options.include_inherited)
        {
            found.push(summary);
        }
    }
    Ok(found)
}

/// Reads `{endpoint}/{id}/assignments` for an object whose assignments
/// were not expanded inline.
async fn fetch_assignments(
    client: &GraphClient,
    endpoint: &str,
    item: &Value,
    policy: &RetryPolicy,
) -> Result<Vec<Assignment>> {
    let Some(id) = item.get("id").and_then(Value::as_str) else {
        return Ok(Vec::new());
    };
    let path = format!("{}/{id}/assignments", endpoint_base(endpoint));
    let raw = fetch_all_with_retry(client, &path, policy).await?;
    Ok(raw.iter().filter_map(parse_assignment).collect())
}
