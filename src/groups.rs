//! Azure AD group resolution.
//!
//! [`resolve_group`] turns whatever the user typed (an object id or a
//! display name) into exactly one [`Group`], then loads the two relations
//! the report needs:
//!
//! - `transitiveMembers`: device objects give the Azure AD device ids that
//!   managed devices are matched against; group objects are the nested
//!   groups listed under MEMBERS.
//! - `transitiveMemberOf`, filtered to groups, gives the parent groups whose
//!   assignments the target group inherits.
//!
//! Requires the `Group.Read.All` application permission.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::client::GraphClient;
use crate::error::{ExplorerError, Result};
use crate::paging::{RetryPolicy, fetch_all_with_retry, with_retry};

/// `@odata.type` of a directory device object.
pub const DEVICE_ODATA_TYPE: &str = "#microsoft.graph.device";
/// `@odata.type` of a directory group object.
pub const GROUP_ODATA_TYPE: &str = "#microsoft.graph.group";

/// A group reference used for parent and nested groups.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct GroupRef {
    /// Object id.
    pub id: String,
    /// Display name, `?` when Graph omits it.
    pub display_name: String,
}

/// The group being reported on. Resolved once per run, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    /// Canonical object id.
    pub id: String,
    /// Display name as stored in Azure AD.
    pub display_name: String,
    /// Azure AD device ids (`deviceId`) of every device that is a direct or
    /// nested member.
    pub member_device_ids: BTreeSet<String>,
    /// Groups nested inside this group, directly or further down.
    pub member_groups: Vec<GroupRef>,
    /// Groups this group is a direct or nested member of.
    pub parent_groups: Vec<GroupRef>,
}

impl Group {
    /// Looks up a parent group by id.
    pub fn parent(&self, group_id: &str) -> Option<&GroupRef> {
        self.parent_groups.iter().find(|g| g.id == group_id)
    }
}

/// Parses `input` as a group object id, accepting the usual UUID spellings
/// and normalizing to the lowercase hyphenated form Graph uses.
pub fn parse_object_id(input: &str) -> Option<String> {
    Uuid::try_parse(input)
        .ok()
        .map(|id| id.hyphenated().to_string())
}

/// Quotes a string literal for an OData `$filter` expression.
fn odata_string_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Builds the `groups?$filter=displayName eq '...'` path, relative to the
/// Graph base URL. The whole filter expression is percent-encoded, so `&`,
/// `+`, `#` and `%` in a display name stay inside the value.
fn display_name_filter_path(name: &str) -> String {
    let filter = format!("displayName eq {}", odata_string_literal(name));
    format!("groups?$filter={}", urlencoding::encode(&filter))
}

fn str_field<'a>(obj: &'a Value, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str)
}

fn odata_type(obj: &Value) -> Option<&str> {
    str_field(obj, "@odata.type")
}

/// Resolves a group display name or object id to exactly one group.
///
/// # Errors
///
/// - `ExplorerError::Config`: empty input.
/// - `ExplorerError::NotFound`: no group with that id or display name.
/// - `ExplorerError::AmbiguousGroup`: several groups share the display name.
///   An arbitrary one is never picked.
/// - Any error from the paged reads of the group's relations.
pub async fn resolve_group(
    client: &GraphClient,
    name_or_id: &str,
    policy: &RetryPolicy,
) -> Result<Group> {
    let input = name_or_id.trim();
    if input.is_empty() {
        return Err(ExplorerError::Config("group name or id is empty".to_string()));
    }

    let (id, display_name) = match parse_object_id(input) {
        Some(id) => lookup_by_id(client, &id, policy).await?,
        None => lookup_by_name(client, input, policy).await?,
    };
    info!(%id, %display_name, "resolved group");

    let members =
        fetch_all_with_retry(client, &format!("groups/{id}/transitiveMembers"), policy).await?;
    let member_device_ids: BTreeSet<String> = members
        .iter()
        .filter(|m| odata_type(m) == Some(DEVICE_ODATA_TYPE))
        .filter_map(|m| str_field(m, "deviceId").or_else(|| str_field(m, "id")))
        .map(str::to_string)
        .collect();
    debug!(
        members = members.len(),
        devices = member_device_ids.len(),
        "loaded group members"
    );

    let member_groups = group_refs(&members);

    let parents =
        fetch_all_with_retry(client, &format!("groups/{id}/transitiveMemberOf"), policy).await?;
    let parent_groups = group_refs(&parents);
    debug!(
        nested = member_groups.len(),
        parents = parent_groups.len(),
        "loaded group hierarchy"
    );

    Ok(Group {
        id,
        display_name,
        member_device_ids,
        member_groups,
        parent_groups,
    })
}

/// Keeps the group-typed objects of a membership read, sorted by display
/// name with repeated ids dropped.
fn group_refs(objects: &[Value]) -> Vec<GroupRef> {
    let mut groups: Vec<GroupRef> = objects
        .iter()
        .filter(|o| odata_type(o) == Some(GROUP_ODATA_TYPE))
        .filter_map(|o| {
            Some(GroupRef {
                id: str_field(o, "id")?.to_string(),
                display_name: str_field(o, "displayName").unwrap_or("?").to_string(),
            })
        })
        .collect();
    groups.sort_by(|a, b| a.display_name.cmp(&b.display_name).then(a.id.cmp(&b.id)));
    groups.dedup_by(|a, b| a.id == b.id);
    groups
}

async fn lookup_by_id(
    client: &GraphClient,
    id: &str,
    policy: &RetryPolicy,
) -> Result<(String, String)> {
    let path = format!("groups/{id}");
    let group = with_retry(policy, &path, || client.get_json(&path))
        .await
        .map_err(|e| match e {
            ExplorerError::NotFound { .. } => ExplorerError::NotFound {
                resource: format!("group with id {id}"),
            },
            other => other,
        })?;

    let canonical = str_field(&group, "id").unwrap_or(id).to_string();
    let display_name = str_field(&group, "displayName").unwrap_or("?").to_string();
    Ok((canonical, display_name))
}

async fn lookup_by_name(
    client: &GraphClient,
    name: &str,
    policy: &RetryPolicy,
) -> Result<(String, String)> {
    let path = display_name_filter_path(name);
    let matches = fetch_all_with_retry(client, &path, policy).await?;

    let mut candidates: Vec<(String, String)> = matches
        .iter()
        .filter_map(|g| {
            Some((
                str_field(g, "id")?.to_string(),
                str_field(g, "displayName").unwrap_or(name).to_string(),
            ))
        })
        .collect();
    candidates.sort();
    candidates.dedup_by(|a, b| a.0 == b.0);

    match candidates.len() {
        0 => Err(ExplorerError::NotFound {
            resource: format!("group named '{name}'"),
        }),
        1 => Ok(candidates.remove(0)),
        _ => Err(ExplorerError::AmbiguousGroup {
            name: name.to_string(),
            candidates: candidates.into_iter().map(|(id, _)| id).collect(),
        }),
    }
}
