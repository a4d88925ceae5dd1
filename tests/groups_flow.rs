//! Integration tests for group resolution using wiremock.

use std::time::Duration;

use intune_explorer::auth::TokenProvider;
use intune_explorer::client::GraphClient;
use intune_explorer::error::ExplorerError;
use intune_explorer::groups::resolve_group;
use intune_explorer::paging::RetryPolicy;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GROUP_ID: &str = "6f1c3a2b-0d4e-4f5a-9b8c-7d6e5f4a3b2c";

fn mock_client(server: &MockServer) -> GraphClient {
    GraphClient::with_base_url(TokenProvider::with_token("mock-token"), &server.uri()).unwrap()
}

fn policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(20),
    }
}

async fn mount_name_search(server: &MockServer, name: &str, groups: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/groups"))
        .and(query_param("$filter", format!("displayName eq '{name}'")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "value": groups
        })))
        .mount(server)
        .await;
}

async fn mount_relations(
    server: &MockServer,
    id: &str,
    members: serde_json::Value,
    parents: serde_json::Value,
) {
    Mock::given(method("GET"))
        .and(path(format!("/groups/{id}/transitiveMembers")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "value": members
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/groups/{id}/transitiveMemberOf")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "value": parents
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn unique_display_name_resolves_with_devices_and_parents() {
    let server = MockServer::start().await;
    mount_name_search(
        &server,
        "Finance-Laptops",
        serde_json::json!([{"id": GROUP_ID, "displayName": "Finance-Laptops"}]),
    )
    .await;
    mount_relations(
        &server,
        GROUP_ID,
        serde_json::json!([
            {"@odata.type": "#microsoft.graph.device", "id": "obj-1", "deviceId": "aad-1"},
            {"@odata.type": "#microsoft.graph.device", "id": "obj-2", "deviceId": "aad-2"},
            {"@odata.type": "#microsoft.graph.user", "id": "user-1"},
            {"@odata.type": "#microsoft.graph.group", "id": "nested-1"}
        ]),
        serde_json::json!([
            {"@odata.type": "#microsoft.graph.group", "id": "grp-all", "displayName": "All Staff"},
            {"@odata.type": "#microsoft.graph.group", "id": "grp-fin", "displayName": "Finance"},
            {"@odata.type": "#microsoft.graph.administrativeUnit", "id": "au-1", "displayName": "EMEA"}
        ]),
    )
    .await;

    let group = resolve_group(&mock_client(&server), "Finance-Laptops", &policy())
        .await
        .unwrap();

    assert_eq!(group.id, GROUP_ID);
    assert_eq!(group.display_name, "Finance-Laptops");
    assert_eq!(
        group.member_device_ids.iter().collect::<Vec<_>>(),
        vec!["aad-1", "aad-2"],
        "only device members, by Azure AD device id"
    );
    let parents: Vec<&str> = group.parent_groups.iter().map(|g| g.id.as_str()).collect();
    assert_eq!(parents, vec!["grp-all", "grp-fin"], "groups only, sorted by name");
}

#[tokio::test]
async fn shared_display_name_is_ambiguous() {
    let server = MockServer::start().await;
    mount_name_search(
        &server,
        "Laptops",
        serde_json::json!([
            {"id": "id-b", "displayName": "Laptops"},
            {"id": "id-a", "displayName": "Laptops"}
        ]),
    )
    .await;

    let err = resolve_group(&mock_client(&server), "Laptops", &policy())
        .await
        .unwrap_err();
    let err_msg = err.to_string();
    match err {
        ExplorerError::AmbiguousGroup { name, candidates } => {
            assert_eq!(name, "Laptops");
            assert_eq!(candidates, vec!["id-a", "id-b"]);
        }
        other => panic!("expected AmbiguousGroup, got: {other}"),
    }
    assert!(err_msg.contains("id-a, id-b"), "got: {err_msg}");
}

#[tokio::test]
async fn unknown_display_name_is_not_found() {
    let server = MockServer::start().await;
    mount_name_search(&server, "Nobody", serde_json::json!([])).await;

    let err = resolve_group(&mock_client(&server), "Nobody", &policy())
        .await
        .unwrap_err();
    let err_msg = err.to_string();
    assert!(matches!(err, ExplorerError::NotFound { .. }), "got: {err_msg}");
    assert!(err_msg.contains("Nobody"), "got: {err_msg}");
}

#[tokio::test]
async fn quotes_in_names_are_escaped_in_the_filter() {
    let server = MockServer::start().await;
    mount_name_search(
        &server,
        "Bob''s Devices",
        serde_json::json!([{"id": "grp-bob", "displayName": "Bob's Devices"}]),
    )
    .await;
    mount_relations(&server, "grp-bob", serde_json::json!([]), serde_json::json!([])).await;

    let group = resolve_group(&mock_client(&server), "Bob's Devices", &policy())
        .await
        .unwrap();
    assert_eq!(group.id, "grp-bob");
    assert_eq!(group.display_name, "Bob's Devices");
}

#[tokio::test]
async fn object_id_input_is_looked_up_directly() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/groups/{GROUP_ID}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": GROUP_ID,
            "displayName": "Finance-Laptops"
        })))
        .expect(1)
        .mount(&server)
        .await;
    // A name search must not happen for id input.
    Mock::given(method("GET"))
        .and(path("/groups"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"value": []})))
        .expect(0)
        .mount(&server)
        .await;
    mount_relations(&server, GROUP_ID, serde_json::json!([]), serde_json::json!([])).await;

    let group = resolve_group(
        &mock_client(&server),
        "6F1C3A2B-0D4E-4F5A-9B8C-7D6E5F4A3B2C",
        &policy(),
    )
    .await
    .unwrap();
    assert_eq!(group.id, GROUP_ID);
    assert!(group.member_device_ids.is_empty());
    assert!(group.parent_groups.is_empty());
}

#[tokio::test]
async fn unknown_object_id_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/groups/{GROUP_ID}")))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "error": {"code": "Request_ResourceNotFound", "message": "Resource does not exist."}
        })))
        .mount(&server)
        .await;

    let err = resolve_group(&mock_client(&server), GROUP_ID, &policy())
        .await
        .unwrap_err();
    let err_msg = err.to_string();
    assert!(matches!(err, ExplorerError::NotFound { .. }), "got: {err_msg}");
    assert!(err_msg.contains(GROUP_ID), "got: {err_msg}");
}

#[tokio::test]
async fn blank_input_is_rejected_before_any_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = resolve_group(&mock_client(&server), "   ", &policy())
        .await
        .unwrap_err();
    assert!(matches!(err, ExplorerError::Config(_)), "got: {err}");
}

#[tokio::test]
async fn paged_members_are_all_collected() {
    let server = MockServer::start().await;
    mount_name_search(
        &server,
        "Big",
        serde_json::json!([{"id": "grp-big", "displayName": "Big"}]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/groups/grp-big/transitiveMembers"))
        .and(query_param("$skiptoken", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "value": [{"@odata.type": "#microsoft.graph.device", "id": "o2", "deviceId": "aad-2"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/groups/grp-big/transitiveMembers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "value": [{"@odata.type": "#microsoft.graph.device", "id": "o1", "deviceId": "aad-1"}],
            "@odata.nextLink": format!("{}/groups/grp-big/transitiveMembers?$skiptoken=2", server.uri())
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/groups/grp-big/transitiveMemberOf"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"value": []})))
        .mount(&server)
        .await;

    let group = resolve_group(&mock_client(&server), "Big", &policy())
        .await
        .unwrap();
    assert_eq!(group.member_device_ids.len(), 2);
}

#[tokio::test]
async fn throttled_lookup_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/groups/{GROUP_ID}")))
        .respond_with(ResponseTemplate::new(429).append_header("Retry-After", "0"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/groups/{GROUP_ID}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": GROUP_ID,
            "displayName": "Finance-Laptops"
        })))
        .mount(&server)
        .await;
    mount_relations(&server, GROUP_ID, serde_json::json!([]), serde_json::json!([])).await;

    let group = resolve_group(&mock_client(&server), GROUP_ID, &policy())
        .await
        .unwrap();
    assert_eq!(group.display_name, "Finance-Laptops");
}
