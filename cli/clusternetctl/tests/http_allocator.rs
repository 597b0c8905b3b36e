//! HTTP allocator behavior against a mock allocator API.
//!
//! Run with: cargo test -p clusternetctl --test http_allocator

use std::fs;
use std::time::Duration;

use clap::Parser;
use clusternet_reconcile::{
    AllocationError, AllocationRequest, AllocatorService, ClusterStatus,
};
use clusternetctl::cli::Cli;
use clusternetctl::client::{ClientSettings, HttpAllocator};
use serde_json::json;
use tokio::sync::watch;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// `admin:admin`
const BASIC_ADMIN: &str = "Basic YWRtaW46YWRtaW4=";

fn settings(server: &MockServer) -> ClientSettings {
    ClientSettings {
        api_url: format!("{}/api", server.uri()),
        username: "admin".to_string(),
        password: "admin".to_string(),
        connect_timeout: Duration::from_secs(5),
        request_timeout: Duration::from_secs(10),
    }
}

fn request() -> AllocationRequest {
    AllocationRequest {
        cluster_name: "ocp4-cluster-1".to_string(),
        site: "site1".to_string(),
        vrf: "Network1".to_string(),
    }
}

fn allocator(server: &MockServer) -> HttpAllocator {
    HttpAllocator::new(&settings(server)).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    assert!(allocator(&server).health_check().await);
}

#[tokio::test]
async fn test_health_check_fails_on_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    assert!(!allocator(&server).health_check().await);
}

#[tokio::test]
async fn test_health_check_fails_when_unreachable() {
    let server = MockServer::start().await;
    let settings = settings(&server);
    drop(server);

    assert!(!HttpAllocator::new(&settings).unwrap().health_check().await);
}

#[tokio::test]
async fn test_allocate_vlan_sends_credentials_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/allocate-vlan"))
        .and(header("authorization", BASIC_ADMIN))
        .and(body_json(json!({
            "cluster_name": "ocp4-cluster-1",
            "site": "site1",
            "vrf": "Network1"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "vlan_id": 120,
            "cluster_name": "ocp4-cluster-1",
            "site": "site1",
            "segment": "192.168.120.0/24",
            "epg_name": "EPG_ocp4-cluster-1_120",
            "vrf": "Network1",
            "allocated_at": "2024-05-01T12:30:00.123456"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let result = allocator(&server).allocate_vlan(&request()).await.unwrap();

    assert_eq!(result.vlan_id.get(), 120);
    assert_eq!(result.segment.to_string(), "192.168.120.0/24");
    assert_eq!(result.epg_name, "EPG_ocp4-cluster-1_120");
    assert_eq!(
        result.allocated_at.format("%Y-%m-%dT%H:%M:%S").to_string(),
        "2024-05-01T12:30:00"
    );
}

#[tokio::test]
async fn test_allocate_vlan_status_mapping() {
    let cases = [
        (503, AllocationError::NoAvailableSegment {
            site: "site1".to_string(),
            vrf: "Network1".to_string(),
        }),
        (401, AllocationError::AuthenticationFailed),
        (403, AllocationError::AuthenticationFailed),
        (422, AllocationError::Rejected {
            status: 422,
            message: "cluster_name is required".to_string(),
        }),
        (500, AllocationError::ServiceUnavailable(
            "HTTP 500: cluster_name is required".to_string(),
        )),
    ];

    for (status, expected) in cases {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/allocate-vlan"))
            .respond_with(
                ResponseTemplate::new(status)
                    .set_body_json(json!({"detail": "cluster_name is required"})),
            )
            .mount(&server)
            .await;

        let err = allocator(&server)
            .allocate_vlan(&request())
            .await
            .unwrap_err();
        assert_eq!(err, expected, "status {status}");
    }
}

#[tokio::test]
async fn test_allocate_vlan_accepts_quoted_vlan_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/allocate-vlan"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "vlan_id": "120",
            "segment": "192.168.120.0/24"
        })))
        .mount(&server)
        .await;

    let result = allocator(&server).allocate_vlan(&request()).await.unwrap();

    assert_eq!(result.vlan_id.get(), 120);
    assert_eq!(result.epg_name, "EPG_ocp4-cluster-1_120");
}

#[tokio::test]
async fn test_allocate_vlan_rejects_incomplete_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/allocate-vlan"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"vlan_id": 120})))
        .mount(&server)
        .await;

    let err = allocator(&server).allocate_vlan(&request()).await.unwrap_err();
    assert!(matches!(err, AllocationError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_allocate_vlan_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/allocate-vlan"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let client = HttpAllocator::new(&ClientSettings {
        request_timeout: Duration::from_millis(200),
        ..settings(&server)
    })
    .unwrap();

    let err = client.allocate_vlan(&request()).await.unwrap_err();
    assert!(matches!(err, AllocationError::ServiceUnavailable(_)));
}

#[tokio::test]
async fn test_fetch_allocated_segments_filters_vrf() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/segments"))
        .and(query_param("allocated", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "segments": [
                {"cluster_name": "mce-site1-prod", "segment": "192.168.110.0/24", "vrf": "Network1"},
                {"cluster_name": "mce-other", "segment": "192.168.111.0/24", "vrf": "Network2"},
                {"cluster_name": "ocp4-legacy", "segment": "192.168.112.0/24"},
                {"cluster_name": "ocp4-broken", "segment": "not-a-cidr"},
                {"segment": "192.168.113.0/24"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let segments = allocator(&server)
        .fetch_allocated_segments("Network1")
        .await
        .unwrap();

    assert_eq!(
        segments.keys().map(String::as_str).collect::<Vec<_>>(),
        ["mce-site1-prod", "ocp4-legacy"]
    );
    assert_eq!(segments["mce-site1-prod"].to_string(), "192.168.110.0/24");
}

#[tokio::test]
async fn test_lookup_segment_matches_exact_name() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/segments/search"))
        .and(query_param("q", "mce-site1-prod"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"cluster_name": "mce-site1-prod-old", "segment": "192.168.100.0/24"},
            {"cluster_name": "mce-site1-prod", "segment": "192.168.110.0/24"}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/segments/search"))
        .and(query_param("q", "mce-unknown"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let client = allocator(&server);
    assert_eq!(
        client.lookup_segment("mce-site1-prod").await.unwrap(),
        Some("192.168.110.0/24".parse().unwrap())
    );
    assert_eq!(client.lookup_segment("mce-unknown").await.unwrap(), None);
}

#[tokio::test]
async fn test_run_against_mock_api() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/segments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"cluster_name": "mce-site1-prod", "segment": "192.168.110.0/24", "vrf": "Network1"}
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/allocate-vlan"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "vlan_id": 120,
            "segment": "192.168.120.0/24",
            "epg_name": "EPG_ocp4-cluster-1_120",
            "allocated_at": "2024-05-01T12:30:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let descriptor = dir
        .path()
        .join("sites/site1/mce-tenant-clusters/mce-prod/mce-site1-prod/ocp4-cluster-1.yaml");
    fs::create_dir_all(descriptor.parent().unwrap()).unwrap();
    fs::write(&descriptor, "clusterName: ocp4-cluster-1\n").unwrap();
    let config = dir.path().join("config.json");
    fs::write(&config, "{}").unwrap();

    let cli = Cli::try_parse_from([
        "clusternet".to_string(),
        "--api-url".to_string(),
        format!("{}/api", server.uri()),
        "--sites-dir".to_string(),
        dir.path().join("sites").display().to_string(),
        "--config".to_string(),
        config.display().to_string(),
        "--api-username".to_string(),
        "admin".to_string(),
        "--api-password".to_string(),
        "admin".to_string(),
        "--vrf".to_string(),
        "Network1".to_string(),
    ])
    .unwrap();

    let (_tx, rx) = watch::channel(false);
    let summary = clusternetctl::run(&cli, rx).await.unwrap();

    assert!(!summary.mock_allocation);
    assert_eq!(summary.outcomes[0].status, ClusterStatus::Updated);
    assert!(!summary.has_failures());

    let text = fs::read_to_string(&descriptor).unwrap();
    assert!(text.starts_with("clusterName: ocp4-cluster-1\nvlanId: 120\nNetworks:\n"));
    assert!(text.contains("system-name: mce-site1-prod"));
}
