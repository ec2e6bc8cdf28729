//! HTTP-level tests of the external scheduling surface over the in-memory
//! backends.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use cortex::extractors::flavor_host_space::FlavorHostSpace;
use cortex::extractors::host_cpu_contention::HostCpuContention;
use cortex::features::inventory::OpenStackFlavor;
use cortex::extractors::host_utilization::HostUtilization;

use common::test_app;

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn nova_request(hosts: &[&str]) -> Value {
    json!({
        "spec": {"data": {
            "instance_uuid": "6b12d5c4-0001-4a57-9d8f-5a2b1a000001",
            "project_id": "project-1",
            "availability_zone": "az-1",
            "flavor": {"data": {
                "id": "42", "name": "m1.small", "memory_mb": 2048,
                "vcpus": 1, "root_gb": 20, "ephemeral_gb": 0,
                "rxtx_factor": 1.0, "is_public": true, "extra_specs": {}
            }},
            "scheduler_hints": {},
            "num_instances": 1
        }},
        "context": {"project_id": "project-1", "project_domain_id": "default"},
        "rebuild": false, "resize": false, "live": false, "vmware": false,
        "hosts": hosts.iter()
            .map(|h| json!({"compute_host": h, "hypervisor_hostname": format!("{h}.domain")}))
            .collect::<Vec<_>>(),
        "weights": hosts.iter().map(|h| ((*h).to_string(), json!(0.0))).collect::<serde_json::Map<_, _>>(),
    })
}

fn contention(host: &str, avg: f64) -> HostCpuContention {
    HostCpuContention {
        compute_host: host.to_string(),
        avg_cpu_contention: avg,
        max_cpu_contention: avg,
    }
}

#[tokio::test]
async fn ranked_hosts_come_back_in_weight_order() {
    let app = test_app().await;
    app.store
        .seed(&[
            contention("host-a", 10.0),
            contention("host-b", 50.0),
            contention("host-c", 90.0),
        ])
        .await
        .unwrap();

    let response = app
        .router
        .oneshot(post(
            "/scheduler/nova/external",
            nova_request(&["host-c", "host-a", "host-b"]),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body, json!({"hosts": ["host-a", "host-b", "host-c"]}));
}

#[tokio::test]
async fn resize_requests_are_rejected() {
    let app = test_app().await;
    let mut body = nova_request(&["host-a"]);
    body["resize"] = json!(true);

    let response = app
        .router
        .oneshot(post("/scheduler/nova/external", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("resize"));
}

#[tokio::test]
async fn baremetal_flavors_are_rejected() {
    let app = test_app().await;
    let mut body = nova_request(&["host-a"]);
    body["spec"]["data"]["flavor"]["data"]["extra_specs"] =
        json!({"capabilities:cpu_arch": "x86_64"});

    let response = app
        .router
        .oneshot(post("/scheduler/nova/external", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("baremetal"));
}

#[tokio::test]
async fn hosts_without_weights_are_rejected() {
    let app = test_app().await;
    let mut body = nova_request(&["host-a", "host-b"]);
    body["weights"].as_object_mut().unwrap().remove("host-b");

    let response = app
        .router
        .oneshot(post("/scheduler/nova/external", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn weights_for_unknown_hosts_are_rejected() {
    let app = test_app().await;
    let mut body = nova_request(&["host-a"]);
    body["weights"]
        .as_object_mut()
        .unwrap()
        .insert("ghost-host".to_string(), json!(1.0));

    let response = app
        .router
        .oneshot(post("/scheduler/nova/external", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_pipeline_names_are_rejected() {
    let app = test_app().await;
    app.store.seed::<HostCpuContention>(&[]).await.unwrap();
    let mut body = nova_request(&["host-a"]);
    body["pipeline"] = json!("missing");

    let response = app
        .router
        .oneshot(post("/scheduler/nova/external", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn decisions_are_recorded_and_listable() {
    let app = test_app().await;
    app.store.seed(&[contention("host-a", 20.0)]).await.unwrap();

    let response = app
        .router
        .clone()
        .oneshot(post("/scheduler/nova/external", nova_request(&["host-a"])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .router
        .clone()
        .oneshot(get(
            "/scheduler/nova/scheduling-decisions?vm_id=6b12d5c4-0001-4a57-9d8f-5a2b1a000001",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let records = body.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["ready"], json!(true));
    assert_eq!(records[0]["final_hosts"], json!(["host-a"]));

    let response = app
        .router
        .oneshot(get("/scheduler/nova/scheduling-decisions?vm_id=other"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn feasible_commitment_changes_are_accepted() {
    let app = test_app().await;
    app.store
        .seed(&[OpenStackFlavor {
            id: "42".into(),
            name: "m1.small".into(),
            vcpus: 1,
            ram_mb: 2048,
            disk_gb: 20,
            ephemeral_gb: 0,
            extra_specs: json!({"capabilities:hypervisor_type": "qemu"}),
        }])
        .await
        .unwrap();
    app.store
        .seed(&[HostUtilization {
            compute_host: "host-a".into(),
            vcpus: 32,
            vcpus_used: 0,
            memory_mb: 65536,
            memory_mb_used: 0,
            local_gb: 1000,
            local_gb_used: 0,
            ram_utilized_pct: 0.0,
            cpu_utilized_pct: 0.0,
            disk_utilized_pct: 0.0,
        }])
        .await
        .unwrap();
    app.store
        .seed(&[FlavorHostSpace {
            flavor_name: "m1.small".into(),
            compute_host: "host-a".into(),
            fits: true,
            ram_left_mb: 1024,
            vcpus_left: 31,
            disk_left_gb: 980,
        }])
        .await
        .unwrap();

    let response = app
        .router
        .oneshot(post(
            "/scheduler/nova/commitments/change",
            json!({
                "project_id": "project-1",
                "commitments": [
                    {"resource": "instances_m1.small", "confirmed_before": 1, "confirmed_after": 2}
                ]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["rejection_reason"], json!(""));
    assert_eq!(body["retry_at"], json!(null));
}

#[tokio::test]
async fn missing_flavor_commitments_are_rejected_without_retry() {
    let app = test_app().await;
    app.store
        .seed(&[OpenStackFlavor {
            id: "42".into(),
            name: "m1.small".into(),
            vcpus: 1,
            ram_mb: 2048,
            disk_gb: 20,
            ephemeral_gb: 0,
            extra_specs: json!({}),
        }])
        .await
        .unwrap();

    let response = app
        .router
        .oneshot(post(
            "/scheduler/nova/commitments/change",
            json!({
                "project_id": "project-1",
                "commitments": [
                    {"resource": "instances_ghost", "confirmed_before": 0, "confirmed_after": 1}
                ]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["rejection_reason"]
        .as_str()
        .unwrap()
        .contains("flavor not found"));
    assert_eq!(body["retry_at"], json!(null));
}

#[tokio::test]
async fn metrics_and_liveness_endpoints_respond() {
    let app = test_app().await;

    let response = app.router.clone().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.router.oneshot(get("/up")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn cinder_requests_rank_volume_hosts() {
    let app = test_app().await;
    app.store.seed::<HostCpuContention>(&[]).await.unwrap();

    let response = app
        .router
        .oneshot(post(
            "/scheduler/cinder/external",
            json!({
                "spec": {"data": {
                    "volume_id": "vol-1", "project_id": "project-1",
                    "availability_zone": "az-1", "size_gb": 100
                }},
                "hosts": [{"volume_host": "backend-1"}, {"volume_host": "backend-2"}],
                "weights": {"backend-1": 0.2, "backend-2": 0.8}
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body, json!({"hosts": ["backend-2", "backend-1"]}));
}
