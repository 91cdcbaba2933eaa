use easel_diffusion::{DiffusionError, HealthProbe, ServerClient, Workflow};
use easel_ipc::{ClassicWorkflowParams, JobId, SubmitOptions};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn options(client_id: &str) -> SubmitOptions {
    SubmitOptions {
        client_id: Some(client_id.to_string()),
    }
}

#[tokio::test]
async fn test_submit_returns_job_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/prompt"))
        .and(body_partial_json(json!({
            "client_id": "session-1",
            "prompt": {"1": {"class_type": "CheckpointLoaderSimple"}}
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"prompt_id": "abc123", "number": 0, "node_errors": {}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = ServerClient::new(server.uri());
    let graph = r#"{"1":{"class_type":"CheckpointLoaderSimple","inputs":{"ckpt_name":"model.safetensors"}}}"#;

    let job_id = client.submit(graph, &options("session-1")).await.unwrap();
    assert_eq!(job_id, JobId::from("abc123"));
}

#[tokio::test]
async fn test_submit_generates_client_id_when_missing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"prompt_id": "p-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = ServerClient::new(server.uri());
    client
        .submit(r#"{"1":{}}"#, &SubmitOptions::default())
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let client_id = body["client_id"].as_str().unwrap();
    assert!(uuid::Uuid::parse_str(client_id).is_ok());
}

#[tokio::test]
async fn test_submit_server_error_is_submission_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(ResponseTemplate::new(500).set_body_string("node 7 is invalid"))
        .mount(&server)
        .await;

    let client = ServerClient::new(server.uri());
    let err = client
        .submit(r#"{"1":{}}"#, &options("s"))
        .await
        .unwrap_err();

    assert!(err.is_submission_failure());
    match err {
        DiffusionError::Server { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "node 7 is invalid");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_submit_rejects_invalid_json_without_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"prompt_id": "x"})))
        .expect(0)
        .mount(&server)
        .await;

    let client = ServerClient::new(server.uri());

    let err = client.submit("{not json", &options("s")).await.unwrap_err();
    assert!(matches!(err, DiffusionError::InvalidInput(_)));
    assert!(!err.is_submission_failure());

    let err = client.submit("[1, 2]", &options("s")).await.unwrap_err();
    assert!(matches!(err, DiffusionError::InvalidInput(_)));
}

#[tokio::test]
async fn test_submit_missing_prompt_id_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"number": 3})))
        .mount(&server)
        .await;

    let client = ServerClient::new(server.uri());
    let err = client
        .submit(r#"{"1":{}}"#, &options("s"))
        .await
        .unwrap_err();
    assert!(matches!(err, DiffusionError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_submit_unreachable_server_is_transport_failure() {
    // Nothing listens on port 9 on a test machine.
    let client = ServerClient::new("http://127.0.0.1:9");
    let err = client
        .submit(r#"{"1":{}}"#, &options("s"))
        .await
        .unwrap_err();
    assert!(matches!(err, DiffusionError::Transport(_)));
    assert!(err.is_submission_failure());
}

#[tokio::test]
async fn test_submit_built_graph() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/prompt"))
        .and(body_partial_json(json!({
            "prompt": {
                "2": {"class_type": "CLIPTextEncode", "inputs": {"text": "a red fox"}}
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"prompt_id": "fox"})))
        .expect(1)
        .mount(&server)
        .await;

    let params = ClassicWorkflowParams {
        positive_prompt: "a red fox".into(),
        checkpoint: "sd15.safetensors".into(),
        seed: 42,
        ..Default::default()
    };

    let client = ServerClient::new(server.uri());
    let job_id = client
        .submit_graph(&params.build(), &options("s"))
        .await
        .unwrap();
    assert_eq!(job_id.as_str(), "fox");
}

#[tokio::test]
async fn test_health_probe() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/system_stats"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"system": {"os": "nt"}})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/system_stats"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = ServerClient::new(server.uri());
    let body = client.probe().await.unwrap();
    assert!(body.contains("system"));

    let err = client.probe().await.unwrap_err();
    assert!(matches!(err, DiffusionError::Server { status: 503, .. }));
}
