use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use remdit_server::config::Config;
use remdit_server::routes::{create_router, AppState};
use remdit_server::services::{FileRegistry, SshConnRegistry, StagedFile};
use remdit_server::ws::HubManager;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct TestApp {
    app: axum::Router,
    state: AppState,
    uploads_dir: PathBuf,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.uploads_dir).ok();
    }
}

fn test_app_with(configure: impl FnOnce(&mut Config)) -> TestApp {
    let uploads_dir =
        std::env::temp_dir().join(format!("remdit-api-test-{}", uuid::Uuid::new_v4()));
    let mut config = Config::default();
    config.uploads_dir = uploads_dir.display().to_string();
    configure(&mut config);
    let config = Arc::new(config);

    let files = Arc::new(FileRegistry::new());
    let ssh_conns = Arc::new(SshConnRegistry::new());
    let hubs = Arc::new(HubManager::new(
        files.clone(),
        ssh_conns.clone(),
        Duration::from_secs(3600),
    ));
    let state = AppState {
        config,
        files,
        ssh_conns,
        hubs,
    };
    TestApp {
        app: create_router(state.clone()),
        state,
        uploads_dir,
    }
}

fn test_app() -> TestApp {
    test_app_with(|_| {})
}

/// Stage a file and publish it the way a listening SSH session would.
async fn publish_file(app: &TestApp, content: &[u8]) -> String {
    let fileid = uuid::Uuid::new_v4().to_string();
    let staged = Arc::new(StagedFile::new(&app.uploads_dir, &fileid));
    staged.stage_bytes("a.txt", content).await.expect("stage");
    app.state.files.insert(&fileid, staged).await;
    fileid
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

/// Serve the app on an ephemeral port for tests that need real sockets.
async fn spawn_server(app: &TestApp) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let router = app.app.clone();
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    addr
}

fn multipart_request(uri: &str, filename: &str, content: &[u8]) -> Request<Body> {
    let boundary = "remdit-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"document\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .expect("request")
}

#[tokio::test]
async fn get_file_rejects_malformed_and_unknown_ids() {
    let app = test_app();

    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/file/not-a-uuid")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid fileid format");

    let missing = uuid::Uuid::new_v4();
    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/file/{missing}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"], "file not found");
}

#[tokio::test]
async fn get_file_returns_content_and_metadata() {
    let app = test_app();
    let fileid = publish_file(&app, b"hello\nworld").await;

    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/file/{fileid}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["fileid"], fileid.as_str());
    assert_eq!(body["content"], "hello\nworld");
    assert_eq!(body["filename"], "a.txt");
    assert_eq!(body["roomexists"], false);
    assert_eq!(body["language"], "plaintext");
}

#[tokio::test]
async fn put_without_hub_is_not_found() {
    let app = test_app();
    let fileid = publish_file(&app, b"old").await;

    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/api/file/{fileid}"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"content":"new"}"#))
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"], "editing hub not found");
}

#[tokio::test]
async fn put_roundtrips_through_the_session_socket() {
    let app = test_app();
    let fileid = publish_file(&app, b"old").await;

    // attach a session leg the way the session WS upgrade would
    let (session_tx, mut session_rx) = tokio::sync::mpsc::channel(8);
    let hub = app
        .state
        .hubs
        .create_hub(&fileid, session_tx)
        .await
        .expect("create hub");

    // the client program: confirm the save when it arrives
    let confirmer = {
        let hub = hub.clone();
        tokio::spawn(async move {
            let msg = session_rx.recv().await.expect("save notification");
            match msg {
                axum::extract::ws::Message::Text(text) => {
                    assert_eq!(text, r#"{"type":"save","content":"new"}"#);
                }
                other => panic!("unexpected session frame: {other:?}"),
            }
            hub.handle_save_result(true, None).await;
        })
    };

    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/api/file/{fileid}"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"content":"new"}"#))
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["message"], "file saved successfully");
    confirmer.await.expect("confirmer");

    // round-trip: what was saved is what reads back
    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/file/{fileid}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    let body = body_json(response).await;
    assert_eq!(body["content"], "new");
    assert_eq!(body["roomexists"], true);
}

#[tokio::test]
async fn put_surfaces_the_clients_rejection_reason() {
    let app = test_app();
    let fileid = publish_file(&app, b"old").await;
    let (session_tx, mut session_rx) = tokio::sync::mpsc::channel(8);
    let hub = app
        .state
        .hubs
        .create_hub(&fileid, session_tx)
        .await
        .expect("create hub");

    let rejecter = {
        let hub = hub.clone();
        tokio::spawn(async move {
            session_rx.recv().await.expect("save notification");
            hub.handle_save_result(false, Some("file is read-only".to_string()))
                .await;
        })
    };

    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/api/file/{fileid}"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"content":"new"}"#))
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["error"], "file is read-only");
    rejecter.await.expect("rejecter");
}

#[tokio::test(start_paused = true)]
async fn put_times_out_when_the_client_never_answers() {
    let app = test_app();
    let fileid = publish_file(&app, b"old").await;
    let (session_tx, _session_rx) = tokio::sync::mpsc::channel(8);
    app.state
        .hubs
        .create_hub(&fileid, session_tx)
        .await
        .expect("create hub");

    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/api/file/{fileid}"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"content":"new"}"#))
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["error"], "timeout waiting for client response");
}

#[tokio::test]
async fn create_session_stages_and_publishes_the_document() {
    let app = test_app();

    let response = app
        .app
        .clone()
        .oneshot(multipart_request("/api/session", "notes.md", b"# hi"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let sessionid = body["sessionid"].as_str().expect("sessionid");
    uuid::Uuid::parse_str(sessionid).expect("sessionid is a uuid");
    let editurl = body["editurl"].as_str().expect("editurl");
    assert!(editurl.ends_with(&format!("/edit/{sessionid}")));

    // the document is immediately readable
    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/file/{sessionid}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["content"], "# hi");
    assert_eq!(body["filename"], "notes.md");
    assert_eq!(body["language"], "markdown");
}

#[tokio::test]
async fn create_session_rejects_oversized_documents() {
    let app = test_app();
    let oversized = vec![b'x'; remdit_server::config::MAX_FILE_SIZE + 1];

    let response = app
        .app
        .clone()
        .oneshot(multipart_request("/api/session", "big.bin", &oversized))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"]
        .as_str()
        .expect("error")
        .contains("exceeds max size"));
}

#[tokio::test]
async fn create_session_requires_the_document_field() {
    let app = test_app();
    let boundary = "remdit-test-boundary";
    let body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"other\"\r\n\r\nx\r\n--{boundary}--\r\n"
    );
    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/session")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(body))
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "document is required");
}

#[tokio::test]
async fn end_to_end_editing_session() {
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::{connect_async, tungstenite};

    let app = test_app();
    let addr = spawn_server(&app).await;
    let fileid = publish_file(&app, b"hello\nworld").await;

    // no hub yet: the browser room upgrade is refused
    let err = connect_async(format!("ws://{addr}/api/socket/{fileid}"))
        .await
        .expect_err("room must not exist yet");
    match err {
        tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }
        other => panic!("unexpected connect error: {other}"),
    }

    // the client program attaches its session socket, creating the hub
    let (mut session_ws, _) = connect_async(format!("ws://{addr}/api/session/{fileid}"))
        .await
        .expect("session upgrade");

    // a second session socket for the same id collides
    let err = connect_async(format!("ws://{addr}/api/session/{fileid}"))
        .await
        .expect_err("duplicate session must be refused");
    match err {
        tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), StatusCode::CONFLICT);
        }
        other => panic!("unexpected connect error: {other}"),
    }

    // now the browsers can join the room
    let (mut browser_a, _) = connect_async(format!("ws://{addr}/api/socket/{fileid}"))
        .await
        .expect("room upgrade for a");
    let (mut browser_b, _) = connect_async(format!("ws://{addr}/api/socket/{fileid}"))
        .await
        .expect("room upgrade for b");

    // binary frames fan out to the other peers only
    browser_a
        .send(tungstenite::Message::Binary(vec![0x01, 0x02, 0x03]))
        .await
        .expect("send edit frame");
    let received = tokio::time::timeout(Duration::from_secs(2), browser_b.next())
        .await
        .expect("frame within deadline")
        .expect("stream open")
        .expect("frame");
    assert_eq!(
        received,
        tungstenite::Message::Binary(vec![0x01, 0x02, 0x03])
    );
    assert!(
        tokio::time::timeout(Duration::from_millis(200), browser_a.next())
            .await
            .is_err(),
        "sender must not hear its own frame"
    );

    // a save round-trips through the session socket
    let put = {
        let app = app.app.clone();
        let fileid = fileid.clone();
        tokio::spawn(async move {
            app.oneshot(
                Request::builder()
                    .method("PUT")
                    .uri(format!("/api/file/{fileid}"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"content":"new"}"#))
                    .expect("request"),
            )
            .await
            .expect("response")
        })
    };
    let save = tokio::time::timeout(Duration::from_secs(2), session_ws.next())
        .await
        .expect("save notification within deadline")
        .expect("stream open")
        .expect("frame");
    assert_eq!(
        save,
        tungstenite::Message::Text(r#"{"type":"save","content":"new"}"#.to_string())
    );
    session_ws
        .send(tungstenite::Message::Text(
            r#"{"type":"save_result","success":true}"#.to_string(),
        ))
        .await
        .expect("send save result");
    let response = put.await.expect("put task");
    assert_eq!(response.status(), StatusCode::OK);

    // closing the session socket tears the whole session down
    session_ws.close(None).await.expect("close session");
    for _ in 0..100 {
        if !app.state.hubs.exists_hub(&fileid).await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!app.state.hubs.exists_hub(&fileid).await);
    assert!(app.state.files.get(&fileid).await.is_none());

    // the browsers observe their sockets closing
    let next = tokio::time::timeout(Duration::from_secs(2), browser_b.next())
        .await
        .expect("close within deadline");
    match next {
        None | Some(Ok(tungstenite::Message::Close(_))) | Some(Err(_)) => {}
        Some(Ok(other)) => panic!("unexpected frame after teardown: {other}"),
    }
}

#[tokio::test]
async fn cleanup_session_reclaims_everything() {
    let app = test_app();
    let fileid = publish_file(&app, b"hello").await;
    let staged = app.state.files.get(&fileid).await.expect("staged");
    let temp_dir = staged.temp_dir().to_path_buf();
    let (session_tx, _session_rx) = tokio::sync::mpsc::channel(8);
    app.state
        .hubs
        .create_hub(&fileid, session_tx)
        .await
        .expect("create hub");

    app.state.hubs.cleanup_session(&fileid).await;

    assert!(!app.state.hubs.exists_hub(&fileid).await);
    assert!(app.state.files.get(&fileid).await.is_none());
    assert!(!temp_dir.exists());

    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/file/{fileid}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn api_key_gate_blocks_without_a_key_and_exempts_session_creation() {
    let app = test_app_with(|config| {
        config.api_key_auth = true;
        config.api_keys = vec!["secret-key".to_string()];
    });
    let fileid = publish_file(&app, b"hello").await;

    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/file/{fileid}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/file/{fileid}"))
                .header("x-api-key", "secret-key")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/file/{fileid}"))
                .header("x-api-key", "wrong-key")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // session creation stays open so clients can bootstrap
    let response = app
        .app
        .clone()
        .oneshot(multipart_request("/api/session", "a.txt", b"hi"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
}
