use axum::{
    Router,
    body::{Body, BodyDataStream, Bytes},
    http::{Request, Response, StatusCode, header},
};
use core::time::Duration;
use futures::StreamExt;
use notegen_core::{
    encoder::{StreamEncoder, StreamRecord},
    model::{GenerationRequest, Model, ModelError, NoteSink},
    pianoroll::{Pianoroll, PianorollNote},
    replay::ReplayModel,
    types::{BEATS_PER_BAR, ClientId, FRAMES_PER_BEAT, NoteEvent},
};
use notegen_server::{AppState, FailurePolicy, ServerConfig, router};
use std::{fs, sync::Arc, time::Instant};
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "notegen-test-boundary";

const REPLAY_PARAMS: &str = r#"{
    "range_to_generate": {"start_beat": 8, "end_beat": 16},
    "segments": [
        {"start_bar": 0, "end_bar": 2, "label": "A", "is_seed": true},
        {"start_bar": 2, "end_bar": 4, "label": "A", "is_seed": false}
    ],
    "song_duration": 16
}"#;

/// Emits one note, then idles until cancelled (or two seconds pass).
struct Stalls;

impl Model for Stalls {
    fn generate(
        &self,
        _: &GenerationRequest,
        sink: &mut dyn NoteSink,
    ) -> Result<(), ModelError> {
        sink.emit(NoteEvent::new(0.0, 60, 100, 1.0));
        let deadline = Instant::now() + Duration::from_secs(2);
        while !sink.is_cancelled() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }
}

struct Fails;

impl Model for Fails {
    fn generate(
        &self,
        _: &GenerationRequest,
        sink: &mut dyn NoteSink,
    ) -> Result<(), ModelError> {
        sink.emit(NoteEvent::new(0.0, 60, 100, 1.0));
        Err(ModelError::new("model ran out of memory"))
    }
}

struct TestServer {
    _dir: TempDir,
    state: AppState,
    app: Router,
}

impl TestServer {
    fn new(model: impl Model + 'static) -> Self {
        Self::with_config(model, |_| {})
    }

    fn with_config(model: impl Model + 'static, tweak: impl FnOnce(&mut ServerConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServerConfig::rooted_at(dir.path());

        fs::create_dir_all(config.frontend_dir.join("assets")).unwrap();
        fs::write(config.frontend_dir.join("index.html"), "<html>notegen</html>").unwrap();
        fs::write(config.frontend_dir.join("assets/app.js"), "console.log(1)").unwrap();

        fs::create_dir_all(&config.assets_dir).unwrap();
        fs::write(config.assets_dir.join("b.mid"), midi()).unwrap();
        fs::write(config.assets_dir.join("a.MIDI"), midi()).unwrap();
        fs::write(config.assets_dir.join("readme.txt"), "not midi").unwrap();

        fs::create_dir_all(config.resource_dir.join("songs/live")).unwrap();
        fs::write(config.resource_dir.join("top.txt"), "top").unwrap();
        fs::write(config.resource_dir.join("songs/one.mid"), midi()).unwrap();

        fs::write(dir.path().join("secret.txt"), "secret").unwrap();

        tweak(&mut config);
        let state = AppState::new(config, Arc::new(model));
        let app = router(state.clone());
        Self {
            _dir: dir,
            state,
            app,
        }
    }

    async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    fn client(id: &str) -> ClientId {
        ClientId::try_from(id).unwrap()
    }
}

/// Two bars of seed material: one quarter note per bar.
fn midi() -> Vec<u8> {
    let notes = vec![
        PianorollNote {
            onset: 0,
            pitch: 60,
            velocity: 100,
            offset: 8,
        },
        PianorollNote {
            onset: 32,
            pitch: 62,
            velocity: 100,
            offset: 40,
        },
    ];
    Pianoroll::from_notes(notes, FRAMES_PER_BEAT, BEATS_PER_BAR)
        .to_midi(480)
        .unwrap()
}

fn multipart_body(fields: &[(&str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        if *name == "midi_file" {
            body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"song.mid\"\r\n\
                     Content-Type: audio/midi\r\n\r\n"
                )
                .as_bytes(),
            );
        } else {
            body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            );
        }
        body.extend_from_slice(value);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn generate_request(fields: &[(&str, &[u8])]) -> Request<Body> {
    Request::post("/api/generate/")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(fields)))
        .unwrap()
}

fn generate(client_id: &str) -> Request<Body> {
    let midi = midi();
    generate_request(&[
        ("midi_file", midi.as_slice()),
        ("params", REPLAY_PARAMS.as_bytes()),
        ("client_id", client_id.as_bytes()),
    ])
}

async fn body_bytes(response: Response<Body>) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn records(body: &[u8]) -> Vec<StreamRecord> {
    StreamEncoder::split_records(body)
        .map(|line| StreamEncoder::decode_record(line).unwrap())
        .collect()
}

async fn next_chunk(stream: &mut BodyDataStream) -> Option<Bytes> {
    tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("stream stalled")
        .map(|chunk| chunk.unwrap())
}

#[tokio::test]
async fn generate_streams_replayed_notes() {
    let server = TestServer::new(ReplayModel::new());
    let response = server.send(generate("c1")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/midi");

    let body = body_bytes(response).await;
    assert_eq!(
        records(&body),
        vec![
            StreamRecord::Note(NoteEvent::new(8.0, 60, 100, 1.0)),
            StreamRecord::Note(NoteEvent::new(12.0, 62, 100, 1.0)),
        ]
    );
    assert!(server.state.registry.is_empty());
    assert_eq!(server.state.coordinator.inflight(), 0);
}

#[tokio::test]
async fn generate_without_trailing_slash() {
    let server = TestServer::new(ReplayModel::new());
    let mut request = generate("c1");
    *request.uri_mut() = "/api/generate".parse().unwrap();
    let response = server.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(records(&body_bytes(response).await).len(), 2);
}

#[tokio::test]
async fn zero_segments_yield_empty_body() {
    let server = TestServer::new(ReplayModel::new());
    let midi = midi();
    let params = r#"{"range_to_generate":{"start_beat":8,"end_beat":16},"segments":[],"song_duration":16}"#;
    let response = server
        .send(generate_request(&[
            ("midi_file", midi.as_slice()),
            ("params", params.as_bytes()),
            ("client_id", b"c1".as_slice()),
        ]))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_bytes(response).await.is_empty());
    assert!(server.state.registry.is_empty());
}

#[tokio::test]
async fn same_client_preempts_previous_stream() {
    let server = TestServer::new(Stalls);

    let first = server.send(generate("c1")).await;
    assert_eq!(first.status(), StatusCode::OK);
    let mut first = first.into_body().into_data_stream();
    assert!(next_chunk(&mut first).await.is_some());
    let first_signal = server
        .state
        .registry
        .current(&TestServer::client("c1"))
        .unwrap();

    let second = server.send(generate("c1")).await;
    assert_eq!(second.status(), StatusCode::OK);
    let mut second = second.into_body().into_data_stream();
    let second_signal = server
        .state
        .registry
        .current(&TestServer::client("c1"))
        .unwrap();
    assert!(first_signal.is_set());
    assert!(!second_signal.same_as(&first_signal));

    // The older stream ends without further notes.
    assert_eq!(next_chunk(&mut first).await, None);
    drop(first);

    // Exactly one entry remains, and it belongs to the newer session.
    assert_eq!(server.state.registry.len(), 1);
    let current = server
        .state
        .registry
        .current(&TestServer::client("c1"))
        .unwrap();
    assert!(current.same_as(&second_signal));
    assert!(!current.is_set());
    assert!(next_chunk(&mut second).await.is_some());

    drop(second);
    assert!(server.state.registry.is_empty());
    assert_eq!(server.state.coordinator.inflight(), 0);
}

#[tokio::test]
async fn different_clients_run_side_by_side() {
    let server = TestServer::new(Stalls);

    let mut a = server.send(generate("a")).await.into_body().into_data_stream();
    let mut b = server.send(generate("b")).await.into_body().into_data_stream();

    assert!(next_chunk(&mut a).await.is_some());
    assert!(next_chunk(&mut b).await.is_some());
    assert_eq!(server.state.registry.len(), 2);

    drop(a);
    assert!(!server.state.registry.contains(&TestServer::client("a")));
    assert!(server.state.registry.contains(&TestServer::client("b")));
}

#[tokio::test]
async fn dropped_body_releases_client() {
    let server = TestServer::new(Stalls);
    let mut body = server.send(generate("c1")).await.into_body().into_data_stream();
    let signal = server
        .state
        .registry
        .current(&TestServer::client("c1"))
        .unwrap();

    assert!(next_chunk(&mut body).await.is_some());
    drop(body);

    assert!(signal.is_set());
    assert!(server.state.registry.is_empty());
    assert_eq!(server.state.coordinator.inflight(), 0);
}

#[tokio::test]
async fn failure_is_silent_by_default() {
    let server = TestServer::new(Fails);
    let response = server.send(generate("c1")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        records(&body_bytes(response).await),
        vec![StreamRecord::Note(NoteEvent::new(0.0, 60, 100, 1.0))]
    );
    assert!(server.state.registry.is_empty());
}

#[tokio::test]
async fn failure_record_when_configured() {
    let server = TestServer::with_config(Fails, |config| {
        config.failure_policy = FailurePolicy::ErrorRecord;
    });
    let response = server.send(generate("c1")).await;
    assert_eq!(
        records(&body_bytes(response).await),
        vec![
            StreamRecord::Note(NoteEvent::new(0.0, 60, 100, 1.0)),
            StreamRecord::Failure("model ran out of memory".into()),
        ]
    );
}

#[tokio::test]
async fn invalid_uploads_are_rejected_before_starting() {
    let server = TestServer::new(Stalls);
    let midi = midi();
    let inverted = r#"{"range_to_generate":{"start_beat":16,"end_beat":8},"segments":[],"song_duration":16}"#;

    let cases: Vec<Vec<(&str, &[u8])>> = vec![
        vec![
            ("midi_file", midi.as_slice()),
            ("params", b"{not json".as_slice()),
            ("client_id", b"c1".as_slice()),
        ],
        vec![
            ("midi_file", midi.as_slice()),
            ("params", inverted.as_bytes()),
            ("client_id", b"c1".as_slice()),
        ],
        vec![
            ("midi_file", midi.as_slice()),
            ("params", REPLAY_PARAMS.as_bytes()),
            ("client_id", b"".as_slice()),
        ],
        vec![("params", REPLAY_PARAMS.as_bytes()), ("client_id", b"c1".as_slice())],
        vec![("midi_file", midi.as_slice()), ("client_id", b"c1".as_slice())],
        vec![("midi_file", midi.as_slice()), ("params", REPLAY_PARAMS.as_bytes())],
        vec![
            ("midi_file", b"definitely not midi".as_slice()),
            ("params", REPLAY_PARAMS.as_bytes()),
            ("client_id", b"c1".as_slice()),
        ],
    ];

    for fields in cases {
        let response = server.send(generate_request(&fields)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["error"].as_str().is_some_and(|e| !e.is_empty()));
        assert!(server.state.registry.is_empty());
        assert_eq!(server.state.coordinator.inflight(), 0);
    }
}

#[tokio::test]
async fn non_multipart_upload_is_bad_request() {
    let server = TestServer::new(Stalls);
    let response = server
        .send(
            Request::post("/api/generate/")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(server.state.registry.is_empty());
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let server = TestServer::with_config(Stalls, |config| config.max_upload_bytes = 256);
    let big = vec![0_u8; 4096];
    let response = server
        .send(generate_request(&[
            ("midi_file", big.as_slice()),
            ("params", REPLAY_PARAMS.as_bytes()),
            ("client_id", b"c1".as_slice()),
        ]))
        .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(server.state.registry.is_empty());
}

#[tokio::test]
async fn generate_refused_during_shutdown() {
    let server = TestServer::new(Stalls);
    server
        .state
        .coordinator
        .shutdown(Duration::from_millis(10))
        .await;
    let response = server.send(generate("c1")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(server.state.registry.is_empty());
}

#[tokio::test]
async fn default_assets_list_and_fetch() {
    let server = TestServer::new(ReplayModel::new());

    for uri in ["/api/default_assets/", "/api/default_assets"] {
        let response = server.get(uri).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!(["a.MIDI", "b.mid"]));
    }

    let response = server.get("/api/default_assets/b.mid").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, Bytes::from(midi()));

    let response = server.get("/api/default_assets/missing.mid").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn rooted_paths_cannot_escape() {
    let server = TestServer::new(ReplayModel::new());
    for uri in [
        "/api/default_assets/..%2Fsecret.txt",
        "/api/default_assets/%2E%2E/secret.txt",
        "/api/resource/..%2Fsecret.txt",
        "/api/resource/songs/..%2F..%2Fsecret.txt",
        "/api/resource_ls/..%2F..",
        "/..%2Fsecret.txt",
    ] {
        let response = server.get(uri).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        let body = body_bytes(response).await;
        assert!(!String::from_utf8_lossy(&body).contains("secret"), "{uri}");
    }
}

#[tokio::test]
async fn resource_listing_and_files() {
    let server = TestServer::new(ReplayModel::new());

    let root = body_json(server.get("/api/resource_ls").await).await;
    assert_eq!(
        root,
        serde_json::json!({"files": ["top.txt"], "dirs": ["songs"]})
    );

    let songs = body_json(server.get("/api/resource_ls/songs").await).await;
    assert_eq!(
        songs,
        serde_json::json!({"files": ["one.mid"], "dirs": ["live"]})
    );

    let response = server.get("/api/resource/top.txt").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, Bytes::from_static(b"top"));

    let response = server.get("/api/resource/songs").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn resource_index_covers_tree() {
    let server = TestServer::new(ReplayModel::new());
    let index = body_json(server.get("/api/resource_index").await).await;
    assert_eq!(
        index,
        serde_json::json!({
            "": {"files": ["top.txt"], "dirs": ["songs"]},
            "songs": {"files": ["one.mid"], "dirs": ["live"]},
            "songs/live": {"files": [], "dirs": []},
        })
    );
}

#[tokio::test]
async fn health_reports_version() {
    let server = TestServer::new(ReplayModel::new());
    let json = body_json(server.get("/api/health").await).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn frontend_is_served() {
    let server = TestServer::new(ReplayModel::new());

    let response = server.get("/").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_bytes(response).await,
        Bytes::from_static(b"<html>notegen</html>")
    );

    let response = server.get("/assets/app.js").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, Bytes::from_static(b"console.log(1)"));

    let response = server.get("/missing.css").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = server
        .send(Request::post("/").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
