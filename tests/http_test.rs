mod common;

use common::{pseudo_random, ControlFixture, Resource, StubServer};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use zsync::transport::http::CredentialMap;
use zsync::{Credentials, EventDispatcher, Observer, Options, StatsObserver, Zsync, ZsyncError, ZsyncEvent};

#[derive(Default)]
struct Recording(Mutex<Vec<ZsyncEvent>>);

impl Observer for Recording {
    fn on_event(&self, event: &ZsyncEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}

impl Recording {
    fn names(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|event| !event.is_counter())
            .map(|event| {
                let json = serde_json::to_value(event).unwrap();
                json["type"].as_str().unwrap().to_string()
            })
            .collect()
    }
}

/// Control file served next to the target, with a relative URL
fn serve(target: &[u8], block_size: usize, resource: Resource) -> StubServer {
    let control = ControlFixture::new(target, block_size).to_bytes();
    StubServer::start(vec![
        ("/files/target.bin.zsync", Resource {
            body: control,
            ..resource.clone()
        }),
        ("/files/target.bin", resource),
    ])
}

fn options(dir: &TempDir, seed: &[u8]) -> Options {
    let seed_path = dir.path().join("seed.bin");
    fs::write(&seed_path, seed).unwrap();
    Options {
        inputs: vec![seed_path],
        output: Some(dir.path().join("out.bin")),
        ..Options::default()
    }
}

fn credentials(host: &str, user: &str, password: &str) -> CredentialMap {
    let mut map = CredentialMap::new();
    map.insert(host.to_string(), Credentials::new(user, password));
    map
}

#[test]
fn test_remote_control_file_with_relative_url() {
    let target = pseudo_random(6 * 1024, 20);
    let server = serve(&target, 1024, Resource::new(target.clone()));
    let dir = TempDir::new().unwrap();

    let options = options(&dir, &target[..3 * 1024]);
    let recording = Arc::new(Recording::default());
    let stats = Arc::new(StatsObserver::new());
    let mut events = EventDispatcher::with_observer(recording.clone());
    events.add(stats.clone());

    let path = Zsync::new(&options.http)
        .unwrap()
        .zsync(&server.url("/files/target.bin.zsync"), &options, &events)
        .unwrap();

    assert_eq!(fs::read(path).unwrap(), target);
    assert_eq!(server.range_headers("/files/target.bin"), vec!["bytes=3072-6143"]);

    assert_eq!(
        recording.names(),
        vec![
            "zsync_started",
            "control_file_download_initiated",
            "control_file_download_started",
            "control_file_read_started",
            "control_file_download_complete",
            "control_file_read_complete",
            "output_file_write_started",
            "input_file_read_started",
            "input_file_read_complete",
            "remote_file_download_initiated",
            "remote_file_download_started",
            "remote_file_range_received",
            "remote_file_download_complete",
            "output_file_write_complete",
            "zsync_complete",
        ]
    );

    let stats = stats.stats();
    let control_len = ControlFixture::new(&target, 1024).to_bytes().len() as u64;
    assert_eq!(stats.bytes_downloaded_for_control_file, control_len);
    assert_eq!(stats.bytes_downloaded_from_remote_file, 3072);
    assert_eq!(stats.total_bytes_downloaded, control_len + 3072);
    assert_eq!(stats.total_bytes_read, control_len + 3072);
}

#[test]
fn test_server_ignoring_ranges() {
    let target = pseudo_random(8 * 1024, 21);
    let server = serve(&target, 1024, Resource::new(target.clone()).ignoring_ranges());
    let dir = TempDir::new().unwrap();

    // Blocks 1 and 5 are local
    let mut seed = target[1024..2048].to_vec();
    seed.extend_from_slice(&target[5120..6144]);
    let options = options(&dir, &seed);

    let path = zsync::zsync(&server.url("/files/target.bin.zsync"), &options, None).unwrap();
    assert_eq!(fs::read(path).unwrap(), target);
    assert_eq!(
        server.range_headers("/files/target.bin"),
        vec!["bytes=0-1023,2048-5119,6144-8191"]
    );
}

#[test]
fn test_basic_auth_challenge() {
    let target = pseudo_random(4096, 22);
    let server = serve(
        &target,
        1024,
        Resource::new(target.clone()).with_auth("jdoe", "secret"),
    );
    let dir = TempDir::new().unwrap();

    let mut options = options(&dir, &[]);
    options.credentials = credentials("127.0.0.1", "jdoe", "secret");

    let path = zsync::zsync(&server.url("/files/target.bin.zsync"), &options, None).unwrap();
    assert_eq!(fs::read(path).unwrap(), target);

    // Plain HTTP: every request waits for the challenge
    let requests = server.requests();
    assert_eq!(requests.len(), 4);
    assert!(requests[0].header("authorization").is_none());
    assert!(requests[1].header("authorization").is_some());
    assert!(requests[2].header("authorization").is_none());
    assert!(requests[3].header("authorization").is_some());
}

#[test]
fn test_rejected_credentials() {
    let target = pseudo_random(1024, 23);
    let server = serve(
        &target,
        1024,
        Resource::new(target.clone()).with_auth("jdoe", "secret"),
    );
    let dir = TempDir::new().unwrap();

    let mut options = options(&dir, &[]);
    options.credentials = credentials("127.0.0.1", "jdoe", "wrong");

    let err = zsync::zsync(&server.url("/files/target.bin.zsync"), &options, None).unwrap_err();
    assert!(matches!(err, ZsyncError::Http { status: 401, .. }));
    assert_eq!(server.requests().len(), 2);
}

#[test]
fn test_missing_credentials() {
    let target = pseudo_random(1024, 24);
    let server = serve(
        &target,
        1024,
        Resource::new(target.clone()).with_auth("jdoe", "secret"),
    );
    let dir = TempDir::new().unwrap();

    let err = zsync::zsync(&server.url("/files/target.bin.zsync"), &options(&dir, &[]), None)
        .unwrap_err();
    assert!(matches!(err, ZsyncError::Http { status: 401, .. }));
    assert_eq!(server.requests().len(), 1);
}

#[test]
fn test_control_file_not_found() {
    let server = StubServer::start(vec![]);
    let dir = TempDir::new().unwrap();

    let recording = Arc::new(Recording::default());
    let err = zsync::zsync(
        &server.url("/missing.zsync"),
        &options(&dir, &[]),
        Some(recording.clone()),
    )
    .unwrap_err();

    match err {
        ZsyncError::Http { status, reason } => {
            assert_eq!(status, 404);
            assert_eq!(reason, "Not Found");
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(recording.names().last().map(String::as_str), Some("zsync_failed"));
}

#[test]
fn test_malformed_partial_response() {
    let target = pseudo_random(2048, 25);
    let server = serve(&target, 1024, Resource::new(target.clone()).malformed_ranges());
    let dir = TempDir::new().unwrap();

    let err = zsync::zsync(&server.url("/files/target.bin.zsync"), &options(&dir, &[]), None)
        .unwrap_err();
    assert!(matches!(err, ZsyncError::Http { status: 206, .. }));
    assert!(!dir.path().join("out.bin").exists());
}

#[test]
fn test_default_output_from_filename() {
    let target = pseudo_random(1024, 26);
    let server = serve(&target, 1024, Resource::new(target.clone()));
    let dir = TempDir::new().unwrap();

    let mut options = options(&dir, &target);
    options.output = None;

    // Relative default output lands in the working directory
    let cwd = std::env::current_dir().unwrap();
    let expected = PathBuf::from("target.bin");
    std::env::set_current_dir(dir.path()).unwrap();
    let result = zsync::zsync(&server.url("/files/target.bin.zsync"), &options, None);
    std::env::set_current_dir(cwd).unwrap();

    assert_eq!(result.unwrap(), expected);
    assert_eq!(fs::read(dir.path().join("target.bin")).unwrap(), target);
}
