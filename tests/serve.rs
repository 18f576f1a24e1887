//! End-to-end tests that drive a real server process over HTTP and AMQP.
//!
//! Each test spawns the `stagger` binary against a fresh temporary home
//! and data directory on ephemeral ports, so tests are independent and
//! can run in parallel.

use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tempfile::TempDir;

const STAGGER_PATH: &str = env!("CARGO_BIN_EXE_stagger");

/// Kills the server process when a test finishes, pass or fail.
struct KillOnDrop(Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

struct TestServer {
    // Drop order is important here: we want the process to be killed
    // before the directory it's operating on is destroyed.
    process: KillOnDrop,
    _dir: TempDir,

    home: PathBuf,
    data_dir: PathBuf,
    http_port: u16,
    amqp_port: u16,
}

impl TestServer {
    fn start() -> Self {
        let dir = tempfile::tempdir().expect("Couldn't create temporary directory");

        let home = dir.path().join("home");
        let data_dir = dir.path().join("data");
        std::fs::create_dir_all(home.join("static")).expect("Couldn't create static directory");
        std::fs::write(
            home.join("static").join("index.html"),
            "<!DOCTYPE html><html><body>Stagger</body></html>",
        )
        .expect("Couldn't write index.html");

        let http_port = free_port();
        let amqp_port = free_port();
        let process = spawn_server(&home, &data_dir, http_port, amqp_port);

        let mut server = TestServer {
            process,
            _dir: dir,
            home,
            data_dir,
            http_port,
            amqp_port,
        };
        server.wait_to_come_online();
        server
    }

    /// Stops the server and starts a fresh process over the same data
    /// directory, as a crash-recovery would.
    fn restart(&mut self) {
        let _ = self.process.0.kill();
        let _ = self.process.0.wait();

        self.http_port = free_port();
        self.amqp_port = free_port();
        self.process = spawn_server(&self.home, &self.data_dir, self.http_port, self.amqp_port);
        self.wait_to_come_online();
    }

    /// Waits for the server to come online with exponential backoff.
    fn wait_to_come_online(&mut self) {
        const BASE_DURATION_MS: f32 = 30.0;
        const EXP_BACKOFF_FACTOR: f32 = 1.3;
        const MAX_TRIES: u32 = 15;

        for i in 1..=MAX_TRIES {
            match self.process.0.try_wait() {
                Ok(Some(status)) => {
                    let mut stderr_output = String::new();
                    if let Some(mut stderr) = self.process.0.stderr.take() {
                        let _ = stderr.read_to_string(&mut stderr_output);
                    }
                    panic!(
                        "Stagger process exited with status {}\nstderr:\n{}",
                        status, stderr_output
                    );
                }
                Ok(None) => { /* The process is still running, as expected */ }
                Err(err) => panic!("Failed to wait on Stagger process: {}", err),
            }

            if let Ok(response) = reqwest::blocking::get(self.http_url("/healthz")) {
                if response.status().is_success() {
                    return;
                }
            }

            let retry_time_ms = BASE_DURATION_MS * (i as f32).powf(EXP_BACKOFF_FACTOR);
            thread::sleep(Duration::from_millis(retry_time_ms as u64));
        }

        panic!("Stagger server did not respond after {} tries.", MAX_TRIES);
    }

    fn http_url(&self, path: &str) -> String {
        format!("http://localhost:{}{}", self.http_port, path)
    }

    fn client(&self) -> reqwest::blocking::Client {
        reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to build reqwest client")
    }

    fn put(&self, path: &str, body: &Value) -> reqwest::blocking::Response {
        self.client()
            .put(self.http_url(path))
            .json(body)
            .send()
            .expect("PUT request failed")
    }

    fn get(&self, path: &str) -> reqwest::blocking::Response {
        self.client()
            .get(self.http_url(path))
            .send()
            .expect("GET request failed")
    }

    fn head(&self, path: &str) -> reqwest::blocking::Response {
        self.client()
            .head(self.http_url(path))
            .send()
            .expect("HEAD request failed")
    }

    fn delete(&self, path: &str) -> reqwest::blocking::Response {
        self.client()
            .delete(self.http_url(path))
            .send()
            .expect("DELETE request failed")
    }

    fn revision(&self) -> u64 {
        let data: Value = self.get("/api/data").json().expect("malformed /api/data");
        data["revision"].as_u64().expect("revision is an integer")
    }
}

fn spawn_server(home: &Path, data_dir: &Path, http_port: u16, amqp_port: u16) -> KillOnDrop {
    let process = Command::new(STAGGER_PATH)
        .env("STAGGER_HOME", home)
        .env("STAGGER_DATA_DIR", data_dir)
        .env("STAGGER_HTTP_PORT", http_port.to_string())
        .env("STAGGER_AMQP_PORT", amqp_port.to_string())
        .env("STAGGER_NO_FILE_LOG", "1")
        .stderr(Stdio::piped())
        .spawn()
        .expect("Couldn't start Stagger");

    KillOnDrop(process)
}

/// Obtain a free port by asking the OS to assign an ephemeral one. The
/// brief window before the server rebinds it is negligible on localhost.
fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind ephemeral port for test");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

fn etag(response: &reqwest::blocking::Response) -> String {
    response
        .headers()
        .get(reqwest::header::ETAG)
        .expect("response carries an ETag")
        .to_str()
        .unwrap()
        .to_owned()
}

fn tag_data() -> Value {
    json!({
        "build_id": "999",
        "build_url": "https://ci.example.com/example-app/999",
        "commit_id": "f4fe336a8b9a3dc171ae4e023d8cb702ee35ebf7",
        "commit_url": "https://scm.example.com/example-app/f4fe336a8b9a3dc171ae4e023d8cb702ee35ebf7",
        "artifacts": {},
    })
}

fn container_artifact_data() -> Value {
    json!({
        "type": "container",
        "registry_url": "https://registry.example.com/",
        "repository": "example-app",
        "image_id": "1.0.0-999",
    })
}

#[test]
fn put_tag_then_read_back() {
    let server = TestServer::start();

    let response = server.put("/api/repos/app/branches/master/tags/tested", &tag_data());
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().unwrap(), "OK\n");

    let response = server.get("/api/repos/app");
    assert_eq!(response.status(), 200);
    let repo: Value = response.json().unwrap();
    assert_eq!(repo["branches"]["master"]["tags"]["tested"]["build_id"], "999");

    assert_eq!(server.revision(), 1);
}

#[test]
fn repeated_put_rotates_the_validator() {
    let server = TestServer::start();
    let path = "/api/repos/app/branches/master/tags/tested";

    let revision = server.revision();

    server.put(path, &tag_data());
    let first_etag = etag(&server.get(path));

    // update_time has millisecond resolution; replacing a node in the
    // same millisecond would produce the same digest.
    thread::sleep(Duration::from_millis(5));

    server.put(path, &tag_data());
    let second_etag = etag(&server.get(path));

    assert_ne!(first_etag, second_etag);
    assert_eq!(server.revision(), revision + 2);
}

#[test]
fn conditional_get_on_the_whole_model() {
    let server = TestServer::start();

    let response = server.get("/api/data");
    let data_etag = etag(&response);

    let response = server
        .client()
        .get(server.http_url("/api/data"))
        .header(reqwest::header::IF_NONE_MATCH, data_etag.as_str())
        .send()
        .unwrap();
    assert_eq!(response.status(), 304);
    assert_eq!(response.bytes().unwrap().len(), 0);

    server.put("/api/repos/app", &json!({}));

    let response = server
        .client()
        .get(server.http_url("/api/data"))
        .header(reqwest::header::IF_NONE_MATCH, data_etag.as_str())
        .send()
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_ne!(etag(&response), data_etag);
}

#[test]
fn mutation_in_a_subtree_rotates_ancestor_validators() {
    let server = TestServer::start();

    server.put("/api/repos/app/branches/master/tags/tested", &tag_data());
    let repo_etag = etag(&server.get("/api/repos/app"));

    let response = server
        .client()
        .get(server.http_url("/api/repos/app"))
        .header(reqwest::header::IF_NONE_MATCH, repo_etag.as_str())
        .send()
        .unwrap();
    assert_eq!(response.status(), 304);

    server.put(
        "/api/repos/app/branches/master/tags/tested/artifacts/x",
        &container_artifact_data(),
    );

    let response = server
        .client()
        .get(server.http_url("/api/repos/app"))
        .header(reqwest::header::IF_NONE_MATCH, repo_etag.as_str())
        .send()
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_ne!(etag(&response), repo_etag);
}

#[test]
fn illegal_artifact_data_is_rejected() {
    let server = TestServer::start();

    let mut incomplete = json!({
        "type": "rpm",
        "repository_url": "https://files.example.com/yum-repo",
        "name": "example-app",
        "version": "1.0.0",
        "release": "999",
    });
    incomplete.as_object_mut().unwrap().remove("release");

    let revision = server.revision();
    let response = server.put(
        "/api/repos/app/branches/master/tags/tested/artifacts/x",
        &incomplete,
    );

    assert_eq!(response.status(), 400);
    assert_eq!(
        response.text().unwrap(),
        "Bad request: Illegal data: Missing field 'release'\n"
    );
    assert_eq!(server.revision(), revision);
}

#[test]
fn undecodable_body_is_rejected() {
    let server = TestServer::start();

    let response = server
        .client()
        .put(server.http_url("/api/repos/app"))
        .body("{not json")
        .send()
        .unwrap();

    assert_eq!(response.status(), 400);
    assert!(response
        .text()
        .unwrap()
        .starts_with("Bad request: Failure decoding JSON:"));
}

#[test]
fn delete_cascades_to_descendants() {
    let server = TestServer::start();

    server.put("/api/repos/app/branches/master/tags/tested", &tag_data());

    let response = server.delete("/api/repos/app");
    assert_eq!(response.status(), 200);

    let response = server.get("/api/repos/app/branches/master");
    assert_eq!(response.status(), 404);
    assert!(response.text().unwrap().starts_with("Not found:"));
}

#[test]
fn head_matches_get_without_a_body() {
    let server = TestServer::start();

    server.put("/api/repos/app/branches/master/tags/tested", &tag_data());

    let get = server.get("/api/repos/app");
    let get_etag = etag(&get);
    assert!(!get.bytes().unwrap().is_empty());

    let head = server.head("/api/repos/app");
    assert_eq!(head.status(), 200);
    assert_eq!(etag(&head), get_etag);
    assert_eq!(head.bytes().unwrap().len(), 0);

    let head_missing = server.head("/api/repos/ghost");
    assert_eq!(head_missing.status(), 404);
}

#[test]
fn dry_run_skips_the_mutation() {
    let server = TestServer::start();

    let response = server.put("/api/repos/app?dry-run=1", &json!({}));
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().unwrap(), "OK\n");

    assert_eq!(server.get("/api/repos/app").status(), 404);
    assert_eq!(server.revision(), 0);

    let response = server.delete("/api/repos/ghost?dry-run=1");
    assert_eq!(response.status(), 200);
}

#[test]
fn ancestors_appear_after_a_deep_put() {
    let server = TestServer::start();

    server.put(
        "/api/repos/app/branches/master/tags/tested/artifacts/x",
        &container_artifact_data(),
    );

    for path in [
        "/api/repos/app",
        "/api/repos/app/branches/master",
        "/api/repos/app/branches/master/tags/tested",
        "/api/repos/app/branches/master/tags/tested/artifacts/x",
    ] {
        assert_eq!(server.get(path).status(), 200, "GET {}", path);
    }
}

#[test]
fn gzip_negotiation_serves_the_compressed_payload() {
    let server = TestServer::start();

    server.put("/api/repos/app", &json!({"source_url": "https://scm.example.com/app"}));

    let plain: Value = server.get("/api/data").json().unwrap();

    let response = server
        .client()
        .get(server.http_url("/api/data"))
        .header(reqwest::header::ACCEPT_ENCODING, "gzip")
        .send()
        .unwrap();
    assert_eq!(
        response.headers()[reqwest::header::CONTENT_ENCODING],
        "gzip"
    );

    let compressed = response.bytes().unwrap();
    let mut decoder = flate2::read::GzDecoder::new(&compressed[..]);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed).unwrap();

    let unpacked: Value = serde_json::from_slice(&decompressed).unwrap();
    assert_eq!(unpacked, plain);
}

#[test]
fn web_ui_routes_serve_the_index() {
    let server = TestServer::start();

    let response = server.get("/");
    assert_eq!(response.status(), 200);
    let index_etag = etag(&response);
    assert!(response.text().unwrap().contains("Stagger"));

    // Deep links only resolve for nodes that exist.
    server.put("/api/repos/app/branches/master/tags/tested", &tag_data());
    let response = server.get("/tags/app/master/tested");
    assert_eq!(response.status(), 200);
    assert_eq!(etag(&response), index_etag);

    assert_eq!(server.get("/tags/app/master/ghost").status(), 404);
    assert_eq!(server.get("/no-such-asset.css").status(), 404);
}

#[test]
fn saved_state_survives_a_restart() {
    let mut server = TestServer::start();

    server.put("/api/repos/app/branches/master/tags/tested", &tag_data());
    let repo_etag = etag(&server.get("/api/repos/app"));
    let revision = server.revision();

    // The save is asynchronous; wait for the snapshot to land.
    let data_file = server.data_dir.join("data.json");
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(contents) = std::fs::read_to_string(&data_file) {
            if contents.contains("tested") {
                break;
            }
        }
        assert!(Instant::now() < deadline, "snapshot never reached disk");
        thread::sleep(Duration::from_millis(10));
    }

    server.restart();

    assert_eq!(server.revision(), revision);
    assert_eq!(etag(&server.get("/api/repos/app")), repo_etag);
}

#[test]
fn subscriber_receives_updates_for_its_path() {
    use fe2o3_amqp::types::messaging::Body;
    use fe2o3_amqp::types::primitives::{SimpleValue, Value as AmqpValue};
    use fe2o3_amqp::{Connection, Receiver, Session};

    let server = TestServer::start();
    let tag_path = "events/repos/app/branches/master/tags/tested";

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    rt.block_on(async {
        let url = format!("amqp://localhost:{}", server.amqp_port);
        let mut connection = Connection::open("stagger-test", url.as_str())
            .await
            .expect("AMQP connection failed");
        let mut session = Session::begin(&mut connection).await.expect("session failed");
        let mut receiver = Receiver::attach(&mut session, "serve-test-receiver", tag_path)
            .await
            .expect("attach failed");

        // Give the server a moment to register the subscription.
        tokio::time::sleep(Duration::from_millis(300)).await;

        let put_url = server.http_url("/api/repos/app/branches/master/tags/tested/artifacts/x");
        let put_thread = thread::spawn(move || {
            let response = reqwest::blocking::Client::new()
                .put(put_url)
                .json(&container_artifact_data())
                .send()
                .expect("PUT request failed");
            assert_eq!(response.status(), 200);
        });

        let delivery = tokio::time::timeout(
            Duration::from_secs(10),
            receiver.recv::<Body<AmqpValue>>(),
        )
        .await
        .expect("timed out waiting for the tag update")
        .expect("receive failed");

        receiver.accept(&delivery).await.expect("accept failed");
        put_thread.join().unwrap();

        let message = delivery.into_message();

        let properties = message
            .application_properties
            .expect("message carries application properties");
        assert_eq!(
            properties.0.get("path"),
            Some(&SimpleValue::String(tag_path.to_owned()))
        );
        assert_eq!(
            properties.0.get("type"),
            Some(&SimpleValue::String("tag".to_owned()))
        );

        match message.body {
            Body::Data(data) => {
                let tag: Value = serde_json::from_slice(&data[0].0).unwrap();
                assert_eq!(tag["artifacts"]["x"]["type"], "container");
            }
            other => panic!("expected a data body, got {:?}", other),
        }

        let _ = receiver.close().await;
        let _ = session.end().await;
        let _ = connection.close().await;
    });
}
