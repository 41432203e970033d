#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use serde_json::Value;
use tempfile::TempDir;
use tfhost::auth::TokenGenerator;
use tfhost::config::{RegistryConfig, ServerConfig};
use tfhost::extractor::{AnalyzeFuture, ModuleAnalyzer};
use tfhost::server::{AppState, create_router};
use tfhost::store::{SqliteStore, Store};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use zip::write::SimpleFileOptions;

const BOUNDARY: &str = "tfhost-test-boundary";

/// Analysis reported for every module directory.
pub const DOCS: &str = r#"{
  "inputs": [{"name": "cidr", "type": "string", "description": "VPC CIDR", "required": true}],
  "outputs": [{"name": "vpc_id", "description": "ID of the VPC"}],
  "providers": [{"name": "aws", "version": ">= 5.0"}],
  "requirements": [],
  "modules": [],
  "resources": [{"type": "aws_vpc", "name": "this", "provider": "aws", "mode": "managed"}]
}"#;

/// Stands in for terraform-docs; sleeps before answering when `delay` is set.
pub struct FakeAnalyzer {
    pub delay: Duration,
}

impl ModuleAnalyzer for FakeAnalyzer {
    fn name(&self) -> &str {
        "fake"
    }

    fn analyze<'a>(&'a self, _module_dir: &'a Path, _cancel: &'a CancellationToken) -> AnalyzeFuture<'a> {
        Box::pin(async move {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(DOCS.to_string())
        })
    }
}

pub struct TestRegistry {
    pub temp_dir: TempDir,
    pub state: Arc<AppState>,
    pub router: Router,
    pub admin_token: String,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestRegistry {
    pub fn new() -> Self {
        Self::build(|_| {}, Duration::ZERO)
    }

    pub fn with_config(configure: impl FnOnce(&mut RegistryConfig)) -> Self {
        Self::build(configure, Duration::ZERO)
    }

    pub fn with_analyzer_delay(delay: Duration) -> Self {
        Self::build(|_| {}, delay)
    }

    fn build(configure: impl FnOnce(&mut RegistryConfig), delay: Duration) -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let mut config = RegistryConfig {
            data_dir: temp_dir.path().to_path_buf(),
            reaper_interval: None,
            ..Default::default()
        };
        configure(&mut config);
        Self::over(temp_dir, config, delay)
    }

    /// A second registry over the same data directory, e.g. to restart
    /// with a different hosting mode.
    pub fn reopen(self, configure: impl FnOnce(&mut RegistryConfig)) -> Self {
        let mut config = self.state.config.clone();
        configure(&mut config);
        let temp_dir = self.temp_dir;
        Self::over(temp_dir, config, Duration::ZERO)
    }

    fn over(temp_dir: TempDir, config: RegistryConfig, delay: Duration) -> Self {
        let server = ServerConfig {
            data_dir: config.data_dir.clone(),
            ..Default::default()
        };
        let store = SqliteStore::new(server.db_path()).expect("open store");
        store.initialize().expect("initialize store");

        let admin_token = match std::fs::read_to_string(temp_dir.path().join(".admin_token")) {
            Ok(token) => token,
            Err(_) => {
                let (token, raw) = TokenGenerator::new()
                    .issue(true, Some("test admin".into()))
                    .expect("issue token");
                store.create_token(&token).expect("store token");
                std::fs::write(temp_dir.path().join(".admin_token"), &raw).expect("write token");
                raw
            }
        };

        let store: Arc<dyn Store> = Arc::new(store);
        let state = Arc::new(AppState::with_analyzer(
            store,
            &server,
            config,
            Arc::new(FakeAnalyzer { delay }),
        ));
        let router = create_router(state.clone());

        Self {
            temp_dir,
            state,
            router,
            admin_token,
        }
    }

    pub fn data_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send(Request::get(uri).body(Body::empty()).expect("request"))
            .await
    }

    /// Admin-authenticated JSON request.
    pub async fn admin(&self, method: Method, uri: &str, body: Option<Value>) -> TestResponse {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.admin_token));
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");
        self.send(request).await
    }

    pub fn upload_request(&self, id: &str, version: &str, archive: &[u8]) -> Request<Body> {
        Request::post(format!("/v1/tfhost/modules/{id}/{version}/upload"))
            .header(header::AUTHORIZATION, format!("Bearer {}", self.admin_token))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(archive)))
            .expect("request")
    }

    pub async fn upload(&self, id: &str, version: &str, archive: &[u8]) -> TestResponse {
        self.send(self.upload_request(id, version, archive)).await
    }

    pub async fn create_namespace(&self, name: &str) -> TestResponse {
        self.admin(
            Method::POST,
            "/v1/tfhost/namespaces",
            Some(serde_json::json!({ "name": name })),
        )
        .await
    }

    pub async fn create_provider(&self, id: &str, body: Value) -> TestResponse {
        self.admin(Method::POST, &format!("/v1/tfhost/modules/{id}/create"), Some(body))
            .await
    }
}

/// Zip archive with the given `(path, contents)` entries.
pub fn module_zip(files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (path, contents) in files {
        writer
            .start_file(*path, SimpleFileOptions::default())
            .expect("start zip entry");
        writer.write_all(contents.as_bytes()).expect("write zip entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

/// Root module with one submodule.
pub fn vpc_zip() -> Vec<u8> {
    module_zip(&[
        ("main.tf", "resource \"aws_vpc\" \"this\" {}\n"),
        ("modules/private/main.tf", "variable \"cidr\" {}\n"),
    ])
}

pub fn multipart_body(archive: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    write!(
        body,
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"module.zip\"\r\nContent-Type: application/zip\r\n\r\n"
    )
    .expect("write multipart header");
    body.extend_from_slice(archive);
    write!(body, "\r\n--{BOUNDARY}--\r\n").expect("write multipart trailer");
    body
}

/// Every file named `source.*` below `dir`.
pub fn archive_files(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return found;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            found.extend(archive_files(&path));
        } else if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("source."))
        {
            found.push(path);
        }
    }
    found.sort();
    found
}
