//! In-memory registry for integration tests.
//!
//! Serves a service index, registration indexes, registration pages and
//! package tarballs from a path map, and counts every request by path.

#![allow(dead_code)]

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone)]
struct Published {
    content_type: &'static str,
    body: Vec<u8>,
    delay: Option<Duration>,
}

#[derive(Default)]
struct Files {
    published: HashMap<String, Published>,
    hits: HashMap<String, usize>,
}

type Shared = Arc<Mutex<Files>>;

#[derive(Clone)]
pub struct MockRegistry {
    base: String,
    files: Shared,
}

impl MockRegistry {
    /// Bind an ephemeral port and serve on the current runtime.
    pub async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let files: Shared = Arc::default();

        let app = Router::new()
            .fallback(serve)
            .with_state(Arc::clone(&files));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let registry = Self { base, files };
        let index = json!({
            "version": "3.0.0",
            "resources": [
                { "@id": format!("{}/search", registry.base), "@type": "SearchQueryService" },
                { "@id": format!("{}/reg/", registry.base), "@type": "RegistrationsBaseUrl/3.6.0" }
            ]
        });
        registry.publish_json("/index.json", &index);
        registry
    }

    /// Service index URL.
    pub fn source(&self) -> String {
        format!("{}/index.json", self.base)
    }

    pub fn registration_path(name: &str) -> String {
        format!("/reg/{}/index.json", name.to_lowercase())
    }

    pub fn package_path(name: &str, version: &str) -> String {
        format!("/packages/{}/{version}.tgz", name.to_lowercase())
    }

    /// A catalog leaf. `deps` are `(id, range)` pairs.
    pub fn leaf(&self, name: &str, version: &str, deps: &[(&str, &str)]) -> Value {
        let dependencies: Vec<Value> = deps
            .iter()
            .map(|(id, range)| json!({ "id": id, "range": range }))
            .collect();
        json!({
            "@id": format!("{}/reg/{}/{version}.json", self.base, name.to_lowercase()),
            "catalogEntry": {
                "id": name,
                "version": version,
                "listed": true,
                "dependencyGroups": [ { "dependencies": dependencies } ]
            },
            "packageContent": format!("{}{}", self.base, Self::package_path(name, version))
        })
    }

    /// Mark a leaf unlisted.
    pub fn unlisted(mut leaf: Value) -> Value {
        leaf["catalogEntry"]["listed"] = json!(false);
        leaf
    }

    /// A page with its leaves inlined.
    pub fn inline_page(&self, name: &str, leaves: Vec<Value>) -> Value {
        let (lower, upper) = bounds(&leaves);
        json!({
            "@id": format!("{}/reg/{}/index.json#page/{lower}/{upper}", self.base, name.to_lowercase()),
            "lower": lower,
            "upper": upper,
            "count": leaves.len(),
            "items": leaves
        })
    }

    /// Publish a page document and return the reference to it.
    pub fn page_ref(&self, name: &str, leaves: Vec<Value>) -> Value {
        let (lower, upper) = bounds(&leaves);
        let path = format!("/reg/{}/page/{lower}/{upper}.json", name.to_lowercase());
        let page = json!({
            "@id": format!("{}{path}", self.base),
            "lower": lower,
            "upper": upper,
            "count": leaves.len(),
            "items": leaves
        });
        self.publish_json(&path, &page);
        json!({
            "@id": format!("{}{path}", self.base),
            "lower": lower,
            "upper": upper,
            "count": leaves.len()
        })
    }

    /// Publish the registration index for `name`.
    pub fn publish_registration(&self, name: &str, pages: Vec<Value>) {
        let index = json!({ "count": pages.len(), "items": pages });
        self.publish_json(&Self::registration_path(name), &index);
    }

    /// Shorthand: every version in one inlined page, each with its package.
    pub fn publish_module(&self, name: &str, releases: &[(&str, &[(&str, &str)])]) {
        let leaves = releases
            .iter()
            .map(|(version, deps)| {
                self.publish_package(name, version, version, None);
                self.leaf(name, version, deps)
            })
            .collect();
        let page = self.inline_page(name, leaves);
        self.publish_registration(name, vec![page]);
    }

    /// Publish a package whose manifest declares `manifest_version`.
    pub fn publish_package(&self, name: &str, version: &str, manifest_version: &str, guid: Option<&str>) {
        let mut manifest = json!({ "version": manifest_version });
        if let Some(guid) = guid {
            manifest["guid"] = json!(guid);
        }
        let manifest = serde_json::to_vec_pretty(&manifest).unwrap();
        let script = format!("# {name} {version}\n");
        let nuspec = format!("<package><metadata><id>{name}</id></metadata></package>");

        let tgz = build_tgz(&[
            (&format!("{name}.manifest"), &manifest),
            (&format!("{name}.psm1"), script.as_bytes()),
            ("_rels/.rels", b"<Relationships/>"),
            ("package/services/metadata/core-properties/1.psmdcp", b"<coreProperties/>"),
            ("[Content_Types].xml", b"<Types/>"),
            (&format!("{name}.nuspec"), nuspec.as_bytes()),
        ]);
        self.publish(&Self::package_path(name, version), "application/gzip", tgz);
    }

    pub fn publish_json(&self, path: &str, value: &Value) {
        self.publish(path, "application/json", serde_json::to_vec(value).unwrap());
    }

    fn publish(&self, path: &str, content_type: &'static str, body: Vec<u8>) {
        self.files.lock().unwrap().published.insert(
            path.to_string(),
            Published {
                content_type,
                body,
                delay: None,
            },
        );
    }

    /// Hold responses for `path` for `delay`.
    pub fn delay(&self, path: &str, delay: Duration) {
        if let Some(published) = self.files.lock().unwrap().published.get_mut(path) {
            published.delay = Some(delay);
        }
    }

    /// Requests served for `path`, including 404s.
    pub fn hits(&self, path: &str) -> usize {
        self.files.lock().unwrap().hits.get(path).copied().unwrap_or(0)
    }

    pub fn total_hits(&self) -> usize {
        self.files.lock().unwrap().hits.values().sum()
    }
}

async fn serve(State(files): State<Shared>, uri: Uri) -> Response {
    let path = uri.path().to_string();
    let found = {
        let mut files = files.lock().unwrap();
        *files.hits.entry(path.clone()).or_default() += 1;
        files.published.get(&path).cloned()
    };

    let Some(published) = found else {
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    };
    if let Some(delay) = published.delay {
        tokio::time::sleep(delay).await;
    }
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, published.content_type)],
        Body::from(published.body),
    )
        .into_response()
}

fn bounds(leaves: &[Value]) -> (String, String) {
    let version = |leaf: &Value| leaf["catalogEntry"]["version"].as_str().unwrap_or("0.0.0").to_string();
    let lower = leaves.first().map(version).unwrap_or_else(|| "0.0.0".to_string());
    let upper = leaves.last().map(version).unwrap_or_else(|| "0.0.0".to_string());
    (lower, upper)
}

pub fn build_tgz(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut tar_bytes = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut tar_bytes);
        for (path, contents) in files {
            let mut header = tar::Header::new_gnu();
            header.set_path(path).unwrap();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append(&header, *contents).unwrap();
        }
        builder.finish().unwrap();
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes).unwrap();
    encoder.finish().unwrap()
}

/// Lay down an installed module: `root/<name>/<version>/<name>.manifest`.
pub fn install_local(root: &Path, name: &str, version: &str) {
    let dir = root.join(name).join(version);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join(format!("{name}.manifest")),
        format!(r#"{{"version":"{version}"}}"#),
    )
    .unwrap();
}
