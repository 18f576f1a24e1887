//! Defines Stagger's JSON API, all under `/api`.
//!
//! Reads are conditional: every per-node response carries an ETag (the
//! node's digest, or the model revision for `/api/data`), a matching
//! `If-None-Match` short-circuits to 304, and clients accepting gzip get
//! the node's precomputed compressed payload.

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{body::Incoming, header, Method, Request, Response};
use serde_json::Value;

use crate::{app::App, model::ModelError, web::util};

pub async fn call(app: Arc<App>, request: Request<Incoming>) -> Response<Full<Bytes>> {
    let service = ApiService { app };

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();

    match (&method, segments.as_slice()) {
        (&Method::GET | &Method::HEAD, ["api", "data"]) => service.handle_data(&request),

        (_, ["api", "repos", repo_id]) => {
            let target = Target::Repo((*repo_id).to_owned());
            service.handle_node(request, target).await
        }
        (_, ["api", "repos", repo_id, "branches", branch_id]) => {
            let target = Target::Branch((*repo_id).to_owned(), (*branch_id).to_owned());
            service.handle_node(request, target).await
        }
        (_, ["api", "repos", repo_id, "branches", branch_id, "tags", tag_id]) => {
            let target = Target::Tag(
                (*repo_id).to_owned(),
                (*branch_id).to_owned(),
                (*tag_id).to_owned(),
            );
            service.handle_node(request, target).await
        }
        (
            _,
            ["api", "repos", repo_id, "branches", branch_id, "tags", tag_id, "artifacts", artifact_id],
        ) => {
            let target = Target::Artifact(
                (*repo_id).to_owned(),
                (*branch_id).to_owned(),
                (*tag_id).to_owned(),
                (*artifact_id).to_owned(),
            );
            service.handle_node(request, target).await
        }

        (_method, _) => util::not_found(format!("Route not found: {}", path)),
    }
}

enum Target {
    Repo(String),
    Branch(String, String),
    Tag(String, String, String),
    Artifact(String, String, String, String),
}

struct ApiService {
    app: Arc<App>,
}

impl ApiService {
    /// The whole-model document. Its validator is the revision counter.
    fn handle_data(&self, request: &Request<Incoming>) -> Response<Full<Bytes>> {
        let root = self.app.model().root();
        render(request, root.revision.to_string(), root.json, root.compressed)
    }

    async fn handle_node(
        &self,
        request: Request<Incoming>,
        target: Target,
    ) -> Response<Full<Bytes>> {
        let method = request.method().clone();
        let model = self.app.model();

        if method == Method::PUT {
            if dry_run(&request) {
                return util::ok();
            }

            let body = match request.into_body().collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(err) => return util::server_error(err),
            };

            let data: Value = match serde_json::from_slice(&body) {
                Ok(data) => data,
                Err(err) => return util::bad_json(err),
            };

            let result = match &target {
                Target::Repo(r) => model.put_repo(r, data),
                Target::Branch(r, b) => model.put_branch(r, b, data),
                Target::Tag(r, b, t) => model.put_tag(r, b, t, data),
                Target::Artifact(r, b, t, a) => model.put_artifact(r, b, t, a, data),
            };

            match result {
                Ok(()) => util::ok(),
                Err(err) => error_response(err),
            }
        } else if method == Method::DELETE {
            if dry_run(&request) {
                return util::ok();
            }

            let result = match &target {
                Target::Repo(r) => model.delete_repo(r),
                Target::Branch(r, b) => model.delete_branch(r, b),
                Target::Tag(r, b, t) => model.delete_tag(r, b, t),
                Target::Artifact(r, b, t, a) => model.delete_artifact(r, b, t, a),
            };

            match result {
                Ok(()) => util::ok(),
                Err(err) => error_response(err),
            }
        } else if method == Method::GET || method == Method::HEAD {
            let view = match &target {
                Target::Repo(r) => model.repo(r),
                Target::Branch(r, b) => model.branch(r, b),
                Target::Tag(r, b, t) => model.tag(r, b, t),
                Target::Artifact(r, b, t, a) => model.artifact(r, b, t, a),
            };

            match view {
                Ok(view) => render(&request, view.digest.to_string(), view.json, view.compressed),
                Err(err) => error_response(err),
            }
        } else {
            util::not_found(format!("Route not found: {}", request.uri().path()))
        }
    }
}

fn error_response(err: ModelError) -> Response<Full<Bytes>> {
    match err {
        ModelError::NotFound { .. } => util::not_found(err),
        ModelError::BadData(err) => util::bad_data(err),
    }
}

/// Conditional rendering shared by every read: compare the validator
/// against `If-None-Match`, then pick the gzip payload when the client
/// accepts it.
fn render<B>(
    request: &Request<B>,
    validator: String,
    json: Bytes,
    compressed: Bytes,
) -> Response<Full<Bytes>> {
    let etag = format!("\"{}\"", validator);

    let client_etag = request
        .headers()
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok());

    if client_etag == Some(etag.as_str()) {
        return util::not_modified(&etag);
    }

    if accepts_gzip(request) {
        util::compressed_json(compressed, &etag)
    } else {
        util::json(json, &etag)
    }
}

fn accepts_gzip<B>(request: &Request<B>) -> bool {
    request
        .headers()
        .get(header::ACCEPT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.contains("gzip"))
        .unwrap_or(false)
}

/// `dry-run=1` on PUT and DELETE exercises the route without mutating
/// anything; pipeline jobs use it to validate their wiring.
fn dry_run<B>(request: &Request<B>) -> bool {
    request
        .uri()
        .query()
        .map(|query| query.split('&').any(|pair| pair == "dry-run=1"))
        .unwrap_or(false)
}
