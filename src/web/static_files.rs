//! Serves the single-page web UI and its assets from `{home}/static`.
//!
//! The deep UI routes (`/tags/...`, `/artifacts/...`) all render the
//! same index page; the client-side router takes it from there. They
//! 404 when the addressed node does not exist so stale bookmarks fail
//! fast instead of rendering an empty page.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{body::Incoming, header, Method, Request, Response};

use crate::{app::App, web::util};

pub async fn call(app: Arc<App>, request: Request<Incoming>) -> Response<Full<Bytes>> {
    let method = request.method();
    if method != Method::GET && method != Method::HEAD {
        return util::not_found(format!("Route not found: {}", request.uri().path()));
    }

    let path = request.uri().path().to_owned();
    let segments: Vec<&str> = path.split('/').filter(|segment| !segment.is_empty()).collect();

    match segments.as_slice() {
        [] => serve_index(&app, &request),

        ["tags", repo_id, branch_id, tag_id] => {
            match app.model().tag(repo_id, branch_id, tag_id) {
                Ok(_) => serve_index(&app, &request),
                Err(err) => util::not_found(err),
            }
        }

        ["artifacts", repo_id, branch_id, tag_id, artifact_id] => {
            match app.model().artifact(repo_id, branch_id, tag_id, artifact_id) {
                Ok(_) => serve_index(&app, &request),
                Err(err) => util::not_found(err),
            }
        }

        _ => serve_file(&app, &segments),
    }
}

fn serve_index<B>(app: &App, request: &Request<B>) -> Response<Full<Bytes>> {
    let etag = app.index_etag();

    let client_etag = request
        .headers()
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok());

    if client_etag == Some(etag) {
        return util::not_modified(etag);
    }

    let index_path = app.config().static_dir().join("index.html");

    match fs_err::read(&index_path) {
        Ok(bytes) => util::file(Bytes::from(bytes), "text/html", Some(etag)),
        Err(err) => {
            log::warn!("Failed to read {}: {}", index_path.display(), err);
            util::not_found(request.uri().path())
        }
    }
}

fn serve_file(app: &App, segments: &[&str]) -> Response<Full<Bytes>> {
    let file_path = match resolve(&app.config().static_dir(), segments) {
        Some(file_path) => file_path,
        None => return util::not_found(segments.join("/")),
    };

    match fs_err::read(&file_path) {
        Ok(bytes) => util::file(Bytes::from(bytes), content_type(&file_path), None),
        Err(_) => util::not_found(segments.join("/")),
    }
}

/// Maps request segments into the static directory, refusing anything
/// that could escape it.
fn resolve(static_dir: &Path, segments: &[&str]) -> Option<PathBuf> {
    let mut file_path = static_dir.to_path_buf();

    for segment in segments {
        if *segment == "." || *segment == ".." || segment.contains('\\') {
            return None;
        }

        file_path.push(segment);
    }

    Some(file_path)
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(OsStr::to_str) {
        Some("html") => "text/html",
        Some("css") => "text/css",
        Some("js") => "text/javascript",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("ico") => "image/x-icon",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}
