use std::fmt::Display;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    header::{CONTENT_ENCODING, CONTENT_TYPE, ETAG},
    Response, StatusCode,
};

pub fn ok() -> Response<Full<Bytes>> {
    text(StatusCode::OK, "OK\n".to_owned())
}

pub fn empty_ok() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .body(Full::default())
        .unwrap()
}

pub fn not_modified(etag: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::NOT_MODIFIED)
        .header(ETAG, etag)
        .body(Full::default())
        .unwrap()
}

pub fn not_found(message: impl Display) -> Response<Full<Bytes>> {
    text(StatusCode::NOT_FOUND, format!("Not found: {}\n", message))
}

pub fn bad_json(err: impl Display) -> Response<Full<Bytes>> {
    text(
        StatusCode::BAD_REQUEST,
        format!("Bad request: Failure decoding JSON: {}\n", err),
    )
}

pub fn bad_data(err: impl Display) -> Response<Full<Bytes>> {
    text(
        StatusCode::BAD_REQUEST,
        format!("Bad request: Illegal data: {}\n", err),
    )
}

pub fn server_error(err: impl Display) -> Response<Full<Bytes>> {
    text(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Internal server error: {}\n", err),
    )
}

pub fn json(payload: Bytes, etag: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .header(ETAG, etag)
        .body(Full::new(payload))
        .unwrap()
}

pub fn compressed_json(payload: Bytes, etag: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .header(CONTENT_ENCODING, "gzip")
        .header(ETAG, etag)
        .body(Full::new(payload))
        .unwrap()
}

pub fn file(payload: Bytes, content_type: &str, etag: Option<&str>) -> Response<Full<Bytes>> {
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, content_type);

    if let Some(etag) = etag {
        builder = builder.header(ETAG, etag);
    }

    builder.body(Full::new(payload)).unwrap()
}

fn text(code: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(code)
        .header(CONTENT_TYPE, "text/plain")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}
