use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, Response, StatusCode};

/// BEP3 bodies go out as 200 text/plain, including bencoded failures.
pub(super) fn bencoded(body: Bytes) -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain")
        .header(header::CONNECTION, "close")
        .body(Full::new(body))
        .unwrap()
}

/// The operator stats page.
pub(super) fn html(body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .header(header::CONNECTION, "close")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}
