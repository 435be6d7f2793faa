use crate::constants::{BAD_REQUEST, INTERNAL_ERROR, NOT_FOUND, PAYLOAD_TOO_LARGE};
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use std::error::Error as StdError;

#[derive(Debug)]
pub(super) enum Error {
    NotFound,
    BadRequest(String),
    PayloadTooLarge,
    Internal(String),
}

/// Alias for a `Result` with the error type `Error`.
pub(super) type Result<T> = std::result::Result<T, Error>;

impl Error {
    fn status(&self) -> StatusCode {
        match self {
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The body sent to the client. Internal details stay in the logs.
    fn public_body(&self) -> String {
        match self {
            Error::NotFound => NOT_FOUND.to_owned(),
            Error::BadRequest(reason) => reason.clone(),
            Error::PayloadTooLarge => PAYLOAD_TOO_LARGE.to_owned(),
            Error::Internal(_) => INTERNAL_ERROR.to_owned(),
        }
    }

    /// Raw HTTP/1.1 bytes for rejections made before hyper ever parses a
    /// request (oversized head), where no connection can carry a
    /// `Response` value.
    pub(super) fn to_raw_http(&self) -> Vec<u8> {
        let status = self.status();
        let body = self.public_body();
        format!(
            "HTTP/1.1 {} {}\r\nconnection: close\r\ncontent-type: text/plain\r\ncontent-length: {}\r\n\r\n{}",
            status.as_u16(),
            status.canonical_reason().unwrap_or(""),
            body.len(),
            body
        )
        .into_bytes()
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::NotFound => write!(f, "{}", NOT_FOUND),
            Error::BadRequest(reason) => write!(f, "{}", reason),
            Error::PayloadTooLarge => write!(f, "{}", PAYLOAD_TOO_LARGE),
            Error::Internal(reason) => write!(f, "{}", reason),
        }
    }
}

impl StdError for Error {}

impl From<Error> for Response<Full<Bytes>> {
    fn from(err: Error) -> Response<Full<Bytes>> {
        let status = err.status();
        let body = err.public_body();

        Response::builder()
            .status(status)
            .body(Full::new(Bytes::from(body)))
            .unwrap()
    }
}
