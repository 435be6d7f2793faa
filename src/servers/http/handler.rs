use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Method, Request, Response};
use ishare_utils::bencode;
use log::debug;

use super::error::{Error, Result};
use super::response;
use super::State;
use crate::constants;
use crate::models::bep3::{AnnounceRequest, ScrapeRequest};
use crate::worker::{Task, TaskOutput};

pub(super) async fn handle(
    req: Request<Incoming>,
    state: State,
) -> std::result::Result<Response<Full<Bytes>>, std::convert::Infallible> {
    let result = route(req, state).await;

    Ok(result.unwrap_or_else(|err| {
        debug!("request failed: {}", err);
        err.into()
    }))
}

async fn route(req: Request<Incoming>, state: State) -> Result<Response<Full<Bytes>>> {
    if req.method() != Method::GET {
        return Err(Error::BadRequest(constants::BAD_REQUEST.to_owned()));
    }

    let query = req.uri().query().unwrap_or_default().as_bytes().to_vec();

    match req.uri().path() {
        "/announce" => announce(&query, state).await,
        "/scrape" => scrape(&query, state).await,
        "/" | "/stats" => stats(state).await,
        _ => Err(Error::NotFound),
    }
}

async fn announce(query: &[u8], state: State) -> Result<Response<Full<Bytes>>> {
    let request = match AnnounceRequest::from_query(query) {
        Ok(request) => request,
        // A well-formed announce that the tracker refuses gets a bencoded
        // failure with HTTP 200, never an error oracle.
        Err(reason) => return Ok(response::bencoded(bencode::failure(reason))),
    };

    match state.worker.work(Task::Announce(request)).await {
        Ok(TaskOutput::Announce(output)) => Ok(response::bencoded(output.bencode())),
        Ok(_) => Err(Error::Internal("unexpected worker output".to_owned())),
        Err(err) => match err.failure_reason() {
            Some(reason) => Ok(response::bencoded(bencode::failure(reason))),
            None => Err(Error::Internal(err.to_string())),
        },
    }
}

async fn scrape(query: &[u8], state: State) -> Result<Response<Full<Bytes>>> {
    let request = match ScrapeRequest::from_query(query) {
        Ok(request) => request,
        Err(reason) => return Ok(response::bencoded(bencode::failure(reason))),
    };

    match state.worker.work(Task::Scrape(request)).await {
        Ok(TaskOutput::Scrape(output)) => Ok(response::bencoded(output.bencode())),
        Ok(_) => Err(Error::Internal("unexpected worker output".to_owned())),
        Err(err) => match err.failure_reason() {
            Some(reason) => Ok(response::bencoded(bencode::failure(reason))),
            None => Err(Error::Internal(err.to_string())),
        },
    }
}

async fn stats(state: State) -> Result<Response<Full<Bytes>>> {
    match state.worker.work(Task::Stats).await {
        Ok(TaskOutput::Stats(stats)) => {
            let body = format!(
                "<html><head><title>ishare tracker</title></head><body>\
                 <h1>ishare tracker</h1>\
                 <p>torrents: {}</p>\
                 <p>swarm peers: {}</p>\
                 <p>uptime: {}s</p>\
                 </body></html>",
                stats.torrents, stats.swarm_peers, stats.uptime_secs
            );
            Ok(response::html(body))
        }
        Ok(_) => Err(Error::Internal("unexpected worker output".to_owned())),
        Err(err) => Err(Error::Internal(err.to_string())),
    }
}
