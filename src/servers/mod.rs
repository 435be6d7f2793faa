pub mod http;

pub use self::http::HttpServer;

use crate::config::TrackerConfig;
use crate::worker::Worker;
use std::sync::Arc;

/// State shared by the HTTP front end and its handlers.
#[derive(Clone)]
pub struct State {
    pub worker: Arc<Worker>,
    pub config: Arc<TrackerConfig>,
}

impl State {
    pub fn new(worker: Arc<Worker>, config: Arc<TrackerConfig>) -> State {
        State { worker, config }
    }
}
