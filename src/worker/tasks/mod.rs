pub(super) mod announce;
pub(super) mod scrape;
pub(super) mod stats;

use super::{Result, TaskOutput};
use crate::{config::TrackerConfig, storage::SwarmStore};
use async_trait::async_trait;
use std::sync::Arc;

pub(super) fn err<T>(reason: &'static str) -> Result<T> {
    Err(reason.into())
}

#[async_trait]
pub(super) trait TaskExecutor: Send + Sync {
    type Input;
    type Output;

    async fn execute(&self, task: Self::Input, state: State) -> Result<TaskOutput>;
}

/// Shared state handed to every task execution.
#[derive(Clone)]
pub struct State {
    pub swarms: Arc<SwarmStore>,
    pub config: Arc<TrackerConfig>,
    /// When the tracker came up, for the operator stats page.
    pub started_at: std::time::Instant,
}

impl State {
    pub fn new(swarms: Arc<SwarmStore>, config: Arc<TrackerConfig>) -> State {
        State {
            swarms,
            config,
            started_at: std::time::Instant::now(),
        }
    }
}
