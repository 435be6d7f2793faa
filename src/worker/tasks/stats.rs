use async_trait::async_trait;

use super::State;
use crate::worker::{Result, TaskOutput};

pub struct TaskExecutor;

pub type Input = ();

/// Snapshot for the operator `/stats` page.
#[derive(Debug, Clone)]
pub struct Output {
    pub torrents: usize,
    pub swarm_peers: usize,
    pub uptime_secs: u64,
}

#[async_trait]
impl super::TaskExecutor for TaskExecutor {
    type Input = Input;
    type Output = Output;

    async fn execute(&self, _input: Self::Input, state: State) -> Result<TaskOutput> {
        let output = Output {
            torrents: state.swarms.torrent_count().await,
            swarm_peers: state.swarms.peer_count().await,
            uptime_secs: state.started_at.elapsed().as_secs(),
        };

        Ok(TaskOutput::Stats(output))
    }
}
