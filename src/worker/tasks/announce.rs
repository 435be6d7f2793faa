use async_trait::async_trait;
use ishare_utils::time;

use super::State;
use crate::{
    constants,
    models::{
        bep3::{AnnounceRequest, AnnounceResponse},
        swarm::{AnnounceEvent, SwarmPeer},
    },
    worker::{Result, TaskOutput},
};

pub struct TaskExecutor;

pub type Input = AnnounceRequest;
pub type Output = AnnounceResponse;

#[async_trait]
impl super::TaskExecutor for TaskExecutor {
    type Input = Input;
    type Output = Output;

    async fn execute(&self, req: Self::Input, state: State) -> Result<TaskOutput> {
        let swarms = state.swarms;
        let config = state.config;

        // 6-byte IP:port entries cannot encode a destination.
        if req.compact {
            return super::err(constants::TRACKER_ERROR_COMPACT_UNSUPPORTED);
        }

        let now = time::now_millis();
        let info_hash = &req.info_hash;

        match req.event {
            AnnounceEvent::Stopped => {
                swarms.remove_peer(info_hash, &req.destination).await;
            }

            AnnounceEvent::Completed => {
                swarms.promote_peer(info_hash, &req.destination, now).await;
            }

            AnnounceEvent::Started | AnnounceEvent::None => {
                let peer =
                    SwarmPeer::new(now, req.left == 0, req.uploaded, req.downloaded);
                swarms
                    .update_or_insert_peer(info_hash, &req.destination, peer)
                    .await;
            }
        }

        let response = {
            let mut peers = Vec::new();
            let mut stats = Default::default();

            if req.event != AnnounceEvent::Stopped {
                let limit = req
                    .numwant
                    .unwrap_or(config.max_peers_per_response())
                    .min(config.max_peers_per_response());
                let cutoff = now.saturating_sub(config.bt_peer_timeout_ms());

                (peers, stats) = swarms
                    .extract_peers(info_hash, &req.destination, cutoff, limit)
                    .await;
            }

            AnnounceResponse {
                interval: config.announce_interval(),
                min_interval: config.min_announce_interval(),
                complete: stats.complete,
                incomplete: stats.incomplete,
                peers,
            }
        };

        Ok(TaskOutput::Announce(response))
    }
}
