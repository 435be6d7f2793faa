use async_trait::async_trait;

use super::State;
use crate::{
    constants,
    models::bep3::{ScrapeRequest, ScrapeResponse},
    worker::{Result, TaskOutput},
};

pub struct TaskExecutor;

pub type Input = ScrapeRequest;
pub type Output = ScrapeResponse;

#[async_trait]
impl super::TaskExecutor for TaskExecutor {
    type Input = Input;
    type Output = Output;

    async fn execute(&self, req: Self::Input, state: State) -> Result<TaskOutput> {
        if req.info_hashes.len() > state.config.max_multi_scrape_count() {
            return super::err(constants::TRACKER_ERROR_TOO_MANY_SCRAPE_HASHES);
        }

        let files = state.swarms.multi_stats(&req.info_hashes).await;
        Ok(TaskOutput::Scrape(ScrapeResponse { files }))
    }
}
