mod error;
pub use error::{Error, Result};
mod tasks;
pub use tasks::stats::Output as StatsOutput;
pub use tasks::State;

use self::tasks::{announce, scrape, stats, TaskExecutor};
use log::{debug, info};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

/// The BEP3 engine's task loop: the HTTP front end hands announce and
/// scrape work here and awaits the reply on a oneshot.
pub struct Worker {
    sender: mpsc::Sender<TaskPacket>,
    receiver: Option<mpsc::Receiver<TaskPacket>>,
    state: Option<State>,
}

const WORKER_QUEUE_SIZE: usize = 10_000;

impl Worker {
    pub fn new(state: State) -> Worker {
        let (sender, receiver) = mpsc::channel::<TaskPacket>(WORKER_QUEUE_SIZE);
        Self {
            sender,
            receiver: Some(receiver),
            state: Some(state),
        }
    }

    /// Starts the loop handling incoming tasks.
    pub fn start(&mut self) -> JoinHandle<()> {
        let receiver = self.receiver.take().expect("worker loop already started");
        let state = self.state.take().unwrap();

        tokio::spawn(async move {
            let mut worker_loop = WorkerLoop { receiver, state };
            worker_loop.run().await
        })
    }

    /// Sends a task for execution and awaits its output.
    pub async fn work(&self, task: Task) -> Result<TaskOutput> {
        let (sender, receiver) = oneshot::channel::<Result<TaskOutput>>();
        self.sender.send((task, sender)).await?;
        receiver.await?
    }

    /// Asks the loop to drain and stop.
    pub async fn shutdown(&self) {
        let _ = self
            .sender
            .send((Task::Shutdown, oneshot::channel().0))
            .await;
    }
}

pub enum Task {
    Announce(announce::Input),
    Scrape(scrape::Input),
    Stats,
    Shutdown,
}

#[derive(Debug)]
pub enum TaskOutput {
    Announce(announce::Output),
    Scrape(scrape::Output),
    Stats(stats::Output),
    None,
}

type TaskSender = oneshot::Sender<Result<TaskOutput>>;
type TaskPacket = (Task, TaskSender);

struct WorkerLoop {
    receiver: mpsc::Receiver<TaskPacket>,
    state: State,
}

impl WorkerLoop {
    async fn run(&mut self) {
        let executor = Executor;
        info!("BT tracker worker loop started");

        while let Some((task, sender)) = self.receiver.recv().await {
            debug!("Worker received task {:?}", task);

            match task {
                Task::Announce(input) => {
                    executor.execute(announce::TaskExecutor, input, sender, self.state.clone())
                }

                Task::Scrape(input) => {
                    executor.execute(scrape::TaskExecutor, input, sender, self.state.clone())
                }

                Task::Stats => {
                    executor.execute(stats::TaskExecutor, (), sender, self.state.clone())
                }

                Task::Shutdown => {
                    self.receiver.close();
                    let _ = sender.send(Ok(TaskOutput::None));
                }
            };
        }

        info!("BT tracker worker loop stopped");
    }
}

struct Executor;

impl Executor {
    fn execute<E, I, O>(&self, executor: E, input: I, sender: TaskSender, state: State)
    where
        E: TaskExecutor<Input = I, Output = O> + Send + 'static,
        I: Send + 'static,
    {
        tokio::spawn(async move {
            let response = executor.execute(input, state).await;
            let _ = sender.send(response);
        });
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Task::Announce(_) => write!(f, "Announce"),
            Task::Scrape(_) => write!(f, "Scrape"),
            Task::Stats => write!(f, "Stats"),
            Task::Shutdown => write!(f, "Shutdown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::models::bep3::ScrapeRequest;
    use crate::storage::SwarmStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_work_round_trip() {
        let state = State::new(Arc::new(SwarmStore::new()), Arc::new(TrackerConfig::default()));
        let mut worker = Worker::new(state);
        let handle = worker.start();

        let output = worker
            .work(Task::Scrape(ScrapeRequest {
                info_hashes: vec![],
            }))
            .await
            .unwrap();
        assert!(matches!(output, TaskOutput::Scrape(_)));

        worker.shutdown().await;
        handle.await.unwrap();
    }
}
