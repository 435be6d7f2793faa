use log::{error, info, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use ishare_utils::time;

use crate::config::TrackerConfig;
use crate::constants;
use crate::discovery::DiscoveryEngine;
use crate::identity::{self, Identity};
use crate::sam::{self, DatagramSession, SamEndpoint, SharedSender, StreamForward};
use crate::servers::{self, HttpServer};
use crate::signals::{stop_channel, StopSignalRx, StopSignalTx};
use crate::storage::{PeerStore, SwarmStore};
use crate::worker::{State as WorkerState, Worker};

/// Lifecycle of a tracker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Init,
    Starting,
    Running,
    Reconnecting,
    Stopping,
    Stopped,
}

/// Fatal startup failures; anything later is recovered or logged.
#[derive(Debug)]
pub enum StartError {
    Sam(sam::Error),
    Store(crate::storage::Error),
    Identity(std::io::Error),
    Http(String),
}

impl std::fmt::Display for StartError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            StartError::Sam(err) => write!(f, "SAM bridge unreachable: {}", err),
            StartError::Store(err) => write!(f, "cannot open peer store: {}", err),
            StartError::Identity(err) => write!(f, "cannot persist identity: {}", err),
            StartError::Http(err) => write!(f, "cannot start BT tracker: {}", err),
        }
    }
}

impl std::error::Error for StartError {}

/// The running tracker: owns the transport, the engines and the timers,
/// and is the only component allowed to reconnect or shut down.
pub struct Tracker {
    config: Arc<TrackerConfig>,
    identity: Arc<Identity>,
    store: Arc<PeerStore>,
    engine: Arc<DiscoveryEngine>,
    worker: Option<Arc<Worker>>,
    state_tx: watch::Sender<TrackerState>,
    stop_tx: StopSignalTx,
    jobs: Vec<JoinHandle<()>>,
    _stream_forward: Option<StreamForward>,
}

impl Tracker {
    /// Start order: snapshot → identity → SAM datagram session → BT
    /// tracker → timers. Any failure here is fatal and maps to exit 1.
    pub async fn start(config: TrackerConfig) -> Result<Tracker, StartError> {
        let (state_tx, _) = watch::channel(TrackerState::Init);
        let _ = state_tx.send(TrackerState::Starting);

        let config = Arc::new(config);
        let data_dir = config.data_dir().to_path_buf();
        let endpoint = SamEndpoint {
            host: config.sam.host.clone(),
            tcp_port: config.sam.tcp_port,
            udp_port: config.sam.udp_port,
        };

        let store = Arc::new(
            PeerStore::open(Some(&data_dir.join(constants::DB_FILE)))
                .map_err(StartError::Store)?,
        );

        let identity = match Identity::load(&data_dir) {
            Some(identity) => identity,
            None => {
                let (public, private) = sam::generate_destination(&endpoint)
                    .await
                    .map_err(StartError::Sam)?;
                let identity = Identity::mint(public, private);
                identity.save(&data_dir).map_err(StartError::Identity)?;
                info!("Minted new identity {}", identity.b32_address);
                identity
            }
        };
        let identity = Arc::new(identity);

        let session = DatagramSession::open(
            &endpoint,
            "ishare-tracker",
            &identity.private_key,
            config.listen_port(),
        )
        .await
        .map_err(StartError::Sam)?;
        let session = Arc::new(session);

        let sender = Arc::new(SharedSender::new());
        sender.attach(session.clone()).await;

        identity::write_destination_file(
            &data_dir,
            constants::DESTINATION_FILE,
            &identity.destination,
        );
        println!("Tracker address: {}", identity.b32_address);
        println!("Tracker destination: {}", identity.destination);

        let engine = Arc::new(DiscoveryEngine::new(
            store.clone(),
            config.clone(),
            identity.clone(),
            sender.clone(),
        ));

        let (stop_tx, stop_rx) = stop_channel();
        let mut jobs = Vec::new();

        jobs.push(spawn_transport_loop(
            endpoint.clone(),
            config.clone(),
            identity.clone(),
            engine.clone(),
            sender.clone(),
            session,
            state_tx.clone(),
            stop_rx.clone(),
        ));

        // The BEP3 side: swarm store, worker loop, HTTP front end and the
        // stream forward that funnels I2P peers onto it.
        let (worker, stream_forward) = if config.bt_enabled() {
            let swarms = Arc::new(SwarmStore::new());
            let mut worker = Worker::new(WorkerState::new(swarms.clone(), config.clone()));
            jobs.push(worker.start());
            let worker = Arc::new(worker);

            let http_port = sam::randomize_port(config.bt_http_port());
            let http_server = HttpServer::new(
                servers::State::new(worker.clone(), config.clone()),
                http_port,
            );
            let http_rx = stop_rx.clone();
            jobs.push(tokio::spawn(async move {
                if let Err(err) = http_server.start(http_rx).await {
                    error!("BT tracker HTTP server failed: {}", err);
                }
            }));

            // The BT tracker speaks from its own, per-run destination.
            let (bt_public, bt_private) = sam::generate_destination(&endpoint)
                .await
                .map_err(StartError::Sam)?;
            let forward =
                StreamForward::open(&endpoint, "ishare-bt-tracker", &bt_private, http_port)
                    .await
                    .map_err(|err| StartError::Http(err.to_string()))?;

            let bt_destination = crate::models::common::Destination::new(bt_public);
            identity::write_destination_file(
                &data_dir,
                constants::BT_DESTINATION_FILE,
                &bt_destination,
            );
            println!("BT tracker address: {}", identity::b32_of(bt_destination.as_str()));

            let swarm_cutoff_ms = config.bt_peer_timeout_ms();
            let sweeper = swarms.clone();
            jobs.push(spawn_timer(
                "swarm-sweep",
                config.bt_cleanup_interval(),
                stop_rx.clone(),
                move || {
                    let swarms = sweeper.clone();
                    async move {
                        let cutoff = time::now_millis().saturating_sub(swarm_cutoff_ms);
                        let removed = swarms.sweep(cutoff).await;
                        if removed > 0 {
                            info!("Swarm sweep removed {} stale peers", removed);
                        }
                    }
                },
            ));

            (Some(worker), Some(forward))
        } else {
            (None, None)
        };

        // Discovery-side timers.
        let sweep_engine = engine.clone();
        jobs.push(spawn_timer(
            "peer-sweep",
            config.cleanup_interval(),
            stop_rx.clone(),
            move || {
                let engine = sweep_engine.clone();
                async move { engine.sweep().await }
            },
        ));

        let nonce_engine = engine.clone();
        jobs.push(spawn_timer(
            "nonce-sweep",
            Duration::from_secs(60),
            stop_rx.clone(),
            move || {
                let engine = nonce_engine.clone();
                async move { engine.sweep_nonces() }
            },
        ));

        let snapshot_store = store.clone();
        jobs.push(spawn_timer(
            "db-snapshot",
            config.snapshot_interval(),
            stop_rx.clone(),
            move || {
                let store = snapshot_store.clone();
                async move {
                    if let Err(err) = store.snapshot() {
                        warn!("Snapshot failed: {}", err);
                    }
                }
            },
        ));

        let stats_engine = engine.clone();
        jobs.push(spawn_timer(
            "stats-log",
            Duration::from_secs(30),
            stop_rx,
            move || {
                let engine = stats_engine.clone();
                async move { info!("Stats: {} active peers", engine.active_peer_count()) }
            },
        ));

        let _ = state_tx.send(TrackerState::Running);
        info!("Tracker running");

        Ok(Tracker {
            config,
            identity,
            store,
            engine,
            worker,
            state_tx,
            stop_tx,
            jobs,
            _stream_forward: stream_forward,
        })
    }

    pub fn state(&self) -> TrackerState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<TrackerState> {
        self.state_tx.subscribe()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// The discovery engine, for the hosting process (local registration,
    /// event subscription).
    pub fn discovery(&self) -> &Arc<DiscoveryEngine> {
        &self.engine
    }

    /// Stop order is the reverse of start; the final snapshot is always
    /// attempted.
    pub async fn stop(self) {
        let _ = self.state_tx.send(TrackerState::Stopping);
        info!("Stopping tracker...");

        let _ = self.stop_tx.send(());

        if let Some(worker) = &self.worker {
            worker.shutdown().await;
        }

        for job in &self.jobs {
            job.abort();
        }
        futures::future::join_all(self.jobs).await;

        if let Err(err) = self.store.snapshot() {
            warn!("Final snapshot failed: {}", err);
        }

        let _ = self.state_tx.send(TrackerState::Stopped);
        info!("Tracker stopped");
    }
}

/// One named periodic task; the first tick is skipped so work starts one
/// period after boot.
fn spawn_timer<F, Fut>(
    name: &'static str,
    period: Duration,
    mut stop_rx: StopSignalRx,
    task: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => task().await,
                _ = stop_rx.changed() => {
                    log::debug!("timer {} stopped", name);
                    break;
                }
            }
        }
    })
}

/// The receive loop plus reconnect handling. A dead session flips the
/// tracker to RECONNECTING, retries with `min(5s * attempt, 30s)` backoff
/// and flips back to RUNNING once the bridge answers again.
#[allow(clippy::too_many_arguments)]
fn spawn_transport_loop(
    endpoint: SamEndpoint,
    config: Arc<TrackerConfig>,
    identity: Arc<Identity>,
    engine: Arc<DiscoveryEngine>,
    sender: Arc<SharedSender>,
    mut session: Arc<DatagramSession>,
    state_tx: watch::Sender<TrackerState>,
    mut stop_rx: StopSignalRx,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65_536];

        loop {
            tokio::select! {
                _ = stop_rx.changed() => break,

                received = session.recv(&mut buf) => match received {
                    Ok(len) => engine.handle_datagram(&buf[..len]).await,
                    Err(err) => {
                        if matches!(
                            *state_tx.borrow(),
                            TrackerState::Stopping | TrackerState::Stopped
                        ) {
                            break;
                        }

                        warn!("SAM session lost: {}", err);
                        let _ = state_tx.send(TrackerState::Reconnecting);
                        sender.detach().await;

                        match reconnect(&endpoint, &config, &identity, &mut stop_rx).await {
                            Some(new_session) => {
                                session = Arc::new(new_session);
                                sender.attach(session.clone()).await;
                                let _ = state_tx.send(TrackerState::Running);
                                info!("SAM session re-established");
                            }
                            None => break,
                        }
                    }
                }
            }
        }
    })
}

async fn reconnect(
    endpoint: &SamEndpoint,
    config: &TrackerConfig,
    identity: &Identity,
    stop_rx: &mut StopSignalRx,
) -> Option<DatagramSession> {
    let mut attempt: u32 = 1;

    loop {
        let delay = sam::backoff_delay(attempt);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop_rx.changed() => return None,
        }

        match DatagramSession::open(
            endpoint,
            "ishare-tracker",
            &identity.private_key,
            config.listen_port(),
        )
        .await
        {
            Ok(session) => return Some(session),
            Err(err) => {
                warn!("Reconnect attempt {} failed: {}", attempt, err);
                attempt += 1;
            }
        }
    }
}
