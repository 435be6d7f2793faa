mod error;
pub use self::error::{Error, Result};

use async_trait::async_trait;
use log::{debug, info, warn};
use rand::Rng;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::RwLock;

use crate::models::common::Destination;

/// Maximum raw-datagram payload I2P will carry reliably enough to bother.
const MAX_DATAGRAM_SIZE: usize = 31_744;

/// Width of the random port offset added to configured listen ports so
/// co-resident clients do not collide.
pub const PORT_RANDOM_RANGE: u16 = 100;

/// Exponential reconnect backoff: `min(5s * attempt, 30s)`.
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(u64::from(attempt.max(1)).saturating_mul(5).min(30))
}

/// Picks the local port to bind: `base + rand(0..99)`.
pub fn randomize_port(base: u16) -> u16 {
    base.saturating_add(rand::thread_rng().gen_range(0..PORT_RANDOM_RANGE))
}

/// Where the SAM bridge lives.
#[derive(Debug, Clone)]
pub struct SamEndpoint {
    pub host: String,
    pub tcp_port: u16,
    pub udp_port: u16,
}

/// One line of a SAM reply, parsed into its key=value fields.
#[derive(Debug, Default)]
pub struct SamReply {
    values: HashMap<String, String>,
}

impl SamReply {
    /// Parses e.g. `SESSION STATUS RESULT=OK DESTINATION=abcd…`. Values
    /// may be double-quoted when they contain spaces.
    fn parse(line: &str) -> SamReply {
        let mut values = HashMap::new();
        let mut rest = line.trim();

        // Skip the leading verb words (SESSION STATUS, HELLO REPLY, ...).
        while let Some((word, tail)) = rest.split_once(' ') {
            if word.contains('=') {
                break;
            }
            rest = tail.trim_start();
            if !rest.contains('=') {
                rest = "";
                break;
            }
        }

        while !rest.is_empty() {
            let Some((key, tail)) = rest.split_once('=') else {
                break;
            };

            let (value, tail) = if let Some(stripped) = tail.strip_prefix('"') {
                match stripped.split_once('"') {
                    Some((value, tail)) => (value, tail.trim_start()),
                    None => (stripped, ""),
                }
            } else {
                match tail.split_once(' ') {
                    Some((value, tail)) => (value, tail.trim_start()),
                    None => (tail, ""),
                }
            };

            values.insert(key.to_owned(), value.to_owned());
            rest = tail;
        }

        SamReply { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn is_ok(&self) -> bool {
        self.get("RESULT") == Some("OK")
    }

    fn into_rejection(self) -> Error {
        Error::Rejected {
            result: self.get("RESULT").unwrap_or("NONE").to_owned(),
            message: self.get("MESSAGE").unwrap_or_default().to_owned(),
        }
    }
}

/// A handshaken control connection to the SAM bridge. Sessions live as
/// long as their control connection, so holders keep it around.
pub struct SamControl {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl SamControl {
    pub async fn connect(endpoint: &SamEndpoint) -> Result<SamControl> {
        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.tcp_port)).await?;
        let (read, writer) = stream.into_split();

        let mut control = SamControl {
            reader: BufReader::new(read),
            writer,
        };

        let reply = control.command("HELLO VERSION MIN=3.0 MAX=3.1").await?;
        if !reply.is_ok() {
            return Err(reply.into_rejection());
        }

        Ok(control)
    }

    /// Sends one command line and reads the single reply line.
    pub async fn command(&mut self, line: &str) -> Result<SamReply> {
        debug!("sam >> {}", line);
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        let mut reply = String::new();
        let read = self.reader.read_line(&mut reply).await?;
        if read == 0 {
            return Err(Error::Protocol("bridge closed the connection".into()));
        }

        debug!("sam << {}", reply.trim_end());
        Ok(SamReply::parse(&reply))
    }
}

/// Asks the bridge to mint a fresh destination key pair.
pub async fn generate_destination(endpoint: &SamEndpoint) -> Result<(String, String)> {
    let mut control = SamControl::connect(endpoint).await?;
    let reply = control.command("DEST GENERATE SIGNATURE_TYPE=7").await?;

    match (reply.get("PUB"), reply.get("PRIV")) {
        (Some(public), Some(private)) => Ok((public.to_owned(), private.to_owned())),
        _ => Err(Error::Protocol("DEST GENERATE reply missing keys".into())),
    }
}

/// A RAW datagram session. Inbound payloads carry no sender framing; the
/// application envelope names the sender.
pub struct DatagramSession {
    session_id: String,
    socket: UdpSocket,
    data_addr: SocketAddr,
    local_port: u16,
    // The session dies with its control connection.
    _control: SamControl,
}

impl DatagramSession {
    /// Creates the session: binds a local UDP port at `listen_port +
    /// rand(0..99)` and registers it with the bridge.
    pub async fn open(
        endpoint: &SamEndpoint,
        session_id: &str,
        private_key: &str,
        listen_port: u16,
    ) -> Result<DatagramSession> {
        let mut control = SamControl::connect(endpoint).await?;

        let (socket, local_port) = bind_udp(listen_port).await?;

        let reply = control
            .command(&format!(
                "SESSION CREATE STYLE=RAW ID={} DESTINATION={} PORT={} HOST=127.0.0.1",
                session_id, private_key, local_port
            ))
            .await?;
        if !reply.is_ok() {
            return Err(reply.into_rejection());
        }

        let data_addr = resolve(&endpoint.host, endpoint.udp_port).await?;

        info!(
            "SAM datagram session {} listening on udp/{}",
            session_id, local_port
        );

        Ok(DatagramSession {
            session_id: session_id.to_owned(),
            socket,
            data_addr,
            local_port,
            _control: control,
        })
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Fire-and-forget datagram send. I2P gives no delivery guarantee;
    /// oversized payloads are refused locally.
    pub async fn send(&self, destination: &Destination, payload: &[u8]) -> Result<()> {
        let header = format!("3.0 {} {}\n", self.session_id, destination);
        if header.len() + payload.len() > MAX_DATAGRAM_SIZE {
            return Err(Error::Protocol(format!(
                "datagram of {} bytes exceeds the {} byte limit",
                payload.len(),
                MAX_DATAGRAM_SIZE
            )));
        }

        let mut packet = Vec::with_capacity(header.len() + payload.len());
        packet.extend_from_slice(header.as_bytes());
        packet.extend_from_slice(payload);

        self.socket.send_to(&packet, self.data_addr).await?;
        Ok(())
    }

    /// Receives the next raw datagram payload.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        let (read, _) = self.socket.recv_from(buf).await?;
        Ok(read)
    }

    /// Tears the session down. The bridge ends a session when its control
    /// connection closes, so dropping is all it takes.
    pub fn close(self) {
        info!("SAM datagram session {} closed", self.session_id);
    }
}

async fn bind_udp(listen_port: u16) -> Result<(UdpSocket, u16)> {
    // A few retries in case the randomised port is taken by a sibling.
    let mut last_err: Option<std::io::Error> = None;
    for _ in 0..8 {
        let port = randomize_port(listen_port);
        match UdpSocket::bind(("127.0.0.1", port)).await {
            Ok(socket) => return Ok((socket, port)),
            Err(err) => last_err = Some(err),
        }
    }

    Err(last_err
        .map(Error::Io)
        .unwrap_or_else(|| Error::Protocol("udp bind failed".into())))
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| Error::Protocol(format!("cannot resolve {}:{}", host, port)))
}

/// A STREAM session plus a forward registration: remote peers opening the
/// session's destination land on a local TCP port. `SILENT=true` keeps the
/// forwarded sockets free of SAM framing so plain HTTP flows through.
pub struct StreamForward {
    _session_control: SamControl,
    _forward_control: SamControl,
}

impl StreamForward {
    pub async fn open(
        endpoint: &SamEndpoint,
        session_id: &str,
        private_key: &str,
        forward_port: u16,
    ) -> Result<StreamForward> {
        let mut session_control = SamControl::connect(endpoint).await?;
        let reply = session_control
            .command(&format!(
                "SESSION CREATE STYLE=STREAM ID={} DESTINATION={}",
                session_id, private_key
            ))
            .await?;
        if !reply.is_ok() {
            return Err(reply.into_rejection());
        }

        // The forward registration must come from its own control
        // connection, which then stays open for the session's lifetime.
        let mut forward_control = SamControl::connect(endpoint).await?;
        let reply = forward_control
            .command(&format!(
                "STREAM FORWARD ID={} PORT={} HOST=127.0.0.1 SILENT=true",
                session_id, forward_port
            ))
            .await?;
        if !reply.is_ok() {
            return Err(reply.into_rejection());
        }

        info!(
            "SAM stream forward {} delivering to tcp/{}",
            session_id, forward_port
        );

        Ok(StreamForward {
            _session_control: session_control,
            _forward_control: forward_control,
        })
    }
}

/// Send-only capability handed to the engines. The supervisor swaps the
/// underlying session across reconnects; between sessions every send
/// fails with `TransportDown`.
#[async_trait]
pub trait DatagramSender: Send + Sync {
    async fn send(&self, destination: &Destination, payload: &[u8]) -> Result<()>;
}

#[derive(Default)]
pub struct SharedSender {
    inner: RwLock<Option<Arc<DatagramSession>>>,
}

impl SharedSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn attach(&self, session: Arc<DatagramSession>) {
        *self.inner.write().await = Some(session);
    }

    pub async fn detach(&self) {
        *self.inner.write().await = None;
    }

    pub async fn session(&self) -> Option<Arc<DatagramSession>> {
        self.inner.read().await.clone()
    }
}

#[async_trait]
impl DatagramSender for SharedSender {
    async fn send(&self, destination: &Destination, payload: &[u8]) -> Result<()> {
        let session = self.session().await.ok_or(Error::TransportDown)?;
        if let Err(err) = session.send(destination, payload).await {
            // Datagram loss is expected; callers only care about liveness.
            warn!("datagram send failed: {}", err);
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_parsing() {
        let reply =
            SamReply::parse("SESSION STATUS RESULT=OK DESTINATION=abc= ID=tracker\n");
        assert!(reply.is_ok());
        assert_eq!(reply.get("DESTINATION"), Some("abc="));
        assert_eq!(reply.get("ID"), Some("tracker"));
    }

    #[test]
    fn test_reply_parsing_quoted_message() {
        let reply =
            SamReply::parse("SESSION STATUS RESULT=I2P_ERROR MESSAGE=\"duplicate session id\"");
        assert!(!reply.is_ok());
        assert_eq!(reply.get("MESSAGE"), Some("duplicate session id"));
    }

    #[test]
    fn test_reply_parsing_hello() {
        let reply = SamReply::parse("HELLO REPLY RESULT=OK VERSION=3.1");
        assert!(reply.is_ok());
        assert_eq!(reply.get("VERSION"), Some("3.1"));
    }

    #[test]
    fn test_backoff_schedule() {
        assert_eq!(backoff_delay(0), Duration::from_secs(5));
        assert_eq!(backoff_delay(1), Duration::from_secs(5));
        assert_eq!(backoff_delay(3), Duration::from_secs(15));
        assert_eq!(backoff_delay(6), Duration::from_secs(30));
        assert_eq!(backoff_delay(1000), Duration::from_secs(30));
    }

    #[test]
    fn test_randomize_port_range() {
        for _ in 0..256 {
            let port = randomize_port(7670);
            assert!((7670..7670 + PORT_RANDOM_RANGE).contains(&port));
        }
    }

    #[tokio::test]
    async fn test_shared_sender_down_without_session() {
        let sender = SharedSender::new();
        let err = sender
            .send(&Destination::from("peer"), b"payload")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransportDown));
    }
}
