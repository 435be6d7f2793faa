mod error;
mod handler;
mod response;

use bytes::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use log::{debug, error, info};
use socket2::{Protocol, Socket};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use self::error::Error;
use super::State;
use crate::signals::StopSignalRx;

/// Request heads may grow to 64 KiB before the blank-line terminator;
/// anything larger is answered with 413 and the connection closed.
const MAX_HEADER_BUFFER_SIZE: usize = 64 * 1024;

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Per-connection idle budget. Connections are close-only, so this bounds
/// the whole request/response exchange.
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

const CONNECTION_BACKLOG: i32 = 1024;
const MAX_OPEN_CONNECTIONS: usize = 512;

/// The BEP3 HTTP front end. Binds loopback only; remote I2P peers arrive
/// through the SAM stream forward.
pub struct HttpServer {
    state: State,
    port: u16,
}

impl HttpServer {
    pub fn new(state: State, port: u16) -> HttpServer {
        HttpServer { state, port }
    }

    pub async fn start(
        &self,
        mut stop_signal_rx: StopSignalRx,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let addr = SocketAddr::from((ip, self.port));

        let socket = Socket::new(socket2::Domain::IPV4, socket2::Type::STREAM, Some(Protocol::TCP))?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
        socket.bind(&addr.into())?;
        socket.listen(CONNECTION_BACKLOG)?;

        let listener: std::net::TcpListener = socket.into();
        listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(listener)?;

        info!("BT tracker HTTP server listening on http://{}", addr);

        let state = self.state.clone();
        let rx = stop_signal_rx.clone();

        let task = tokio::spawn(async move {
            if let Err(e) = accept_loop(listener, state, rx).await {
                error!("BT tracker HTTP server error: {}", e);
            }
        });

        stop_signal_rx.changed().await?;

        info!("Shutting down BT tracker HTTP server...");

        task.abort();
        let _ = task.await;

        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    state: State,
    stop_signal_rx: StopSignalRx,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let semaphore = Arc::new(Semaphore::new(MAX_OPEN_CONNECTIONS));

    loop {
        let permit = semaphore.clone().acquire_owned().await?;
        let (stream, addr) = listener.accept().await?;

        let mut stop_signal_rx = stop_signal_rx.clone();
        let state = state.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = stop_signal_rx.changed() => {}

                _ = tokio::time::sleep(CONNECTION_TIMEOUT) => {
                    debug!("connection from {} timed out", addr);
                }

                _ = serve_connection(stream, state) => {}
            }

            drop(permit);
        });
    }
}

/// Reads the request head before hyper sees the socket, so an over-limit
/// head gets a real 413 on the wire; accepted heads are replayed into the
/// parser through [`RewindIo`].
async fn serve_connection(mut stream: TcpStream, state: State) {
    let head = match read_request_head(&mut stream).await {
        Ok(RequestHead::Complete(head)) => head,
        Ok(RequestHead::TooLarge) => {
            let _ = stream.write_all(&Error::PayloadTooLarge.to_raw_http()).await;
            let _ = stream.shutdown().await;
            return;
        }
        Ok(RequestHead::Closed) => return,
        Err(err) => {
            debug!("error reading request head: {}", err);
            return;
        }
    };

    let io = TokioIo::new(RewindIo::new(Bytes::from(head), stream));
    let service = service_fn(move |req| handler::handle(req, state.clone()));

    let connection = http1::Builder::new()
        .max_buf_size(MAX_HEADER_BUFFER_SIZE)
        .keep_alive(false)
        .serve_connection(io, service);

    if let Err(err) = connection.await {
        debug!("error while serving connection: {}", err);
    }
}

enum RequestHead {
    /// The head plus whatever trailing bytes arrived with it.
    Complete(Vec<u8>),
    TooLarge,
    Closed,
}

/// Accumulates bytes until the `CRLF CRLF` terminator, the size limit, or
/// end of stream.
async fn read_request_head<S>(stream: &mut S) -> std::io::Result<RequestHead>
where
    S: AsyncRead + Unpin,
{
    let mut head: Vec<u8> = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];
    let mut scanned: usize = 0;

    loop {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Ok(RequestHead::Closed);
        }
        head.extend_from_slice(&chunk[..read]);

        // Rescan a little before the previous end in case the terminator
        // straddles a chunk boundary.
        let from = scanned.saturating_sub(HEAD_TERMINATOR.len() - 1);
        if head[from..]
            .windows(HEAD_TERMINATOR.len())
            .any(|window| window == HEAD_TERMINATOR)
        {
            return Ok(RequestHead::Complete(head));
        }
        scanned = head.len();

        if scanned > MAX_HEADER_BUFFER_SIZE {
            return Ok(RequestHead::TooLarge);
        }
    }
}

/// Replays already-read bytes ahead of the live stream; writes pass
/// straight through.
struct RewindIo<S> {
    buffered: Bytes,
    stream: S,
}

impl<S> RewindIo<S> {
    fn new(buffered: Bytes, stream: S) -> RewindIo<S> {
        RewindIo { buffered, stream }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for RewindIo<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();

        if !this.buffered.is_empty() {
            let len = this.buffered.len().min(buf.remaining());
            buf.put_slice(&this.buffered.split_to(len));
            return Poll::Ready(Ok(()));
        }

        Pin::new(&mut this.stream).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for RewindIo<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_head_terminator_across_chunks() {
        let (mut client, mut server) = tokio::io::duplex(64);

        let writer = tokio::spawn(async move {
            client
                .write_all(b"GET /announce HTTP/1.1\r\nhost: x\r\n")
                .await
                .unwrap();
            client.write_all(b"\r\n").await.unwrap();
            client
        });

        match read_request_head(&mut server).await.unwrap() {
            RequestHead::Complete(head) => assert!(head.ends_with(b"\r\n\r\n")),
            _ => panic!("expected a complete head"),
        }

        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_head_over_limit_is_too_large() {
        let (mut client, mut server) = tokio::io::duplex(8192);

        let writer = tokio::spawn(async move {
            let filler = [b'a'; 4096];
            // No terminator, just headers growing past the cap.
            while client.write_all(&filler).await.is_ok() {}
        });

        assert!(matches!(
            read_request_head(&mut server).await.unwrap(),
            RequestHead::TooLarge
        ));

        drop(server);
        let _ = writer.await;
    }

    #[tokio::test]
    async fn test_closed_before_terminator() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(b"GET / HT").await.unwrap();
        drop(client);

        assert!(matches!(
            read_request_head(&mut server).await.unwrap(),
            RequestHead::Closed
        ));
    }

    #[tokio::test]
    async fn test_rewind_io_replays_head_first() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut io = RewindIo::new(Bytes::from_static(b"HEAD"), server);

        client.write_all(b"TAIL").await.unwrap();

        let mut out = [0u8; 8];
        io.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"HEADTAIL");
    }
}
