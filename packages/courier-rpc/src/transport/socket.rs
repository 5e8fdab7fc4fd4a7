//! Addressable, asynchronous, message-framed sockets over TCP.
//!
//! [`RouterSocket`] multiplexes many peers behind `u64` identities; a
//! [`DealerSocket`] is one outbound connection exchanging single-part
//! frames. Frames are length-delimited on the wire.
//!
//! Both sockets expose `&mut self` receive/send: the endpoints are
//! single-owner and all access must be routed through one task. The
//! server's run loop relies on this to keep its socket discipline honest.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, trace, warn};

use crate::config::Endpoint;

/// Identity of one peer connection on a router socket.
///
/// Assigned by the router on accept, starting at 1 (0 is reserved as
/// "no peer"). Valid only for the lifetime of that peer's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity(pub u64);

/// Capacity of the shared inbound queue feeding `recv_timeout`.
const INBOUND_CAPACITY: usize = 1024;

fn frame_codec(max_frame_bytes: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(max_frame_bytes)
        .new_codec()
}

fn peer_gone(identity: Identity) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotConnected,
        format!("peer {} is gone", identity.0),
    )
}

// ---------------------------------------------------------------------------
// RouterSocket
// ---------------------------------------------------------------------------

/// Server-side socket: binds an address, accepts peers, and exchanges
/// (identity, frame) pairs.
///
/// Internally an accept task registers each connection under a fresh
/// [`Identity`] and runs its read/write halves; reads funnel into one
/// inbound queue, writes drain from a bounded per-peer channel. The
/// public surface stays two-part frames against a single-owner handle.
pub struct RouterSocket {
    local_addr: SocketAddr,
    inbound_rx: mpsc::Receiver<(Identity, Bytes)>,
    peers: Arc<DashMap<Identity, mpsc::Sender<Bytes>>>,
    accept_task: JoinHandle<()>,
}

impl RouterSocket {
    /// Binds the endpoint and starts accepting peers.
    ///
    /// # Errors
    ///
    /// Returns an error when the address cannot be bound.
    pub async fn bind(
        endpoint: &Endpoint,
        max_frame_bytes: usize,
        peer_channel_capacity: usize,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(endpoint.authority()).await?;
        let local_addr = listener.local_addr()?;
        let peers: Arc<DashMap<Identity, mpsc::Sender<Bytes>>> = Arc::new(DashMap::new());
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&peers),
            inbound_tx,
            max_frame_bytes,
            peer_channel_capacity,
        ));
        trace!(%local_addr, "router socket bound");
        Ok(Self {
            local_addr,
            inbound_rx,
            peers,
            accept_task,
        })
    }

    /// The bound address (carries the actual port when 0 was requested).
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Waits up to `timeout` for one inbound (identity, frame) pair.
    /// Returns `Ok(None)` when the tick elapses with nothing received.
    ///
    /// # Errors
    ///
    /// Returns an error when the accept machinery has terminated.
    pub async fn recv_timeout(
        &mut self,
        timeout: Duration,
    ) -> io::Result<Option<(Identity, Bytes)>> {
        match tokio::time::timeout(timeout, self.inbound_rx.recv()).await {
            Ok(Some(pair)) => Ok(Some(pair)),
            Ok(None) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "router accept loop terminated",
            )),
            Err(_) => Ok(None),
        }
    }

    /// Queues one frame for the given peer.
    ///
    /// # Errors
    ///
    /// A departed peer is reported as `NotConnected`; the socket itself
    /// stays usable for other peers.
    pub async fn send(&mut self, identity: Identity, frame: Bytes) -> io::Result<()> {
        let tx = self
            .peers
            .get(&identity)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| peer_gone(identity))?;
        tx.send(frame).await.map_err(|_| peer_gone(identity))
    }

    /// Queues one frame for the peer without waiting. A full write queue
    /// means the peer has stalled; the frame is refused so the caller can
    /// drop it instead of blocking everyone else.
    ///
    /// # Errors
    ///
    /// `WouldBlock` when the peer's write queue is full, `NotConnected`
    /// for a departed peer.
    pub fn try_send(&mut self, identity: Identity, frame: Bytes) -> io::Result<()> {
        let tx = self
            .peers
            .get(&identity)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| peer_gone(identity))?;
        tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => io::Error::new(
                io::ErrorKind::WouldBlock,
                format!("write queue for peer {} is full", identity.0),
            ),
            mpsc::error::TrySendError::Closed(_) => peer_gone(identity),
        })
    }

    /// Number of currently connected peers.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

impl Drop for RouterSocket {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    peers: Arc<DashMap<Identity, mpsc::Sender<Bytes>>>,
    inbound_tx: mpsc::Sender<(Identity, Bytes)>,
    max_frame_bytes: usize,
    peer_channel_capacity: usize,
) {
    // Identities start at 1; 0 is reserved as "no peer".
    let next_identity = AtomicU64::new(1);
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                let identity = Identity(next_identity.fetch_add(1, Ordering::Relaxed));
                trace!(%remote, identity = identity.0, "peer connected");
                let (write_tx, write_rx) = mpsc::channel(peer_channel_capacity);
                peers.insert(identity, write_tx);
                tokio::spawn(peer_loop(
                    stream,
                    identity,
                    Arc::clone(&peers),
                    inbound_tx.clone(),
                    write_rx,
                    max_frame_bytes,
                ));
            }
            Err(e) => {
                if inbound_tx.is_closed() {
                    break;
                }
                warn!("accept failed: {e}");
            }
        }
        if inbound_tx.is_closed() {
            break;
        }
    }
}

/// Runs one peer connection: frames read from the wire flow to the
/// router's inbound queue, queued writes flow back out. Exits when the
/// peer disconnects or the router is dropped, deregistering the identity.
async fn peer_loop(
    stream: TcpStream,
    identity: Identity,
    peers: Arc<DashMap<Identity, mpsc::Sender<Bytes>>>,
    inbound_tx: mpsc::Sender<(Identity, Bytes)>,
    mut write_rx: mpsc::Receiver<Bytes>,
    max_frame_bytes: usize,
) {
    let mut framed = Framed::new(stream, frame_codec(max_frame_bytes));
    loop {
        tokio::select! {
            read = framed.next() => match read {
                Some(Ok(frame)) => {
                    if inbound_tx.send((identity, frame.freeze())).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    debug!(identity = identity.0, "peer read failed: {e}");
                    break;
                }
                None => break,
            },
            write = write_rx.recv() => match write {
                Some(frame) => {
                    if let Err(e) = framed.send(frame).await {
                        debug!(identity = identity.0, "peer write failed: {e}");
                        break;
                    }
                }
                None => break,
            },
        }
    }
    peers.remove(&identity);
    trace!(identity = identity.0, "peer disconnected");
}

// ---------------------------------------------------------------------------
// DealerSocket
// ---------------------------------------------------------------------------

/// Client-side socket: one outbound connection exchanging single-part
/// frames. Dropped when the call completes, closing the connection.
pub struct DealerSocket {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
}

impl DealerSocket {
    /// Dials the endpoint.
    ///
    /// # Errors
    ///
    /// Returns the underlying connect error.
    pub async fn connect(endpoint: &Endpoint, max_frame_bytes: usize) -> io::Result<Self> {
        let stream = TcpStream::connect(endpoint.authority()).await?;
        Ok(Self {
            framed: Framed::new(stream, frame_codec(max_frame_bytes)),
        })
    }

    /// Sends one frame.
    ///
    /// # Errors
    ///
    /// Returns the underlying write error.
    pub async fn send(&mut self, frame: Bytes) -> io::Result<()> {
        self.framed.send(frame).await
    }

    /// Receives one frame.
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedEof` when the connection closes before a frame
    /// arrives.
    pub async fn recv(&mut self) -> io::Result<Bytes> {
        match self.framed.next().await {
            Some(Ok(frame)) => Ok(frame.freeze()),
            Some(Err(e)) => Err(e),
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before reply",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> Endpoint {
        Endpoint {
            host: "127.0.0.1".to_string(),
            port: 0,
        }
    }

    fn bound(router: &RouterSocket) -> Endpoint {
        Endpoint {
            host: "127.0.0.1".to_string(),
            port: router.local_addr().port(),
        }
    }

    const MAX_FRAME: usize = 1024 * 1024;

    #[tokio::test]
    async fn round_trips_one_frame() {
        let mut router = RouterSocket::bind(&loopback(), MAX_FRAME, 8).await.unwrap();
        let endpoint = bound(&router);

        let mut dealer = DealerSocket::connect(&endpoint, MAX_FRAME).await.unwrap();
        dealer.send(Bytes::from_static(b"ping")).await.unwrap();

        let (identity, frame) = router
            .recv_timeout(Duration::from_secs(5))
            .await
            .unwrap()
            .expect("frame expected");
        assert_eq!(&frame[..], b"ping");

        router
            .send(identity, Bytes::from_static(b"pong"))
            .await
            .unwrap();
        assert_eq!(&dealer.recv().await.unwrap()[..], b"pong");
    }

    #[tokio::test]
    async fn recv_timeout_ticks_when_idle() {
        let mut router = RouterSocket::bind(&loopback(), MAX_FRAME, 8).await.unwrap();
        let got = router
            .recv_timeout(Duration::from_millis(20))
            .await
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn peers_get_distinct_identities() {
        let mut router = RouterSocket::bind(&loopback(), MAX_FRAME, 8).await.unwrap();
        let endpoint = bound(&router);

        let mut a = DealerSocket::connect(&endpoint, MAX_FRAME).await.unwrap();
        let mut b = DealerSocket::connect(&endpoint, MAX_FRAME).await.unwrap();
        a.send(Bytes::from_static(b"a")).await.unwrap();
        b.send(Bytes::from_static(b"b")).await.unwrap();

        let (id1, _) = router
            .recv_timeout(Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        let (id2, _) = router
            .recv_timeout(Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(id1, id2);
    }

    #[tokio::test]
    async fn replies_reach_the_right_peer() {
        let mut router = RouterSocket::bind(&loopback(), MAX_FRAME, 8).await.unwrap();
        let endpoint = bound(&router);

        let mut a = DealerSocket::connect(&endpoint, MAX_FRAME).await.unwrap();
        let mut b = DealerSocket::connect(&endpoint, MAX_FRAME).await.unwrap();
        a.send(Bytes::from_static(b"from-a")).await.unwrap();
        b.send(Bytes::from_static(b"from-b")).await.unwrap();

        for _ in 0..2 {
            let (identity, frame) = router
                .recv_timeout(Duration::from_secs(5))
                .await
                .unwrap()
                .unwrap();
            // Echo back with a prefix so each dealer can check its own reply.
            let mut reply = b"echo:".to_vec();
            reply.extend_from_slice(&frame);
            router.send(identity, Bytes::from(reply)).await.unwrap();
        }

        assert_eq!(&a.recv().await.unwrap()[..], b"echo:from-a");
        assert_eq!(&b.recv().await.unwrap()[..], b"echo:from-b");
    }

    #[tokio::test]
    async fn try_send_refuses_instead_of_stalling_on_a_full_queue() {
        let mut router = RouterSocket::bind(&loopback(), MAX_FRAME, 1).await.unwrap();
        let endpoint = bound(&router);

        let mut dealer = DealerSocket::connect(&endpoint, MAX_FRAME).await.unwrap();
        dealer.send(Bytes::from_static(b"hi")).await.unwrap();
        let (identity, _) = router
            .recv_timeout(Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();

        // The dealer never reads. Once the kernel buffers fill, the peer
        // write loop stalls and the single-slot queue backs up.
        let frame = Bytes::from(vec![0u8; 256 * 1024]);
        let mut saw_full = false;
        for _ in 0..256 {
            match router.try_send(identity, frame.clone()) {
                Ok(()) => tokio::task::yield_now().await,
                Err(e) => {
                    assert_eq!(e.kind(), io::ErrorKind::WouldBlock);
                    saw_full = true;
                    break;
                }
            }
        }
        assert!(saw_full, "write queue never filled");
        drop(dealer);
    }

    #[tokio::test]
    async fn send_to_departed_peer_fails_without_killing_socket() {
        let mut router = RouterSocket::bind(&loopback(), MAX_FRAME, 8).await.unwrap();
        let endpoint = bound(&router);

        let mut dealer = DealerSocket::connect(&endpoint, MAX_FRAME).await.unwrap();
        dealer.send(Bytes::from_static(b"hi")).await.unwrap();
        let (identity, _) = router
            .recv_timeout(Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();

        drop(dealer);
        // Wait for the peer loop to notice the disconnect.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let err = router
            .send(identity, Bytes::from_static(b"late"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        assert_eq!(router.peer_count(), 0);

        // The socket still accepts new peers afterwards.
        let mut again = DealerSocket::connect(&endpoint, MAX_FRAME).await.unwrap();
        again.send(Bytes::from_static(b"back")).await.unwrap();
        let (_, frame) = router
            .recv_timeout(Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&frame[..], b"back");
    }
}
