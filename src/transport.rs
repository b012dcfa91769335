//! Shared UDP datagram transport module.
//!
//! Best-effort, unreliable, unordered delivery of single datagrams up to
//! `MAX_DATAGRAM` bytes. One hub per node: binds the socket, spawns a
//! receiver task that feeds an unbounded channel of `(sender, payload)`
//! pairs, and exposes fire-and-forget sends. Sends never retry; losing a
//! datagram is a condition the protocols above are built to tolerate.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::membership::NodeId;
use crate::utils::{ShoalError, MAX_DATAGRAM};

use bytes::Bytes;

use rand::Rng;

use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

pub struct DatagramHub {
    /// My log line prefix.
    me: String,

    socket: Arc<UdpSocket>,

    /// Receiver side of the recv channel, fed by the receiver task.
    rx_recv: Mutex<mpsc::UnboundedReceiver<(SocketAddr, Bytes)>>,

    /// Join handle of the receiver task.
    receiver_handle: JoinHandle<()>,
}

impl DatagramHub {
    /// Binds the node's socket and spawns the receiver task. `drop_rate` in
    /// [0, 1] discards that fraction of incoming datagrams uniformly at
    /// random -- a testing hook, not a protocol feature.
    pub async fn new_and_setup(
        me: String,
        host: &str,
        port: &str,
        drop_rate: f64,
    ) -> Result<Self, ShoalError> {
        let bind_addr = Self::resolve(host, port).await?;
        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        pf_info!(me; "listening for datagrams on '{}'", socket.local_addr()?);

        let (tx_recv, rx_recv) = mpsc::unbounded_channel();
        let receiver_handle = tokio::spawn(Self::receiver_task(
            me.clone(),
            socket.clone(),
            tx_recv,
            drop_rate,
        ));

        Ok(DatagramHub {
            me,
            socket,
            rx_recv: Mutex::new(rx_recv),
            receiver_handle,
        })
    }

    /// Resolves a `host`/`port` pair to a socket address.
    pub async fn resolve(host: &str, port: &str) -> Result<SocketAddr, ShoalError> {
        lookup_host((host, port.parse::<u16>().map_err(ShoalError::msg)?))
            .await?
            .next()
            .ok_or_else(|| ShoalError(format!("cannot resolve '{}:{}'", host, port)))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ShoalError> {
        Ok(self.socket.local_addr()?)
    }

    /// Sends one encoded datagram. Fails on oversized payloads and on
    /// socket-level errors; both are the caller's to log and shrug off.
    pub async fn send_bytes(&self, payload: &Bytes, dest: SocketAddr) -> Result<(), ShoalError> {
        if payload.len() > MAX_DATAGRAM {
            return logged_err!(self.me; "refusing oversized datagram of {} bytes", payload.len());
        }
        let sent = self.socket.send_to(payload, dest).await?;
        if sent != payload.len() {
            return logged_err!(self.me; "short send: {} of {} bytes", sent, payload.len());
        }
        Ok(())
    }

    /// Sends one encoded datagram to a node's endpoint.
    pub async fn send_to_node(&self, payload: &Bytes, id: &NodeId) -> Result<(), ShoalError> {
        let dest = Self::resolve(id.host(), id.port()).await?;
        self.send_bytes(payload, dest).await
    }

    /// Receives the next datagram from the receiver task's channel.
    pub async fn recv_msg(&self) -> Result<(SocketAddr, Bytes), ShoalError> {
        let mut rx_recv = self.rx_recv.lock().await;
        match rx_recv.recv().await {
            Some(pair) => Ok(pair),
            None => logged_err!(self.me; "recv channel has been closed"),
        }
    }

    /// Stops the receiver task; pending sends on the socket still complete.
    pub fn shutdown(&self) {
        self.receiver_handle.abort();
    }

    async fn receiver_task(
        me: String,
        socket: Arc<UdpSocket>,
        tx_recv: mpsc::UnboundedSender<(SocketAddr, Bytes)>,
        drop_rate: f64,
    ) {
        pf_debug!(me; "receiver task spawned");
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, sender)) => {
                    if drop_rate > 0.0 && rand::thread_rng().gen::<f64>() < drop_rate {
                        pf_debug!(me; "dropped incoming datagram (drop_rate)");
                        continue;
                    }
                    if tx_recv
                        .send((sender, Bytes::copy_from_slice(&buf[..len])))
                        .is_err()
                    {
                        break; // hub dropped, no receivers remain
                    }
                }
                Err(e) => {
                    pf_error!(me; "error receiving datagram: {}", e);
                }
            }
        }
        pf_debug!(me; "receiver task exited");
    }
}

impl Drop for DatagramHub {
    fn drop(&mut self) {
        self.receiver_handle.abort();
    }
}
