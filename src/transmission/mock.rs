use super::UdpSocketLike;
use async_trait::async_trait;
use bytes::Bytes;
use flume::{Receiver, Sender};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

/// Decides the fate of the `n`-th datagram sent through a socket.
pub type Fault = Arc<dyn Fn(u64, &[u8]) -> bool + Send + Sync>;

/// In-memory datagram link. Each side may silently lose or loudly fail
/// selected sends to imitate a lossy network or a refusing kernel.
#[derive(Clone)]
pub struct MockSocket {
    sender: Sender<(Bytes, SocketAddr)>,
    receiver: Receiver<(Bytes, SocketAddr)>,
    local_addr: SocketAddr,
    sent: Arc<AtomicU64>,
    lose: Option<Fault>,
    fail: Option<Fault>,
}

impl MockSocket {
    pub fn pair(addr1: SocketAddr, addr2: SocketAddr) -> (Self, Self) {
        // Duplex：A -> B, B -> A
        let (tx1, rx1) = flume::unbounded::<(Bytes, SocketAddr)>();
        let (tx2, rx2) = flume::unbounded::<(Bytes, SocketAddr)>();

        let socket1 = MockSocket {
            sender: tx1,
            receiver: rx2,
            local_addr: addr1,
            sent: Arc::default(),
            lose: None,
            fail: None,
        };
        let socket2 = MockSocket {
            sender: tx2,
            receiver: rx1,
            local_addr: addr2,
            sent: Arc::default(),
            lose: None,
            fail: None,
        };

        (socket1, socket2)
    }

    /// Datagrams matching `lose` are reported as sent but never delivered.
    pub fn losing(mut self, lose: impl Fn(u64, &[u8]) -> bool + Send + Sync + 'static) -> Self {
        self.lose = Some(Arc::new(lose));
        self
    }

    /// Datagrams matching `fail` are rejected with an I/O error.
    pub fn failing(mut self, fail: impl Fn(u64, &[u8]) -> bool + Send + Sync + 'static) -> Self {
        self.fail = Some(Arc::new(fail));
        self
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Relaxed)
    }
}

#[async_trait]
impl UdpSocketLike for MockSocket {
    async fn send_to(&self, bufs: &[Bytes], _target: SocketAddr) -> std::io::Result<usize> {
        let seq = self.sent.fetch_add(1, Relaxed);

        // Splice the parts together to simulate the payload of a UDP packet.
        let total_len: usize = bufs.iter().map(|b| b.len()).sum();
        let combined = if bufs.len() == 1 {
            bufs[0].clone()
        } else {
            let mut v = Vec::with_capacity(total_len);
            for b in bufs {
                v.extend_from_slice(b);
            }
            Bytes::from(v)
        };

        if self.fail.as_ref().is_some_and(|fail| fail(seq, &combined)) {
            return Err(std::io::Error::other(format!("injected failure on datagram {seq}")));
        }
        if self.lose.as_ref().is_some_and(|lose| lose(seq, &combined)) {
            return Ok(total_len);
        }

        self.sender
            .send_async((combined, self.local_addr))
            .await
            .map_err(|e| {
                std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    format!("channel closed: {e}"),
                )
            })?;
        Ok(total_len)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
        let (data, from) = self.receiver.recv_async().await.map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("channel closed: {e}"),
            )
        })?;

        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);

        Ok((len, from))
    }

    fn local_addr(&self) -> std::io::Result<SocketAddr> {
        Ok(self.local_addr)
    }
}
