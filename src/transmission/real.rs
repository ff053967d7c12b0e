use bytes::Bytes;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::IoSlice;
use std::net::SocketAddr;
use tokio::io::Interest;
use tokio::net::UdpSocket as TokioUdpSocket;

use super::UdpSocketLike;

pub struct RealUdpSocket {
    inner_raw: Socket,
    inner_tokio: TokioUdpSocket,
}

impl RealUdpSocket {
    /// Binds a non-blocking UDP socket. `recv_buffer` enlarges the kernel
    /// receive queue, which matters when one frame arrives as a burst of
    /// large datagrams.
    pub async fn bind(addr: SocketAddr, recv_buffer: Option<usize>) -> std::io::Result<Self> {
        let domain = match addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        if let Some(size) = recv_buffer {
            socket.set_recv_buffer_size(size)?;
        }

        socket.bind(&addr.into())?;
        let std_socket = socket.try_clone()?.into();
        let tokio_socket = TokioUdpSocket::from_std(std_socket)?;

        Ok(Self {
            inner_tokio: tokio_socket,
            inner_raw: socket,
        })
    }
}

#[async_trait::async_trait]
impl UdpSocketLike for RealUdpSocket {
    async fn send_to(&self, bufs: &[Bytes], target: SocketAddr) -> std::io::Result<usize> {
        let io_slice = bufs
            .iter()
            .map(|slice| IoSlice::new(slice))
            .collect::<Vec<_>>();

        let target = SockAddr::from(target);
        loop {
            self.inner_tokio.writable().await?;
            match self.inner_tokio.try_io(Interest::WRITABLE, || {
                self.inner_raw
                    .send_to_vectored(io_slice.as_slice(), &target)
            }) {
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => continue,
                result => return result,
            }
        }
    }

    async fn recv_from(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
        self.inner_tokio.recv_from(buf).await
    }

    fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner_tokio.local_addr()
    }
}
