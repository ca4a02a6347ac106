//! tokio UDP socket behind the engine's `DatagramSocket` seam.

use anisync_core::DatagramSocket;
use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::debug;

/// A UDP socket connected to the server.
///
/// All I/O is non-blocking: the engine polls it once per tick.
#[derive(Debug)]
pub struct UdpSocketAdapter {
    socket: UdpSocket,
}

impl UdpSocketAdapter {
    /// Binds `local` and connects to `server`.
    pub async fn connect(local: SocketAddr, server: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(local).await?;
        socket.connect(server).await?;
        debug!("UDP {} -> {}", socket.local_addr()?, server);
        Ok(Self { socket })
    }

    pub fn from_socket(socket: UdpSocket) -> Self {
        Self { socket }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.socket.peer_addr()
    }
}

impl DatagramSocket for UdpSocketAdapter {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        let sent = self.socket.try_send(datagram)?;
        if sent < datagram.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short send: {} of {} bytes", sent, datagram.len()),
            ));
        }
        Ok(())
    }

    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match self.socket.try_recv(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            // ICMP port unreachable from an earlier send; the packet is
            // retried on timeout like any lost datagram.
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                debug!("Server port unreachable");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip_over_loopback() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let mut client = UdpSocketAdapter::connect("127.0.0.1:0".parse().unwrap(), server_addr)
            .await
            .unwrap();

        let mut buf = [0u8; 64];
        assert_eq!(client.try_recv(&mut buf).unwrap(), None);

        client.send(b"PING tag=1").unwrap();
        let (n, from) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"PING tag=1");

        server.send_to(b"1 300 PONG", from).await.unwrap();
        client.socket.readable().await.unwrap();
        let n = client.try_recv(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..n], b"1 300 PONG");
    }
}
