//! Datagram transport: renders commands onto the socket and drains replies.

use crate::error::CoreError;
use anisync_protocol::{Command, Datagram, Verb, MAX_DATAGRAM_SIZE};
use std::io;
use tracing::{debug, trace, warn};

/// Non-blocking datagram socket.
///
/// Implemented over a connected UDP socket by the client crate and by test
/// doubles here.
pub trait DatagramSocket {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()>;

    /// Reads one pending datagram into `buf`; `None` when nothing is waiting.
    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>>;
}

/// Command and datagram I/O over a `DatagramSocket`.
pub struct Transport<S: DatagramSocket> {
    socket: S,
    buf: Vec<u8>,
}

impl<S: DatagramSocket> Transport<S> {
    pub fn new(socket: S) -> Self {
        Self {
            socket,
            buf: vec![0u8; MAX_DATAGRAM_SIZE],
        }
    }

    /// Sends `command` tagged with `tag`, carrying `session` when present.
    pub fn send(
        &mut self,
        command: &Command,
        session: Option<&str>,
        tag: u64,
    ) -> Result<(), CoreError> {
        if command.requires_session() && session.is_none() {
            return Err(CoreError::NoSession {
                verb: command.verb().to_string(),
            });
        }

        let wire = command.to_wire(session, tag);
        if *command.verb() == Verb::Auth {
            debug!("-> AUTH tag={}", tag);
        } else {
            debug!("-> {}", wire);
        }
        self.socket.send(wire.as_bytes())?;
        Ok(())
    }

    /// Drains every waiting datagram.
    ///
    /// Datagrams that fail to decompress are logged and dropped; the packet
    /// they answered falls through to the retry path.
    pub fn receive(&mut self) -> Result<Vec<Datagram>, CoreError> {
        let mut out = Vec::new();
        while let Some(len) = self.socket.try_recv(&mut self.buf)? {
            match Datagram::from_raw(&self.buf[..len]) {
                Ok(datagram) => {
                    trace!(
                        "<- {} bytes (compressed: {}, truncated: {})",
                        len,
                        datagram.compressed,
                        datagram.truncated
                    );
                    out.push(datagram);
                }
                Err(e) => warn!("Dropping undecodable datagram ({} bytes): {}", len, e),
            }
        }
        Ok(out)
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub fn socket_mut(&mut self) -> &mut S {
        &mut self.socket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSocket;
    use anisync_protocol::FieldMask;

    #[test]
    fn test_send_appends_session_and_tag() {
        let socket = MockSocket::new();
        let mut transport = Transport::new(socket.clone());
        transport
            .send(&Command::anime(1, &FieldMask::from_value(0x30)), Some("sid"), 4)
            .unwrap();
        assert_eq!(
            socket.sent(),
            vec!["ANIME aid=1&amask=30000000000000&s=sid&tag=4"]
        );
    }

    #[test]
    fn test_send_without_session() {
        let socket = MockSocket::new();
        let mut transport = Transport::new(socket.clone());

        transport.send(&Command::ping(), None, 1).unwrap();
        assert_eq!(socket.sent(), vec!["PING tag=1"]);

        let err = transport.send(&Command::episode(3), None, 2).unwrap_err();
        assert!(matches!(err, CoreError::NoSession { ref verb } if verb == "EPISODE"));
        assert_eq!(socket.sent().len(), 1);
    }

    #[test]
    fn test_receive_drains_and_drops_garbage() {
        let socket = MockSocket::new();
        socket.push(b"1 300 PONG".to_vec());
        socket.push(vec![0, 0, 0xFF, 0xFE]);
        socket.push(b"2 203 LOGGED OUT".to_vec());

        let mut transport = Transport::new(socket.clone());
        let datagrams = transport.receive().unwrap();
        assert_eq!(datagrams.len(), 2);
        assert_eq!(datagrams[0].text(), "1 300 PONG");
        assert_eq!(datagrams[1].text(), "2 203 LOGGED OUT");
        assert!(transport.receive().unwrap().is_empty());
    }
}
