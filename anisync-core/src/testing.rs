//! Test doubles shared by the unit tests.

use crate::transport::DatagramSocket;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

/// In-memory socket. Clones share the same queues so a test can feed
/// replies and inspect sent datagrams while the engine owns the socket.
#[derive(Clone, Default)]
pub struct MockSocket {
    inbox: Arc<Mutex<VecDeque<Vec<u8>>>>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl MockSocket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a datagram for the next `try_recv`.
    pub fn push(&self, datagram: Vec<u8>) {
        self.inbox.lock().push_back(datagram);
    }

    pub fn push_text(&self, text: &str) {
        self.push(text.as_bytes().to_vec());
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn last_sent(&self) -> Option<String> {
        self.sent.lock().last().cloned()
    }
}

impl DatagramSocket for MockSocket {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        self.sent
            .lock()
            .push(String::from_utf8_lossy(datagram).into_owned());
        Ok(())
    }

    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        let Some(datagram) = self.inbox.lock().pop_front() else {
            return Ok(None);
        };
        let len = datagram.len().min(buf.len());
        buf[..len].copy_from_slice(&datagram[..len]);
        Ok(Some(len))
    }
}
