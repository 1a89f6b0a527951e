use std::{
    io,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;

use crate::transport::Transport;

/// In-memory transport that records every packet, and can be switched into a failing mode.
#[derive(Clone, Default)]
pub(crate) struct RecordingTransport {
    packets: Arc<Mutex<Vec<Vec<u8>>>>,
    failing: Arc<AtomicBool>,
    closes: Arc<AtomicUsize>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn packets(&self) -> Vec<String> {
        self.packets.lock().iter().map(|packet| String::from_utf8_lossy(packet).into_owned()).collect()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Transport for RecordingTransport {
    fn send(&mut self, packet: &[u8]) -> io::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"));
        }

        self.packets.lock().push(packet.to_vec());
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "not connected"));
        }

        Ok(())
    }
}
