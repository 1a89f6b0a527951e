use std::{
    io,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{bounded, select, tick, Sender};
use tracing::debug;

use crate::buffer::PacketBuffer;

/// Background thread that flushes a packet buffer on a fixed period.
///
/// Ticks that are missed, because a flush took longer than the period or the process was suspended, are skipped
/// rather than queued up.
pub(crate) struct FlushScheduler {
    shutdown_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl FlushScheduler {
    /// Spawns the flush thread.
    ///
    /// Returns `Ok(None)` without spawning anything if `period` is zero.
    pub fn spawn(buffer: Arc<PacketBuffer>, period: Duration) -> io::Result<Option<Self>> {
        if period.is_zero() {
            return Ok(None);
        }

        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let ticker = tick(period);

        let handle = thread::Builder::new().name("metrics-statsd-flusher".to_string()).spawn(move || {
            debug!(?period, "Flush scheduler started.");

            loop {
                select! {
                    recv(ticker) -> _ => buffer.flush(),
                    // Nothing is ever sent on this channel: it only ever disconnects.
                    recv(shutdown_rx) -> _ => break,
                }
            }

            debug!("Flush scheduler stopped.");
        })?;

        Ok(Some(Self { shutdown_tx: Some(shutdown_tx), handle: Some(handle) }))
    }

    /// Stops the flush thread, waiting for it to exit.
    ///
    /// Once this returns, no further timer-driven flush will happen.
    pub fn stop(&mut self) {
        drop(self.shutdown_tx.take());

        if let Some(handle) = self.handle.take() {
            // The last client can be dropped from inside an error handler running on the flush thread itself, in
            // which case the thread exits on its own after the current flush.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Duration};

    use super::FlushScheduler;
    use crate::{buffer::PacketBuffer, test_util::RecordingTransport};

    fn buffer(transport: &RecordingTransport) -> Arc<PacketBuffer> {
        Arc::new(PacketBuffer::new(Box::new(transport.clone()), 1440, None))
    }

    #[test]
    fn zero_period_spawns_nothing() {
        let transport = RecordingTransport::new();
        let scheduler = FlushScheduler::spawn(buffer(&transport), Duration::ZERO).unwrap();
        assert!(scheduler.is_none());
    }

    #[test]
    fn flushes_on_tick() {
        let transport = RecordingTransport::new();
        let buffer = buffer(&transport);
        let mut scheduler =
            FlushScheduler::spawn(Arc::clone(&buffer), Duration::from_millis(50)).unwrap().unwrap();

        buffer.append(b"foo:1|c");
        buffer.append(b"bar:1|c");
        thread::sleep(Duration::from_millis(250));

        // Later ticks find nothing pending, so there's exactly one packet.
        assert_eq!(transport.packets(), vec!["foo:1|c\nbar:1|c"]);

        buffer.append(b"baz:1|c");
        thread::sleep(Duration::from_millis(250));
        assert_eq!(transport.packets(), vec!["foo:1|c\nbar:1|c", "baz:1|c"]);

        scheduler.stop();
    }

    #[test]
    fn no_flush_after_stop() {
        let transport = RecordingTransport::new();
        let buffer = buffer(&transport);
        let mut scheduler =
            FlushScheduler::spawn(Arc::clone(&buffer), Duration::from_millis(20)).unwrap().unwrap();

        scheduler.stop();

        buffer.append(b"foo:1|c");
        thread::sleep(Duration::from_millis(100));
        assert!(transport.packets().is_empty());

        // Stopping twice is harmless.
        scheduler.stop();
    }
}
