use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, trace};

use crate::{error::Error, stats::TransportStats, transport::Transport};

/// Callback invoked with every transport failure.
pub(crate) type ErrorHandler = Arc<dyn Fn(Error) + Send + Sync>;

/// Accumulates encoded lines into size-bounded packets and writes them to a transport.
///
/// Lines are newline-separated within a packet. Appending a line that would push the pending packet over the
/// maximum packet size flushes the pending packet first, so a line is never split across two packets. A single line
/// that is larger than the maximum packet size by itself is still written, as a packet of its own.
///
/// All operations take the same lock for their full duration, which serializes access to the pending bytes, the
/// closed flag, and the transport itself. Errors are collected while the lock is held but are handed to the error
/// handler only after it has been released, so a handler is free to call back into the client.
pub(crate) struct PacketBuffer {
    state: Mutex<State>,
    error_handler: Option<ErrorHandler>,
}

struct State {
    pending: Vec<u8>,
    max_packet_size: usize,
    transport: Box<dyn Transport>,
    closed: bool,
    stats: TransportStats,
}

impl State {
    fn append(&mut self, line: &[u8], errors: &mut Vec<Error>) {
        // Flush what we have if this line won't fit alongside it.
        if !self.pending.is_empty() && self.pending.len() + 1 + line.len() > self.max_packet_size {
            self.flush(errors);
        }

        if !self.pending.is_empty() {
            self.pending.push(b'\n');
        }
        self.pending.extend_from_slice(line);

        // An oversized line goes out by itself, right away.
        if line.len() > self.max_packet_size {
            self.flush(errors);
        }
    }

    fn append_group(&mut self, lines: &[&[u8]], errors: &mut Vec<Error>) {
        let group_len = lines.iter().map(|line| line.len()).sum::<usize>() + lines.len().saturating_sub(1);

        // If the whole group can't fit into a single packet, there's no way to keep it together, so fall back to
        // treating each line on its own.
        if group_len > self.max_packet_size {
            for line in lines {
                self.append(line, errors);
            }
            return;
        }

        if !self.pending.is_empty() && self.pending.len() + 1 + group_len > self.max_packet_size {
            self.flush(errors);
        }

        for line in lines {
            if !self.pending.is_empty() {
                self.pending.push(b'\n');
            }
            self.pending.extend_from_slice(line);
        }
    }

    fn flush(&mut self, errors: &mut Vec<Error>) {
        if self.pending.is_empty() {
            return;
        }

        let packet_len = self.pending.len();
        trace!(packet_len, "Flushing packet.");

        // The pending bytes are cleared no matter what: a failed packet is dropped, not retried.
        let result = self.transport.send(&self.pending);
        self.pending.clear();

        match result {
            Ok(()) => self.stats.track_packet_send_succeeded(packet_len),
            Err(e) => {
                error!(error = %e, transport = self.transport.transport_id(), packet_len, "Failed to send packet.");
                self.stats.track_packet_send_failed(packet_len);
                errors.push(Error::Write(e));
            }
        }
    }
}

impl PacketBuffer {
    /// Creates a new `PacketBuffer` that owns the given transport.
    pub fn new(
        transport: Box<dyn Transport>,
        max_packet_size: usize,
        error_handler: Option<ErrorHandler>,
    ) -> Self {
        Self {
            state: Mutex::new(State {
                pending: Vec::with_capacity(max_packet_size),
                max_packet_size,
                transport,
                closed: false,
                stats: TransportStats::default(),
            }),
            error_handler,
        }
    }

    fn with_state<F>(&self, f: F)
    where
        F: FnOnce(&mut State, &mut Vec<Error>),
    {
        let mut errors = Vec::new();
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }

            f(&mut *state, &mut errors);
        }

        self.dispatch_errors(errors);
    }

    fn dispatch_errors(&self, errors: Vec<Error>) {
        if let Some(handler) = &self.error_handler {
            for e in errors {
                handler(e);
            }
        }
    }

    /// Appends a single encoded line.
    ///
    /// Does nothing once the buffer is closed.
    pub fn append(&self, line: &[u8]) {
        self.with_state(|state, errors| state.append(line, errors));
    }

    /// Appends several encoded lines, keeping them in the same packet when they fit in one.
    ///
    /// Does nothing once the buffer is closed.
    pub fn append_group(&self, lines: &[&[u8]]) {
        self.with_state(|state, errors| state.append_group(lines, errors));
    }

    /// Writes all pending lines to the transport as a single packet.
    ///
    /// Does nothing if there are no pending lines, or once the buffer is closed.
    pub fn flush(&self) {
        self.with_state(State::flush);
    }

    /// Flushes any pending lines and closes the transport.
    ///
    /// The buffer is permanently closed afterwards: every further call is a no-op, and the transport is never written
    /// to or closed again.
    pub fn close(&self) {
        self.with_state(|state, errors| {
            state.flush(errors);

            let transport_id = state.transport.transport_id();
            if let Err(e) = state.transport.close() {
                error!(error = %e, transport = transport_id, "Failed to close transport.");
                errors.push(Error::Close(e));
            }

            state.closed = true;
            state.pending = Vec::new();
            debug!(transport = transport_id, "Closed transport.");
        });
    }

    /// Returns `true` if the buffer has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Returns a snapshot of the transport statistics.
    pub fn stats(&self) -> TransportStats {
        self.state.lock().stats
    }
}
