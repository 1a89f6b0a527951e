/// Snapshot of a client's transport statistics.
///
/// Statistics are shared by every clone of a client, since they all write through the same transport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Number of packets successfully written to the transport.
    pub packets_sent: u64,

    /// Number of bytes successfully written to the transport.
    pub bytes_sent: u64,

    /// Number of packets dropped because writing them failed.
    pub packets_dropped: u64,

    /// Number of bytes dropped because writing them failed.
    pub bytes_dropped: u64,
}

impl TransportStats {
    /// Tracks a successful packet send.
    pub(crate) fn track_packet_send_succeeded(&mut self, bytes_len: usize) {
        self.packets_sent += 1;
        self.bytes_sent += bytes_len as u64;
    }

    /// Tracks a failed packet send.
    pub(crate) fn track_packet_send_failed(&mut self, bytes_len: usize) {
        self.packets_dropped += 1;
        self.bytes_dropped += bytes_len as u64;
    }
}
