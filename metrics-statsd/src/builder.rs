use std::{fmt, io, sync::Arc, time::Duration};

use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    buffer::{ErrorHandler, PacketBuffer},
    client::{push_prefix, validate_sample_rate, Shared, StatsdClient},
    error::Error,
    scheduler::FlushScheduler,
    tags::{TagFormat, TagSet},
    transport::{Network, RemoteAddr, Transport},
};

const DEFAULT_REMOTE_ADDRESS: &str = "127.0.0.1:8125";
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

// Worst case: Ethernet MTU - IPv6 header - TCP header = 1500 - 40 - 20 = 1440.
const DEFAULT_MAX_PACKET_SIZE: usize = 1440;

const SMALLEST_VALID_LINE: &[u8] = b"a:0|c";

/// Errors that could occur while building a StatsD client.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A configuration value was invalid.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Details about the invalid value.
        reason: String,
    },

    /// Failed to parse the remote address.
    #[error("invalid remote address: {reason}")]
    InvalidRemoteAddress {
        /// Details about the parsing failure.
        reason: String,
    },

    /// Failed to connect to the remote address.
    ///
    /// The error carries a muted client, so that callers can keep running without metrics. See
    /// [`BuildError::into_client`].
    #[error("failed to connect to '{address}': {source}")]
    Connection {
        /// Remote address that was being connected to.
        address: String,

        /// Underlying I/O error.
        #[source]
        source: io::Error,

        /// Muted client to use in place of the one that could not be built.
        client: Box<StatsdClient>,
    },

    /// Failed to spawn the background flush thread.
    ///
    /// Like [`BuildError::Connection`], the error carries a muted client.
    #[error("failed to spawn background thread for flushing")]
    Backend {
        /// Muted client to use in place of the one that could not be built.
        client: Box<StatsdClient>,
    },
}

impl BuildError {
    /// Consumes the error, returning a muted client.
    ///
    /// If the error came from a failure to open the transport or start the flush thread, the client keeps the prefix,
    /// tags, tag format and sample rate it was configured with.
    ///
    /// A muted client accepts every call and sends nothing, which lets applications carry on without having to check
    /// whether their metrics client is usable.
    pub fn into_client(self) -> StatsdClient {
        match self {
            BuildError::Connection { client, .. } | BuildError::Backend { client } => *client,
            _ => StatsdClient::muted(),
        }
    }
}

impl From<Error> for BuildError {
    fn from(e: Error) -> Self {
        match e {
            Error::InvalidArgument { reason } => BuildError::InvalidArgument { reason },
            other => BuildError::InvalidArgument { reason: other.to_string() },
        }
    }
}

/// Builder for a StatsD client.
pub struct StatsdBuilder {
    remote_addr: String,
    network: Network,
    max_packet_size: usize,
    flush_interval: Duration,
    write_timeout: Option<Duration>,
    error_handler: Option<ErrorHandler>,
    tag_format: TagFormat,
    prefix: String,
    sample_rate: f64,
    tags: TagSet,
    muted: bool,
}

impl StatsdBuilder {
    /// Set the remote address to send metrics to.
    ///
    /// For UDP and TCP, the address needs to be in the format of `<host>:<port>`, or `:<port>` to send to the local
    /// host. For Unix domain sockets, the address is the path of the socket.
    ///
    /// The address may also be given as a URL whose scheme selects the network, overriding
    /// [`with_network`][Self::with_network]: `udp://`, `tcp://`, `unix://` (`SOCK_STREAM`) or `unixgram://`
    /// (`SOCK_DGRAM`).
    ///
    /// Defaults to `127.0.0.1:8125`.
    #[must_use]
    pub fn with_remote_address<A>(mut self, addr: A) -> Self
    where
        A: Into<String>,
    {
        self.remote_addr = addr.into();
        self
    }

    /// Set the network used to reach the remote address.
    ///
    /// Defaults to [`Network::Udp`].
    #[must_use]
    pub fn with_network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    /// Set the maximum packet size, in bytes.
    ///
    /// Metrics are batched into packets of up to this size. A single metric larger than this is still sent, in a
    /// packet of its own.
    ///
    /// Defaults to 1440 bytes, which avoids IP fragmentation on typical networks.
    #[must_use]
    pub fn with_maximum_packet_size(mut self, max_packet_size: usize) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }

    /// Set how often buffered metrics are flushed.
    ///
    /// When set to zero, no background thread is spawned, and metrics are only sent when the buffer is full, or when
    /// the client is explicitly flushed or closed.
    ///
    /// Defaults to 100 milliseconds.
    #[must_use]
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    /// Set the write timeout of the underlying socket.
    ///
    /// When the write timeout is reached, the packet being sent is dropped without retrying.
    ///
    /// Defaults to no timeout, which leaves the operating system defaults in place.
    #[must_use]
    pub fn with_write_timeout(mut self, write_timeout: Option<Duration>) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    /// Set the function called with every transport error, such as the remote daemon no longer listening.
    ///
    /// The handler runs on whichever thread triggered the failed write, and may call back into the client. It must not
    /// own a [`StatsdClient`], though: the handler lives as long as the transport does, so a client captured by it
    /// would keep the transport open after every other clone has been dropped. Capture a
    /// [`WeakStatsdClient`][crate::WeakStatsdClient], from [`StatsdClient::downgrade`], instead.
    ///
    /// Defaults to discarding errors.
    #[must_use]
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(Error) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Set the format in which tags are sent.
    ///
    /// Defaults to [`TagFormat::None`], which drops all tags.
    #[must_use]
    pub fn with_tag_format(mut self, tag_format: TagFormat) -> Self {
        self.tag_format = tag_format;
        self
    }

    /// Append a prefix to every bucket name.
    ///
    /// Prefixes are joined with a `.`: calling this with `app` and then `web` results in bucket names like
    /// `app.web.requests`.
    #[must_use]
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        push_prefix(&mut self.prefix, prefix);
        self
    }

    /// Set the sample rate.
    ///
    /// Each metric is sent with a probability equal to the sample rate, and counters, timings and histograms carry the
    /// rate so that the daemon can extrapolate.
    ///
    /// Defaults to 1.0.
    ///
    /// # Errors
    ///
    /// If `sample_rate` is not within `(0, 1]`, an error is returned.
    pub fn with_sample_rate(mut self, sample_rate: f64) -> Result<Self, BuildError> {
        validate_sample_rate(sample_rate).map_err(|reason| BuildError::InvalidArgument { reason })?;
        self.sample_rate = sample_rate;
        Ok(self)
    }

    /// Add tags, given as key/value pairs, to every metric.
    ///
    /// Tags that were already added are overwritten. Tags are only sent if a tag format has been set.
    ///
    /// # Errors
    ///
    /// If `tags` has an odd number of elements, an error is returned.
    pub fn with_tags(mut self, tags: &[&str]) -> Result<Self, BuildError> {
        self.tags = self.tags.merge(tags)?;
        Ok(self)
    }

    /// Set whether the client is muted.
    ///
    /// A muted client does not connect to anything, and all of its methods return immediately.
    ///
    /// Defaults to `false`.
    #[must_use]
    pub fn with_mute(mut self, muted: bool) -> Self {
        self.muted = muted;
        self
    }

    fn into_muted_client(self) -> StatsdClient {
        StatsdClient::new(None, self.prefix, self.sample_rate, self.tags, self.tag_format)
    }

    fn validate(&self) -> Result<(), BuildError> {
        if self.max_packet_size < SMALLEST_VALID_LINE.len() {
            return Err(BuildError::InvalidArgument {
                reason: format!(
                    "maximum packet size is too small to allow any metrics to be written (must be {} or greater)",
                    SMALLEST_VALID_LINE.len()
                ),
            });
        }

        Ok(())
    }

    /// Builds the client.
    ///
    /// The transport is opened immediately. With UDP, this only fails if the address can't be resolved, since there
    /// is no handshake. With a stream transport, it also fails if nothing is listening on the remote address.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, or the transport could not be opened, an error is returned. In the latter case,
    /// [`BuildError::into_client`] provides a muted client that can be used in its place.
    pub fn build(self) -> Result<StatsdClient, BuildError> {
        self.validate()?;

        let remote_addr = RemoteAddr::parse(self.network, &self.remote_addr)
            .map_err(|reason| BuildError::InvalidRemoteAddress { reason })?;

        if self.muted {
            return Ok(self.into_muted_client());
        }

        match remote_addr.connect(self.write_timeout) {
            Ok(transport) => {
                debug!(
                    network = %remote_addr.network(),
                    address = remote_addr.address(),
                    "Connected to remote address."
                );
                self.build_with_transport(Box::new(transport))
            }
            Err(source) => {
                warn!(
                    network = %remote_addr.network(),
                    address = remote_addr.address(),
                    error = %source,
                    "Failed to connect to remote address. Client will be muted."
                );
                Err(BuildError::Connection {
                    address: remote_addr.address().to_string(),
                    source,
                    client: Box::new(self.into_muted_client()),
                })
            }
        }
    }

    /// Builds the client, sending metrics through the given transport.
    ///
    /// The remote address and network settings are ignored.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, or the background flush thread could not be spawned, an error is returned.
    pub fn build_with_transport(self, transport: Box<dyn Transport>) -> Result<StatsdClient, BuildError> {
        self.validate()?;

        if self.muted {
            return Ok(self.into_muted_client());
        }

        let buffer = Arc::new(PacketBuffer::new(transport, self.max_packet_size, self.error_handler.clone()));
        let scheduler = match FlushScheduler::spawn(Arc::clone(&buffer), self.flush_interval) {
            Ok(scheduler) => scheduler,
            Err(e) => {
                warn!(error = %e, "Failed to spawn flush thread. Client will be muted.");
                return Err(BuildError::Backend { client: Box::new(self.into_muted_client()) });
            }
        };
        let shared = Arc::new(Shared::new(buffer, scheduler));

        Ok(StatsdClient::new(Some(shared), self.prefix, self.sample_rate, self.tags, self.tag_format))
    }

    /// Builds the client, falling back to a muted client if it could not be built.
    ///
    /// The error, if any, is logged.
    pub fn build_or_mute(self) -> StatsdClient {
        self.build().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to build StatsD client. Metrics will not be sent.");
            e.into_client()
        })
    }
}

impl Default for StatsdBuilder {
    fn default() -> Self {
        StatsdBuilder {
            remote_addr: DEFAULT_REMOTE_ADDRESS.to_string(),
            network: Network::Udp,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            write_timeout: None,
            error_handler: None,
            tag_format: TagFormat::None,
            prefix: String::new(),
            sample_rate: 1.0,
            tags: TagSet::new(),
            muted: false,
        }
    }
}

impl fmt::Debug for StatsdBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatsdBuilder")
            .field("remote_addr", &self.remote_addr)
            .field("network", &self.network)
            .field("max_packet_size", &self.max_packet_size)
            .field("flush_interval", &self.flush_interval)
            .field("write_timeout", &self.write_timeout)
            .field("tag_format", &self.tag_format)
            .field("prefix", &self.prefix)
            .field("sample_rate", &self.sample_rate)
            .field("tags", &self.tags)
            .field("muted", &self.muted)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::{BuildError, StatsdBuilder};
    use crate::{tags::TagFormat, test_util::RecordingTransport, transport::Network};

    #[test]
    fn defaults() {
        let client = StatsdBuilder::default()
            .with_flush_interval(std::time::Duration::ZERO)
            .build_with_transport(Box::new(RecordingTransport::new()))
            .unwrap();

        assert!(!client.is_muted());
        assert_eq!(client.prefix(), "");
        assert_eq!(client.tag_format(), TagFormat::None);
    }

    #[test]
    fn configured() {
        let transport = RecordingTransport::new();
        let client = StatsdBuilder::default()
            .with_flush_interval(std::time::Duration::ZERO)
            .with_prefix("app")
            .with_prefix("web.")
            .with_tag_format(TagFormat::Datadog)
            .with_tags(&["env", "prod"])
            .unwrap()
            .build_with_transport(Box::new(transport.clone()))
            .unwrap();

        assert_eq!(client.prefix(), "app.web.");
        assert_eq!(client.tag_format(), TagFormat::Datadog);

        client.increment("requests");
        client.flush();
        assert_eq!(transport.packets(), vec!["app.web.requests:1|c|#env:prod"]);
    }

    #[test]
    fn invalid_configuration() {
        assert!(matches!(
            StatsdBuilder::default().with_tags(&["env"]),
            Err(BuildError::InvalidArgument { .. })
        ));
        assert!(matches!(
            StatsdBuilder::default().with_sample_rate(0.0),
            Err(BuildError::InvalidArgument { .. })
        ));
        assert!(matches!(
            StatsdBuilder::default()
                .with_maximum_packet_size(4)
                .build_with_transport(Box::new(RecordingTransport::new())),
            Err(BuildError::InvalidArgument { .. })
        ));
        assert!(matches!(
            StatsdBuilder::default().with_remote_address("ftp://localhost:8125").build(),
            Err(BuildError::InvalidRemoteAddress { .. })
        ));
    }

    #[test]
    fn muted_builds_nothing() {
        let transport = RecordingTransport::new();
        let client = StatsdBuilder::default().with_mute(true).build_with_transport(Box::new(transport.clone())).unwrap();

        assert!(client.is_muted());
        client.increment("requests");
        client.close();
        assert!(transport.packets().is_empty());
    }

    #[test]
    fn into_client_is_muted() {
        let error = BuildError::InvalidArgument { reason: "bad".to_string() };
        assert!(error.into_client().is_muted());
    }

    #[test]
    fn muted_keeps_configuration() {
        let client = StatsdBuilder::default()
            .with_prefix("app")
            .with_tag_format(TagFormat::Datadog)
            .with_tags(&["env", "prod"])
            .unwrap()
            .with_mute(true)
            .build()
            .unwrap();

        assert!(client.is_muted());
        assert_eq!(client.prefix(), "app.");
        assert_eq!(client.tag_format(), TagFormat::Datadog);

        let derived = client.with_prefix("web");
        assert!(derived.is_muted());
        assert_eq!(derived.prefix(), "app.web.");
        assert_eq!(derived.tag_format(), TagFormat::Datadog);
    }

    #[test]
    fn connection_failure_keeps_configuration() {
        // Grab a free port, then stop listening on it.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = StatsdBuilder::default()
            .with_network(Network::Tcp)
            .with_remote_address(addr)
            .with_prefix("app")
            .with_tag_format(TagFormat::InfluxDb)
            .build();
        let client = match result {
            Err(e @ BuildError::Connection { .. }) => e.into_client(),
            other => panic!("expected connection error, got {other:?}"),
        };

        assert!(client.is_muted());
        assert_eq!(client.prefix(), "app.");
        assert_eq!(client.tag_format(), TagFormat::InfluxDb);
    }
}
