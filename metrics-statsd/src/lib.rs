//! A buffering client for sending metrics to a [StatsD][statsd]-compatible daemon.
//!
//! [statsd]: https://github.com/statsd/statsd
//!
//! # Usage
//!
//! ```no_run
//! # use metrics_statsd::{StatsdBuilder, TagFormat};
//! // First, create a builder.
//! //
//! // The builder configures the remote address, how metrics are batched into packets, how often they're flushed, and
//! // what the client adds to every metric: a prefix, tags, and a sample rate.
//! let client = StatsdBuilder::default()
//!     .with_remote_address("127.0.0.1:8125")
//!     .with_prefix("app")
//!     .with_tag_format(TagFormat::Datadog)
//!     .with_tags(&["env", "prod"])
//!     .expect("tags must be key/value pairs")
//!     .build()
//!     .expect("failed to build StatsD client");
//!
//! client.increment("requests");
//! client.gauge("queue_depth", 42);
//! client.timing_with_tags("latency", 12.5, &["route", "/home"]).expect("tags must be key/value pairs");
//!
//! let timing = client.new_timing();
//! // ... do some work ...
//! timing.send("work");
//!
//! // Flush anything still buffered and release the socket.
//! client.close();
//! ```
//!
//! # Features
//!
//! ## Batching
//!
//! StatsD lines are newline delimited, so many metrics can travel in a single packet and be trivially split apart by
//! the daemon. The client accumulates lines into packets up to a maximum size (1440 bytes by default, to avoid IP
//! fragmentation), and writes a packet when the next line wouldn't fit, on a fixed flush interval, or when explicitly
//! flushed. A line is never split across packets.
//!
//! ## Transports
//!
//! Metrics can be sent over UDP, TCP, and Unix domain sockets in either `SOCK_DGRAM` or `SOCK_STREAM` mode. Any other
//! sink can be plugged in by implementing [`Transport`].
//!
//! ## Tags
//!
//! Tags are supported in both the [InfluxDB][influx] and [DogStatsD][dsd] dialects. See [`TagFormat`].
//!
//! [influx]: https://www.influxdata.com/blog/getting-started-with-sending-statsd-metrics-to-telegraf-influxdb/
//! [dsd]: https://docs.datadoghq.com/developers/dogstatsd/datagram_shell/
//!
//! ## Best-effort delivery
//!
//! Metrics never get in the way of the application reporting them. Transport errors are never returned from metric
//! calls: they're handed to an optional error handler, and the affected packet is dropped without being retried. If the
//! transport can't be opened at all, the client is muted rather than left unusable.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod buffer;

mod builder;
pub use self::builder::{BuildError, StatsdBuilder};

mod client;
pub use self::client::{StatsdClient, Timing, WeakStatsdClient};

mod error;
pub use self::error::Error;

mod scheduler;

mod stats;
pub use self::stats::TransportStats;

mod tags;
pub use self::tags::{TagFormat, TagSet};

#[cfg(test)]
mod test_util;

mod transport;
pub use self::transport::{Network, Transport};

mod writer;
pub use self::writer::{LineWriter, MetricEvent, MetricType, MetricValue};
