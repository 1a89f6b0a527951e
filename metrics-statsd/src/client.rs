use std::{
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};

use parking_lot::Mutex;
use quanta::{Clock, Instant};

use crate::{
    buffer::PacketBuffer,
    error::Error,
    scheduler::FlushScheduler,
    stats::TransportStats,
    tags::{TagFormat, TagSet},
    writer::{LineWriter, MetricEvent, MetricType, MetricValue},
};

/// State shared by a client and all of its clones.
pub(crate) struct Shared {
    buffer: Arc<PacketBuffer>,
    scheduler: Mutex<Option<FlushScheduler>>,
}

impl Shared {
    pub fn new(buffer: Arc<PacketBuffer>, scheduler: Option<FlushScheduler>) -> Self {
        Self { buffer, scheduler: Mutex::new(scheduler) }
    }

    fn close(&self) {
        // The timer has to be fully stopped before the transport is closed.
        let scheduler = self.scheduler.lock().take();
        if let Some(mut scheduler) = scheduler {
            scheduler.stop();
        }

        self.buffer.close();
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.close();
    }
}

/// A StatsD client.
///
/// Metric calls encode a line and append it to a packet buffer shared by the client and all of its clones. The buffer
/// is written to the transport when it is full, on every tick of the flush interval, on [`flush`][Self::flush], and on
/// [`close`][Self::close].
///
/// Metric calls never block on the network beyond waiting for another caller's in-progress write, and never fail due
/// to the network: transport errors go to the error handler configured on the builder.
///
/// ## Clones
///
/// Cloning a client is cheap, and every clone shares the same buffer and transport. Derived clients, created with
/// methods such as [`with_prefix`][Self::with_prefix], share them too. This means that flushing or closing any one of
/// them flushes or closes all of them. The transport is closed automatically once the last clone is dropped.
///
/// ## Muted clients
///
/// A muted client accepts every call but sends nothing. Clients are muted either explicitly, or when the transport
/// could not be opened at construction time. Either way, a muted client keeps its configured prefix, tags, tag format
/// and sample rate, and so do clients derived from it.
#[derive(Clone)]
pub struct StatsdClient {
    shared: Option<Arc<Shared>>,
    muted: bool,
    prefix: String,
    sample_rate: f64,
    tags: TagSet,
    tag_format: TagFormat,
    encoded_tags: String,
    clock: Clock,
}

impl StatsdClient {
    pub(crate) fn new(
        shared: Option<Arc<Shared>>,
        prefix: String,
        sample_rate: f64,
        tags: TagSet,
        tag_format: TagFormat,
    ) -> Self {
        let encoded_tags = tags.encode(tag_format);
        Self {
            muted: shared.is_none(),
            shared,
            prefix,
            sample_rate,
            tags,
            tag_format,
            encoded_tags,
            clock: Clock::new(),
        }
    }

    /// Creates a muted client that is not connected to anything, with no prefix, tags or tag format.
    pub fn muted() -> Self {
        Self::new(None, String::new(), 1.0, TagSet::new(), TagFormat::None)
    }

    #[cfg(test)]
    pub(crate) fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn active(&self) -> Option<&Shared> {
        if self.muted {
            return None;
        }

        self.shared.as_deref()
    }

    fn sampled_out(&self) -> bool {
        self.sample_rate < 1.0 && rand::random::<f64>() > self.sample_rate
    }

    fn emit(&self, bucket: &str, value: MetricValue<'_>, metric_type: MetricType, tags: &str) {
        let Some(shared) = self.active() else {
            return;
        };

        if self.sampled_out() {
            return;
        }

        // Gauges and sets are not extrapolated by the daemon, so they never carry a sample rate.
        let sample_rate = match metric_type {
            MetricType::Gauge | MetricType::Set => None,
            _ => Some(self.sample_rate),
        };

        let event = MetricEvent { prefix: &self.prefix, bucket, value, metric_type, sample_rate, tags };
        let mut writer = LineWriter::new(self.tag_format);

        // A gauge value with a leading minus sign is read as a decrement, so setting a gauge to a negative value
        // means first resetting it to zero. Both lines have to land in the same packet.
        if metric_type == MetricType::Gauge && value.is_negative() {
            let reset = writer.encode(&MetricEvent { value: MetricValue::Integer(0), ..event });
            let line = writer.encode(&event);
            shared.buffer.append_group(&[reset.as_slice(), line.as_slice()]);
        } else {
            shared.buffer.append(&writer.encode(&event));
        }
    }

    fn emit_with_tags(
        &self,
        bucket: &str,
        value: MetricValue<'_>,
        metric_type: MetricType,
        tags: &[&str],
    ) -> Result<(), Error> {
        // Malformed tags are a programming error, so we report them regardless of whether or not this particular
        // event would have been sent.
        if tags.len() % 2 != 0 {
            return Err(Error::invalid_argument(format!(
                "tags must be given as key/value pairs, got {} elements",
                tags.len()
            )));
        }

        if tags.is_empty() || self.tag_format == TagFormat::None || self.active().is_none() {
            self.emit(bucket, value, metric_type, &self.encoded_tags);
            return Ok(());
        }

        let merged_tags = self.tags.merge(tags)?.encode(self.tag_format);
        self.emit(bucket, value, metric_type, &merged_tags);
        Ok(())
    }

    /// Adds `value` to the counter `bucket`.
    pub fn count<'a, V: Into<MetricValue<'a>>>(&self, bucket: &str, value: V) {
        self.emit(bucket, value.into(), MetricType::Counter, &self.encoded_tags);
    }

    /// Adds `value` to the counter `bucket`, with additional tags given as key/value pairs.
    ///
    /// # Errors
    ///
    /// If `tags` has an odd number of elements, an error is returned.
    pub fn count_with_tags<'a, V: Into<MetricValue<'a>>>(
        &self,
        bucket: &str,
        value: V,
        tags: &[&str],
    ) -> Result<(), Error> {
        self.emit_with_tags(bucket, value.into(), MetricType::Counter, tags)
    }

    /// Increments the counter `bucket` by one.
    pub fn increment(&self, bucket: &str) {
        self.count(bucket, MetricValue::Integer(1));
    }

    /// Sets the gauge `bucket` to `value`.
    pub fn gauge<'a, V: Into<MetricValue<'a>>>(&self, bucket: &str, value: V) {
        self.emit(bucket, value.into(), MetricType::Gauge, &self.encoded_tags);
    }

    /// Sets the gauge `bucket` to `value`, with additional tags given as key/value pairs.
    ///
    /// # Errors
    ///
    /// If `tags` has an odd number of elements, an error is returned.
    pub fn gauge_with_tags<'a, V: Into<MetricValue<'a>>>(
        &self,
        bucket: &str,
        value: V,
        tags: &[&str],
    ) -> Result<(), Error> {
        self.emit_with_tags(bucket, value.into(), MetricType::Gauge, tags)
    }

    /// Records a timing, in milliseconds, to `bucket`.
    pub fn timing<'a, V: Into<MetricValue<'a>>>(&self, bucket: &str, value: V) {
        self.emit(bucket, value.into(), MetricType::Timing, &self.encoded_tags);
    }

    /// Records a timing, in milliseconds, to `bucket`, with additional tags given as key/value pairs.
    ///
    /// # Errors
    ///
    /// If `tags` has an odd number of elements, an error is returned.
    pub fn timing_with_tags<'a, V: Into<MetricValue<'a>>>(
        &self,
        bucket: &str,
        value: V,
        tags: &[&str],
    ) -> Result<(), Error> {
        self.emit_with_tags(bucket, value.into(), MetricType::Timing, tags)
    }

    /// Records a histogram value to `bucket`.
    pub fn histogram<'a, V: Into<MetricValue<'a>>>(&self, bucket: &str, value: V) {
        self.emit(bucket, value.into(), MetricType::Histogram, &self.encoded_tags);
    }

    /// Records a histogram value to `bucket`, with additional tags given as key/value pairs.
    ///
    /// # Errors
    ///
    /// If `tags` has an odd number of elements, an error is returned.
    pub fn histogram_with_tags<'a, V: Into<MetricValue<'a>>>(
        &self,
        bucket: &str,
        value: V,
        tags: &[&str],
    ) -> Result<(), Error> {
        self.emit_with_tags(bucket, value.into(), MetricType::Histogram, tags)
    }

    /// Adds `value` to the set `bucket`, which counts unique values.
    pub fn unique(&self, bucket: &str, value: &str) {
        self.emit(bucket, MetricValue::Str(value), MetricType::Set, &self.encoded_tags);
    }

    /// Adds `value` to the set `bucket`, with additional tags given as key/value pairs.
    ///
    /// # Errors
    ///
    /// If `tags` has an odd number of elements, an error is returned.
    pub fn unique_with_tags(&self, bucket: &str, value: &str, tags: &[&str]) -> Result<(), Error> {
        self.emit_with_tags(bucket, MetricValue::Str(value), MetricType::Set, tags)
    }

    /// Starts a [`Timing`], which measures the time elapsed from now until it is sent.
    pub fn new_timing(&self) -> Timing<'_> {
        Timing { start: self.clock.now(), client: self }
    }

    /// Writes any buffered metrics to the transport.
    pub fn flush(&self) {
        if let Some(shared) = self.active() {
            shared.buffer.flush();
        }
    }

    /// Flushes any buffered metrics, stops the flush timer, and closes the transport.
    ///
    /// This affects every clone of this client: afterwards, they all behave as if muted.
    pub fn close(&self) {
        if let Some(shared) = self.active() {
            shared.close();
        }
    }

    /// Returns `true` if this client sends nothing, either because it was muted or because it has been closed.
    pub fn is_muted(&self) -> bool {
        self.active().map_or(true, |shared| shared.buffer.is_closed())
    }

    /// Returns the tag format used by this client.
    pub fn tag_format(&self) -> TagFormat {
        self.tag_format
    }

    /// Returns the prefix prepended to every bucket name.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns a snapshot of the statistics of the underlying transport.
    pub fn stats(&self) -> TransportStats {
        self.shared.as_ref().map(|shared| shared.buffer.stats()).unwrap_or_default()
    }

    /// Creates a client whose bucket names are additionally prefixed with `prefix`.
    ///
    /// The new prefix is appended to this client's prefix: a client with prefix `app` creates a client with prefix
    /// `app.web` when called with `web`.
    #[must_use]
    pub fn with_prefix(&self, prefix: &str) -> Self {
        let mut client = self.clone();
        push_prefix(&mut client.prefix, prefix);
        client
    }

    /// Creates a client with a different sample rate.
    ///
    /// # Errors
    ///
    /// If `sample_rate` is not within `(0, 1]`, an error is returned.
    pub fn with_sample_rate(&self, sample_rate: f64) -> Result<Self, Error> {
        validate_sample_rate(sample_rate).map_err(Error::invalid_argument)?;

        let mut client = self.clone();
        client.sample_rate = sample_rate;
        Ok(client)
    }

    /// Creates a client with additional tags, given as key/value pairs, sent with every metric.
    ///
    /// Tags that already exist on this client are overwritten.
    ///
    /// # Errors
    ///
    /// If `tags` has an odd number of elements, an error is returned.
    pub fn with_tags(&self, tags: &[&str]) -> Result<Self, Error> {
        let mut client = self.clone();
        client.tags = self.tags.merge(tags)?;
        client.encoded_tags = client.tags.encode(self.tag_format);
        Ok(client)
    }

    /// Creates a client that is muted or not.
    ///
    /// Clients derived from a muted client are always muted.
    #[must_use]
    pub fn with_mute(&self, muted: bool) -> Self {
        let mut client = self.clone();
        client.muted = self.muted || muted;
        client
    }

    /// Creates a [`WeakStatsdClient`] that does not keep the transport open.
    ///
    /// An error handler that reports through a client must hold one of these rather than a `StatsdClient`: the
    /// handler is owned by the transport's buffer, so owning a client there would keep the transport open forever.
    pub fn downgrade(&self) -> WeakStatsdClient {
        WeakStatsdClient {
            shared: self.shared.as_ref().map(Arc::downgrade),
            client: StatsdClient { shared: None, ..self.clone() },
        }
    }
}

impl fmt::Debug for StatsdClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatsdClient")
            .field("muted", &self.is_muted())
            .field("prefix", &self.prefix)
            .field("sample_rate", &self.sample_rate)
            .field("tags", &self.tags)
            .field("tag_format", &self.tag_format)
            .finish_non_exhaustive()
    }
}

/// A handle to a [`StatsdClient`] that does not keep its transport open.
///
/// Created with [`StatsdClient::downgrade`].
#[derive(Clone)]
pub struct WeakStatsdClient {
    shared: Option<Weak<Shared>>,
    client: StatsdClient,
}

impl WeakStatsdClient {
    /// Returns the client, or `None` if every strong clone of it has been dropped.
    ///
    /// A handle to a client that was muted from the start always upgrades.
    pub fn upgrade(&self) -> Option<StatsdClient> {
        match &self.shared {
            None => Some(self.client.clone()),
            Some(shared) => {
                shared.upgrade().map(|shared| StatsdClient { shared: Some(shared), ..self.client.clone() })
            }
        }
    }
}

impl fmt::Debug for WeakStatsdClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakStatsdClient").field("prefix", &self.client.prefix).finish_non_exhaustive()
    }
}

/// Measures the time elapsed since it was started, and sends it as a timing.
///
/// Created with [`StatsdClient::new_timing`].
pub struct Timing<'a> {
    start: Instant,
    client: &'a StatsdClient,
}

impl Timing<'_> {
    /// Sends the time elapsed since this `Timing` was started to `bucket`, in whole milliseconds.
    pub fn send(&self, bucket: &str) {
        self.client.timing(bucket, self.duration().as_millis() as u64);
    }

    /// Returns the time elapsed since this `Timing` was started.
    pub fn duration(&self) -> Duration {
        self.client.clock.now().duration_since(self.start)
    }
}

pub(crate) fn push_prefix(current: &mut String, prefix: &str) {
    let prefix = prefix.trim_end_matches('.');
    if prefix.is_empty() {
        return;
    }

    current.push_str(prefix);
    current.push('.');
}

pub(crate) fn validate_sample_rate(sample_rate: f64) -> Result<(), String> {
    if sample_rate > 0.0 && sample_rate <= 1.0 {
        Ok(())
    } else {
        Err(format!("sample rate must be within (0, 1], got {sample_rate}"))
    }
}
