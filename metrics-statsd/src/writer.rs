use std::fmt::{Display, Write as _};

use crate::tags::TagFormat;

/// StatsD metric type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricType {
    /// Counter (`c`).
    Counter,

    /// Gauge (`g`).
    Gauge,

    /// Timing, in milliseconds (`ms`).
    Timing,

    /// Histogram (`h`).
    Histogram,

    /// Set of unique values (`s`).
    Set,
}

impl MetricType {
    /// Returns the type marker written on the wire.
    pub const fn as_str(self) -> &'static str {
        match self {
            MetricType::Counter => "c",
            MetricType::Gauge => "g",
            MetricType::Timing => "ms",
            MetricType::Histogram => "h",
            MetricType::Set => "s",
        }
    }
}

/// A metric value.
///
/// Integers are written without a decimal point, and floating-point values are written with the shortest
/// representation that round-trips, without an exponent and without a trailing `.0`. Strings are written verbatim.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MetricValue<'a> {
    /// Signed integer.
    Integer(i64),

    /// Unsigned integer.
    Unsigned(u64),

    /// Single-precision floating-point number.
    Float32(f32),

    /// Double-precision floating-point number.
    Float(f64),

    /// Arbitrary string, typically used for sets.
    Str(&'a str),
}

impl MetricValue<'_> {
    /// Returns `true` if the value is a negative number.
    pub fn is_negative(&self) -> bool {
        match *self {
            MetricValue::Integer(v) => v < 0,
            MetricValue::Unsigned(_) | MetricValue::Str(_) => false,
            MetricValue::Float32(v) => v < 0.0,
            MetricValue::Float(v) => v < 0.0,
        }
    }
}

macro_rules! impl_from_value {
    ($variant:ident, $target:ty, $($source:ty),+) => {
        $(
            impl From<$source> for MetricValue<'_> {
                fn from(value: $source) -> Self {
                    MetricValue::$variant(<$target>::from(value))
                }
            }
        )+
    };
}

impl_from_value!(Integer, i64, i8, i16, i32, i64);
impl_from_value!(Unsigned, u64, u8, u16, u32, u64);
impl_from_value!(Float32, f32, f32);
impl_from_value!(Float, f64, f64);

impl From<isize> for MetricValue<'_> {
    fn from(value: isize) -> Self {
        MetricValue::Integer(value as i64)
    }
}

impl From<usize> for MetricValue<'_> {
    fn from(value: usize) -> Self {
        MetricValue::Unsigned(value as u64)
    }
}

impl<'a> From<&'a str> for MetricValue<'a> {
    fn from(value: &'a str) -> Self {
        MetricValue::Str(value)
    }
}

impl<'a> From<&'a String> for MetricValue<'a> {
    fn from(value: &'a String) -> Self {
        MetricValue::Str(value.as_str())
    }
}

/// A single metric event, ready to be encoded.
#[derive(Clone, Copy, Debug)]
pub struct MetricEvent<'a> {
    /// Prefix prepended to the bucket name, including its trailing `.`.
    pub prefix: &'a str,

    /// Bucket name.
    pub bucket: &'a str,

    /// Metric value.
    pub value: MetricValue<'a>,

    /// Metric type.
    pub metric_type: MetricType,

    /// Sample rate, written only when present and less than 1.
    pub sample_rate: Option<f64>,

    /// Pre-encoded tag suffix. See [`TagSet::encode`][crate::TagSet::encode].
    pub tags: &'a str,
}

struct MetricValueFormatter {
    int_writer: itoa::Buffer,
    float_writer: ryu::Buffer,
    scratch: String,
}

impl MetricValueFormatter {
    fn new() -> Self {
        Self { int_writer: itoa::Buffer::new(), float_writer: ryu::Buffer::new(), scratch: String::new() }
    }

    fn format<'a>(&'a mut self, value: MetricValue<'a>) -> &'a str {
        match value {
            MetricValue::Integer(v) => self.int_writer.format(v),
            MetricValue::Unsigned(v) => self.int_writer.format(v),
            MetricValue::Float32(v) => self.format_float(v),
            MetricValue::Float(v) => self.format_float(v),
            MetricValue::Str(v) => v,
        }
    }

    fn format_float<F: ryu::Float + Display>(&mut self, value: F) -> &str {
        let formatted = self.float_writer.format(value);

        // StatsD daemons generally don't understand exponents, so for very large or very small values we fall back to
        // the plain decimal expansion, which is still the shortest round-tripping representation.
        if formatted.contains('e') {
            self.scratch.clear();
            let _ = write!(self.scratch, "{value}");
            return &self.scratch;
        }

        formatted.strip_suffix(".0").unwrap_or(formatted)
    }
}

/// Encodes metric events into StatsD lines.
///
/// Lines take the form `<prefix><bucket>:<value>|<type>[|@<rate>]`, with tags either attached to the bucket name or
/// appended to the end of the line depending on the [`TagFormat`]. No trailing newline is written: separating lines
/// is the job of the packet buffer.
pub struct LineWriter {
    formatter: MetricValueFormatter,
    tag_format: TagFormat,
}

impl LineWriter {
    /// Creates a new `LineWriter` that places tags according to the given format.
    pub fn new(tag_format: TagFormat) -> Self {
        Self { formatter: MetricValueFormatter::new(), tag_format }
    }

    /// Writes the line for `event` to the end of `buf`.
    pub fn write(&mut self, event: &MetricEvent<'_>, buf: &mut Vec<u8>) {
        let tags = event.tags.as_bytes();

        buf.extend_from_slice(event.prefix.as_bytes());
        buf.extend_from_slice(event.bucket.as_bytes());
        if self.tag_format.attaches_to_bucket() {
            buf.extend_from_slice(tags);
        }

        buf.push(b':');
        buf.extend_from_slice(self.formatter.format(event.value).as_bytes());

        buf.push(b'|');
        buf.extend_from_slice(event.metric_type.as_str().as_bytes());

        // A sample rate of 1.0 is the implied default, so we skip writing it.
        if let Some(sample_rate) = event.sample_rate.filter(|rate| *rate < 1.0) {
            buf.extend_from_slice(b"|@");
            buf.extend_from_slice(self.formatter.format(MetricValue::Float(sample_rate)).as_bytes());
        }

        if !self.tag_format.attaches_to_bucket() {
            buf.extend_from_slice(tags);
        }
    }

    /// Encodes `event` into a new buffer.
    pub fn encode(&mut self, event: &MetricEvent<'_>) -> Vec<u8> {
        let mut buf = Vec::with_capacity(event.prefix.len() + event.bucket.len() + event.tags.len() + 16);
        self.write(event, &mut buf);
        buf
    }
}
