use indexmap::IndexMap;

use crate::error::Error;

/// On-wire format used for tags.
///
/// StatsD itself has no notion of tags, so every daemon that supports them has its own dialect. When no format is
/// configured, tags are silently dropped rather than treated as an error.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TagFormat {
    /// Tags are not emitted.
    #[default]
    None,

    /// InfluxDB format: `,key1=value1,key2=value2`, attached to the bucket name.
    ///
    /// See <https://www.influxdata.com/blog/getting-started-with-sending-statsd-metrics-to-telegraf-influxdb/>.
    InfluxDb,

    /// DogStatsD format: `|#key1:value1,key2:value2`, appended to the end of the line.
    ///
    /// See <https://docs.datadoghq.com/developers/dogstatsd/datagram_shell/>.
    Datadog,
}

impl TagFormat {
    /// Returns `true` if tags in this format are written directly after the bucket name, rather than at the end of
    /// the line.
    pub const fn attaches_to_bucket(self) -> bool {
        matches!(self, TagFormat::InfluxDb)
    }
}

/// An ordered set of key/value tags.
///
/// Keys are unique. Inserting an existing key overwrites its value in place, so the order in which keys were first
/// inserted is preserved, which keeps the encoded output deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagSet {
    tags: IndexMap<String, String>,
}

impl TagSet {
    /// Creates an empty `TagSet`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a `TagSet` from a flat list of alternating keys and values.
    ///
    /// # Errors
    ///
    /// If the list has an odd number of elements, an error is returned.
    pub fn from_flat<S: AsRef<str>>(tags: &[S]) -> Result<Self, Error> {
        Self::new().merge(tags)
    }

    /// Inserts a tag, overwriting the value of an existing key without changing its position.
    pub fn insert<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.tags.insert(key.into(), value.into());
    }

    /// Gets the value of the given tag key, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Returns the number of tags.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Returns `true` if there are no tags.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Iterates over the tags in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Merges a flat list of alternating keys and values into a copy of this set.
    ///
    /// Existing keys are overwritten in place, and new keys are appended in the order given.
    ///
    /// # Errors
    ///
    /// If the list has an odd number of elements, an error is returned.
    pub fn merge<S: AsRef<str>>(&self, tags: &[S]) -> Result<Self, Error> {
        if tags.len() % 2 != 0 {
            return Err(Error::invalid_argument(format!(
                "tags must be given as key/value pairs, got {} elements",
                tags.len()
            )));
        }

        let mut merged = self.clone();
        for pair in tags.chunks_exact(2) {
            merged.insert(pair[0].as_ref(), pair[1].as_ref());
        }

        Ok(merged)
    }

    /// Encodes the tags in the given format.
    ///
    /// Returns an empty string if there are no tags or the format is [`TagFormat::None`].
    pub fn encode(&self, format: TagFormat) -> String {
        let mut buf = String::new();
        self.write_to(format, &mut buf);
        buf
    }

    /// Decodes tags previously encoded in the given format.
    ///
    /// An empty input, or [`TagFormat::None`], yields an empty set.
    pub fn decode(encoded: &str, format: TagFormat) -> Self {
        let (pairs, separator) = match format {
            TagFormat::None => return Self::new(),
            TagFormat::InfluxDb => (encoded.strip_prefix(',').unwrap_or(encoded), '='),
            TagFormat::Datadog => (encoded.strip_prefix("|#").unwrap_or(encoded), ':'),
        };

        let mut tags = Self::new();
        for pair in pairs.split(',').filter(|pair| !pair.is_empty()) {
            match pair.split_once(separator) {
                Some((key, value)) => tags.insert(key, value),
                None => tags.insert(pair, ""),
            }
        }

        tags
    }

    pub(crate) fn write_to(&self, format: TagFormat, buf: &mut String) {
        if self.is_empty() {
            return;
        }

        let (lead, separator) = match format {
            TagFormat::None => return,
            TagFormat::InfluxDb => (",", '='),
            TagFormat::Datadog => ("|#", ':'),
        };

        buf.push_str(lead);
        for (i, (key, value)) in self.iter().enumerate() {
            if i > 0 {
                buf.push(',');
            }

            buf.push_str(key);
            buf.push(separator);
            buf.push_str(value);
        }
    }
}
