use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{MeasureError, Result};

pub const MIN_THREADS: u32 = 1;
pub const MAX_THREADS: u32 = 16;

pub const MIN_RAMP_UP_MS: u64 = 0;
pub const MAX_RAMP_UP_MS: u64 = 10_000;

pub const MIN_TARGET_TIME_MS: u64 = 1_000;
pub const MAX_TARGET_TIME_MS: u64 = 60_000;

pub const MIN_SLOT_LENGTH_MS: u64 = 100;

/// Port used when the URL does not carry one.
pub const DEFAULT_HTTP_PORT: u16 = 80;

pub const MIN_ITERATIONS: u16 = 1;
pub const MAX_ITERATIONS: u16 = 1_000;

pub const MIN_TRAIN_LENGTH: u16 = 2;
pub const MAX_TRAIN_LENGTH: u16 = 10_000;

/// Smallest datagram that still carries a full train record header.
pub const MIN_PACKET_SIZE: usize = 12;
/// Largest UDP payload over IPv4.
pub const MAX_PACKET_SIZE: usize = 65_507;

/// Definition of a multi-worker HTTP download run.
///
/// # Examples
///
/// ```
/// use bwmeter_measure::HttpDownloadDefinition;
///
/// let definition = HttpDownloadDefinition::new("http://speed.example.net/10MB.bin")
///     .threads(4)
///     .target_time_ms(10_000)
///     .slot_length_ms(500);
/// assert!(definition.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpDownloadDefinition {
    /// URL of the object every worker downloads.
    ///
    /// A bare `host/path` is read as `http://host/path`.
    pub url: String,

    /// Number of concurrent workers (one TCP connection each).
    ///
    /// Default: 4
    pub threads: u32,

    /// Grace period after all workers received their first byte before the
    /// measurement window opens.
    ///
    /// Default: 2000ms
    pub ramp_up_ms: u64,

    /// Length of the measurement window.
    ///
    /// Default: 10000ms
    pub target_time_ms: u64,

    /// Nominal length of one time slice in the per-worker breakdown.
    ///
    /// Default: 500ms
    pub slot_length_ms: u64,

    /// Append a timestamp query parameter so caches cannot answer.
    ///
    /// Default: false
    pub avoid_caches: bool,
}

impl Default for HttpDownloadDefinition {
    fn default() -> Self {
        Self {
            url:            String::new(),
            threads:        4,
            ramp_up_ms:     2_000,
            target_time_ms: 10_000,
            slot_length_ms: 500,
            avoid_caches:   false,
        }
    }
}

impl HttpDownloadDefinition {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn threads(mut self, threads: u32) -> Self {
        self.threads = threads;
        self
    }

    #[must_use]
    pub fn ramp_up_ms(mut self, ramp_up_ms: u64) -> Self {
        self.ramp_up_ms = ramp_up_ms;
        self
    }

    #[must_use]
    pub fn target_time_ms(mut self, target_time_ms: u64) -> Self {
        self.target_time_ms = target_time_ms;
        self
    }

    #[must_use]
    pub fn slot_length_ms(mut self, slot_length_ms: u64) -> Self {
        self.slot_length_ms = slot_length_ms;
        self
    }

    #[must_use]
    pub fn avoid_caches(mut self, avoid_caches: bool) -> Self {
        self.avoid_caches = avoid_caches;
        self
    }

    /// Check every bound and parse the URL.
    ///
    /// Nothing touches the network here; a definition that fails this check
    /// never opens a socket.
    pub fn validate(&self) -> Result<HttpTarget> {
        if !(MIN_THREADS..=MAX_THREADS).contains(&self.threads) {
            return Err(MeasureError::validation(format!(
                "requested number of threads wrong: {} (allowed {MIN_THREADS}..={MAX_THREADS})",
                self.threads
            )));
        }

        if !(MIN_RAMP_UP_MS..=MAX_RAMP_UP_MS).contains(&self.ramp_up_ms) {
            return Err(MeasureError::validation(format!(
                "requested ramp-up time wrong: {}ms (allowed {MIN_RAMP_UP_MS}..={MAX_RAMP_UP_MS})",
                self.ramp_up_ms
            )));
        }

        if !(MIN_TARGET_TIME_MS..=MAX_TARGET_TIME_MS).contains(&self.target_time_ms) {
            return Err(MeasureError::validation(format!(
                "requested target time wrong: {}ms (allowed {MIN_TARGET_TIME_MS}..={MAX_TARGET_TIME_MS})",
                self.target_time_ms
            )));
        }

        if self.slot_length_ms < MIN_SLOT_LENGTH_MS || self.slot_length_ms > self.target_time_ms {
            return Err(MeasureError::validation(format!(
                "requested slot length wrong: {}ms (allowed {MIN_SLOT_LENGTH_MS}..={})",
                self.slot_length_ms, self.target_time_ms
            )));
        }

        HttpTarget::parse(&self.url)
    }
}

/// Host, port and request path extracted from a validated URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTarget {
    pub host: String,
    pub port: u16,
    /// Path plus query, always starting with `/`.
    pub path: String,
}

impl HttpTarget {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(MeasureError::validation("invalid URL: empty"));
        }

        let url = if input.contains("://") {
            Url::parse(input)
        } else {
            Url::parse(&format!("http://{input}"))
        }
        .map_err(|e| MeasureError::validation(format!("invalid URL: {e}")))?;

        if url.scheme() != "http" {
            return Err(MeasureError::validation(format!(
                "invalid URL: unsupported scheme '{}'",
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| MeasureError::validation("invalid URL: missing host"))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();

        let mut path = url.path().to_string();
        if path.is_empty() {
            path.push('/');
        }
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(Self {
            host,
            port: url.port().unwrap_or(DEFAULT_HTTP_PORT),
            path,
        })
    }
}

/// Definition of a packet-train run.
///
/// The receiving probe only reads `iterations` and `packet_size`; the other
/// two fields drive the sending side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacketTrainsDefinition {
    /// Number of trains, indexed `0..iterations`.
    pub iterations: u16,

    /// Packets per train.
    pub train_length: u16,

    /// Size of every datagram in bytes, header included.
    pub packet_size: usize,

    /// Pause between two trains on the sending side.
    pub train_gap_ms: u64,
}

impl Default for PacketTrainsDefinition {
    fn default() -> Self {
        Self {
            iterations:   10,
            train_length: 48,
            packet_size:  1_000,
            train_gap_ms: 100,
        }
    }
}

impl PacketTrainsDefinition {
    #[must_use]
    pub fn iterations(mut self, iterations: u16) -> Self {
        self.iterations = iterations;
        self
    }

    #[must_use]
    pub fn train_length(mut self, train_length: u16) -> Self {
        self.train_length = train_length;
        self
    }

    #[must_use]
    pub fn packet_size(mut self, packet_size: usize) -> Self {
        self.packet_size = packet_size;
        self
    }

    #[must_use]
    pub fn train_gap_ms(mut self, train_gap_ms: u64) -> Self {
        self.train_gap_ms = train_gap_ms;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_ITERATIONS..=MAX_ITERATIONS).contains(&self.iterations) {
            return Err(MeasureError::validation(format!(
                "requested iterations wrong: {} (allowed {MIN_ITERATIONS}..={MAX_ITERATIONS})",
                self.iterations
            )));
        }

        if !(MIN_TRAIN_LENGTH..=MAX_TRAIN_LENGTH).contains(&self.train_length) {
            return Err(MeasureError::validation(format!(
                "requested train length wrong: {} (allowed {MIN_TRAIN_LENGTH}..={MAX_TRAIN_LENGTH})",
                self.train_length
            )));
        }

        if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&self.packet_size) {
            return Err(MeasureError::validation(format!(
                "requested packet size wrong: {} (allowed {MIN_PACKET_SIZE}..={MAX_PACKET_SIZE})",
                self.packet_size
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> HttpDownloadDefinition { HttpDownloadDefinition::new("http://example.com/file.bin") }

    #[test]
    fn test_default_definition_with_url_is_valid() {
        let target = valid().validate().unwrap();
        assert_eq!(target.host, "example.com");
        assert_eq!(target.port, 80);
        assert_eq!(target.path, "/file.bin");
    }

    #[test]
    fn test_thread_bounds() {
        assert!(valid().threads(0).validate().is_err());
        assert!(valid().threads(MIN_THREADS).validate().is_ok());
        assert!(valid().threads(MAX_THREADS).validate().is_ok());
        assert!(valid().threads(MAX_THREADS + 1).validate().is_err());
    }

    #[test]
    fn test_ramp_up_bounds() {
        assert!(valid().ramp_up_ms(MAX_RAMP_UP_MS).validate().is_ok());
        assert!(valid().ramp_up_ms(MAX_RAMP_UP_MS + 1).validate().is_err());
    }

    #[test]
    fn test_target_time_bounds() {
        assert!(valid().target_time_ms(MIN_TARGET_TIME_MS - 1).validate().is_err());
        assert!(valid().target_time_ms(MAX_TARGET_TIME_MS + 1).validate().is_err());
        assert!(
            valid()
                .target_time_ms(MIN_TARGET_TIME_MS)
                .slot_length_ms(MIN_SLOT_LENGTH_MS)
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_slot_length_must_fit_in_target_time() {
        assert!(valid().slot_length_ms(MIN_SLOT_LENGTH_MS - 1).validate().is_err());
        assert!(valid().target_time_ms(2_000).slot_length_ms(2_000).validate().is_ok());
        assert!(valid().target_time_ms(2_000).slot_length_ms(2_001).validate().is_err());
    }

    #[test]
    fn test_validation_error_variant() {
        let err = valid().threads(100).validate().unwrap_err();
        assert!(matches!(err, MeasureError::Validation(_)));
        assert!(err.to_string().contains("threads"));
    }

    #[test]
    fn test_target_parse_bare_host() {
        let target = HttpTarget::parse("www.example.org/data/1M").unwrap();
        assert_eq!(target.host, "www.example.org");
        assert_eq!(target.path, "/data/1M");
    }

    #[test]
    fn test_target_parse_port_and_query() {
        let target = HttpTarget::parse("http://127.0.0.1:8080/down?bytes=100").unwrap();
        assert_eq!(target.host, "127.0.0.1");
        assert_eq!(target.port, 8080);
        assert_eq!(target.path, "/down?bytes=100");
    }

    #[test]
    fn test_target_parse_root_path() {
        assert_eq!(HttpTarget::parse("http://example.com").unwrap().path, "/");
    }

    #[test]
    fn test_target_rejects_https_and_garbage() {
        assert!(HttpTarget::parse("https://example.com/").is_err());
        assert!(HttpTarget::parse("").is_err());
        assert!(HttpTarget::parse("http://").is_err());
    }

    #[test]
    fn test_packet_trains_bounds() {
        let def = PacketTrainsDefinition::default();
        assert!(def.validate().is_ok());
        assert!(def.clone().iterations(0).validate().is_err());
        assert!(def.clone().train_length(1).validate().is_err());
        assert!(def.clone().packet_size(MIN_PACKET_SIZE - 1).validate().is_err());
        assert!(def.packet_size(MAX_PACKET_SIZE + 1).validate().is_err());
    }
}
