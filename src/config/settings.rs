use serde::Deserialize;
use std::{path::Path, time::Duration};
use thiserror::Error;
use tokio::fs;

use crate::protocol::BoundingBox;

// -----------------------------------------------------------------------------
// ----- Defaults --------------------------------------------------------------

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(1800);
const DEFAULT_ATTACH_QUEUE: usize = 4;
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// -----------------------------------------------------------------------------
// ----- GatewaySettings -------------------------------------------------------

/// Tunables read from the optional TOML file. Every field has a default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewaySettings {
    pub backend: BackendSettings,
    pub session: SessionSettings,
    pub server: ServerSettings,
    pub loopback: LoopbackSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSettings {
    /// Upper bound on every backend call.
    pub call_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// A connection silent for this long ends its session.
    pub idle_timeout: Duration,

    /// Reconnects that may queue for a busy session.
    pub attach_queue: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub shutdown_grace: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackSettings {
    pub latency: Duration,
    pub boxes: Vec<BoundingBox>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            attach_queue: DEFAULT_ATTACH_QUEUE,
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl Default for LoopbackSettings {
    fn default() -> Self {
        Self {
            latency: Duration::ZERO,
            boxes: vec![
                BoundingBox::new(600, 100, 100, 100),
                BoundingBox::new(100, 300, 100, 100),
            ],
        }
    }
}

// -----------------------------------------------------------------------------
// ----- GatewaySettings: Static -----------------------------------------------

impl GatewaySettings {
    pub async fn from_file_async(path: &Path) -> Result<GatewaySettings, SettingsError> {
        let raw = fs::read_to_string(path).await.map_err(|e| SettingsError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<GatewaySettings, SettingsError> {
        let doc: SettingsFile = toml::from_str(raw).map_err(|e| SettingsError::Toml { source: e })?;
        let defaults = GatewaySettings::default();

        let call_timeout = doc
            .backend
            .call_timeout_ms
            .unwrap_or(defaults.backend.call_timeout);
        if call_timeout.is_zero() {
            return Err(SettingsError::InvalidField("backend.call_timeout_ms".into()));
        }

        let idle_timeout = doc
            .session
            .idle_timeout_ms
            .unwrap_or(defaults.session.idle_timeout);
        if idle_timeout.is_zero() {
            return Err(SettingsError::InvalidField("session.idle_timeout_ms".into()));
        }

        let attach_queue = doc
            .session
            .attach_queue
            .unwrap_or(defaults.session.attach_queue);
        if attach_queue == 0 {
            return Err(SettingsError::InvalidField("session.attach_queue".into()));
        }

        let boxes = match doc.loopback.boxes {
            Some(entries) => entries
                .into_iter()
                .map(|b| BoundingBox::new(b.x, b.y, b.w, b.h))
                .collect(),
            None => defaults.loopback.boxes,
        };

        Ok(GatewaySettings {
            backend: BackendSettings { call_timeout },
            session: SessionSettings {
                idle_timeout,
                attach_queue,
            },
            server: ServerSettings {
                shutdown_grace: doc
                    .server
                    .shutdown_grace_ms
                    .unwrap_or(defaults.server.shutdown_grace),
            },
            loopback: LoopbackSettings {
                latency: doc.loopback.latency_ms.unwrap_or(defaults.loopback.latency),
                boxes,
            },
        })
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: On-disk format ----------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsFile {
    #[serde(default)]
    backend: BackendSection,

    #[serde(default)]
    session: SessionSection,

    #[serde(default)]
    server: ServerSection,

    #[serde(default)]
    loopback: LoopbackSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BackendSection {
    #[serde(default, deserialize_with = "de_ms")]
    call_timeout_ms: Option<Duration>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SessionSection {
    #[serde(default, deserialize_with = "de_ms")]
    idle_timeout_ms: Option<Duration>,

    #[serde(default)]
    attach_queue: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServerSection {
    #[serde(default, deserialize_with = "de_ms")]
    shutdown_grace_ms: Option<Duration>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LoopbackSection {
    #[serde(default, deserialize_with = "de_ms")]
    latency_ms: Option<Duration>,

    #[serde(default)]
    boxes: Option<Vec<BoxEntry>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct BoxEntry {
    x: i32,
    y: i32,
    w: i32,
    h: i32,
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn de_ms<'de, D>(d: D) -> Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{Error, Unexpected, Visitor};
    use std::fmt;

    struct OptVisitor;
    struct MsVisitor;

    impl<'de> Visitor<'de> for OptVisitor {
        type Value = Option<Duration>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("integer milliseconds (e.g., 10000)")
        }
        fn visit_none<E: Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
        fn visit_unit<E: Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
        fn visit_some<D2>(self, d2: D2) -> Result<Self::Value, D2::Error>
        where
            D2: serde::Deserializer<'de>,
        {
            d2.deserialize_any(MsVisitor)
        }
    }

    impl<'de> Visitor<'de> for MsVisitor {
        type Value = Option<Duration>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("integer milliseconds (e.g., 10000)")
        }

        fn visit_u64<E: Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(Duration::from_millis(v)))
        }

        fn visit_i64<E: Error>(self, v: i64) -> Result<Self::Value, E> {
            if v < 0 {
                return Err(E::invalid_value(Unexpected::Signed(v), &self));
            }
            Ok(Some(Duration::from_millis(v as u64)))
        }

        fn visit_str<E: Error>(self, v: &str) -> Result<Self::Value, E> {
            Err(E::invalid_value(Unexpected::Str(v), &self))
        }
    }

    d.deserialize_option(OptVisitor)
}

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid or missing field '{0}'")]
    InvalidField(String),

    #[error("read error for {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("toml parse error: {source}")]
    Toml { source: toml::de::Error },
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_tmp(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn parse_full_file() {
        let toml = r#"
            [backend]
            call_timeout_ms = 2_500

            [session]
            idle_timeout_ms = 60_000
            attach_queue = 2

            [server]
            shutdown_grace_ms = 750

            [loopback]
            latency_ms = 3

            [[loopback.boxes]]
            x = 1
            y = 2
            w = 3
            h = 4
        "#;

        let tmp = write_tmp(toml);
        let settings = GatewaySettings::from_file_async(tmp.path()).await.unwrap();

        assert_eq!(settings.backend.call_timeout, Duration::from_millis(2_500));
        assert_eq!(settings.session.idle_timeout, Duration::from_secs(60));
        assert_eq!(settings.session.attach_queue, 2);
        assert_eq!(settings.server.shutdown_grace, Duration::from_millis(750));
        assert_eq!(settings.loopback.latency, Duration::from_millis(3));
        assert_eq!(settings.loopback.boxes, vec![BoundingBox::new(1, 2, 3, 4)]);
    }

    #[test]
    fn empty_file_means_defaults() {
        let settings = GatewaySettings::parse("").unwrap();
        assert_eq!(settings, GatewaySettings::default());
        assert_eq!(settings.backend.call_timeout, Duration::from_secs(10));
        assert_eq!(settings.loopback.boxes.len(), 2);
    }

    #[test]
    fn rejects_zero_timeouts_and_unknown_keys() {
        let err = GatewaySettings::parse("[backend]\ncall_timeout_ms = 0\n").unwrap_err();
        assert!(matches!(err, SettingsError::InvalidField(f) if f == "backend.call_timeout_ms"));

        let err = GatewaySettings::parse("[session]\nattach_queue = 0\n").unwrap_err();
        assert!(matches!(err, SettingsError::InvalidField(_)));

        let err = GatewaySettings::parse("[backend]\ndeadline = 5\n").unwrap_err();
        assert!(matches!(err, SettingsError::Toml { .. }));

        let err = GatewaySettings::parse("[backend]\ncall_timeout_ms = \"10s\"\n").unwrap_err();
        assert!(matches!(err, SettingsError::Toml { .. }));
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let err = GatewaySettings::from_file_async(Path::new("/definitely/not/here.toml"))
            .await
            .unwrap_err();
        assert!(matches!(err, SettingsError::Io { .. }));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
