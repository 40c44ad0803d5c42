use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

/// A single rate threshold: at most `max` calls within `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    #[serde(rename = "duration_ms", with = "millis")]
    pub duration: Duration,
    pub max: NonZeroUsize,
}

/// Errors produced when building an [`AdmissionConfig`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one window must be configured")]
    NoWindows,

    #[error("window durations must be non-zero")]
    ZeroWindow,

    #[error("window of {0:?} is configured more than once")]
    DuplicateWindow(Duration),

    #[error("retention horizon {retention:?} is shorter than the largest window {largest:?}")]
    RetentionTooShort {
        retention: Duration,
        largest: Duration,
    },
}

/// Validated admission settings.
///
/// Windows are kept in ascending duration order. Use [`AdmissionConfig::builder`] to create
/// one, or deserialize it (validation runs either way).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "AdmissionConfigBuilder", into = "AdmissionConfigBuilder")]
pub struct AdmissionConfig {
    windows: Vec<Window>,
    retention: Duration,
    max_violations: NonZeroUsize,
    ban_duration: Duration,
}

impl AdmissionConfig {
    pub fn builder() -> AdmissionConfigBuilder {
        AdmissionConfigBuilder::default()
    }

    pub fn windows(&self) -> &[Window] {
        &self.windows
    }

    /// Entries older than this are pruned from every history.
    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn max_violations(&self) -> NonZeroUsize {
        self.max_violations
    }

    pub fn ban_duration(&self) -> Duration {
        self.ban_duration
    }
}

impl Default for AdmissionConfig {
    /// 10 calls a second, 20 in 5s, 40 in 10s, 60 in 30s. Three violations within 30s earn a
    /// 15s ban.
    fn default() -> Self {
        Self {
            windows: vec![
                window(1_000, 10),
                window(5_000, 20),
                window(10_000, 40),
                window(30_000, 60),
            ],
            retention: Duration::from_secs(30),
            max_violations: NonZeroUsize::MIN.saturating_add(2),
            ban_duration: Duration::from_secs(15),
        }
    }
}

fn window(ms: u64, max: usize) -> Window {
    Window {
        duration: Duration::from_millis(ms),
        max: NonZeroUsize::new(max).unwrap_or(NonZeroUsize::MIN),
    }
}

/// Builder for [`AdmissionConfig`].
///
/// Starts with no windows, a retention horizon equal to the largest window, three violations
/// and a 15 second ban.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionConfigBuilder {
    #[serde(default)]
    windows: Vec<Window>,
    #[serde(
        rename = "retention_ms",
        default,
        with = "millis::option",
        skip_serializing_if = "Option::is_none"
    )]
    retention: Option<Duration>,
    #[serde(default = "default_max_violations")]
    max_violations: NonZeroUsize,
    #[serde(rename = "ban_duration_ms", default = "default_ban", with = "millis")]
    ban_duration: Duration,
}

fn default_max_violations() -> NonZeroUsize {
    AdmissionConfig::default().max_violations
}

fn default_ban() -> Duration {
    AdmissionConfig::default().ban_duration
}

impl Default for AdmissionConfigBuilder {
    fn default() -> Self {
        Self {
            windows: Vec::new(),
            retention: None,
            max_violations: default_max_violations(),
            ban_duration: default_ban(),
        }
    }
}

impl AdmissionConfigBuilder {
    /// Allow at most `max` calls within `duration`.
    pub fn window(mut self, duration: Duration, max: NonZeroUsize) -> Self {
        self.windows.push(Window { duration, max });
        self
    }

    /// Set how long request and violation history is retained.
    ///
    /// Must be at least as long as the largest window.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    /// Set how many violations within the retention horizon trigger a ban.
    pub fn with_max_violations(mut self, max_violations: NonZeroUsize) -> Self {
        self.max_violations = max_violations;
        self
    }

    /// Set how long a ban lasts.
    pub fn with_ban_duration(mut self, ban_duration: Duration) -> Self {
        self.ban_duration = ban_duration;
        self
    }

    pub fn build(self) -> Result<AdmissionConfig, ConfigError> {
        let mut windows = self.windows;
        windows.sort_by_key(|w| w.duration);

        if windows.iter().any(|w| w.duration.is_zero()) {
            return Err(ConfigError::ZeroWindow);
        }
        if let Some(pair) = windows.windows(2).find(|w| w[0].duration == w[1].duration) {
            return Err(ConfigError::DuplicateWindow(pair[0].duration));
        }
        let largest = windows.last().ok_or(ConfigError::NoWindows)?.duration;

        let retention = self.retention.unwrap_or(largest);
        if retention < largest {
            return Err(ConfigError::RetentionTooShort { retention, largest });
        }

        Ok(AdmissionConfig {
            windows,
            retention,
            max_violations: self.max_violations,
            ban_duration: self.ban_duration,
        })
    }
}

impl TryFrom<AdmissionConfigBuilder> for AdmissionConfig {
    type Error = ConfigError;

    fn try_from(builder: AdmissionConfigBuilder) -> Result<Self, Self::Error> {
        builder.build()
    }
}

impl From<AdmissionConfig> for AdmissionConfigBuilder {
    fn from(config: AdmissionConfig) -> Self {
        Self {
            windows: config.windows,
            retention: Some(config.retention),
            max_violations: config.max_violations,
            ban_duration: config.ban_duration,
        }
    }
}

// Durations travel as whole milliseconds.
mod millis {
    use std::time::Duration;

    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }

    pub mod option {
        use std::time::Duration;

        use serde::Deserialize;
        use serde::Deserializer;
        use serde::Serializer;

        pub fn serialize<S: Serializer>(
            duration: &Option<Duration>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match duration {
                Some(d) => s.serialize_some(&(d.as_millis() as u64)),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
            Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn it_sorts_windows_and_defaults_retention() {
        let config = AdmissionConfig::builder()
            .window(Duration::from_secs(10), nz(40))
            .window(Duration::from_secs(1), nz(10))
            .build()
            .unwrap();

        let durations: Vec<_> = config.windows().iter().map(|w| w.duration).collect();
        assert_eq!(
            durations,
            vec![Duration::from_secs(1), Duration::from_secs(10)]
        );
        assert_eq!(config.retention(), Duration::from_secs(10));
        assert_eq!(config.max_violations().get(), 3);
        assert_eq!(config.ban_duration(), Duration::from_secs(15));
    }

    #[test]
    fn it_rejects_invalid_configs() {
        assert_eq!(
            AdmissionConfig::builder().build(),
            Err(ConfigError::NoWindows)
        );
        assert_eq!(
            AdmissionConfig::builder()
                .window(Duration::ZERO, nz(1))
                .build(),
            Err(ConfigError::ZeroWindow)
        );
        assert_eq!(
            AdmissionConfig::builder()
                .window(Duration::from_secs(1), nz(1))
                .window(Duration::from_secs(1), nz(5))
                .build(),
            Err(ConfigError::DuplicateWindow(Duration::from_secs(1)))
        );
        assert_eq!(
            AdmissionConfig::builder()
                .window(Duration::from_secs(5), nz(1))
                .with_retention(Duration::from_secs(1))
                .build(),
            Err(ConfigError::RetentionTooShort {
                retention: Duration::from_secs(1),
                largest: Duration::from_secs(5),
            })
        );
    }

    #[test]
    fn the_default_matches_the_builder() {
        let built = AdmissionConfig::builder()
            .window(Duration::from_millis(1_000), nz(10))
            .window(Duration::from_millis(5_000), nz(20))
            .window(Duration::from_millis(10_000), nz(40))
            .window(Duration::from_millis(30_000), nz(60))
            .build()
            .unwrap();
        assert_eq!(built, AdmissionConfig::default());
    }

    #[test]
    fn it_loads_from_json() {
        let config: AdmissionConfig = serde_json::from_str(
            r#"{
                "windows": [
                    { "duration_ms": 5000, "max": 20 },
                    { "duration_ms": 1000, "max": 10 }
                ],
                "max_violations": 2,
                "ban_duration_ms": 60000
            }"#,
        )
        .unwrap();

        assert_eq!(config.windows()[0].duration, Duration::from_secs(1));
        assert_eq!(config.retention(), Duration::from_secs(5));
        assert_eq!(config.max_violations().get(), 2);
        assert_eq!(config.ban_duration(), Duration::from_secs(60));

        let round: AdmissionConfig =
            serde_json::from_value(serde_json::to_value(&config).unwrap()).unwrap();
        assert_eq!(round, config);
    }

    #[test]
    fn json_validation_errors_surface() {
        let err = serde_json::from_str::<AdmissionConfig>(
            r#"{ "windows": [{ "duration_ms": 5000, "max": 1 }], "retention_ms": 10 }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("shorter than the largest window"));
    }
}
