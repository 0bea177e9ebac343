use std::time::Duration;

use crate::error::CoreError;

/// Render slots allowed on platforms whose media stack struggles with many
/// concurrent decoders.
pub const CONSTRAINED_MAX_ACTIVE_RENDERS: usize = 3;

/// Render slots allowed everywhere else.
pub const DEFAULT_MAX_ACTIVE_RENDERS: usize = 6;

/// Whether failed local renders may ask the remote thumbnail cache to
/// pre-render the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailCacheUse {
    Enabled,
    Disabled,
}

impl ThumbnailCacheUse {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThumbnailCacheUse::Enabled => "enabled",
            ThumbnailCacheUse::Disabled => "disabled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enabled" | "enable" | "on" | "true" => Some(Self::Enabled),
            "disabled" | "disable" | "off" | "false" => Some(Self::Disabled),
            _ => None,
        }
    }
}

/// Runtime configuration for the branding and render pipeline.
///
/// All fields have defaults suitable for talking to the public servers.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Base URL of the branding server (no trailing slash).
    pub branding_server_url: String,
    /// Base URL of the remote thumbnail cache (no trailing slash).
    pub thumbnail_server_url: String,
    /// Whole-attempt render deadline, slot wait included.
    pub render_timeout: Duration,
    /// How long to wait on an in-flight remote fetch before rendering locally.
    pub start_local_render_timeout: Duration,
    /// Upper bound a caller waits on a remote-fallback registration.
    pub fallback_timeout: Duration,
    /// Running on a constrained media stack (fewer render slots, no t=0 nudge).
    pub constrained_platform: bool,
    /// Number of concurrent render slots.
    pub max_active_renders: usize,
    pub thumbnail_cache_use: ThumbnailCacheUse,
    /// Maximum number of branding records kept in memory.
    pub branding_cache_capacity: usize,
    /// Freshness window of a cached branding record.
    pub branding_cache_ttl: Duration,
    /// Timeout applied to every outgoing HTTP request.
    pub http_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            branding_server_url: "https://sponsor.ajay.app".into(),
            thumbnail_server_url: "https://dearrow-thumb.ajay.app".into(),
            render_timeout: Duration::from_millis(20_000),
            start_local_render_timeout: Duration::from_millis(1_000),
            fallback_timeout: Duration::from_millis(30_000),
            constrained_platform: false,
            max_active_renders: DEFAULT_MAX_ACTIVE_RENDERS,
            thumbnail_cache_use: ThumbnailCacheUse::Enabled,
            branding_cache_capacity: 1000,
            branding_cache_ttl: Duration::from_secs(60 * 60),
            http_timeout: Duration::from_secs(10),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables, using the default for
    /// any variable that is missing or malformed.
    ///
    /// | Env Var                         | Default                          |
    /// |---------------------------------|----------------------------------|
    /// | `BRANDING_SERVER_URL`           | `https://sponsor.ajay.app`       |
    /// | `THUMBNAIL_SERVER_URL`          | `https://dearrow-thumb.ajay.app` |
    /// | `RENDER_TIMEOUT_MS`             | `20000`                          |
    /// | `START_LOCAL_RENDER_TIMEOUT_MS` | `1000`                           |
    /// | `FALLBACK_TIMEOUT_MS`           | `30000`                          |
    /// | `CONSTRAINED_PLATFORM`          | `false`                          |
    /// | `MAX_ACTIVE_RENDERS`            | `3` if constrained, else `6`     |
    /// | `THUMBNAIL_CACHE_USE`           | `enabled`                        |
    /// | `BRANDING_CACHE_CAPACITY`       | `1000`                           |
    /// | `BRANDING_CACHE_TTL_SECS`       | `3600`                           |
    /// | `HTTP_TIMEOUT_SECS`             | `10`                             |
    pub fn from_env() -> Self {
        Self::build(|key| std::env::var(key).ok(), false).unwrap_or_default()
    }

    /// Like [`from_env`](Self::from_env) but rejects malformed values.
    pub fn try_from_env() -> Result<Self, CoreError> {
        Self::build(|key| std::env::var(key).ok(), true)
    }

    /// Build from an arbitrary key lookup. With `strict`, the first malformed
    /// value is returned as an error instead of being replaced by its default.
    pub fn build<F>(lookup: F, strict: bool) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let reader = Reader { lookup, strict };

        let constrained_platform =
            reader.parse("CONSTRAINED_PLATFORM", false, parse_bool)?;
        let default_slots = if constrained_platform {
            CONSTRAINED_MAX_ACTIVE_RENDERS
        } else {
            DEFAULT_MAX_ACTIVE_RENDERS
        };

        Ok(Self {
            branding_server_url: reader
                .string("BRANDING_SERVER_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.branding_server_url),
            thumbnail_server_url: reader
                .string("THUMBNAIL_SERVER_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.thumbnail_server_url),
            render_timeout: reader.millis("RENDER_TIMEOUT_MS", defaults.render_timeout)?,
            start_local_render_timeout: reader.millis(
                "START_LOCAL_RENDER_TIMEOUT_MS",
                defaults.start_local_render_timeout,
            )?,
            fallback_timeout: reader.millis("FALLBACK_TIMEOUT_MS", defaults.fallback_timeout)?,
            constrained_platform,
            max_active_renders: reader
                .parse("MAX_ACTIVE_RENDERS", default_slots, |v| {
                    v.parse::<usize>().ok().filter(|n| *n > 0)
                })?,
            thumbnail_cache_use: reader.parse(
                "THUMBNAIL_CACHE_USE",
                defaults.thumbnail_cache_use,
                ThumbnailCacheUse::parse,
            )?,
            branding_cache_capacity: reader.parse(
                "BRANDING_CACHE_CAPACITY",
                defaults.branding_cache_capacity,
                |v| v.parse::<usize>().ok().filter(|n| *n > 0),
            )?,
            branding_cache_ttl: Duration::from_secs(reader.parse(
                "BRANDING_CACHE_TTL_SECS",
                defaults.branding_cache_ttl.as_secs(),
                |v| v.parse::<u64>().ok(),
            )?),
            http_timeout: Duration::from_secs(reader.parse(
                "HTTP_TIMEOUT_SECS",
                defaults.http_timeout.as_secs(),
                |v| v.parse::<u64>().ok().filter(|n| *n > 0),
            )?),
        })
    }

    /// Whether local render failures may fall back to the remote cache.
    pub fn remote_fallback_enabled(&self) -> bool {
        self.thumbnail_cache_use == ThumbnailCacheUse::Enabled
    }
}

struct Reader<F> {
    lookup: F,
    strict: bool,
}

impl<F> Reader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(
        &self,
        key: &'static str,
        default: T,
        parse: impl Fn(&str) -> Option<T>,
    ) -> Result<T, CoreError> {
        let Some(raw) = self.string(key) else {
            return Ok(default);
        };
        match parse(&raw) {
            Some(value) => Ok(value),
            None if self.strict => Err(CoreError::InvalidConfig { key, value: raw }),
            None => Ok(default),
        }
    }

    fn millis(&self, key: &'static str, default: Duration) -> Result<Duration, CoreError> {
        let ms = self.parse(key, default.as_millis() as u64, |v| v.parse::<u64>().ok())?;
        Ok(Duration::from_millis(ms))
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
