use std::env;
use std::str::FromStr;

pub const DEFAULT_TABLE_NAME: &str = "campus";
pub const DEFAULT_BUCKET_NAME: &str = "campus-private";
pub const DEFAULT_MODULE: &str = "collect";

const MIB: u64 = 1024 * 1024;

/// Size and timing caps of the collection workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectLimits {
    /// Largest accepted student upload.
    pub max_upload_bytes: u64,
    pub max_template_bytes: u64,
    /// Export refuses to start when the selected files sum above this.
    pub export_max_bytes: u64,
    pub signed_url_ttl_secs: u64,
    pub fetch_timeout_secs: u64,
}

impl Default for CollectLimits {
    fn default() -> Self {
        Self {
            max_upload_bytes: 200 * MIB,
            max_template_bytes: 20 * MIB,
            export_max_bytes: 1024 * MIB,
            signed_url_ttl_secs: 60,
            fetch_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub table_name: String,
    pub bucket_name: String,
    /// Namespace for permission codes and object keys.
    pub module: String,
    pub limits: CollectLimits,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Unparseable numbers fall back
    /// to their defaults with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = CollectLimits::default();
        let text = |name: &str, default: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Self {
            table_name: text("TABLE_NAME", DEFAULT_TABLE_NAME),
            bucket_name: text("S3_BUCKET_NAME", DEFAULT_BUCKET_NAME),
            module: text("COLLECT_MODULE", DEFAULT_MODULE),
            limits: CollectLimits {
                max_upload_bytes: parse_or(&lookup, "COLLECT_MAX_UPLOAD_BYTES", defaults.max_upload_bytes),
                max_template_bytes: parse_or(&lookup, "COLLECT_MAX_TEMPLATE_BYTES", defaults.max_template_bytes),
                export_max_bytes: parse_or(&lookup, "COLLECT_EXPORT_MAX_BYTES", defaults.export_max_bytes),
                signed_url_ttl_secs: parse_or(&lookup, "COLLECT_SIGNED_URL_TTL_SECS", defaults.signed_url_ttl_secs),
                fetch_timeout_secs: parse_or(&lookup, "COLLECT_FETCH_TIMEOUT_SECS", defaults.fetch_timeout_secs),
            },
        }
    }

    pub fn limits(&self) -> CollectLimits {
        self.limits.clone()
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Copy + std::fmt::Display,
{
    match lookup(name) {
        None => default,
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!("Ignoring invalid {}={:?}, using {}", name, raw, default);
                default
            }
        },
    }
}
