use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

/// What happens to an order record once it is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CancelPolicy {
    /// Mark Cancelled, then delete the row.
    #[default]
    Delete,
    /// Keep the row with status Cancelled.
    Retain,
}

impl std::str::FromStr for CancelPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "delete" => Ok(Self::Delete),
            "retain" => Ok(Self::Retain),
            other => anyhow::bail!("unknown cancel policy: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateTier {
    pub max_requests: u32,
    pub window_secs: u64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateLimitConfig {
    pub burst: RateTier,
    pub sustained: RateTier,
    /// Key anonymous callers by `X-Forwarded-For`. Only safe behind a proxy
    /// that overwrites the header; otherwise the peer address is used.
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            burst: RateTier {
                max_requests: 10,
                window_secs: 60,
            },
            sustained: RateTier {
                max_requests: 1000,
                window_secs: 60 * 60 * 24,
            },
            trust_forwarded_for: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub minio_endpoint: String,
    pub minio_bucket: String,
    pub minio_access_key: String,
    pub minio_secret_key: String,
    pub cancel_policy: CancelPolicy,
    pub rate_limit: RateLimitConfig,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "storefront".into()),
            audience: std::env::var("JWT_AUDIENCE")
                .unwrap_or_else(|_| "storefront-users".into()),
            ttl_minutes: env_parse("JWT_TTL_MINUTES", 60),
            refresh_ttl_minutes: env_parse("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 14),
        };

        let cancel_policy = match std::env::var("ORDER_CANCEL_POLICY") {
            Ok(v) => v.parse()?,
            Err(_) => CancelPolicy::default(),
        };

        let defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            burst: RateTier {
                max_requests: env_parse("RATE_BURST_REQUESTS", defaults.burst.max_requests),
                window_secs: env_parse("RATE_BURST_WINDOW_SECS", defaults.burst.window_secs),
            },
            sustained: RateTier {
                max_requests: env_parse(
                    "RATE_SUSTAINED_REQUESTS",
                    defaults.sustained.max_requests,
                ),
                window_secs: env_parse(
                    "RATE_SUSTAINED_WINDOW_SECS",
                    defaults.sustained.window_secs,
                ),
            },
            trust_forwarded_for: env_parse(
                "RATE_TRUST_FORWARDED_FOR",
                defaults.trust_forwarded_for,
            ),
        };

        Ok(Self {
            database_url,
            jwt,
            minio_endpoint: std::env::var("MINIO_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:9000".into()),
            minio_bucket: std::env::var("MINIO_BUCKET").unwrap_or_else(|_| "storefront".into()),
            minio_access_key: std::env::var("MINIO_ACCESS_KEY")?,
            minio_secret_key: std::env::var("MINIO_SECRET_KEY")?,
            cancel_policy,
            rate_limit,
        })
    }
}
