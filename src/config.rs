#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub ttl_minutes: i64,
}

/// S3-compatible bucket holding uploaded avatars.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub storage: StorageConfig,
    pub max_avatar_bytes: usize,
}

const DEFAULT_MAX_AVATAR_BYTES: usize = 5 * 1024 * 1024;
/// Ten years.
pub const MAX_TTL_MINUTES: i64 = 10 * 365 * 24 * 60;

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "crowdfund".into()),
            ttl_minutes: checked_ttl_minutes(parse_or("JWT_TTL_MINUTES", 60))?,
        };
        let storage = StorageConfig {
            endpoint: std::env::var("MINIO_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:9000".into()),
            bucket: std::env::var("MINIO_BUCKET").unwrap_or_else(|_| "avatars".into()),
            access_key: std::env::var("MINIO_ACCESS_KEY")?,
            secret_key: std::env::var("MINIO_SECRET_KEY")?,
            region: std::env::var("MINIO_REGION").unwrap_or_else(|_| "us-east-1".into()),
        };
        Ok(Self {
            database_url,
            jwt,
            storage,
            max_avatar_bytes: parse_or("MAX_AVATAR_BYTES", DEFAULT_MAX_AVATAR_BYTES),
        })
    }
}

fn checked_ttl_minutes(minutes: i64) -> anyhow::Result<i64> {
    if minutes <= 0 {
        anyhow::bail!("JWT_TTL_MINUTES must be positive, got {minutes}");
    }
    if minutes > MAX_TTL_MINUTES {
        anyhow::bail!("JWT_TTL_MINUTES must be at most {MAX_TTL_MINUTES}, got {minutes}");
    }
    Ok(minutes)
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}
