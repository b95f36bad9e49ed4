use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_ttl_hours: i64,
    pub storage_root: String,
    pub public_base_url: String,
    pub presign_ttl_secs: i64,
    pub max_upload_bytes: usize,
    pub cors_origins: Vec<String>,
    pub low_stock_threshold: i32,
    pub shipping_fee: i64,
    pub free_shipping_threshold: Option<i64>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| anyhow::anyhow!("JWT_SECRET is not set"))?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parse_or("APP_PORT", 3000);
        let public_base_url = env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| format!("http://{host}:{port}"));
        let cors_origins = env::var("CORS_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            database_url,
            jwt_secret,
            jwt_ttl_hours: parse_or("JWT_TTL_HOURS", 24),
            storage_root: env::var("STORAGE_ROOT").unwrap_or_else(|_| "./storage".to_string()),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            presign_ttl_secs: parse_or("PRESIGN_TTL_SECS", 900),
            max_upload_bytes: parse_or("MAX_UPLOAD_BYTES", 20 * 1024 * 1024),
            cors_origins,
            low_stock_threshold: parse_or("LOW_STOCK_THRESHOLD", 5),
            shipping_fee: parse_or("SHIPPING_FEE", 0),
            free_shipping_threshold: env::var("FREE_SHIPPING_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok()),
            host,
            port,
        })
    }

    /// Shipping fee charged for an order with the given subtotal.
    pub fn shipping_fee_for(&self, subtotal: i64) -> i64 {
        match self.free_shipping_threshold {
            Some(threshold) if subtotal >= threshold => 0,
            _ => self.shipping_fee,
        }
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
impl AppConfig {
    pub fn for_tests() -> Self {
        Self {
            database_url: String::new(),
            host: "127.0.0.1".into(),
            port: 3000,
            jwt_secret: "test-secret".into(),
            jwt_ttl_hours: 1,
            storage_root: std::env::temp_dir().to_string_lossy().into_owned(),
            public_base_url: "http://localhost:3000".into(),
            presign_ttl_secs: 60,
            max_upload_bytes: 1024,
            cors_origins: Vec::new(),
            low_stock_threshold: 5,
            shipping_fee: 1500,
            free_shipping_threshold: Some(100_000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shipping_is_free_above_threshold() {
        let config = AppConfig::for_tests();
        assert_eq!(config.shipping_fee_for(99_999), 1500);
        assert_eq!(config.shipping_fee_for(100_000), 0);
    }

    #[test]
    fn flat_fee_without_threshold() {
        let config = AppConfig {
            free_shipping_threshold: None,
            ..AppConfig::for_tests()
        };
        assert_eq!(config.shipping_fee_for(10_000_000), 1500);
    }
}
