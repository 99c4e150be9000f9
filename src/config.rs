use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    /// Object-store endpoint images are written to (PUT/DELETE by key).
    pub blob_endpoint: String,
    /// Public base URL returned to clients; defaults to the endpoint.
    pub blob_public_url: String,
    pub blob_timeout_secs: u64,
    pub catalog_timeout_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);
        let blob_endpoint = env::var("BLOB_ENDPOINT")?;
        let blob_public_url =
            env::var("BLOB_PUBLIC_URL").unwrap_or_else(|_| blob_endpoint.clone());
        let blob_timeout_secs = env::var("BLOB_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(10);
        let catalog_timeout_secs = env::var("CATALOG_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(5);
        Ok(Self {
            database_url,
            host,
            port,
            blob_endpoint,
            blob_public_url,
            blob_timeout_secs,
            catalog_timeout_secs,
        })
    }
}
