use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Origin allowed to call the API and open the live channel.
    /// Set via HERALD_ALLOWED_ORIGIN. Default: http://localhost:3000.
    pub allowed_origin: String,
    /// Default feed page size. Set via HERALD_FEED_LIMIT. Default: 20.
    pub feed_limit: i64,
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    Ok(Config {
        port: std::env::var("HERALD_PORT")
            .unwrap_or_else(|_| "8080".into())
            .parse()
            .unwrap_or(8080),
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/herald".into()),
        allowed_origin: std::env::var("HERALD_ALLOWED_ORIGIN")
            .unwrap_or_else(|_| "http://localhost:3000".into()),
        feed_limit: std::env::var("HERALD_FEED_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(20),
    })
}
