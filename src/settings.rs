//! Settings for the service.
//!
//! Defaults are overridden by an optional `ledgersplit.toml` in the working
//! directory, then by `LEDGERSPLIT__<SECTION>__<KEY>` environment variables.
//! `MONGODB_URI` and `BOT_API_TOKEN` are still honored for older deployments.
use std::env;

use config::{
    builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, File, FileFormat,
};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoSettings {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthSettings {
    /// Shared secret of the login widget; also accepted verbatim as a service token.
    pub bot_token: String,
    /// Oldest accepted login, in seconds. 0 turns the check off.
    pub max_age_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsSettings {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    pub level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub mongodb: MongoSettings,
    pub auth: AuthSettings,
    pub cors: CorsSettings,
    pub log: LogSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::defaults()?
            .add_source(File::with_name("ledgersplit").required(false))
            .add_source(
                Environment::with_prefix("LEDGERSPLIT")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("cors.allowed_origins")
                    .try_parsing(true),
            )
            .set_override_option("mongodb.uri", env::var("MONGODB_URI").ok())?
            .set_override_option("auth.bot_token", env::var("BOT_API_TOKEN").ok())?
            .build()?
            .try_deserialize()
    }

    /// Settings from a TOML document layered over the defaults.
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        Self::defaults()?
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080_i64)?
            .set_default("mongodb.uri", "mongodb://localhost:27017")?
            .set_default("mongodb.database", "OpenSplit")?
            .set_default("auth.bot_token", "")?
            .set_default("auth.max_age_secs", 86_400_i64)?
            .set_default("cors.allowed_origins", Vec::<String>::new())?
            .set_default("log.level", "info")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_sections() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.mongodb.database, "OpenSplit");
        assert!(settings.auth.bot_token.is_empty());
        assert_eq!(settings.auth.max_age_secs, 86_400);
        assert!(settings.cors.allowed_origins.is_empty());
        assert_eq!(settings.log.level, "info");
    }

    #[test]
    fn toml_overrides_defaults() {
        let settings = Settings::from_toml(
            r#"
            [server]
            port = 9000

            [auth]
            bot_token = "secret"
            max_age_secs = 0

            [cors]
            allowed_origins = ["https://split.example.org"]
            "#,
        )
        .unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.auth.bot_token, "secret");
        assert_eq!(settings.auth.max_age_secs, 0);
        assert_eq!(settings.cors.allowed_origins, vec!["https://split.example.org"]);
    }

    #[test]
    fn invalid_port_is_an_error() {
        assert!(Settings::from_toml("[server]\nport = \"eighty\"").is_err());
    }
}
