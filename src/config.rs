use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Unix socket of the Docker daemon; local defaults when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_socket: Option<PathBuf>,
    pub config_dir: PathBuf,
    pub credentials_dir: PathBuf,
    pub ssl_dir: PathBuf,
    pub template_path: PathBuf,
    pub poll_interval_secs: u64,
    pub reload_command: Vec<String>,
    pub reload_failure_marker: String,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            docker_socket: None,
            config_dir: "/etc/nginx/conf.d".into(),
            credentials_dir: "/etc/nginx/htpasswd.d".into(),
            ssl_dir: "/etc/nginx/ssl.d".into(),
            template_path: "autoproxy.tmpl".into(),
            poll_interval_secs: 5,
            reload_command: vec!["nginx".into(), "-s".into(), "reload".into()],
            reload_failure_marker: "fail".into(),
            log_level: "info".into(),
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Config::default()))
                .merge(Toml::file("autoproxy.toml"))
                .merge(Json::file("autoproxy.json"))
                .merge(Env::prefixed("AUTOPROXY_")),
        )
    }

    fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let config: Config = figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be greater than zero");
        }
        if self.reload_command.is_empty() {
            anyhow::bail!("reload_command must name a program");
        }
        if self.reload_failure_marker.is_empty() {
            anyhow::bail!("reload_failure_marker must not be empty");
        }
        self.level_filter()?;
        Ok(())
    }

    pub fn level_filter(&self) -> anyhow::Result<LevelFilter> {
        self.log_level
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid log level: {:?}", self.log_level))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}
