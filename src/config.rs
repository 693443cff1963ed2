use anyhow::Context;
use ::config::Config as CConfig;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::EnvFilter;

pub const CONFIG_FILE: &str = "config.toml";

// Settings shared by the probe and the doubler peer. The file is optional;
// anything it leaves out falls back to `Default`.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub bind_host: String,
    pub port: u16,
    pub max_clients: usize,
}

impl Config {
    pub fn new(path: &str) -> anyhow::Result<Self> {
        let config: Self = CConfig::builder()
            .add_source(::config::File::with_name(path).required(false))
            .build()
            .with_context(|| format!("Error reading {}", path))?
            .try_deserialize()
            .with_context(|| format!("Error parsing {}", path))?;
        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }

    pub fn log_filter(&self) -> Result<EnvFilter, ParseError> {
        EnvFilter::try_new(&self.log_level)
    }

    // Diagnostics go to stderr so stdout only carries the probe results. If the
    // configured level can't be parsed we still want logs, so we fall back to
    // "info" and report the bad value once the subscriber is up.
    pub fn init_tracing(&self) {
        let (filter, invalid) = match self.log_filter() {
            Ok(filter) => (filter, None),
            Err(err) => (EnvFilter::new("info"), Some(err)),
        };
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        if let Some(err) = invalid {
            tracing::warn!(
                "Invalid log_level {:?}, using \"info\" instead: {}",
                self.log_level,
                err
            );
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            bind_host: "127.0.0.1".to_string(),
            port: 12345,
            max_clients: num_cpus::get(),
        }
    }
}
