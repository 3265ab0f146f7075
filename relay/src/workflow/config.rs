use anyhow::{bail, Context};
use dwellcore::prelude::DwellConfig;
use dwellcore::recorder::RestSinkConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Rest,
    Sqlite,
    Memory,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkSettings {
    pub kind: SinkKind,
    pub url: Option<String>,
    pub key: Option<String>,
    pub table: String,
    pub path: Option<PathBuf>,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            kind: SinkKind::Rest,
            url: None,
            key: None,
            table: "detections".to_string(),
            path: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub dwell: DwellConfig,
    pub bind: SocketAddr,
    pub channel_capacity: usize,
    pub sink: SinkSettings,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            dwell: DwellConfig::default(),
            bind: SocketAddr::from(([127, 0, 0, 1], 4912)),
            channel_capacity: 16,
            sink: SinkSettings::default(),
        }
    }
}

/// Values taken from the command line; each one wins over the file.
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub bind: Option<SocketAddr>,
    pub sink_url: Option<String>,
    pub sink_key: Option<String>,
    pub sqlite: Option<PathBuf>,
    pub dry_run: bool,
}

impl RelayConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading relay config {}", path_ref.display()))?;
        let config: RelayConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing relay config {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn apply(&mut self, overrides: CliOverrides) {
        if let Some(bind) = overrides.bind {
            self.bind = bind;
        }
        if let Some(url) = overrides.sink_url {
            self.sink.url = Some(url);
        }
        if let Some(key) = overrides.sink_key {
            self.sink.key = Some(key);
        }
        if let Some(path) = overrides.sqlite {
            self.sink.kind = SinkKind::Sqlite;
            self.sink.path = Some(path);
        }
        if overrides.dry_run {
            self.sink.kind = SinkKind::Memory;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.dwell.validate().context("invalid dwell settings")?;
        if self.channel_capacity == 0 {
            bail!("channel_capacity must be greater than zero");
        }
        match self.sink.kind {
            SinkKind::Rest => {
                self.rest_config()?;
            }
            SinkKind::Sqlite => {
                if self.sink.path.is_none() {
                    bail!("sqlite sink requires a database path (--sqlite)");
                }
            }
            SinkKind::Memory => {}
        }
        Ok(())
    }

    pub fn rest_config(&self) -> anyhow::Result<RestSinkConfig> {
        let url = non_blank(&self.sink.url)
            .context("missing sink credentials: set SINK_URL or --sink-url")?;
        let key = non_blank(&self.sink.key)
            .context("missing sink credentials: set SINK_KEY or --sink-key")?;
        Ok(RestSinkConfig {
            url,
            key,
            table: self.sink.table.clone(),
            timeout_ms: self.dwell.commit_timeout_ms,
        })
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
