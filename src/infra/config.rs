use crate::domain::DEFAULT_FILE_MODE;
use crate::options::{
    Customizer, with_arguments, with_command, with_config_file, with_config_file_mapping,
    with_copy_file, with_env, with_image, with_name, with_probe_budget, with_scripts,
    with_scripts_mapping, with_tarantool2, with_tarantool15,
};
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_CONFIG_NAME: &str = "tntbox.toml";
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    #[serde(rename = "1.5")]
    Tarantool15,
    #[serde(rename = "2")]
    Tarantool2,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PathMapping {
    pub host: PathBuf,
    pub container: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FileCopy {
    pub host: PathBuf,
    pub container: String,
    pub mode: Option<u32>,
}

#[derive(Deserialize, Debug, Default)]
pub struct ContainerConfig {
    pub image: Option<String>,
    pub flavor: Option<Flavor>,
    /// e.g. "500ms", "5s", "1m"
    pub startup_timeout: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub reuse: bool,
    pub config_file: Option<PathBuf>,
    pub config_mapping: Option<PathMapping>,
    #[serde(default)]
    pub files: Vec<FileCopy>,
    pub scripts: Option<PathMapping>,
    pub scripts_mapping: Option<PathMapping>,
    #[serde(default)]
    pub env_prefixes: Vec<String>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    pub probe_timeout: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub container: ContainerConfig,
}

impl AppConfig {
    /// Translates the file into customizers, in the order options are
    /// documented to compose: image first, then files, then command.
    pub fn customizers(&self) -> Result<Vec<Customizer>> {
        let c = &self.container;
        let mut opts = Vec::new();

        let timeout = c
            .startup_timeout
            .as_deref()
            .map(parse_duration)
            .transpose()
            .context("invalid container.startup_timeout")?
            .unwrap_or(DEFAULT_STARTUP_TIMEOUT);

        match (c.flavor, &c.image) {
            (Some(Flavor::Tarantool15), image) => opts.push(with_tarantool15(
                image.clone().unwrap_or_else(|| "tarantool/tarantool:1.5".into()),
                timeout,
            )),
            (Some(Flavor::Tarantool2), image) => opts.push(with_tarantool2(
                image.clone().unwrap_or_else(|| "tarantool/tarantool:2.11".into()),
                timeout,
            )),
            (None, Some(image)) => opts.push(with_image(image.clone())),
            (None, None) => {}
        }

        if let Some(name) = &c.name {
            opts.push(with_name(name.clone(), c.reuse));
        }

        if let Some(cfg) = &c.config_file {
            opts.push(with_config_file(expand_path(cfg)));
        }
        if let Some(mapping) = &c.config_mapping {
            opts.push(with_config_file_mapping(
                expand_path(&mapping.host),
                mapping.container.clone(),
            ));
        }
        for file in &c.files {
            opts.push(with_copy_file(
                expand_path(&file.host),
                file.container.clone(),
                file.mode.unwrap_or(DEFAULT_FILE_MODE),
            ));
        }
        if let Some(scripts) = &c.scripts {
            opts.push(with_scripts(
                expand_path(&scripts.host),
                scripts.container.clone(),
            ));
        }
        if let Some(mapping) = &c.scripts_mapping {
            opts.push(with_scripts_mapping(
                expand_path(&mapping.host),
                mapping.container.clone(),
            ));
        }

        for prefix in &c.env_prefixes {
            opts.push(with_env(prefix));
        }

        if !c.command.is_empty() {
            opts.push(with_command(c.command.clone()));
        }
        if !c.args.is_empty() {
            opts.push(with_arguments(c.args.clone()));
        }

        if let Some(raw) = &c.probe_timeout {
            let budget = parse_duration(raw).context("invalid container.probe_timeout")?;
            opts.push(with_probe_budget(budget));
        }

        Ok(opts)
    }
}

pub fn load_app_config(path: &Path) -> Result<AppConfig> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading config {:?}", path))?;
    let config: AppConfig =
        toml::from_str(&content).with_context(|| format!("parsing config {:?}", path))?;
    debug!("loaded config from {:?}", path);
    Ok(config)
}

pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let parse = |digits: &str| -> Result<u64> {
        digits
            .parse()
            .map_err(|_| anyhow!("invalid duration format: {s}"))
    };

    if let Some(stripped) = s.strip_suffix("ms") {
        Ok(Duration::from_millis(parse(stripped)?))
    } else if let Some(stripped) = s.strip_suffix('s') {
        Ok(Duration::from_secs(parse(stripped)?))
    } else if let Some(stripped) = s.strip_suffix('m') {
        let secs = parse(stripped)?
            .checked_mul(60)
            .ok_or_else(|| anyhow!("duration out of range: {s}"))?;
        Ok(Duration::from_secs(secs))
    } else {
        Err(anyhow!("invalid duration format: {s}"))
    }
}

fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(&raw).into_owned())
}
