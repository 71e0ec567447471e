use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "funtime", version = "0.1", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file (defaults apply when omitted)
    #[arg(long = "config", short = 'c')]
    pub config_path: Option<String>,

    /// Override the bind address from the configuration file
    #[arg(long = "bind-address")]
    pub bind_address: Option<String>,

    /// Override the bind port from the configuration file
    #[arg(long = "bind-port")]
    pub bind_port: Option<u16>,
}

impl CliArgs {
    /// Load the configuration from the specified file, falling back to
    /// defaults, then apply command-line overrides.
    pub fn to_config(&self) -> std::io::Result<Config> {
        let mut config = match &self.config_path {
            Some(path) => {
                let file = std::fs::File::open(path)?;
                let reader = std::io::BufReader::new(file);
                serde_json::from_reader(reader).map_err(std::io::Error::from)?
            }
            None => Config::default(),
        };

        if self.bind_address.is_some() {
            config.server.bind_address = self.bind_address.clone();
        }
        if self.bind_port.is_some() {
            config.server.bind_port = self.bind_port;
        }

        Ok(config)
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub toolchain: ToolchainConfig,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory for uploaded artifacts; the user data dir when unset
    pub root: Option<PathBuf>,
}

/// External tool commands for the compiled-language pipeline.
///
/// Each command is an argument vector with placeholders substituted before
/// spawning: `%INPUT%` (source file name), `%UNIT%` (compiled unit id),
/// plus `%TEST%`, `%EXPECTED%`, `%METHOD%`, `%ARGS%` and `%SUITE%` for the
/// runner. Untrusted content only ever appears as a whole argv element,
/// never inside a shell string.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ToolchainConfig {
    pub compile: Vec<String>,
    pub analyze: Vec<String>,
    pub run: Vec<String>,
    pub compile_timeout_ms: u64,
    pub run_timeout_ms: u64,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            compile: vec!["javac".into(), "%INPUT%".into()],
            analyze: vec!["java".into(), "ClassInfoAnalyzer".into(), "%UNIT%".into()],
            run: vec![
                "java".into(),
                "SuiteGeneratorAPI".into(),
                "%UNIT%".into(),
                "%TEST%".into(),
                "%EXPECTED%".into(),
                "%METHOD%".into(),
                "%ARGS%".into(),
                "%SUITE%".into(),
            ],
            compile_timeout_ms: 30_000,
            run_timeout_ms: 10_000,
        }
    }
}
