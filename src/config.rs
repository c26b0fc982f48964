use clap::Parser;
use serde::Deserialize;

use crate::language::Language;

#[derive(Parser)]
#[command(name = "codequest", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: String,

    /// Whether to flush the existing database
    #[arg(long = "flush-data", short = 'f', default_value_t = false)]
    pub flush_data: bool,
}

impl CliArgs {
    /// Load the configuration from the specified file
    pub fn to_config(&self) -> std::io::Result<Config> {
        let file = std::fs::File::open(&self.config_path)?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| e.into())
    }
}

#[derive(Deserialize, Debug)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    /// Challenge seed list, upserted into the store at startup.
    /// Content management proper lives outside this service.
    #[serde(default)]
    pub challenges: Vec<ChallengeSeed>,
}

#[derive(Deserialize, Debug)]
pub struct ServerConfig {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct SandboxConfig {
    /// Container image overrides for the container strategy
    #[serde(default)]
    pub images: ImageOverrides,
    /// Root directory for per-execution working directories
    /// (defaults to the system temp directory)
    pub workspace_root: Option<std::path::PathBuf>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct ImageOverrides {
    pub python: Option<String>,
    pub java: Option<String>,
    pub cpp: Option<String>,
}

impl ImageOverrides {
    pub fn resolve(&self, language: Language) -> String {
        let override_ = match language {
            Language::Python => self.python.as_deref(),
            Language::Java => self.java.as_deref(),
            Language::Cpp => self.cpp.as_deref(),
            Language::JavaScript | Language::TypeScript => None,
        };
        override_.unwrap_or(language.default_image()).to_string()
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct ChallengeSeed {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub xp_reward: i64,
    #[serde(default)]
    pub coin_reward: i64,
    pub time_limit_ms: Option<i64>,
    pub memory_limit_mb: Option<i64>,
    pub cases: Vec<CaseSeed>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CaseSeed {
    pub input: String,
    pub expected_output: String,
    #[serde(default)]
    pub hidden: bool,
    pub time_limit_ms: Option<i64>,
    pub memory_limit_mb: Option<i64>,
}

fn default_difficulty() -> String {
    "easy".to_string()
}

fn default_category() -> String {
    "general".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialization() {
        let raw = r#"{
            "server": { "bind_address": "127.0.0.1", "bind_port": 12345 },
            "sandbox": { "images": { "python": "python:3.12-alpine" } },
            "challenges": [
                {
                    "id": 1,
                    "title": "Echo",
                    "xp_reward": 50,
                    "coin_reward": 10,
                    "cases": [
                        { "input": "hi", "expected_output": "hi" },
                        { "input": "yo", "expected_output": "yo", "hidden": true }
                    ]
                }
            ]
        }"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(config.server.bind_address, Some("127.0.0.1".to_string()));
        assert_eq!(
            config.sandbox.images.resolve(Language::Python),
            "python:3.12-alpine"
        );
        assert_eq!(config.sandbox.images.resolve(Language::Cpp), "gcc:13");
        assert_eq!(config.challenges[0].cases.len(), 2);
        assert!(config.challenges[0].cases[1].hidden);
        assert_eq!(config.challenges[0].difficulty, "easy");
    }
}
