mod server;

pub use server::ServerConfig;

use serde::Deserialize;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

const DEFAULT_MODEL: &str = "llama3";
const DEFAULT_CONFIG_PATH: &str = "config/bob.toml";

pub const ENV_FILESYSTEM_DIR: &str = "FILESYSTEM_DIR";
pub const ENV_DIR_NAME: &str = "DIR_NAME";
pub const ENV_MODEL: &str = "LLM_MODEL";
pub const ENV_GITHUB_PAT: &str = "GITHUB_PAT";

/// System-prompt template. `{working_dir}` and `{dir_name}` are substituted
/// when the client composes the final prompt.
pub const DEFAULT_PROMPT_TEMPLATE: &str = r#"
You are Bob, a project assistant. You help the user create, update, and manage files both locally and on GitHub.

<filesystem>
You have access to tools that interact with the user's local filesystem.
You can only reach files inside the working directory `{dir_name}`.
The absolute path to this directory is: {working_dir}
Accessing a file outside this directory returns an error.
Always use absolute paths when specifying files.
</filesystem>

<version_control>
You have access to git and GitHub tools.
Use git tools to manage the project's version history and GitHub tools to manage its remote repository.
Keep a clean, logical commit history where each commit represents an atomic change.
</version_control>
"#;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub model: String,
    pub system_prompt: Option<String>,
    pub prompt_template: Option<String>,
    pub servers: Vec<ServerConfig>,
    pub workspace: WorkspaceConfig,
}

/// The directory the filesystem server exposes, plus the short name the
/// system prompt refers to it by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceConfig {
    pub working_dir: String,
    pub dir_name: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config from {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config from {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("required environment variable {name} is not set")]
    MissingEnv { name: &'static str },
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    model: Option<String>,
    system_prompt: Option<String>,
    prompt_template: Option<String>,
    #[serde(default)]
    servers: Vec<server::RawServer>,
}

/// Environment values consumed at startup, captured once so the merge logic
/// stays a pure function.
#[derive(Debug, Clone, Default)]
pub struct EnvValues {
    pub filesystem_dir: Option<String>,
    pub dir_name: Option<String>,
    pub model: Option<String>,
    pub github_pat: Option<String>,
}

impl EnvValues {
    pub fn capture() -> Self {
        let read = |name: &str| env::var(name).ok().filter(|value| !value.trim().is_empty());
        Self {
            filesystem_dir: read(ENV_FILESYSTEM_DIR),
            dir_name: read(ENV_DIR_NAME),
            model: read(ENV_MODEL),
            github_pat: read(ENV_GITHUB_PAT),
        }
    }
}

impl AppConfig {
    /// Load the optional TOML file and merge the environment over it. A
    /// missing file at the default path falls back to the built-in server
    /// map; an explicit `--config` path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env = EnvValues::capture();
        let raw = match path {
            Some(path) => read_raw(path)?,
            None => match read_raw(Path::new(DEFAULT_CONFIG_PATH)) {
                Ok(raw) => raw,
                Err(ConfigError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                    info!("Configuration file not found; using built-in defaults");
                    RawConfig::default()
                }
                Err(other) => return Err(other),
            },
        };
        Self::merge(raw, env)
    }

    fn merge(raw: RawConfig, env: EnvValues) -> Result<Self, ConfigError> {
        let working_dir = env.filesystem_dir.ok_or(ConfigError::MissingEnv {
            name: ENV_FILESYSTEM_DIR,
        })?;
        let dir_name = env
            .dir_name
            .unwrap_or_else(|| default_dir_name(&working_dir));
        let workspace = WorkspaceConfig {
            working_dir,
            dir_name,
        };

        let model = env
            .model
            .or(raw.model)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let servers = if raw.servers.is_empty() {
            builtin_servers(&workspace.working_dir, env.github_pat.as_deref())
        } else {
            raw.servers.into_iter().map(ServerConfig::from).collect()
        };

        Ok(Self {
            model,
            system_prompt: raw.system_prompt,
            prompt_template: Some(
                raw.prompt_template
                    .unwrap_or_else(|| DEFAULT_PROMPT_TEMPLATE.to_string()),
            ),
            servers,
            workspace,
        })
    }
}

fn read_raw(path: &Path) -> Result<RawConfig, ConfigError> {
    debug!(path = %path.display(), "Reading configuration file");
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn default_dir_name(working_dir: &str) -> String {
    Path::new(working_dir)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| working_dir.to_string())
}

/// The default tool-server map: filesystem scoped to the workspace, git, and
/// GitHub. The GitHub server is omitted when no token is available since it
/// refuses to start without one.
fn builtin_servers(working_dir: &str, github_pat: Option<&str>) -> Vec<ServerConfig> {
    let mut servers = vec![
        ServerConfig::new("filesystem", "npx").with_args([
            "-y",
            "@modelcontextprotocol/server-filesystem",
            working_dir,
        ]),
        ServerConfig::new("git", "uvx").with_args(["mcp-server-git"]),
    ];

    match github_pat {
        Some(pat) => servers.push(
            ServerConfig::new("github", "./github-mcp-server")
                .with_args(["stdio"])
                .with_env("GITHUB_PERSONAL_ACCESS_TOKEN", pat),
        ),
        None => warn!(
            "{} not set; the GitHub tool server will not be available",
            ENV_GITHUB_PAT
        ),
    }

    servers
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn env_with_workspace() -> EnvValues {
        EnvValues {
            filesystem_dir: Some("/home/dev/projects/notes".to_string()),
            dir_name: None,
            model: None,
            github_pat: Some("ghp_test".to_string()),
        }
    }

    #[test]
    fn builtin_map_contains_expected_servers_in_order() {
        let config = AppConfig::merge(RawConfig::default(), env_with_workspace()).expect("merge");
        let names: Vec<_> = config.servers.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["filesystem", "git", "github"]);

        let filesystem = &config.servers[0];
        assert!(
            filesystem
                .args
                .contains(&"/home/dev/projects/notes".to_string())
        );

        let github = &config.servers[2];
        assert_eq!(
            github.env.get("GITHUB_PERSONAL_ACCESS_TOKEN"),
            Some(&"ghp_test".to_string())
        );
    }

    #[test]
    fn github_server_skipped_without_token() {
        let mut env = env_with_workspace();
        env.github_pat = None;
        let config = AppConfig::merge(RawConfig::default(), env).expect("merge");
        assert!(!config.servers.iter().any(|s| s.name == "github"));
    }

    #[test]
    fn missing_filesystem_dir_is_an_error() {
        let error = AppConfig::merge(RawConfig::default(), EnvValues::default()).unwrap_err();
        assert!(matches!(
            error,
            ConfigError::MissingEnv {
                name: ENV_FILESYSTEM_DIR
            }
        ));
    }

    #[test]
    fn dir_name_defaults_to_last_path_component() {
        let config = AppConfig::merge(RawConfig::default(), env_with_workspace()).expect("merge");
        assert_eq!(config.workspace.dir_name, "notes");

        let mut env = env_with_workspace();
        env.dir_name = Some("scratch".to_string());
        let config = AppConfig::merge(RawConfig::default(), env).expect("merge");
        assert_eq!(config.workspace.dir_name, "scratch");
    }

    #[test]
    fn env_model_overrides_file_model() {
        let raw: RawConfig = toml::from_str(r#"model = "mistral""#).expect("parse");
        let mut env = env_with_workspace();
        env.model = Some("gemini:gemini-2.0-flash".to_string());
        let config = AppConfig::merge(raw, env).expect("merge");
        assert_eq!(config.model, "gemini:gemini-2.0-flash");
    }

    #[test]
    fn file_servers_replace_builtin_map() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bob.toml");
        fs::write(
            &path,
            r#"
model = "mistral"
system_prompt = "keep short"

[[servers]]
name = "everything"
command = "npx"
args = ["-y", "@modelcontextprotocol/server-everything"]
"#,
        )
        .expect("write config");

        let raw = read_raw(&path).expect("read");
        let config = AppConfig::merge(raw, env_with_workspace()).expect("merge");
        assert_eq!(config.model, "mistral");
        assert_eq!(config.system_prompt.as_deref(), Some("keep short"));
        assert_eq!(config.servers.len(), 1);
        assert_eq!(config.servers[0].name, "everything");
        assert_eq!(
            config.prompt_template.as_deref(),
            Some(DEFAULT_PROMPT_TEMPLATE)
        );
    }

    #[test]
    fn parse_error_reports_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bob.toml");
        fs::write(&path, "model = [not toml").expect("write");
        let error = read_raw(&path).unwrap_err();
        assert!(matches!(error, ConfigError::Parse { .. }));
    }
}
