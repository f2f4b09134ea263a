//! Configuration.
//!
//! Two files are involved:
//!
//! - [`ApiConfig`], user-wide, read from TOML at
//!   `$HOME/.tnt/hook/config.toml`. It only overrides where the TNT API
//!   lives; every field is optional and falls back to built-in defaults.
//! - [`ProjectConfig`], per repository, persisted as JSON at
//!   `.git/hooks/TNTGitHookConfig.json` by `tnt-git-hook setup`. It names the
//!   organization, project and role that pushes are imputed to.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::activity::DecodeError;

/// Production API base URL.
pub const DEFAULT_BASE_URL: &str = "https://tnt.autentia.com/tntconcept-api-rest-kotlin/api/";

/// Base URL used with `--debug`, for a TNT instance running locally.
pub const DEBUG_BASE_URL: &str = "http://localhost:8080/api/";

/// OAuth client credentials (`client:secret`, base64) for each environment.
const DEFAULT_CLIENT_AUTH: &str = "dG50LWNsaWVudDpDbGllbnQtVE5ULXYx";
const DEBUG_CLIENT_AUTH: &str = "dG50LWNsaWVudDpob2xh";

/// Environment variable name for overriding the API base URL.
const API_URL_ENV_VAR: &str = "TNT_API_URL";

/// Config root directory under `$HOME/`.
const CONFIG_ROOT_DIR_NAME: &str = ".tnt";

/// Config subdirectory under `$HOME/.tnt/`.
const CONFIG_SUBDIR_NAME: &str = "hook";

/// Config file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Request timeout when nothing else is configured.
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Where `setup` writes the project config, relative to the repository root.
pub const DEFAULT_PROJECT_CONFIG_PATH: &str = ".git/hooks/TNTGitHookConfig.json";

// ---------------------------------------------------------------------------
// ApiConfig
// ---------------------------------------------------------------------------

/// User-wide overrides for the TNT API endpoints.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiConfig {
    /// API base URL, e.g. `https://tnt.example.com/api/`.
    pub base_url: Option<String>,
    /// OAuth token endpoint. Derived from the base URL when absent.
    pub auth_url: Option<String>,
    /// Base64 `client:secret` sent as Basic auth to the token endpoint.
    pub client_auth: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,
}

/// Endpoints and settings after layering CLI flags, environment, file and
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedApi {
    pub base_url: String,
    pub auth_url: String,
    pub client_auth: String,
    pub timeout: Duration,
    /// Whether the base URL uses a non-HTTPS scheme (user should be warned).
    pub is_non_https: bool,
}

impl ApiConfig {
    /// Resolve the config file path: `$HOME/.tnt/hook/config.toml`.
    ///
    /// Returns `None` if `$HOME` cannot be determined.
    pub fn config_path() -> Option<PathBuf> {
        Self::config_path_with_home(home_dir()?.as_path())
    }

    fn config_path_with_home(home: &Path) -> Option<PathBuf> {
        Some(
            home.join(CONFIG_ROOT_DIR_NAME)
                .join(CONFIG_SUBDIR_NAME)
                .join(CONFIG_FILE_NAME),
        )
    }

    /// Load config from disk. Returns defaults if the config file does not exist.
    ///
    /// Parse errors and I/O errors (other than file-not-found) are hard
    /// failures.
    pub fn load() -> Result<Self> {
        let path = match Self::config_path() {
            Some(p) => p,
            None => return Ok(Self::default()),
        };
        Self::load_from(&path)
    }

    /// Load config from a specific path. Returns defaults if the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents)
                .with_context(|| format!("failed to parse config file at {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => {
                Err(e).with_context(|| format!("failed to read config file at {}", path.display()))
            }
        }
    }

    /// Resolve the effective API settings.
    ///
    /// Base URL priority (highest wins):
    /// 1. `cli_override`, the `--api-url` flag
    /// 2. `TNT_API_URL` environment variable
    /// 3. `base_url` from the config file
    /// 4. [`DEBUG_BASE_URL`] with `debug`, [`DEFAULT_BASE_URL`] otherwise
    ///
    /// Empty or whitespace-only values are treated as absent. The token
    /// endpoint is the file's `auth_url`, or `oauth/token` next to the base
    /// URL's `api/` segment.
    pub fn resolve(&self, cli_override: Option<&str>, debug: bool) -> ResolvedApi {
        self.resolve_with_env(cli_override, std::env::var(API_URL_ENV_VAR).ok(), debug)
    }

    /// Internal resolver that accepts the env var value as a parameter for testability.
    fn resolve_with_env(
        &self,
        cli_override: Option<&str>,
        env_value: Option<String>,
        debug: bool,
    ) -> ResolvedApi {
        let default_base = if debug { DEBUG_BASE_URL } else { DEFAULT_BASE_URL };
        let base_url = non_empty_trimmed(cli_override.map(|s| s.to_string()))
            .or_else(|| non_empty_trimmed(env_value))
            .or_else(|| non_empty_trimmed(self.base_url.clone()))
            .unwrap_or_else(|| default_base.to_string());

        let auth_url = non_empty_trimmed(self.auth_url.clone())
            .unwrap_or_else(|| auth_url_for(&base_url));

        let default_client_auth = if debug {
            DEBUG_CLIENT_AUTH
        } else {
            DEFAULT_CLIENT_AUTH
        };
        let client_auth = non_empty_trimmed(self.client_auth.clone())
            .unwrap_or_else(|| default_client_auth.to_string());

        let timeout = Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));
        let is_non_https = !base_url.starts_with("https://");

        ResolvedApi {
            base_url,
            auth_url,
            client_auth,
            timeout,
            is_non_https,
        }
    }
}

/// Token endpoint that belongs to an API base URL:
/// `https://host/app/api/` becomes `https://host/app/oauth/token`.
fn auth_url_for(base_url: &str) -> String {
    let trimmed = base_url.trim_end_matches('/');
    let root = trimmed.strip_suffix("/api").unwrap_or(trimmed);
    format!("{root}/oauth/token")
}

// ---------------------------------------------------------------------------
// ProjectConfig
// ---------------------------------------------------------------------------

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Per-repository imputation settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProjectConfig {
    pub organization: String,
    pub project: String,
    pub role: String,
    /// Report failures but let the push go on.
    #[serde(default)]
    pub ignore_errors: bool,
    /// Request timeout in seconds; overrides [`ApiConfig::timeout_secs`].
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl ProjectConfig {
    pub fn new(
        organization: impl Into<String>,
        project: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            organization: organization.into(),
            project: project.into(),
            role: role.into(),
            ignore_errors: false,
            timeout: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Decode a project config, naming the field that is missing or invalid.
    pub fn from_json(body: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(body).map_err(|e| DecodeError::new("project config", e))
    }

    /// Load the project config at `path`. A missing file means `setup` has not
    /// been run for this repository.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                anyhow::bail!(
                    "project config not found at {}. Run `tnt-git-hook setup` from the repository root first.",
                    path.display()
                )
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed to read project config at {}", path.display())
                });
            }
        };
        Self::from_json(&contents)
            .with_context(|| format!("invalid project config at {}", path.display()))
    }

    /// Write the project config as pretty JSON.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.is_dir()
        {
            anyhow::bail!(
                "{} does not exist. Is this a git repository? Run setup from the repository root.",
                parent.display()
            );
        }
        let contents =
            serde_json::to_string_pretty(self).context("failed to serialize project config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write project config at {}", path.display()))?;
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Return the trimmed value if non-empty after trimming, otherwise `None`.
fn non_empty_trimmed(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    })
}

/// Resolve the user's home directory from the `HOME` environment variable.
fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    /// Helper: save/restore an env var around a closure.
    struct EnvGuard {
        key: String,
        original: Option<String>,
    }

    impl EnvGuard {
        fn new(key: &str) -> Self {
            Self {
                key: key.to_string(),
                original: std::env::var(key).ok(),
            }
        }

        fn set(&self, value: &str) {
            unsafe { std::env::set_var(&self.key, value) };
        }

        fn remove(&self) {
            unsafe { std::env::remove_var(&self.key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.original {
                Some(v) => unsafe { std::env::set_var(&self.key, v) },
                None => unsafe { std::env::remove_var(&self.key) },
            }
        }
    }

    // -----------------------------------------------------------------------
    // ApiConfig paths and loading
    // -----------------------------------------------------------------------

    #[test]
    fn test_config_path_with_home() {
        let home = PathBuf::from("/home/tester");
        let path = ApiConfig::config_path_with_home(&home).unwrap();
        assert_eq!(path, PathBuf::from("/home/tester/.tnt/hook/config.toml"));
    }

    #[test]
    #[serial]
    fn test_config_path_uses_home_env() {
        let guard = EnvGuard::new("HOME");
        guard.set("/tmp/fake-home");

        let path = ApiConfig::config_path().unwrap();
        assert_eq!(path, PathBuf::from("/tmp/fake-home/.tnt/hook/config.toml"));
    }

    #[test]
    #[serial]
    fn test_config_path_returns_none_when_home_missing() {
        let guard = EnvGuard::new("HOME");
        guard.remove();

        assert!(ApiConfig::config_path().is_none());
        assert_eq!(ApiConfig::load().unwrap(), ApiConfig::default());
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = ApiConfig::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(cfg, ApiConfig::default());
    }

    #[test]
    fn test_load_partial_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "base_url = \"https://tnt.example.com/api/\"\n").unwrap();

        let cfg = ApiConfig::load_from(&path).unwrap();
        assert_eq!(cfg.base_url.as_deref(), Some("https://tnt.example.com/api/"));
        assert!(cfg.auth_url.is_none());
        assert!(cfg.timeout_secs.is_none());
    }

    #[test]
    fn test_load_malformed_toml_returns_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "base_url = [not toml").unwrap();

        let err = ApiConfig::load_from(&path).unwrap_err();
        assert!(
            format!("{err}").contains("failed to parse config file"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn test_load_hand_written_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "base_url = \"https://tnt.example.com/api/\"\nclient_auth = \"abc\"\ntimeout_secs = 12\n",
        )
        .unwrap();

        let cfg = ApiConfig::load_from(&path).unwrap();
        assert_eq!(
            cfg,
            ApiConfig {
                base_url: Some("https://tnt.example.com/api/".to_string()),
                auth_url: None,
                client_auth: Some("abc".to_string()),
                timeout_secs: Some(12),
            }
        );
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    #[test]
    fn test_resolve_default_when_nothing_set() {
        let resolved = ApiConfig::default().resolve_with_env(None, None, false);
        assert_eq!(resolved.base_url, DEFAULT_BASE_URL);
        assert_eq!(
            resolved.auth_url,
            "https://tnt.autentia.com/tntconcept-api-rest-kotlin/oauth/token"
        );
        assert_eq!(resolved.client_auth, DEFAULT_CLIENT_AUTH);
        assert_eq!(resolved.timeout, Duration::from_secs(5));
        assert!(!resolved.is_non_https);
    }

    #[test]
    fn test_resolve_debug_uses_localhost() {
        let resolved = ApiConfig::default().resolve_with_env(None, None, true);
        assert_eq!(resolved.base_url, "http://localhost:8080/api/");
        assert_eq!(resolved.auth_url, "http://localhost:8080/oauth/token");
        assert_eq!(resolved.client_auth, DEBUG_CLIENT_AUTH);
        assert!(resolved.is_non_https);
    }

    #[test]
    fn test_resolve_file_overrides_default() {
        let cfg = ApiConfig {
            base_url: Some("https://file.example.com/api/".to_string()),
            ..Default::default()
        };
        let resolved = cfg.resolve_with_env(None, None, false);
        assert_eq!(resolved.base_url, "https://file.example.com/api/");
        assert_eq!(resolved.auth_url, "https://file.example.com/oauth/token");
    }

    #[test]
    fn test_resolve_env_overrides_file() {
        let cfg = ApiConfig {
            base_url: Some("https://file.example.com/api/".to_string()),
            ..Default::default()
        };
        let resolved =
            cfg.resolve_with_env(None, Some("https://env.example.com/api".to_string()), false);
        assert_eq!(resolved.base_url, "https://env.example.com/api");
        assert_eq!(resolved.auth_url, "https://env.example.com/oauth/token");
    }

    #[test]
    fn test_resolve_cli_overrides_env() {
        let resolved = ApiConfig::default().resolve_with_env(
            Some("https://cli.example.com/api/"),
            Some("https://env.example.com/api/".to_string()),
            false,
        );
        assert_eq!(resolved.base_url, "https://cli.example.com/api/");
    }

    #[test]
    fn test_resolve_whitespace_values_fall_through() {
        let cfg = ApiConfig {
            base_url: Some("   ".to_string()),
            ..Default::default()
        };
        let resolved = cfg.resolve_with_env(Some("  "), Some(String::new()), false);
        assert_eq!(resolved.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_resolve_explicit_auth_url_and_timeout() {
        let cfg = ApiConfig {
            auth_url: Some("https://sso.example.com/token".to_string()),
            timeout_secs: Some(30),
            ..Default::default()
        };
        let resolved = cfg.resolve_with_env(None, None, false);
        assert_eq!(resolved.auth_url, "https://sso.example.com/token");
        assert_eq!(resolved.timeout, Duration::from_secs(30));
    }

    #[test]
    #[serial]
    fn test_resolve_reads_real_env_var() {
        let guard = EnvGuard::new(API_URL_ENV_VAR);
        guard.set("https://real-env.example.com/api/");

        let resolved = ApiConfig::default().resolve(None, false);
        assert_eq!(resolved.base_url, "https://real-env.example.com/api/");
    }

    #[test]
    fn test_auth_url_for_without_api_segment() {
        assert_eq!(auth_url_for("https://h.example.com"), "https://h.example.com/oauth/token");
    }

    // -----------------------------------------------------------------------
    // ProjectConfig
    // -----------------------------------------------------------------------

    #[test]
    fn test_project_config_defaults() {
        let cfg = ProjectConfig::from_json(
            r#"{"organization":"Autentia","project":"Internal","role":"Developer"}"#,
        )
        .unwrap();
        assert_eq!(cfg, ProjectConfig::new("Autentia", "Internal", "Developer"));
        assert!(!cfg.ignore_errors);
        assert_eq!(cfg.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_project_config_missing_field_is_decode_error() {
        let err = ProjectConfig::from_json(r#"{"organization":"Autentia","project":"Internal"}"#)
            .unwrap_err();
        assert_eq!(err.field.as_deref(), Some("role"));
    }

    #[test]
    fn test_project_config_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("TNTGitHookConfig.json");
        let mut cfg = ProjectConfig::new("Autentia", "Internal", "Developer");
        cfg.ignore_errors = true;
        cfg.timeout = 10;

        cfg.save_to(&path).unwrap();
        assert_eq!(ProjectConfig::load_from(&path).unwrap(), cfg);
    }

    #[test]
    fn test_project_config_missing_file_mentions_setup() {
        let dir = TempDir::new().unwrap();
        let err = ProjectConfig::load_from(&dir.path().join("missing.json")).unwrap_err();
        assert!(format!("{err}").contains("tnt-git-hook setup"), "got: {err}");
    }

    #[test]
    fn test_project_config_save_outside_repo_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".git").join("hooks").join("cfg.json");
        let err = ProjectConfig::new("o", "p", "r").save_to(&path).unwrap_err();
        assert!(format!("{err}").contains("Is this a git repository?"), "got: {err}");
    }
}
