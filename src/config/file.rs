//! TOML configuration file loading
//!
//! Supports `~/.config/flow-assistant/config.toml` as a persistent config source.
//! All fields are optional, the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct FlowConfigFile {
    /// API key and token exchange settings
    #[serde(default)]
    pub credentials: CredentialsFileConfig,

    /// Conversation endpoint and template
    #[serde(default)]
    pub conversation: ConversationFileConfig,

    /// Audio format and filtering
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Connection retry and startup timing
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Tool advertisement
    #[serde(default)]
    pub tools: ToolsFileConfig,
}

/// Credential exchange configuration
#[derive(Debug, Default, Deserialize)]
pub struct CredentialsFileConfig {
    /// Long-lived API key
    pub api_key: Option<String>,

    /// Token exchange endpoint
    pub token_url: Option<String>,

    /// Requested token lifetime in seconds
    pub token_ttl: Option<u32>,
}

/// Conversation configuration
#[derive(Debug, Default, Deserialize)]
pub struct ConversationFileConfig {
    /// Transport base URL (e.g. "wss://flow.api.speechmatics.com/v1/flow")
    pub url: Option<String>,

    /// Conversation template identifier
    pub template_id: Option<String>,

    /// IANA timezone passed to the template
    pub timezone: Option<String>,
}

/// Audio configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    pub sample_rate: Option<u32>,
    pub frame_bytes: Option<usize>,
    pub echo_suppression: Option<bool>,
}

/// Session timing configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub start_delay_ms: Option<u64>,
}

/// Tool configuration
#[derive(Debug, Default, Deserialize)]
pub struct ToolsFileConfig {
    /// Advertise the tool schema when starting a conversation
    pub enabled: Option<bool>,
}

/// Load the TOML config file from the standard path
///
/// Returns `FlowConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> FlowConfigFile {
    config_file_path().map_or_else(FlowConfigFile::default, |path| load_config_from(&path))
}

/// Load a TOML config file from an explicit path
///
/// Returns `FlowConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_from(path: &Path) -> FlowConfigFile {
    if !path.exists() {
        return FlowConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                FlowConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            FlowConfigFile::default()
        }
    }
}

/// Persist the API key into the config file at `path`
///
/// Other settings already present in the file are preserved.
///
/// # Errors
///
/// Returns error if the key is empty, the existing file is not valid TOML,
/// or the file cannot be written
pub fn store_api_key(path: &Path, api_key: &str) -> Result<()> {
    let api_key = api_key.trim();
    if api_key.is_empty() {
        return Err(Error::Config("API key must not be empty".to_string()));
    }

    let mut table: toml::Table = if path.exists() {
        toml::from_str(&std::fs::read_to_string(path)?)?
    } else {
        toml::Table::new()
    };

    let credentials = table
        .entry("credentials")
        .or_insert(toml::Value::Table(toml::Table::new()));
    let toml::Value::Table(credentials) = credentials else {
        return Err(Error::Config(
            "`credentials` in config file is not a table".to_string(),
        ));
    };
    credentials.insert(
        "api_key".to_string(),
        toml::Value::String(api_key.to_string()),
    );

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, toml::to_string_pretty(&table)?)?;
    restrict_permissions(path)?;

    tracing::info!(path = %path.display(), "stored API key");
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// Return the config file path: `~/.config/flow-assistant/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("flow-assistant").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let fc = load_config_from(&dir.path().join("absent.toml"));
        assert!(fc.credentials.api_key.is_none());
        assert!(fc.audio.sample_rate.is_none());
    }

    #[test]
    fn invalid_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is = = not toml").unwrap();

        let fc = load_config_from(&path);
        assert!(fc.conversation.url.is_none());
    }

    #[test]
    fn partial_file_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[conversation]\ntemplate_id = \"concierge\"\n\n[session]\nmax_retries = 5\n",
        )
        .unwrap();

        let fc = load_config_from(&path);
        assert_eq!(fc.conversation.template_id.as_deref(), Some("concierge"));
        assert_eq!(fc.session.max_retries, Some(5));
        assert!(fc.audio.frame_bytes.is_none());
    }

    #[test]
    fn store_api_key_preserves_other_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[audio]\nsample_rate = 24000\n").unwrap();

        store_api_key(&path, "  sk-test  ").unwrap();

        let fc = load_config_from(&path);
        assert_eq!(fc.credentials.api_key.as_deref(), Some("sk-test"));
        assert_eq!(fc.audio.sample_rate, Some(24000));
    }

    #[test]
    fn store_api_key_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new").join("config.toml");

        store_api_key(&path, "sk-new").unwrap();

        let fc = load_config_from(&path);
        assert_eq!(fc.credentials.api_key.as_deref(), Some("sk-new"));
    }

    #[cfg(unix)]
    #[test]
    fn stored_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        store_api_key(&path, "sk-perm").unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn store_api_key_rejects_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        assert!(matches!(store_api_key(&path, "   "), Err(Error::Config(_))));
        assert!(!path.exists());
    }
}
