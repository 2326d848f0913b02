//! Configuration management for the Flow assistant
//!
//! Values resolve as environment variable > TOML file > built-in default.

pub mod file;

use std::time::Duration;

use secrecy::SecretString;

use crate::{Error, Result};

/// Default token exchange endpoint
pub const DEFAULT_TOKEN_URL: &str = "https://mp.speechmatics.com/v1/api_keys?type=flow";

/// Default conversation transport endpoint
pub const DEFAULT_FLOW_URL: &str = "wss://flow.api.speechmatics.com/v1/flow";

/// Default conversation template
pub const DEFAULT_TEMPLATE_ID: &str = "default";

/// PCM sample rate for both directions (16kHz for speech)
pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

/// Bytes per captured frame (512 PCM16 samples)
pub const DEFAULT_FRAME_BYTES: usize = 1024;

/// Requested token lifetime in seconds
pub const DEFAULT_TOKEN_TTL: u32 = 500;

/// Timezone used when neither the configuration nor the host names one
pub const FALLBACK_TIMEZONE: &str = "UTC";

/// Flow assistant configuration
#[derive(Debug)]
pub struct Config {
    /// Long-lived API key exchanged for a session token
    pub api_key: Option<SecretString>,

    /// Token exchange endpoint
    pub token_url: String,

    /// Requested token lifetime in seconds
    pub token_ttl: u32,

    /// Conversation settings sent in `StartConversation`
    pub conversation: ConversationConfig,

    /// Audio settings
    pub audio: AudioConfig,

    /// Session retry and timing settings
    pub session: SessionConfig,

    /// Advertise the tool schema when starting a conversation
    pub tools_enabled: bool,
}

/// Conversation endpoint and template settings
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    /// Transport base URL, the token is appended as `jwt`
    pub url: String,

    /// Template (persona) identifier
    pub template_id: String,

    /// IANA timezone id passed as a template variable
    pub timezone: String,
}

/// Audio format settings
#[derive(Debug, Clone, Copy)]
pub struct AudioConfig {
    /// PCM16 mono sample rate
    pub sample_rate: u32,

    /// Capture frame size in bytes
    pub frame_bytes: usize,

    /// Insert the echo suppressor between capture and routing
    pub echo_suppression: bool,
}

/// Session timing settings
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Connection attempts before giving up
    pub max_retries: u32,

    /// Fixed delay between connection attempts
    pub retry_delay: Duration,

    /// Delay before the CLI starts the first session
    pub start_delay: Duration,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_FLOW_URL.to_string(),
            template_id: DEFAULT_TEMPLATE_ID.to_string(),
            timezone: FALLBACK_TIMEZONE.to_string(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            frame_bytes: DEFAULT_FRAME_BYTES,
            echo_suppression: false,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(2000),
            start_delay: Duration::from_millis(1000),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            token_url: DEFAULT_TOKEN_URL.to_string(),
            token_ttl: DEFAULT_TOKEN_TTL,
            conversation: ConversationConfig::default(),
            audio: AudioConfig::default(),
            session: SessionConfig::default(),
            tools_enabled: true,
        }
    }
}

impl Config {
    /// Load configuration from the environment and the standard config file
    ///
    /// # Errors
    ///
    /// Returns error if a resolved value is invalid
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a parsed config file and a variable lookup
    ///
    /// # Errors
    ///
    /// Returns error if a variable fails to parse or a value is out of range
    pub fn from_sources<F>(fc: file::FlowConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let api_key = env("FLOW_API_KEY")
            .or(fc.credentials.api_key)
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from);

        let token_url = env("FLOW_TOKEN_URL")
            .or(fc.credentials.token_url)
            .unwrap_or(defaults.token_url);
        let token_ttl = parse_var(&env, "FLOW_TOKEN_TTL")?
            .or(fc.credentials.token_ttl)
            .unwrap_or(defaults.token_ttl);

        let conversation = ConversationConfig {
            url: env("FLOW_URL")
                .or(fc.conversation.url)
                .unwrap_or(defaults.conversation.url),
            template_id: env("FLOW_TEMPLATE_ID")
                .or(fc.conversation.template_id)
                .unwrap_or(defaults.conversation.template_id),
            timezone: resolve_timezone(&env, fc.conversation.timezone, host_timezone),
        };

        let audio = AudioConfig {
            sample_rate: parse_var(&env, "FLOW_SAMPLE_RATE")?
                .or(fc.audio.sample_rate)
                .unwrap_or(defaults.audio.sample_rate),
            frame_bytes: parse_var(&env, "FLOW_FRAME_BYTES")?
                .or(fc.audio.frame_bytes)
                .unwrap_or(defaults.audio.frame_bytes),
            echo_suppression: parse_flag(&env, "FLOW_ECHO_SUPPRESSION")
                .or(fc.audio.echo_suppression)
                .unwrap_or(defaults.audio.echo_suppression),
        };

        let session = SessionConfig {
            max_retries: parse_var(&env, "FLOW_MAX_RETRIES")?
                .or(fc.session.max_retries)
                .unwrap_or(defaults.session.max_retries),
            retry_delay: parse_var(&env, "FLOW_RETRY_DELAY_MS")?
                .or(fc.session.retry_delay_ms)
                .map_or(defaults.session.retry_delay, Duration::from_millis),
            start_delay: parse_var(&env, "FLOW_START_DELAY_MS")?
                .or(fc.session.start_delay_ms)
                .map_or(defaults.session.start_delay, Duration::from_millis),
        };

        let tools_enabled = parse_flag(&env, "FLOW_TOOLS")
            .or(fc.tools.enabled)
            .unwrap_or(defaults.tools_enabled);

        let config = Self {
            api_key,
            token_url,
            token_ttl,
            conversation,
            audio,
            session,
            tools_enabled,
        };
        config.validate()?;

        Ok(config)
    }

    /// Check that resolved values are usable
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(Error::Config("sample rate must be greater than 0".to_string()));
        }
        if self.audio.frame_bytes == 0 || self.audio.frame_bytes % 2 != 0 {
            return Err(Error::Config(format!(
                "frame size must be a positive even number of bytes, got {}",
                self.audio.frame_bytes
            )));
        }
        if self.token_ttl == 0 {
            return Err(Error::Config("token ttl must be greater than 0".to_string()));
        }
        url::Url::parse(&self.conversation.url)
            .map_err(|e| Error::Config(format!("invalid conversation url: {e}")))?;
        url::Url::parse(&self.token_url)
            .map_err(|e| Error::Config(format!("invalid token url: {e}")))?;

        Ok(())
    }
}

/// First non-empty zone from `FLOW_TIMEZONE`, the file, `TZ`, then the host
fn resolve_timezone<F, H>(env: &F, from_file: Option<String>, host: H) -> String
where
    F: Fn(&str) -> Option<String>,
    H: FnOnce() -> Option<String>,
{
    [env("FLOW_TIMEZONE"), from_file, env("TZ")]
        .into_iter()
        .flatten()
        .find(|tz| !tz.trim().is_empty())
        .or_else(host)
        .filter(|tz| !tz.trim().is_empty())
        .unwrap_or_else(|| FALLBACK_TIMEZONE.to_string())
}

/// IANA id of the host's local zone
fn host_timezone() -> Option<String> {
    match iana_time_zone::get_timezone() {
        Ok(tz) => Some(tz),
        Err(e) => {
            tracing::debug!(error = %e, "could not determine host timezone");
            None
        }
    }
}

fn parse_var<F, T>(env: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    env(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| Error::Config(format!("{key}: {e}")))
        })
        .transpose()
}

fn parse_flag<F>(env: &F, key: &str) -> Option<bool>
where
    F: Fn(&str) -> Option<String>,
{
    env(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}
