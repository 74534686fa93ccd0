use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

/// Typed configuration for the bot, loaded from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    // Generative backend
    pub gemini_api_key: String,
    pub gemini_model: String,

    // Transport
    pub auth_dir: PathBuf,
    pub bridge_command: Vec<String>,

    // Prayer-schedule provider
    pub salat_api_base: String,
    pub gateway_retries: u32,
    pub gateway_timeout: Duration,

    // Connection supervision
    pub login_attempt_threshold: u32,
    pub max_reconnect_attempts: u32,
    pub reconnect_initial_delay: Duration,
    pub reconnect_max_delay: Duration,

    // Session store bounds
    pub max_history_turns: usize,
    pub max_tracked_chats: usize,

    // Status endpoint
    pub status_port: u16,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let gemini_api_key = env_str("GEMINI_API_KEY").and_then(non_empty).ok_or_else(|| {
            Error::Config("GEMINI_API_KEY environment variable is required".to_string())
        })?;
        let gemini_model =
            env_str("GEMINI_MODEL").unwrap_or_else(|| "gemini-2.0-flash".to_string());

        let auth_dir = env_path("AUTH_DIR").unwrap_or_else(|| PathBuf::from("./auth"));
        let bridge_command = parse_command(
            env_str("WA_BRIDGE_COMMAND").unwrap_or_else(|| "node bridge/index.js".to_string()),
        )?;

        let salat_api_base = env_str("SALAT_API_BASE")
            .and_then(non_empty)
            .unwrap_or_else(|| "https://api.myquran.com/v2/sholat".to_string());
        let gateway_retries = env_u32("GATEWAY_RETRIES").unwrap_or(3).max(1);
        let gateway_timeout =
            Duration::from_millis(env_u64("GATEWAY_TIMEOUT_MS").unwrap_or(5_000));

        let login_attempt_threshold = env_u32("LOGIN_ATTEMPT_THRESHOLD").unwrap_or(3).max(1);
        // 0 means no ceiling.
        let max_reconnect_attempts = env_u32("MAX_RECONNECT_ATTEMPTS").unwrap_or(50);
        let reconnect_initial_delay =
            Duration::from_millis(env_u64("RECONNECT_INITIAL_DELAY_MS").unwrap_or(1_000));
        let reconnect_max_delay =
            Duration::from_millis(env_u64("RECONNECT_MAX_DELAY_MS").unwrap_or(60_000));

        let max_history_turns = env_usize("MAX_HISTORY_TURNS").unwrap_or(40).max(4);
        let max_tracked_chats = env_usize("MAX_TRACKED_CHATS").unwrap_or(256).max(1);

        let status_port = env_u16("STATUS_PORT").unwrap_or(3000);

        Ok(Self {
            gemini_api_key,
            gemini_model,
            auth_dir,
            bridge_command,
            salat_api_base,
            gateway_retries,
            gateway_timeout,
            login_attempt_threshold,
            max_reconnect_attempts,
            reconnect_initial_delay,
            reconnect_max_delay,
            max_history_turns,
            max_tracked_chats,
            status_port,
        })
    }
}

fn parse_command(raw: String) -> Result<Vec<String>> {
    let parts: Vec<String> = raw.split_whitespace().map(|s| s.to_string()).collect();
    if parts.is_empty() {
        return Err(Error::Config(
            "WA_BRIDGE_COMMAND must not be empty".to_string(),
        ));
    }
    Ok(parts)
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_u16(key: &str) -> Option<u16> {
    env_str(key).and_then(|s| s.trim().parse::<u16>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
