//! Environment-sourced configuration (§6.1). No config file, no CLI flags —
//! every value comes from the process environment, with defaults for everything
//! but the API key.

use crate::error::BridgeError;

/// Expand a leading `~` to the user's home directory.
pub fn shellexpand(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{rest}", home.to_string_lossy());
        }
    }
    path.to_string()
}

/// Bridge configuration, loaded once at startup from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Shared secret for mutating endpoints. Empty ⇒ auth bypassed (dev mode).
    pub api_key: String,
    /// Root directory for both databases and media (§6.4).
    pub store_dir: String,
    /// HTTP listener port.
    pub port: u16,
    /// If set at first launch, pair via phone code instead of QR.
    pub pair_phone: Option<String>,
    /// Path to the Whisper-compatible STT model file.
    pub whisper_model_path: Option<String>,
    /// Path to the STT binary.
    pub whisper_bin_path: Option<String>,
    /// Path to `ffmpeg`, used to transcode inbound audio to 16kHz mono WAV.
    pub ffmpeg_bin_path: String,
}

impl Config {
    /// Load configuration from environment variables, applying the defaults
    /// from §6.1. Never fails — every variable has a usable default except
    /// `BRIDGE_API_KEY`, whose absence means "auth disabled", not an error.
    pub fn from_env() -> Result<Self, BridgeError> {
        let api_key = std::env::var("BRIDGE_API_KEY").unwrap_or_default();
        let store_dir = std::env::var("STORE_DIR").unwrap_or_else(|_| "store".to_string());
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(8080);
        let pair_phone = std::env::var("PAIR_PHONE")
            .ok()
            .filter(|s| !s.is_empty());
        let whisper_model_path = std::env::var("WHISPER_MODEL_PATH").ok();
        let whisper_bin_path = std::env::var("WHISPER_BIN_PATH").ok();
        let ffmpeg_bin_path =
            std::env::var("FFMPEG_BIN_PATH").unwrap_or_else(|_| "ffmpeg".to_string());

        Ok(Self {
            api_key,
            store_dir,
            port,
            pair_phone,
            whisper_model_path,
            whisper_bin_path,
            ffmpeg_bin_path,
        })
    }

    /// Absolute, `~`-expanded store directory.
    pub fn store_dir_expanded(&self) -> String {
        shellexpand(&self.store_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shellexpand_tilde() {
        std::env::set_var("HOME", "/home/bridge");
        assert_eq!(shellexpand("~/store"), "/home/bridge/store");
        assert_eq!(shellexpand("/abs/store"), "/abs/store");
    }

    #[test]
    fn pair_phone_empty_string_is_unset() {
        std::env::set_var("PAIR_PHONE", "");
        std::env::set_var("BRIDGE_API_KEY", "");
        std::env::remove_var("STORE_DIR");
        std::env::remove_var("PORT");
        let cfg = Config::from_env().unwrap();
        assert!(cfg.pair_phone.is_none());
        std::env::remove_var("PAIR_PHONE");
    }

    #[test]
    fn defaults_apply() {
        std::env::remove_var("STORE_DIR");
        std::env::remove_var("PORT");
        std::env::remove_var("PAIR_PHONE");
        std::env::remove_var("BRIDGE_API_KEY");
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.store_dir, "store");
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.api_key, "");
    }
}
