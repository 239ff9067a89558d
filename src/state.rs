//! Persisted state store (C12): loads/saves the `openclaw.json` gateway
//! launch-state file.
//!
//! Grounded in `config.rs`'s `Config::load`/`save`, relaxed per §6: unlike
//! `Config::load_from_file`, which `bail!`s when the file is missing,
//! `GatewayState::load` treats a missing or malformed file as
//! `Default::default()` — the same "absent is empty, not fatal" posture
//! `keyring.rs`'s `Credentials::load` already takes toward a missing keyring
//! entry.

use std::path::{Path, PathBuf};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_gateway_port() -> u16 {
    crate::constants::DEFAULT_GATEWAY_PORT
}

fn default_bind_mode() -> BindMode {
    BindMode::Loopback
}

fn default_install_path() -> String {
    "~/.openclaw".to_string()
}

/// Loopback-only vs LAN-reachable gateway bind mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindMode {
    /// Gateway only accepts connections from localhost.
    Loopback,
    /// Gateway accepts connections from the local network.
    Lan,
}

/// Persisted gateway launch state, defaulted field-by-field on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayState {
    /// Whether the user has enabled the gateway at all.
    #[serde(default)]
    pub is_enabled: bool,
    /// Local port the gateway listens on.
    #[serde(default = "default_gateway_port")]
    pub gateway_port: u16,
    /// Full gateway WebSocket URL, when known (overrides host:port derivation).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_url: Option<String>,
    /// Gateway health-check URL, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_health_url: Option<String>,
    /// Loopback or LAN bind mode.
    #[serde(default = "default_bind_mode")]
    pub bind_mode: BindMode,
    /// Whether this client should launch the gateway process itself.
    #[serde(default = "default_true")]
    pub auto_start_gateway: bool,
    /// Whether this client should keep the MCP bridge in sync automatically.
    #[serde(default = "default_true")]
    pub auto_sync_mcp_bridge: bool,
    /// Install directory for the gateway runtime.
    #[serde(default = "default_install_path")]
    pub install_path: String,
    /// Last gateway version this client observed, for upgrade prompts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_known_version: Option<String>,
}

impl Default for GatewayState {
    fn default() -> Self {
        Self {
            is_enabled: false,
            gateway_port: default_gateway_port(),
            gateway_url: None,
            gateway_health_url: None,
            bind_mode: default_bind_mode(),
            auto_start_gateway: true,
            auto_sync_mcp_bridge: true,
            install_path: default_install_path(),
            last_known_version: None,
        }
    }
}

impl GatewayState {
    /// Load state from `path`, defaulting instead of erroring on a missing
    /// file or malformed JSON.
    #[must_use]
    pub async fn load(path: &Path) -> Self {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                log::warn!("state: {} is malformed, using defaults: {e}", path.display());
                Self::default()
            }),
            Err(e) => {
                log::debug!("state: {} not found, using defaults: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Persist state to `path` as pretty JSON, `0o600` on Unix.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory doesn't exist or the write
    /// fails.
    pub async fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;

        #[cfg(unix)]
        {
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(path, perms).await?;
        }

        Ok(())
    }

    /// The default `openclaw.json` path under a configuration directory.
    #[must_use]
    pub fn default_path(config_dir: &Path) -> PathBuf {
        config_dir.join("openclaw.json")
    }

    /// The effective gateway WebSocket URL: `gateway_url` when set, else
    /// derived from `bind_mode`/`gateway_port`.
    #[must_use]
    pub fn effective_gateway_url(&self) -> String {
        if let Some(url) = &self.gateway_url {
            return url.clone();
        }
        let host = match self.bind_mode {
            BindMode::Loopback => "127.0.0.1",
            BindMode::Lan => "0.0.0.0",
        };
        format!("ws://{host}:{}/gateway", self.gateway_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let state = GatewayState::load(&dir.path().join("does-not-exist.json")).await;
        assert_eq!(state, GatewayState::default());
    }

    #[tokio::test]
    async fn test_load_malformed_json_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("openclaw.json");
        tokio::fs::write(&path, "{not valid json").await.unwrap();
        let state = GatewayState::load(&path).await;
        assert_eq!(state, GatewayState::default());
    }

    #[tokio::test]
    async fn test_load_partial_json_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("openclaw.json");
        tokio::fs::write(&path, r#"{"isEnabled":true,"gatewayPort":9999}"#).await.unwrap();
        let state = GatewayState::load(&path).await;
        assert!(state.is_enabled);
        assert_eq!(state.gateway_port, 9999);
        assert!(state.auto_start_gateway);
        assert_eq!(state.install_path, "~/.openclaw");
    }

    #[tokio::test]
    async fn test_save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("openclaw.json");
        let mut state = GatewayState::default();
        state.is_enabled = true;
        state.bind_mode = BindMode::Lan;
        state.save(&path).await.unwrap();

        let loaded = GatewayState::load(&path).await;
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_effective_gateway_url_prefers_explicit_override() {
        let mut state = GatewayState::default();
        state.gateway_url = Some("wss://tailnet-host:9000/gateway".to_string());
        assert_eq!(state.effective_gateway_url(), "wss://tailnet-host:9000/gateway");
    }

    #[test]
    fn test_effective_gateway_url_derived_from_bind_mode() {
        let state = GatewayState::default();
        assert_eq!(state.effective_gateway_url(), "ws://127.0.0.1:18789/gateway");
    }
}
