//! Lifecycle facade (C10): thin RPC wrappers over the Request router (C3)
//! for everything external collaborators need that isn't chat streaming
//! itself — sessions, config, channels, presence, wizard, skills, cron, and
//! heartbeat.
//!
//! These carry no protocol novelty of their own (§4.10); each method is a
//! direct `router.call` with the parameter/response shapes from §6. The one
//! piece of actual logic here is `patch_session_model`'s allowlist-recovery
//! retry, grounded in the same "read current state, compute a patch,
//! re-apply, retry once on conflict" shape the teacher crate uses for its
//! own config read-modify-write helpers.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::constants::REQUEST_TIMEOUT;
use crate::error::{GatewayError, RequestErrorKind};
use crate::presence::PresenceRow;
use crate::router::RequestRouter;

/// Thin wrapper over the Request router for the non-chat RPC surface.
#[derive(Clone)]
pub struct LifecycleFacade {
    router: Arc<RequestRouter>,
}

impl LifecycleFacade {
    /// Build a facade around a connected router.
    #[must_use]
    pub fn new(router: Arc<RequestRouter>) -> Self {
        Self { router }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, GatewayError> {
        self.router.call(method, params, REQUEST_TIMEOUT).await.map_err(GatewayError::from)
    }

    // --- sessions -----------------------------------------------------

    /// `sessions.list`.
    pub async fn sessions_list(
        &self,
        limit: u32,
        include_derived_titles: bool,
        include_last_message: bool,
        include_global: bool,
        include_unknown: bool,
    ) -> Result<Value, GatewayError> {
        self.call(
            "sessions.list",
            json!({
                "limit": limit,
                "includeDerivedTitles": include_derived_titles,
                "includeLastMessage": include_last_message,
                "includeGlobal": include_global,
                "includeUnknown": include_unknown,
            }),
        )
        .await
    }

    /// `sessions.patch` with model-allowlist recovery, per §4.8's
    /// "Model hydration and provider allowlist recovery".
    ///
    /// If the server rejects the patch with `model not allowed: <id>`, reads
    /// the current config, patches `agents.defaults.models` to add the
    /// model, applies that patch, and retries `sessions.patch` exactly once.
    /// A `baseHash` conflict during the config patch is retried once with a
    /// freshly read hash.
    pub async fn patch_session_model(&self, key: &str, model: &str) -> Result<Value, GatewayError> {
        let params = json!({ "key": key, "model": model });
        match self.call("sessions.patch", params.clone()).await {
            Ok(result) => Ok(result),
            Err(GatewayError::Request(RequestErrorKind::Server { message, .. }))
                if message.contains("model not allowed") =>
            {
                self.allowlist_model(model).await?;
                self.call("sessions.patch", params).await
            }
            Err(e) => Err(e),
        }
    }

    async fn allowlist_model(&self, model: &str) -> Result<(), GatewayError> {
        for attempt in 0..2 {
            let config = self.config_get().await?;
            let base_hash = config
                .get("hash")
                .or_else(|| config.get("baseHash"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();

            let raw = build_model_allowlist_patch(&config, model);
            match self.call("config.patch", json!({ "raw": raw, "baseHash": base_hash })).await {
                Ok(_) => return Ok(()),
                Err(GatewayError::Request(RequestErrorKind::Server { message, .. }))
                    if message.to_ascii_lowercase().contains("basehash") && attempt == 0 =>
                {
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Err(GatewayError::Chat {
            message: format!("failed to allowlist model {model}: baseHash kept conflicting"),
        })
    }

    /// `sessions.delete`.
    pub async fn sessions_delete(&self, key: &str) -> Result<Value, GatewayError> {
        self.call("sessions.delete", json!({ "key": key })).await
    }

    /// `sessions.compact`.
    pub async fn sessions_compact(&self, key: &str, max_lines: u32) -> Result<Value, GatewayError> {
        self.call("sessions.compact", json!({ "key": key, "maxLines": max_lines })).await
    }

    /// `sessions.reset`.
    pub async fn sessions_reset(&self, key: &str, reason: &str) -> Result<Value, GatewayError> {
        self.call("sessions.reset", json!({ "key": key, "reason": reason })).await
    }

    // --- config ---------------------------------------------------------

    /// `config.get`.
    pub async fn config_get(&self) -> Result<Value, GatewayError> {
        self.call("config.get", json!({})).await
    }

    /// `config.patch`.
    pub async fn config_patch(&self, raw: &str, base_hash: &str) -> Result<Value, GatewayError> {
        self.call("config.patch", json!({ "raw": raw, "baseHash": base_hash })).await
    }

    // --- channels ---------------------------------------------------------

    /// `channels.status`.
    pub async fn channels_status(&self) -> Result<Value, GatewayError> {
        self.call("channels.status", json!({})).await
    }

    /// `channels.detailed`.
    pub async fn channels_detailed(&self) -> Result<Value, GatewayError> {
        self.call("channels.detailed", json!({})).await
    }

    /// `channels.logout`.
    pub async fn channels_logout(&self, channel: &str) -> Result<Value, GatewayError> {
        self.call("channels.logout", json!({ "channel": channel })).await
    }

    // --- presence ---------------------------------------------------------

    /// `system-presence`, parsed into [`PresenceRow`]s and sorted by
    /// identity.
    pub async fn system_presence(&self) -> Result<Vec<PresenceRow>, GatewayError> {
        let result = self.call("system-presence", json!({})).await?;
        let mut rows: Vec<PresenceRow> = serde_json::from_value(result).unwrap_or_default();
        crate::presence::sort_rows(&mut rows);
        Ok(rows)
    }

    /// `system-event`, used to announce this client's presence.
    pub async fn announce_presence(
        &self,
        text: &str,
        platform: &str,
        roles: &[String],
        scopes: &[String],
    ) -> Result<Value, GatewayError> {
        self.call(
            "system-event",
            json!({ "text": text, "platform": platform, "roles": roles, "scopes": scopes }),
        )
        .await
    }

    // --- wizard ---------------------------------------------------------

    /// `wizard.start`.
    pub async fn wizard_start(&self) -> Result<Value, GatewayError> {
        self.call("wizard.start", json!({})).await
    }

    /// `wizard.next`.
    pub async fn wizard_next(&self, input: Value) -> Result<Value, GatewayError> {
        self.call("wizard.next", input).await
    }

    /// `wizard.cancel`.
    pub async fn wizard_cancel(&self) -> Result<Value, GatewayError> {
        self.call("wizard.cancel", json!({})).await
    }

    // --- skills ---------------------------------------------------------

    /// `skills.status`.
    pub async fn skills_status(&self) -> Result<Value, GatewayError> {
        self.call("skills.status", json!({})).await
    }

    /// `skills.bins`.
    pub async fn skills_bins(&self) -> Result<Value, GatewayError> {
        self.call("skills.bins", json!({})).await
    }

    /// `skills.install`.
    pub async fn skills_install(&self, name: &str) -> Result<Value, GatewayError> {
        self.call("skills.install", json!({ "name": name })).await
    }

    /// `skills.update`.
    pub async fn skills_update(&self, name: &str) -> Result<Value, GatewayError> {
        self.call("skills.update", json!({ "name": name })).await
    }

    // --- cron -------------------------------------------------------------

    /// `cron.status`.
    pub async fn cron_status(&self) -> Result<Value, GatewayError> {
        self.call("cron.status", json!({})).await
    }

    /// `cron.list`.
    pub async fn cron_list(&self) -> Result<Value, GatewayError> {
        self.call("cron.list", json!({})).await
    }

    /// `cron.run`.
    pub async fn cron_run(&self, id: &str) -> Result<Value, GatewayError> {
        self.call("cron.run", json!({ "id": id })).await
    }

    /// `cron.update`.
    pub async fn cron_update(&self, id: &str, patch: Value) -> Result<Value, GatewayError> {
        let mut params = patch;
        if let Value::Object(map) = &mut params {
            map.insert("id".to_string(), Value::String(id.to_string()));
        }
        self.call("cron.update", params).await
    }

    /// `cron.runs`.
    pub async fn cron_runs(&self, id: &str) -> Result<Value, GatewayError> {
        self.call("cron.runs", json!({ "id": id })).await
    }

    // --- heartbeat ---------------------------------------------------------

    /// `heartbeat.status`.
    pub async fn heartbeat_status(&self) -> Result<Value, GatewayError> {
        self.call("heartbeat.status", json!({})).await
    }

    /// `heartbeat.set`.
    pub async fn heartbeat_set(&self, interval: Duration) -> Result<Value, GatewayError> {
        self.call("heartbeat.set", json!({ "intervalMs": interval.as_millis() as u64 })).await
    }
}

/// Compute a JSON-patch-shaped raw string that adds `model` to
/// `agents.defaults.models` in the current config, preserving whatever
/// other models were already allow-listed.
fn build_model_allowlist_patch(config: &Value, model: &str) -> String {
    let mut models: Vec<String> = config
        .get("config")
        .or(Some(config))
        .and_then(|c| c.get("agents"))
        .and_then(|a| a.get("defaults"))
        .and_then(|d| d.get("models"))
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();

    if !models.iter().any(|m| m == model) {
        models.push(model.to_string());
    }

    json!({ "agents": { "defaults": { "models": models } } }).to_string()
}
