//! Credential resolver (C11): walks an ordered, deduped list of local
//! credential sources and returns the first device token found.
//!
//! Grounded in `keyring.rs`'s `Credentials::load`/`should_skip_keyring` split:
//! a missing or unreadable source is never an error, it's simply absent from
//! the candidate list, the same way `Credentials::load` treats "no keyring
//! entry yet" as empty rather than fatal.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;

use crate::env::should_skip_keyring;

/// The ordered preference list from §6, most to least preferred.
pub const SOURCE_ORDER: &[&str] = &[
    "local-device-auth-file",
    "local-paired-registry",
    "local-legacy-config",
    "local-launch-agent-plist",
    "keychain-device-auth",
    "keychain-auth",
];

/// One place a device token might live.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Stable name matching an entry in [`SOURCE_ORDER`].
    fn name(&self) -> &'static str;

    /// Attempt to resolve a token from this source. `Ok(None)` means the
    /// source is simply empty, not an error; `Err` is reserved for
    /// unexpected I/O failures the resolver still tolerates and logs.
    async fn resolve(&self) -> anyhow::Result<Option<String>>;
}

/// Reads a JSON file with a top-level string field, used by the two
/// file-backed sources below.
struct JsonFieldFile {
    name: &'static str,
    path: PathBuf,
    field: &'static str,
}

#[derive(Deserialize)]
struct SingleField {
    #[serde(flatten)]
    fields: serde_json::Map<String, serde_json::Value>,
}

#[async_trait]
impl CredentialSource for JsonFieldFile {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn resolve(&self) -> anyhow::Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&self.path).await?;
        let parsed: SingleField = serde_json::from_str(&content)?;
        Ok(parsed.fields.get(self.field).and_then(|v| v.as_str()).map(str::to_string))
    }
}

/// Reads a token out of the consolidated OS keyring entry (or its file
/// fallback in test mode), under a named field.
struct KeyringField {
    name: &'static str,
    service: &'static str,
    entry: &'static str,
    field: &'static str,
}

#[async_trait]
impl CredentialSource for KeyringField {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn resolve(&self) -> anyhow::Result<Option<String>> {
        if should_skip_keyring() {
            return Ok(None);
        }
        let service = self.service;
        let entry_name = self.entry;
        let field = self.field.to_string();
        tokio::task::spawn_blocking(move || -> anyhow::Result<Option<String>> {
            let entry = keyring::Entry::new(service, entry_name)
                .map_err(|e| anyhow::anyhow!("failed to open keyring entry: {e}"))?;
            match entry.get_password() {
                Ok(json) => {
                    let value: serde_json::Value = serde_json::from_str(&json)?;
                    Ok(value.get(&field).and_then(|v| v.as_str()).map(str::to_string))
                }
                Err(_) => Ok(None),
            }
        })
        .await?
    }
}

/// Build the standard source list rooted at `config_dir` (where
/// `openclaw.json`-adjacent files live) and `launch_agent_plist` (the
/// launch-agent install location), in the order §6 specifies.
#[must_use]
pub fn standard_sources(config_dir: &std::path::Path, launch_agent_plist: &std::path::Path) -> Vec<Box<dyn CredentialSource>> {
    vec![
        Box::new(JsonFieldFile {
            name: "local-device-auth-file",
            path: config_dir.join("device-auth.json"),
            field: "token",
        }),
        Box::new(JsonFieldFile {
            name: "local-paired-registry",
            path: config_dir.join("paired-devices.json"),
            field: "token",
        }),
        Box::new(JsonFieldFile {
            name: "local-legacy-config",
            path: config_dir.join("config.json"),
            field: "token",
        }),
        Box::new(JsonFieldFile {
            name: "local-launch-agent-plist",
            path: launch_agent_plist.to_path_buf(),
            field: "Token",
        }),
        Box::new(KeyringField {
            name: "keychain-device-auth",
            service: "osaurus",
            entry: "device-auth",
            field: "token",
        }),
        Box::new(KeyringField {
            name: "keychain-auth",
            service: "osaurus",
            entry: "auth",
            field: "token",
        }),
    ]
}

/// Walks `sources` in order, probing each and collecting every value found,
/// deduped by value while preserving first occurrence (§6).
///
/// Returns the full deduped candidate list; callers that just want "the"
/// token use `.into_iter().next()`.
pub async fn resolve_candidates(sources: &[Box<dyn CredentialSource>]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut candidates = Vec::new();

    for source in sources {
        match source.resolve().await {
            Ok(Some(token)) => {
                if seen.insert(token.clone()) {
                    candidates.push(token);
                }
            }
            Ok(None) => {}
            Err(e) => {
                log::debug!("credentials: source {} failed, skipping: {e}", source.name());
            }
        }
    }

    candidates
}

/// Resolve the single best device token, per the preference order, or
/// `None` if every source came up empty.
pub async fn resolve_token(sources: &[Box<dyn CredentialSource>]) -> Option<String> {
    resolve_candidates(sources).await.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticSource {
        name: &'static str,
        value: Option<&'static str>,
    }

    #[async_trait]
    impl CredentialSource for StaticSource {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn resolve(&self) -> anyhow::Result<Option<String>> {
            Ok(self.value.map(str::to_string))
        }
    }

    #[tokio::test]
    async fn test_first_resolvable_source_wins_order() {
        let sources: Vec<Box<dyn CredentialSource>> = vec![
            Box::new(StaticSource { name: "a", value: None }),
            Box::new(StaticSource { name: "b", value: Some("tok-b") }),
            Box::new(StaticSource { name: "c", value: Some("tok-c") }),
        ];
        assert_eq!(resolve_token(&sources).await, Some("tok-b".to_string()));
    }

    #[tokio::test]
    async fn test_candidates_are_deduped_preserving_first_occurrence() {
        let sources: Vec<Box<dyn CredentialSource>> = vec![
            Box::new(StaticSource { name: "a", value: Some("shared") }),
            Box::new(StaticSource { name: "b", value: Some("shared") }),
            Box::new(StaticSource { name: "c", value: Some("unique") }),
        ];
        let candidates = resolve_candidates(&sources).await;
        assert_eq!(candidates, vec!["shared".to_string(), "unique".to_string()]);
    }

    #[tokio::test]
    async fn test_all_sources_empty_resolves_to_none() {
        let sources: Vec<Box<dyn CredentialSource>> = vec![
            Box::new(StaticSource { name: "a", value: None }),
            Box::new(StaticSource { name: "b", value: None }),
        ];
        assert_eq!(resolve_token(&sources).await, None);
    }

    #[tokio::test]
    async fn test_missing_json_file_source_resolves_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let source = JsonFieldFile {
            name: "local-device-auth-file",
            path: dir.path().join("does-not-exist.json"),
            field: "token",
        };
        assert_eq!(source.resolve().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_json_field_file_reads_named_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device-auth.json");
        tokio::fs::write(&path, r#"{"token":"abc123","other":"x"}"#).await.unwrap();
        let source = JsonFieldFile { name: "local-device-auth-file", path, field: "token" };
        assert_eq!(source.resolve().await.unwrap(), Some("abc123".to_string()));
    }
}
