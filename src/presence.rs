//! Presence rows (§6): the `system-presence` response shape and the
//! deterministic identity used to compare and sort rows.
//!
//! A thin data-modeling module with no teacher precedent of its own; kept
//! minimal and grounded in the same `serde`-derive conventions used
//! throughout (`frame.rs`, `state.rs`).

use serde::{Deserialize, Serialize};

/// One row of the `system-presence` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRow {
    /// Stable per-device identifier, when the reporting client has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Per-process instance identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    /// Reported hostname.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Reported IP address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Opaque platform/role metadata the caller may want to display.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PresenceRow {
    /// The deterministic identity used for equality and sort order, per
    /// §6's fallback chain: `deviceId` → `instanceId` → `host` → `ip`.
    #[must_use]
    pub fn identity(&self) -> &str {
        self.device_id
            .as_deref()
            .or(self.instance_id.as_deref())
            .or(self.host.as_deref())
            .or(self.ip.as_deref())
            .unwrap_or("")
    }
}

/// Sort rows by their deterministic identity, ascending.
pub fn sort_rows(rows: &mut [PresenceRow]) {
    rows.sort_by(|a, b| a.identity().cmp(b.identity()));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(device_id: Option<&str>, instance_id: Option<&str>, host: Option<&str>, ip: Option<&str>) -> PresenceRow {
        PresenceRow {
            device_id: device_id.map(str::to_string),
            instance_id: instance_id.map(str::to_string),
            host: host.map(str::to_string),
            ip: ip.map(str::to_string),
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_identity_prefers_device_id() {
        let r = row(Some("dev1"), Some("inst1"), Some("host1"), Some("1.2.3.4"));
        assert_eq!(r.identity(), "dev1");
    }

    #[test]
    fn test_identity_falls_back_through_chain() {
        assert_eq!(row(None, Some("inst1"), Some("host1"), None).identity(), "inst1");
        assert_eq!(row(None, None, Some("host1"), Some("1.2.3.4")).identity(), "host1");
        assert_eq!(row(None, None, None, Some("1.2.3.4")).identity(), "1.2.3.4");
        assert_eq!(row(None, None, None, None).identity(), "");
    }

    #[test]
    fn test_sort_rows_orders_by_identity() {
        let mut rows = vec![
            row(Some("zeta"), None, None, None),
            row(Some("alpha"), None, None, None),
        ];
        sort_rows(&mut rows);
        assert_eq!(rows[0].identity(), "alpha");
        assert_eq!(rows[1].identity(), "zeta");
    }

    #[test]
    fn test_deserialize_camel_case_fields() {
        let row: PresenceRow =
            serde_json::from_str(r#"{"deviceId":"d1","host":"mac.local"}"#).unwrap();
        assert_eq!(row.device_id, Some("d1".to_string()));
        assert_eq!(row.host, Some("mac.local".to_string()));
    }
}
