//! Camera endpoint descriptor, capability map, and wire-level request/response
//! shapes for the vendor CCAPI-style HTTP surface.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// HTTP verb a vendor endpoint accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
    Put,
}

/// How the coordinator should parse a response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    Json,
    Bytes,
}

/// One endpoint record inside a capability version block.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointRecord {
    pub path: String,
    #[serde(default)]
    pub ability: Vec<String>,
}

impl EndpointRecord {
    pub fn allows(&self, verb: Verb) -> bool {
        let name = match verb {
            Verb::Get => "get",
            Verb::Post => "post",
            Verb::Put => "put",
        };
        self.ability.iter().any(|a| a.eq_ignore_ascii_case(name))
    }
}

/// Raw shape of the `GET /ccapi/` capability probe response. Vendor returns
/// a map of version string (`"ver100"`, `"ver110"`, ...) to a list of
/// endpoint records.
#[derive(Debug, Clone, Deserialize)]
pub struct CapabilityResponse {
    #[serde(flatten)]
    pub versions: BTreeMap<String, Vec<EndpointRecord>>,
}

/// Capability map: version → endpoint path → record. Version keys sort
/// lexicographically; callers look up the highest version offering a path.
#[derive(Debug, Clone, Default)]
pub struct CapabilityMap {
    versions: BTreeMap<String, BTreeMap<String, EndpointRecord>>,
}

impl CapabilityMap {
    pub fn from_response(resp: CapabilityResponse) -> Self {
        let mut versions = BTreeMap::new();
        for (ver, records) in resp.versions {
            let mut by_path = BTreeMap::new();
            for rec in records {
                let path = rec.path.trim_end_matches('/').to_string();
                by_path.insert(path.clone(), EndpointRecord { path, ..rec });
            }
            versions.insert(ver, by_path);
        }
        Self { versions }
    }

    /// Resolve `path` to the highest version offering it with the needed verb.
    /// `path` may omit the version prefix (e.g. `"shooting/settings"`); callers
    /// that already know the version pass the full vendor path and this map is
    /// bypassed.
    pub fn resolve(&self, path: &str, verb: Verb) -> Option<String> {
        for (ver, endpoints) in self.versions.iter().rev() {
            if let Some(rec) = endpoints.get(path) {
                if rec.allows(verb) {
                    return Some(format!("/ccapi/{ver}/{path}"));
                }
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

/// Product identity snapshot, taken at start of every session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CameraIdentity {
    pub model: String,
    pub serial: String,
    pub firmware: String,
}

/// Shooting-settings snapshot, taken at start of every session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CameraSettings {
    #[serde(flatten)]
    pub raw: serde_json::Map<String, serde_json::Value>,
}

/// Vendor `{message}` error body on a 4xx response.
#[derive(Debug, Clone, Deserialize)]
pub struct CcapiErrorBody {
    pub message: String,
}

/// Result of `connect()`.
#[derive(Debug, Clone)]
pub struct ConnectResult {
    pub connected: bool,
    pub model: String,
    pub capabilities: CapabilityMap,
}

/// A typed, already-serialized body for `request()`.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Json(serde_json::Value),
    Bytes(Vec<u8>),
    None,
}

/// Typed response from `request()`.
#[derive(Debug, Clone)]
pub enum ResponseBody {
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

impl ResponseBody {
    pub fn into_json(self) -> Option<serde_json::Value> {
        match self {
            ResponseBody::Json(v) => Some(v),
            ResponseBody::Bytes(_) => None,
        }
    }
}

/// Per-call options accepted by `request()`.
#[derive(Debug, Clone)]
pub struct RequestOpts {
    pub timeout: std::time::Duration,
    pub response_type: ResponseType,
    /// When true, return `QueuedBehindOtherCall` instead of waiting if the
    /// single in-flight slot is occupied.
    pub non_blocking: bool,
}

impl Default for RequestOpts {
    fn default() -> Self {
        Self {
            timeout: std::time::Duration::from_secs(10),
            response_type: ResponseType::Json,
            non_blocking: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> CapabilityMap {
        let resp = CapabilityResponse {
            versions: BTreeMap::from([
                (
                    "ver100".to_string(),
                    vec![EndpointRecord {
                        path: "shooting/control/shutterbutton".to_string(),
                        ability: vec!["post".to_string()],
                    }],
                ),
                (
                    "ver110".to_string(),
                    vec![EndpointRecord {
                        path: "shooting/settings".to_string(),
                        ability: vec!["get".to_string(), "put".to_string()],
                    }],
                ),
            ]),
        };
        CapabilityMap::from_response(resp)
    }

    #[test]
    fn resolves_to_highest_version_offering_the_path() {
        let m = map();
        assert_eq!(
            m.resolve("shooting/settings", Verb::Get),
            Some("/ccapi/ver110/shooting/settings".to_string())
        );
    }

    #[test]
    fn rejects_verb_not_in_ability_list() {
        let m = map();
        assert_eq!(m.resolve("shooting/settings", Verb::Post), None);
    }

    #[test]
    fn unknown_path_resolves_to_none() {
        let m = map();
        assert_eq!(m.resolve("nonexistent", Verb::Get), None);
    }
}
