//! HTTPS cloud API collaborator (spec §6): the four endpoints a
//! network needs to resolve its id, open a session, pull down its
//! full descriptor, and look up a fixture's static catalogue entry.
//!
//! `CloudApi` is the trait `MeshClient` depends on; `ReqwestCloudApi`
//! is the default implementation over the teacher's own HTTP stack.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MeshError;
use crate::keystore::Key;
use crate::unit::{Group, Scene, Unit, UnitControl, UnitControlKind, UnitType};

const API_BASE: &str = "https://api.casambi.com";
const DEVICE_NAME: &str = "lumimesh";

/// A logged-in session against one network, as returned by the
/// `POST /network/{id}/session` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSession {
    pub session: String,
    pub network: String,
    pub manager: bool,
    #[serde(rename = "keyID")]
    pub key_id: u8,
    /// Milliseconds since the epoch, as the API returns it.
    pub expires: i64,
    #[serde(default = "default_role")]
    pub role: u8,
}

fn default_role() -> u8 {
    3
}

/// A network's full descriptor, as parsed out of the network update
/// endpoint's JSON body: name/revision plus the units/groups/scenes
/// and keys belonging to it.
#[derive(Debug, Clone)]
pub struct NetworkDescriptor {
    pub name: String,
    pub revision: u32,
    pub keys: Vec<Key>,
    pub units: Vec<Unit>,
    pub groups: Vec<Group>,
    pub scenes: Vec<Scene>,
}

/// The cloud collaborator `MeshClient` depends on. Kept trait-based so
/// tests and offline-only embedders can substitute a cache-backed stub
/// without pulling in `reqwest`.
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Resolve a network's BLE UUID (colons stripped) to its API id.
    async fn network_id_from_uuid(&self, uuid: &str) -> Result<String, MeshError>;

    /// Exchange a password for a session on network `network_id`.
    async fn log_in(&self, network_id: &str, password: &str) -> Result<NetworkSession, MeshError>;

    /// Pull the full network descriptor. Requires a live `session`.
    async fn fetch_network(
        &self,
        network_id: &str,
        session: &NetworkSession,
    ) -> Result<NetworkDescriptor, MeshError>;

    /// Look up one fixture's static `UnitType` by its catalogue id.
    async fn fetch_fixture(&self, type_id: u32) -> Result<UnitType, MeshError>;
}

/// Default `CloudApi` over `reqwest`, talking to the production API.
pub struct ReqwestCloudApi {
    client: reqwest::Client,
}

impl ReqwestCloudApi {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestCloudApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CloudApi for ReqwestCloudApi {
    async fn network_id_from_uuid(&self, uuid: &str) -> Result<String, MeshError> {
        let stripped: String = uuid.chars().filter(|c| *c != ':').collect();
        let url = format!("{API_BASE}/network/uuid/{stripped}");
        let res = self.client.get(&url).send().await?;

        if res.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(MeshError::NetworkNotFound);
        }
        let res = res.error_for_status()?;

        #[derive(Deserialize)]
        struct Resp {
            id: String,
        }
        let body: Resp = res.json().await?;
        Ok(body.id)
    }

    async fn log_in(&self, network_id: &str, password: &str) -> Result<NetworkSession, MeshError> {
        let url = format!("{API_BASE}/network/{network_id}/session");
        let res = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "password": password,
                "deviceName": DEVICE_NAME,
            }))
            .send()
            .await?;

        if res.status() == reqwest::StatusCode::UNAUTHORIZED
            || res.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(MeshError::Authentication(
                "network login rejected".to_string(),
            ));
        }
        let res = res.error_for_status()?;
        Ok(res.json().await?)
    }

    async fn fetch_network(
        &self,
        network_id: &str,
        session: &NetworkSession,
    ) -> Result<NetworkDescriptor, MeshError> {
        let url = format!("{API_BASE}/network/{network_id}/");
        let res = self
            .client
            .put(&url)
            .header("X-Casambi-Session", &session.session)
            .json(&serde_json::json!({
                "formatVersion": 1,
                "deviceName": DEVICE_NAME,
            }))
            .send()
            .await?;
        let res = res.error_for_status()?;
        let body: serde_json::Value = res.json().await?;

        parse_network_body(&body)
    }

    async fn fetch_fixture(&self, type_id: u32) -> Result<UnitType, MeshError> {
        let url = format!("{API_BASE}/fixture/{type_id}");
        let res = self.client.get(&url).send().await?;
        let res = res.error_for_status()?;
        let body: serde_json::Value = res.json().await?;

        parse_fixture_body(&body)
    }
}

fn parse_network_body(body: &serde_json::Value) -> Result<NetworkDescriptor, MeshError> {
    let network = body.get("network").ok_or_else(|| {
        MeshError::NetworkUpdateError("missing \"network\" field in response".to_string())
    })?;

    let name = network
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let revision = network
        .get("revision")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;

    let keys: Vec<Key> = network
        .pointer("/keyStore/keys")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();

    let units: Vec<Unit> = network
        .get("units")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|u| {
                    Some(Unit {
                        device_id: u.get("deviceID")?.as_u64()? as u8,
                        uuid: u.get("uuid")?.as_str()?.to_string(),
                        address: u.get("address")?.as_str()?.to_string(),
                        name: u.get("name")?.as_str()?.to_string(),
                        firmware_version: u
                            .get("firmware")
                            .map(|f| f.to_string())
                            .unwrap_or_default(),
                        unit_type: UnitType {
                            id: u.get("type")?.as_u64()? as u32,
                            model: String::new(),
                            manufacturer: String::new(),
                            mode: String::new(),
                            state_length: 0,
                            controls: Vec::new(),
                        },
                        state: None,
                        on: false,
                        online: false,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let scenes: Vec<Scene> = network
        .get("scenes")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|s| {
                    Some(Scene {
                        scene_id: s.get("sceneID")?.as_u64()? as u8,
                        name: s.get("name")?.as_str()?.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let groups: Vec<Group> = network
        .pointer("/grid/cells")
        .and_then(|v| v.as_array())
        .map(|cells| {
            cells
                .iter()
                .filter(|c| c.get("type").and_then(|t| t.as_u64()) == Some(2))
                .filter_map(|c| {
                    let group_id = c.get("groupID")?.as_u64()? as u8;
                    let name = c.get("name")?.as_str()?.to_string();
                    let unit_ids = c
                        .get("cells")
                        .and_then(|v| v.as_array())
                        .map(|sub| {
                            sub.iter()
                                .filter(|s| s.get("type").and_then(|t| t.as_u64()) == Some(1))
                                .filter_map(|s| s.get("unit")?.as_u64().map(|v| v as u8))
                                .collect()
                        })
                        .unwrap_or_default();
                    Some(Group {
                        group_id,
                        name,
                        unit_ids,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(NetworkDescriptor {
        name,
        revision,
        keys,
        units,
        groups,
        scenes,
    })
}

fn parse_fixture_body(body: &serde_json::Value) -> Result<UnitType, MeshError> {
    let id = body
        .get("id")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| MeshError::Protocol("fixture response missing id".to_string()))?
        as u32;
    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let manufacturer = body
        .get("vendor")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let mode = body
        .get("mode")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let state_length = body
        .get("stateLength")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as usize;

    let controls = body
        .get("controls")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().map(parse_control).collect())
        .unwrap_or_default();

    Ok(UnitType {
        id,
        model,
        manufacturer,
        mode,
        state_length,
        controls,
    })
}

fn parse_control(json: &serde_json::Value) -> UnitControl {
    let type_str = json
        .get("type")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_uppercase();

    let kind = match type_str.as_str() {
        "DIMMER" => UnitControlKind::Dimmer,
        "WHITE" => UnitControlKind::White,
        "RGB" => UnitControlKind::Rgb,
        "ONOFF" => UnitControlKind::OnOff,
        "TEMPERATURE" => UnitControlKind::Temperature,
        "VERTICAL" => UnitControlKind::Vertical,
        "COLORSOURCE" => UnitControlKind::ColorSource,
        "XY" => UnitControlKind::Xy,
        "SLIDER" => UnitControlKind::Slider,
        "SENSOR" => UnitControlKind::Sensor,
        _ => UnitControlKind::Unknown {
            raw_tag: json
                .get("type")
                .and_then(|v| v.as_u64())
                .map(|v| v as u8)
                .unwrap_or(0xff),
        },
    };

    UnitControl {
        kind,
        offset_bits: json.get("offset").and_then(|v| v.as_u64()).unwrap_or(0) as u16,
        length_bits: json.get("length").and_then(|v| v.as_u64()).unwrap_or(0) as u16,
        default: json.get("default").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        readonly: json
            .get("readonly")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        min: json.get("min").and_then(|v| v.as_i64()).map(|v| v as i32),
        max: json.get("max").and_then(|v| v.as_i64()).map(|v| v as i32),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fixture_with_unknown_control_kind() {
        let body = serde_json::json!({
            "id": 42,
            "model": "Xpress",
            "vendor": "Casambi",
            "mode": "default",
            "stateLength": 2,
            "controls": [
                { "type": "dimmer", "offset": 0, "length": 8, "default": 0, "readonly": false },
                { "type": "flux_capacitor", "offset": 8, "length": 4, "default": 0, "readonly": true },
            ],
        });

        let unit_type = parse_fixture_body(&body).unwrap();
        assert_eq!(unit_type.id, 42);
        assert_eq!(unit_type.controls.len(), 2);
        assert!(matches!(unit_type.controls[0].kind, UnitControlKind::Dimmer));
        assert!(matches!(
            unit_type.controls[1].kind,
            UnitControlKind::Unknown { .. }
        ));
    }

    #[test]
    fn parses_network_body_with_groups_and_scenes() {
        let body = serde_json::json!({
            "network": {
                "name": "Home",
                "revision": 7,
                "keyStore": { "keys": [] },
                "units": [
                    { "deviceID": 1, "uuid": "u1", "address": "a1", "name": "Lamp", "type": 42, "firmware": 1 }
                ],
                "grid": {
                    "cells": [
                        { "type": 2, "groupID": 1, "name": "Living room", "cells": [
                            { "type": 1, "unit": 1 }
                        ]}
                    ]
                },
                "scenes": [ { "sceneID": 1, "name": "Evening" } ],
            }
        });

        let descriptor = parse_network_body(&body).unwrap();
        assert_eq!(descriptor.name, "Home");
        assert_eq!(descriptor.revision, 7);
        assert_eq!(descriptor.units.len(), 1);
        assert_eq!(descriptor.groups.len(), 1);
        assert_eq!(descriptor.groups[0].unit_ids, vec![1]);
        assert_eq!(descriptor.scenes[0].name, "Evening");
    }
}
