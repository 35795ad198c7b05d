//! Koordinator-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Koordinator ohne
//! Konfigurationsdatei lauffaehig ist.

use serde::{Deserialize, Serialize};
use trommel_protocol::wire::DEFAULT_MAX_FRAME_SIZE;

use crate::error::{MeshError, MeshResult};

/// Vollstaendige Koordinator-Konfiguration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Adresse des Rendezvous-Relays (host:port)
    pub relay_adresse: String,
    /// STUN-Server die unveraendert an den Plattform-Transport durchgereicht werden
    pub stun_server: Vec<String>,
    /// Maximale Frame-Groesse der Relay-Verbindung in Bytes
    pub max_frame_groesse: usize,
    /// Kapazitaet der Befehls-Queue pro PeerLink
    pub peer_queue_kapazitaet: usize,
    /// Kapazitaet des vereinheitlichten Feeds
    pub feed_kapazitaet: usize,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            relay_adresse: "127.0.0.1:9900".into(),
            stun_server: vec![
                "stun:stun1.l.google.com:19302".into(),
                "stun:stun2.l.google.com:19302".into(),
            ],
            max_frame_groesse: DEFAULT_MAX_FRAME_SIZE,
            peer_queue_kapazitaet: 64,
            feed_kapazitaet: 64,
        }
    }
}

impl MeshConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei
    pub fn aus_datei(pfad: impl AsRef<std::path::Path>) -> MeshResult<Self> {
        let inhalt = std::fs::read_to_string(pfad)?;
        toml::from_str(&inhalt).map_err(|e| MeshError::Konfiguration(e.to_string()))
    }
}
