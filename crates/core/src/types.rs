//! Gemeinsame Identifikationstypen fuer Trommel
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen. Peer- und
//! Kreis-IDs werden vom Relay vergeben und sind fuer uns opake Strings;
//! sie werden transparent serialisiert damit das Wire-Format flach bleibt.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Eindeutige Peer-ID (vom Relay vergeben, eindeutig innerhalb eines Kreises)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Erstellt eine PeerId aus einem vom Relay gelieferten String
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Gibt den inneren String zurueck
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer:{}", self.0)
    }
}

/// Eindeutige Kreis-ID (vom Relay bei Erstellung oder Beitritt vergeben)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CircleId(String);

impl CircleId {
    /// Erstellt eine CircleId aus einem vom Relay gelieferten String
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Gibt den inneren String zurueck
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CircleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "kreis:{}", self.0)
    }
}

/// Eindeutige Klang-Instanz-ID
///
/// Wird fuer lokal erzeugte Klaenge zufaellig vergeben; fuer entfernte
/// Klaenge wird die ID aus dem empfangenen Ereignis uebernommen.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SoundId(String);

impl SoundId {
    /// Erstellt eine SoundId aus einem vorhandenen String
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Erstellt eine neue zufaellige SoundId
    pub fn zufaellig() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Gibt den inneren String zurueck
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SoundId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "klang:{}", self.0)
    }
}
