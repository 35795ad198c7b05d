//! Datenkanal-Protokoll (Peer zu Peer)
//!
//! Nachrichten die nach erfolgreicher Verhandlung direkt zwischen zwei
//! Peers ueber den Datenkanal laufen. Der Kanal transportiert JSON-Text;
//! unlesbare oder unbekannte Nachrichten werden vom Empfaenger verworfen
//! und geloggt, nie stillschweigend weitergereicht.

use serde::{Deserialize, Serialize};
use trommel_core::SoundId;

// ---------------------------------------------------------------------------
// Anwendungsnachricht
// ---------------------------------------------------------------------------

/// Alle Nachrichten auf dem Datenkanal
///
/// Wire-Format: `{"name":"USERNAME","payload":{...}}` bzw.
/// `{"name":"SOUND","payload":{...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum P2pMessage {
    /// Anzeigename des sendenden Peers
    Username { username: String },
    /// Ein Synthese-Ereignis
    Sound(SoundEvent),
}

impl P2pMessage {
    /// Serialisiert die Nachricht fuer den Datenkanal
    pub fn als_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parst eine vom Datenkanal empfangene Nachricht
    pub fn aus_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

// ---------------------------------------------------------------------------
// Synthese-Ereignisse
// ---------------------------------------------------------------------------

/// Ein Synthese-Ereignis wie es ueber den Datenkanal laeuft
///
/// `Play` aktualisiert einen laufenden Klang oder erzeugt ihn, falls die
/// Instanz noch nicht existiert (das erzeugende Ereignis kann unterwegs
/// verloren gegangen sein). `End` beendet einen Klang explizit. `Sample`
/// stoesst einen Einmalklang ohne Lebensdauer-Verwaltung an.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum SoundEvent {
    Play {
        sound_id: SoundId,
        instrument: Instrument,
        freq: f32,
        gain: f32,
    },
    End {
        sound_id: SoundId,
    },
    Sample {
        sound_id: SoundId,
        instrument: Instrument,
        gain: f32,
    },
}

/// Klangerzeuger eines Ereignisses
///
/// Oszillator-Wellenformen fuer gehaltene Klaenge, Sample-Arten fuer
/// Einmalklaenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Instrument {
    Sine,
    Square,
    Sawtooth,
    Triangle,
    Kick,
    Snare,
    Hat,
}

impl Instrument {
    /// Gibt true zurueck wenn das Instrument ein gehaltener Oszillator ist
    pub fn ist_oszillator(&self) -> bool {
        matches!(self, Self::Sine | Self::Square | Self::Sawtooth | Self::Triangle)
    }
}
