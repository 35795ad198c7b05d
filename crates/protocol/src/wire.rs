//! Wire-Format fuer die Relay-Verbindung
//!
//! Frame-basiertes Protokoll: Length(u32 big-endian) + JSON-Payload.
//!
//! ## Frame-Format
//!
//! ```text
//! +--------+--------+--------+--------+----...----+
//! | Laenge (u32 BE) | 4 Bytes        | Payload    |
//! +--------+--------+--------+--------+----...----+
//! ```
//!
//! Die Laenge gibt die Anzahl der Payload-Bytes an (ohne die 4 Laengen-Bytes).
//! Maximale Frame-Groesse ist konfigurierbar (Standard: 64 KB – Umschlaege
//! tragen hoechstens einen SDP-Blob).

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::relay::RelayEnvelope;

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Standard-maximale Frame-Groesse (64 KB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Groesse des Laengen-Felds in Bytes
pub const LENGTH_FIELD_SIZE: usize = 4;

// ---------------------------------------------------------------------------
// FrameCodec
// ---------------------------------------------------------------------------

/// tokio-util Codec fuer die frame-basierte Relay-Verbindung
///
/// Implementiert `Encoder<RelayEnvelope>` und `Decoder` fuer nahtlose
/// Integration mit `tokio_util::codec::Framed`.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Maximale erlaubte Frame-Groesse in Bytes
    max_frame_size: usize,
}

impl FrameCodec {
    /// Erstellt einen neuen `FrameCodec` mit Standard-Limits
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Erstellt einen `FrameCodec` mit benutzerdefinierter maximaler Frame-Groesse
    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Gibt die konfigurierte maximale Frame-Groesse zurueck
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Decoder-Implementierung
// ---------------------------------------------------------------------------

impl Decoder for FrameCodec {
    type Item = RelayEnvelope;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            // Warte auf mindestens 4 Bytes fuer das Laengen-Feld
            if src.len() < LENGTH_FIELD_SIZE {
                return Ok(None);
            }

            // Laenge lesen (big-endian u32) ohne den Buffer zu veraendern
            let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

            // Maximale Frame-Groesse pruefen – ein ueberlanger Frame ist
            // Transport-Korruption und reisst die Verbindung
            if length > self.max_frame_size {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "Frame zu gross: {} Bytes (Maximum: {} Bytes)",
                        length, self.max_frame_size
                    ),
                ));
            }

            // Pruefen ob der vollstaendige Frame bereits im Buffer ist
            let total_size = LENGTH_FIELD_SIZE + length;
            if src.len() < total_size {
                // Speicher vorbelegen um Reallocations zu vermeiden
                src.reserve(total_size - src.len());
                return Ok(None);
            }

            // Laengen-Feld verbrauchen
            src.advance(LENGTH_FIELD_SIZE);

            // Payload-Bytes extrahieren
            let payload = src.split_to(length);

            // JSON deserialisieren. Ein sauber gerahmter aber unlesbarer
            // Umschlag (unbekannter Name, kaputtes JSON) ist nicht fatal:
            // der Frame ist verbraucht, der naechste wird direkt versucht.
            match serde_json::from_slice::<RelayEnvelope>(&payload) {
                Ok(umschlag) => return Ok(Some(umschlag)),
                Err(fehler) => {
                    tracing::warn!(fehler = %fehler, "Fehlerhafter Relay-Umschlag verworfen");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Encoder-Implementierung
// ---------------------------------------------------------------------------

impl Encoder<RelayEnvelope> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: RelayEnvelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        // JSON serialisieren
        let json = serde_json::to_vec(&item).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("JSON-Serialisierung fehlgeschlagen: {}", e),
            )
        })?;

        // Groesse pruefen
        if json.len() > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Umschlag zu gross: {} Bytes (Maximum: {} Bytes)",
                    json.len(),
                    self.max_frame_size
                ),
            ));
        }

        // Laengen-Feld + Payload schreiben
        dst.reserve(LENGTH_FIELD_SIZE + json.len());
        dst.put_u32(json.len() as u32);
        dst.put_slice(&json);

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
