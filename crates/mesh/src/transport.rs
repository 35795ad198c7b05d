//! Transport-Schnittstelle zur Plattform
//!
//! Der Kern haengt an keiner konkreten WebRTC-Implementierung. Die
//! Plattform stellt pro Peer einen `PeerTransport` bereit, der die
//! Verhandlungs-Operationen ausfuehrt und seine Rueckmeldungen (Kanal
//! offen/zu, Nachricht, lokaler Kandidat) als `TransportEreignis`-Strom
//! liefert. Tests injizieren einen In-Memory-Mock.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::MeshResult;

// ---------------------------------------------------------------------------
// Transport-Ereignisse
// ---------------------------------------------------------------------------

/// Rueckmeldungen des Plattform-Transports an den zugehoerigen PeerLink
#[derive(Debug, Clone)]
pub enum TransportEreignis {
    /// Der Datenkanal ist offen und sendebereit
    KanalOffen,
    /// Der Datenkanal wurde geschlossen
    KanalGeschlossen,
    /// Anwendungsnachricht vom Peer (JSON-Text)
    Nachricht(String),
    /// Ein lokaler Verbindungskandidat wurde entdeckt
    KandidatEntdeckt(String),
}

// ---------------------------------------------------------------------------
// Transport-Trait
// ---------------------------------------------------------------------------

/// Verhandlungs-Operationen eines einzelnen Peer-Transports
///
/// Die Methodennamen spiegeln das Vokabular der Plattform-Schnittstelle.
/// `sdp`- und Kandidaten-Blobs sind fuer den Kern opak.
#[async_trait]
pub trait PeerTransport: Send {
    /// Erzeugt ein lokales Sitzungsangebot
    async fn create_offer(&mut self) -> MeshResult<String>;

    /// Erzeugt eine lokale Sitzungsantwort auf das gesetzte entfernte Angebot
    async fn create_answer(&mut self) -> MeshResult<String>;

    /// Setzt die lokale Sitzungsbeschreibung
    async fn set_local_description(&mut self, sdp: &str) -> MeshResult<()>;

    /// Setzt die entfernte Sitzungsbeschreibung
    async fn set_remote_description(&mut self, sdp: &str) -> MeshResult<()>;

    /// Wendet einen entfernten Verbindungskandidaten an
    async fn add_remote_candidate(&mut self, kandidat: &str) -> MeshResult<()>;

    /// Reiht eine Anwendungsnachricht auf dem Datenkanal ein (fire-and-forget)
    fn send_payload(&mut self, daten: &str) -> MeshResult<()>;

    /// Schliesst Datenkanal und Verbindung
    fn close(&mut self);
}

/// Fabrik fuer Peer-Transports
///
/// Der Koordinator erzeugt pro Peer genau einen Transport samt
/// Ereignis-Strom. STUN-Konfiguration und sonstige Plattform-Details
/// sind Sache der Implementierung.
pub trait PeerTransportFabrik: Send + Sync {
    /// Erstellt einen neuen Transport fuer genau einen Peer
    fn neuer_transport(&self) -> (Box<dyn PeerTransport>, mpsc::Receiver<TransportEreignis>);
}

// ---------------------------------------------------------------------------
// In-Memory-Mock fuer Tests
// ---------------------------------------------------------------------------
