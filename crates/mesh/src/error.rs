//! Fehlertypen fuer den Mesh-Koordinator

use thiserror::Error;

/// Fehlertyp fuer Koordinator, PeerLink und Relay-Verbindung
#[derive(Debug, Error)]
pub enum MeshError {
    /// IO-Fehler (TCP, Frame-Korruption)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Serialisierung einer Anwendungsnachricht fehlgeschlagen
    #[error("Serialisierung fehlgeschlagen: {0}")]
    Serialisierung(#[from] serde_json::Error),

    /// Der Plattform-Transport hat eine Operation abgelehnt
    #[error("Transportfehler: {0}")]
    Transport(String),

    /// Senden auf einem Link der (noch) nicht verbunden ist
    #[error("Link ist nicht verbunden")]
    NichtVerbunden,

    /// Der Koordinator wurde bereits abgebaut
    #[error("Koordinator ist beendet")]
    KoordinatorBeendet,

    /// Konfigurationsfehler (unlesbare Datei, ungueltige Werte)
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    /// Beliebiger Fehler einer Plattform-Transport-Implementierung
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl MeshError {
    /// Erstellt einen Transportfehler aus einer beliebigen Nachricht
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}

/// Result-Typ fuer den Mesh-Koordinator
pub type MeshResult<T> = Result<T, MeshError>;
