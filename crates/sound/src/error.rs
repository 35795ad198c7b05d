//! Fehlertypen fuer die Klangmaschine

use thiserror::Error;

/// Alle moeglichen Fehler der Klangmaschine
#[derive(Debug, Error)]
pub enum SoundError {
    /// Das Synthese-Backend hat seinen Befehls-Kanal geschlossen
    #[error("Synthese-Backend nicht mehr erreichbar")]
    BackendGetrennt,
}

/// Result-Typ fuer die Klangmaschine
pub type SoundResult<T> = Result<T, SoundError>;
