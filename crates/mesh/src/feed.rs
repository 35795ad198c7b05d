//! Vereinheitlichter Ereignis-Feed des Koordinators
//!
//! Alles was die Anwendung ueber den Kreis wissen muss laeuft als ein
//! Strom von `CircleEvent`s: Mitgliedschafts-Uebergaenge, Peer-Lebenszyklus
//! und Anwendungsnachrichten. Die Anwendung muss nie Zustand pollen.

use serde::{Deserialize, Serialize};
use trommel_core::{CircleId, PeerId};
use trommel_protocol::P2pMessage;

/// Alle Ereignisse auf dem vereinheitlichten Feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CircleEvent {
    /// Kreis wurde erstellt oder einem bestehenden Kreis beigetreten
    Beigetreten { circle_id: CircleId },
    /// Der Datenkanal zu einem Peer ist offen
    PeerVerbunden { peer_id: PeerId },
    /// Ein Peer hat die Verbindung getrennt
    PeerGetrennt { peer_id: PeerId },
    /// Die Verhandlung mit einem Peer ist fehlgeschlagen
    ///
    /// Fuer die Aufraeumlogik identisch zu `PeerGetrennt`, wird aber
    /// getrennt gemeldet damit die Diagnose moeglich bleibt.
    PeerFehlgeschlagen { peer_id: PeerId, grund: String },
    /// Anwendungsnachricht von einem verbundenen Peer
    PeerNachricht {
        peer_id: PeerId,
        nachricht: P2pMessage,
    },
    /// Die Relay-Verbindung wurde getrennt (terminal, kein Reconnect)
    RelayGetrennt,
}
