//! Relay-Protokoll (Signalisierung)
//!
//! Definiert alle Umschlaege die ueber die Relay-Verbindung zwischen
//! Client und Rendezvous-Server ausgetauscht werden.
//!
//! ## Design
//! - Tagged Enum ueber das `name`-Feld fuer typsichere Nachrichtentypen
//! - Unbekannte Namen scheitern bereits beim Deserialisieren und werden
//!   vom Empfaenger als fehlerhafte Umschlaege verworfen
//! - `sdp` und `ice` sind fuer diese Schicht opake Blobs; geroutet wird
//!   ausschliesslich nach `name` und `member_id`
//! - `member_id` ist auf Verhandlungs-Umschlaegen optional, damit ein
//!   fehlendes Feld NACH dem Parsen erkannt und gezielt verworfen werden
//!   kann statt die ganze Verbindung zu reissen

use serde::{Deserialize, Serialize};
use trommel_core::{CircleId, PeerId};

/// Alle Umschlaege der Relay-Verbindung (typsicher via Tagged Enum)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum RelayEnvelope {
    /// Anfrage: neuen Kreis erstellen (Client -> Relay)
    NewCircle,

    /// Bestaetigung der Kreis-Erstellung; der Client ist einziges Mitglied
    CircleCreated { circle_id: CircleId },

    /// Anfrage: bestehendem Kreis beitreten (Client -> Relay)
    JoinCircle { circle_id: CircleId },

    /// Bestaetigung des Beitritts samt Liste der bestehenden Mitglieder
    CircleDiscovery {
        circle_id: CircleId,
        #[serde(default)]
        members: Vec<PeerId>,
    },

    /// Sitzungsangebot fuer einen benannten Peer (beide Richtungen)
    NewMemberRtcOffer {
        #[serde(skip_serializing_if = "Option::is_none")]
        circle_id: Option<CircleId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        member_id: Option<PeerId>,
        sdp: String,
    },

    /// Sitzungsantwort fuer einen benannten Peer (beide Richtungen)
    NewMemberRtcAnswer {
        #[serde(skip_serializing_if = "Option::is_none")]
        circle_id: Option<CircleId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        member_id: Option<PeerId>,
        sdp: String,
    },

    /// Ein Verbindungskandidat fuer einen benannten Peer (beide Richtungen)
    IceCandidate {
        #[serde(skip_serializing_if = "Option::is_none")]
        circle_id: Option<CircleId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        member_id: Option<PeerId>,
        ice: String,
    },
}

impl RelayEnvelope {
    /// Erstellt ein ausgehendes Sitzungsangebot
    pub fn angebot(circle_id: Option<CircleId>, member_id: PeerId, sdp: String) -> Self {
        Self::NewMemberRtcOffer {
            circle_id,
            member_id: Some(member_id),
            sdp,
        }
    }

    /// Erstellt eine ausgehende Sitzungsantwort
    pub fn antwort(circle_id: Option<CircleId>, member_id: PeerId, sdp: String) -> Self {
        Self::NewMemberRtcAnswer {
            circle_id,
            member_id: Some(member_id),
            sdp,
        }
    }

    /// Erstellt einen ausgehenden Verbindungskandidaten
    pub fn kandidat(circle_id: Option<CircleId>, member_id: PeerId, ice: String) -> Self {
        Self::IceCandidate {
            circle_id,
            member_id: Some(member_id),
            ice,
        }
    }

    /// Gibt true zurueck wenn der Umschlag zur Zwei-Parteien-Verhandlung gehoert
    pub fn ist_verhandlung(&self) -> bool {
        matches!(
            self,
            Self::NewMemberRtcOffer { .. }
                | Self::NewMemberRtcAnswer { .. }
                | Self::IceCandidate { .. }
        )
    }

    /// Gibt die Peer-ID eines Verhandlungs-Umschlags zurueck (falls vorhanden)
    pub fn member_id(&self) -> Option<&PeerId> {
        match self {
            Self::NewMemberRtcOffer { member_id, .. }
            | Self::NewMemberRtcAnswer { member_id, .. }
            | Self::IceCandidate { member_id, .. } => member_id.as_ref(),
            _ => None,
        }
    }
}
