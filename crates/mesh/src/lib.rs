//! trommel-mesh – Peer-Mesh-Koordination
//!
//! Dieser Crate implementiert den Kern von Trommel: aus einem Strom
//! asynchroner, beliebig verzahnter Signalisierungs-Umschlaege vieler
//! gleichzeitig verhandelnder Peers wird ein Satz offener Datenkanaele,
//! nach aussen sichtbar als ein einziger Ereignis-Feed.
//!
//! ## Architektur
//!
//! ```text
//! RelayLink (Framed TCP zum Rendezvous-Server)
//!     |
//!     v
//! MeshCoordinator (ein Task)
//!     |  State Machine: Leerlauf -> Anfrage -> Beigetreten
//!     |  besitzt die Peer-Tabelle, routet Umschlaege nach Peer-ID
//!     |
//!     +-- PeerLink p1 (eigener Task)   \
//!     +-- PeerLink p2 (eigener Task)    >-- je: Verhandlungs-State-Machine
//!     +-- PeerLink pN (eigener Task)   /       + Plattform-Transport
//!     |
//!     v
//! Feed (CircleEvent) -> Anwendung
//! ```
//!
//! Die Plattform liefert pro Peer einen `PeerTransport` (Angebot/Antwort/
//! Kandidaten plus Kanal-Rueckmeldungen); der Kern kennt keine konkrete
//! WebRTC-Implementierung.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod feed;
pub mod peer_link;
pub mod relay_link;
pub mod transport;

// Bequeme Re-Exporte
pub use config::MeshConfig;
pub use coordinator::{KreisZustand, MeshCoordinator, MeshHandle};
pub use error::{MeshError, MeshResult};
pub use feed::CircleEvent;
pub use peer_link::{LinkZustand, PeerLink, PeerMeldung, PeerSignal};
pub use relay_link::RelayLink;
pub use transport::{PeerTransport, PeerTransportFabrik, TransportEreignis};
