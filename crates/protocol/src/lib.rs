//! trommel-protocol – Netzwerkprotokoll-Definitionen
//!
//! Dieses Crate definiert die beiden Nachrichtenebenen des Systems:
//! die Relay-Umschlaege fuer den Verbindungsaufbau (`relay`) und die
//! Anwendungsnachrichten auf dem direkten Datenkanal (`p2p`), sowie das
//! Frame-Format der Relay-Verbindung (`wire`).

pub mod p2p;
pub mod relay;
pub mod wire;

pub use p2p::{Instrument, P2pMessage, SoundEvent};
pub use relay::RelayEnvelope;
pub use wire::FrameCodec;
