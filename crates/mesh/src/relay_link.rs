//! Relay-Verbindung – Eine geordnete Frame-Verbindung zum Rendezvous-Server
//!
//! Nutzt den FrameCodec aus trommel-protocol fuer das Wire-Format
//! (u32 BE length + JSON payload). Generisch ueber den Byte-Strom,
//! damit Tests auf `tokio::io::duplex` laufen koennen.

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use trommel_protocol::{FrameCodec, RelayEnvelope};

use crate::error::MeshResult;

/// Eine bidirektionale, geordnete Umschlag-Verbindung zum Relay
pub struct RelayLink<S> {
    framed: Framed<S, FrameCodec>,
}

impl<S> RelayLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Erstellt einen RelayLink ueber einem bestehenden Byte-Strom
    pub fn aus_stream(stream: S, max_frame_groesse: usize) -> Self {
        Self {
            framed: Framed::new(stream, FrameCodec::with_max_size(max_frame_groesse)),
        }
    }

    /// Sendet einen Umschlag an das Relay
    pub async fn senden(&mut self, umschlag: RelayEnvelope) -> MeshResult<()> {
        self.framed.send(umschlag).await?;
        Ok(())
    }

    /// Naechster Umschlag vom Relay
    ///
    /// `None` bedeutet: die Verbindung wurde geschlossen. Ein `Err`
    /// bedeutet Transport-Korruption (z.B. ueberlanger Frame).
    pub async fn empfangen(&mut self) -> Option<MeshResult<RelayEnvelope>> {
        self.framed
            .next()
            .await
            .map(|ergebnis| ergebnis.map_err(Into::into))
    }

    /// Schliesst die Verbindung (flusht wartende Frames)
    pub async fn schliessen(&mut self) {
        let _ = self.framed.close().await;
    }
}

impl RelayLink<TcpStream> {
    /// Verbindet sich per TCP mit dem Relay
    pub async fn verbinden(adresse: &str, max_frame_groesse: usize) -> MeshResult<Self> {
        let stream = TcpStream::connect(adresse).await?;
        tracing::info!(adresse = %adresse, "Mit Relay verbunden");
        Ok(Self::aus_stream(stream, max_frame_groesse))
    }
}
