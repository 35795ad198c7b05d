//! PeerLink – Verhandlung und Datenkanal fuer genau einen Peer
//!
//! Jeder Peer bekommt einen `PeerLink` in einem eigenen tokio-Task. Die
//! State Machine verwaltet den Verhandlungszustand.
//!
//! ## State Machine
//! ```text
//! Init --initiieren--> WartetAufAntwort --Antwort--> WartetAufKanal
//!   |                                                     |
//!   +--entferntes Angebot--> Antwortet -------------------+
//!                                                         v
//!                                                     Verbunden
//!
//! Geschlossen / Fehlgeschlagen sind aus jedem nicht-terminalen
//! Zustand erreichbar.
//! ```
//!
//! Ein PeerLink kennt seinen Besitzer nicht: Signalisierung und
//! Lebenszyklus-Meldungen laufen ausschliesslich ueber den bei der
//! Erstellung uebergebenen Kanal.

use std::collections::VecDeque;

use tokio::sync::mpsc;
use trommel_core::PeerId;
use trommel_protocol::P2pMessage;

use crate::error::{MeshError, MeshResult};
use crate::transport::{PeerTransport, TransportEreignis};

// ---------------------------------------------------------------------------
// Verhandlungszustand
// ---------------------------------------------------------------------------

/// Zustand eines PeerLink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkZustand {
    /// Erstellt, Verhandlung noch nicht begonnen
    Init,
    /// Lokales Angebot gesendet, wartet auf die Antwort der Gegenseite
    WartetAufAntwort,
    /// Entferntes Angebot angenommen, lokale Antwort wird erzeugt
    Antwortet,
    /// Beschreibungen ausgetauscht, wartet auf die Kanal-Oeffnung
    WartetAufKanal,
    /// Datenkanal offen
    Verbunden,
    /// Kanal geschlossen
    Geschlossen,
    /// Verhandlung fehlgeschlagen
    Fehlgeschlagen,
}

impl LinkZustand {
    /// Gibt true zurueck wenn der Link keinen weiteren Zustand erreichen kann
    pub fn ist_terminal(&self) -> bool {
        matches!(self, Self::Geschlossen | Self::Fehlgeschlagen)
    }
}

// ---------------------------------------------------------------------------
// Ausgehende Signale und Meldungen
// ---------------------------------------------------------------------------

/// Signalisierungs-Nachricht die ein PeerLink zum Relay schicken will
///
/// Der Koordinator ergaenzt Peer- und Kreis-ID beim Weiterleiten.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerSignal {
    /// Lokales Sitzungsangebot
    Angebot(String),
    /// Lokale Sitzungsantwort
    Antwort(String),
    /// Lokal entdeckter Verbindungskandidat
    Kandidat(String),
}

/// Meldung eines PeerLink an seinen Besitzer
#[derive(Debug)]
pub enum PeerMeldung {
    /// Signalisierung fuer das Relay
    Signal(PeerSignal),
    /// Datenkanal ist offen
    Verbunden,
    /// Datenkanal wurde geschlossen
    Getrennt,
    /// Verhandlung oder Transport fehlgeschlagen
    Fehlgeschlagen(String),
    /// Anwendungsnachricht vom Peer
    Nachricht(P2pMessage),
}

// ---------------------------------------------------------------------------
// PeerLink
// ---------------------------------------------------------------------------

/// Verhandlungs-Zustand und Datenkanal fuer genau einen Peer
pub struct PeerLink {
    peer_id: PeerId,
    zustand: LinkZustand,
    transport: Box<dyn PeerTransport>,
    /// Ob die entfernte Sitzungsbeschreibung bereits angenommen wurde
    entfernte_beschreibung: bool,
    /// Kandidaten die vor der entfernten Beschreibung ankamen (FIFO)
    kandidaten_puffer: VecDeque<String>,
    /// Ausgehende Nachrichten die vor der Kanal-Oeffnung anfielen
    sende_puffer: Vec<String>,
    meldung_tx: mpsc::Sender<(PeerId, PeerMeldung)>,
}

impl PeerLink {
    /// Erstellt einen neuen PeerLink im Zustand `Init`
    pub fn neu(
        peer_id: PeerId,
        transport: Box<dyn PeerTransport>,
        meldung_tx: mpsc::Sender<(PeerId, PeerMeldung)>,
    ) -> Self {
        Self {
            peer_id,
            zustand: LinkZustand::Init,
            transport,
            entfernte_beschreibung: false,
            kandidaten_puffer: VecDeque::new(),
            sende_puffer: Vec::new(),
            meldung_tx,
        }
    }

    /// Gibt den aktuellen Zustand zurueck
    pub fn zustand(&self) -> LinkZustand {
        self.zustand
    }

    /// Gibt die Peer-ID zurueck
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Beginnt die Verhandlung als anbietende Seite
    ///
    /// Nur aus `Init` gueltig; waehrend `WartetAufAntwort` ein No-op
    /// (doppelte Entdeckung desselben Peers ist idempotent).
    pub async fn initiieren(&mut self) -> MeshResult<()> {
        match self.zustand {
            LinkZustand::Init => {}
            LinkZustand::WartetAufAntwort => return Ok(()),
            andere => {
                tracing::warn!(
                    peer_id = %self.peer_id,
                    zustand = ?andere,
                    "initiieren im falschen Zustand ignoriert"
                );
                return Ok(());
            }
        }

        let angebot = self.transport.create_offer().await?;
        self.transport.set_local_description(&angebot).await?;
        self.zustand = LinkZustand::WartetAufAntwort;
        self.melden(PeerMeldung::Signal(PeerSignal::Angebot(angebot)))
            .await;
        Ok(())
    }

    /// Verarbeitet ein entferntes Sitzungsangebot
    ///
    /// Nur aus `Init` gueltig. In jedem anderen Zustand ist das Angebot
    /// ein Protokoll-Ereignis ausser der Reihe: ignorieren, loggen.
    pub async fn entferntes_angebot(&mut self, sdp: &str) -> MeshResult<()> {
        if self.zustand != LinkZustand::Init {
            tracing::warn!(
                peer_id = %self.peer_id,
                zustand = ?self.zustand,
                "Angebot ausser der Reihe ignoriert"
            );
            return Ok(());
        }

        self.zustand = LinkZustand::Antwortet;
        self.transport.set_remote_description(sdp).await?;
        self.entfernte_beschreibung = true;
        self.kandidaten_spuelen().await?;

        let antwort = self.transport.create_answer().await?;
        self.transport.set_local_description(&antwort).await?;
        self.zustand = LinkZustand::WartetAufKanal;
        self.melden(PeerMeldung::Signal(PeerSignal::Antwort(antwort)))
            .await;
        Ok(())
    }

    /// Verarbeitet eine entfernte Sitzungsantwort
    ///
    /// Nur aus `WartetAufAntwort` gueltig; sonst ignorieren, loggen.
    pub async fn entfernte_antwort(&mut self, sdp: &str) -> MeshResult<()> {
        if self.zustand != LinkZustand::WartetAufAntwort {
            tracing::warn!(
                peer_id = %self.peer_id,
                zustand = ?self.zustand,
                "Antwort ohne offenes Angebot ignoriert"
            );
            return Ok(());
        }

        self.transport.set_remote_description(sdp).await?;
        self.entfernte_beschreibung = true;
        self.kandidaten_spuelen().await?;
        self.zustand = LinkZustand::WartetAufKanal;
        Ok(())
    }

    /// Verarbeitet einen entfernten Verbindungskandidaten
    ///
    /// Vor der Annahme der entfernten Beschreibung wird gepuffert (FIFO);
    /// danach wird sofort angewendet.
    pub async fn entfernter_kandidat(&mut self, kandidat: String) -> MeshResult<()> {
        if self.zustand.ist_terminal() {
            tracing::debug!(peer_id = %self.peer_id, "Kandidat fuer beendeten Link verworfen");
            return Ok(());
        }

        if self.entfernte_beschreibung {
            self.transport.add_remote_candidate(&kandidat).await?;
        } else {
            tracing::trace!(peer_id = %self.peer_id, "Kandidat gepuffert");
            self.kandidaten_puffer.push_back(kandidat);
        }
        Ok(())
    }

    /// Wendet alle gepufferten Kandidaten in Ankunftsreihenfolge an
    async fn kandidaten_spuelen(&mut self) -> MeshResult<()> {
        while let Some(kandidat) = self.kandidaten_puffer.pop_front() {
            self.transport.add_remote_candidate(&kandidat).await?;
        }
        Ok(())
    }

    /// Der Datenkanal hat sich geoeffnet (Transport-Rueckmeldung)
    pub async fn kanal_offen(&mut self) -> MeshResult<()> {
        match self.zustand {
            LinkZustand::Verbunden => return Ok(()),
            LinkZustand::Geschlossen | LinkZustand::Fehlgeschlagen => return Ok(()),
            LinkZustand::WartetAufKanal => {}
            andere => {
                tracing::warn!(
                    peer_id = %self.peer_id,
                    zustand = ?andere,
                    "Kanal-Oeffnung vor Abschluss der Verhandlung"
                );
            }
        }

        self.zustand = LinkZustand::Verbunden;

        // Wartende Nachrichten in Reihenfolge nachreichen
        for daten in std::mem::take(&mut self.sende_puffer) {
            self.transport.send_payload(&daten)?;
        }

        self.melden(PeerMeldung::Verbunden).await;
        Ok(())
    }

    /// Der Datenkanal wurde geschlossen (Transport-Rueckmeldung)
    pub async fn kanal_geschlossen(&mut self) {
        if self.zustand.ist_terminal() {
            return;
        }
        self.zustand = LinkZustand::Geschlossen;
        self.transport.close();
        self.melden(PeerMeldung::Getrennt).await;
    }

    /// Anwendungsnachricht vom Datenkanal (Transport-Rueckmeldung)
    ///
    /// Nachrichten vor der Kanal-Oeffnung werden verworfen – der Feed
    /// meldet nie Nachrichten eines unverbundenen Peers.
    pub async fn nachricht_empfangen(&mut self, text: &str) {
        if self.zustand != LinkZustand::Verbunden {
            tracing::warn!(
                peer_id = %self.peer_id,
                zustand = ?self.zustand,
                "Nachricht vor Kanal-Oeffnung verworfen"
            );
            return;
        }

        match P2pMessage::aus_json(text) {
            Ok(nachricht) => self.melden(PeerMeldung::Nachricht(nachricht)).await,
            Err(fehler) => {
                tracing::warn!(
                    peer_id = %self.peer_id,
                    fehler = %fehler,
                    "Unlesbare Anwendungsnachricht verworfen"
                );
            }
        }
    }

    /// Ein lokaler Verbindungskandidat wurde entdeckt (Transport-Rueckmeldung)
    pub async fn kandidat_entdeckt(&mut self, kandidat: String) {
        self.melden(PeerMeldung::Signal(PeerSignal::Kandidat(kandidat)))
            .await;
    }

    /// Sendet eine Anwendungsnachricht an den Peer (fire-and-forget)
    ///
    /// Gueltig ab `WartetAufKanal`: bis zur Kanal-Oeffnung wird gepuffert
    /// und beim Oeffnen nachgereicht. Davor ist Senden ein Fehler.
    pub fn senden(&mut self, nachricht: &P2pMessage) -> MeshResult<()> {
        let daten = nachricht.als_json()?;
        match self.zustand {
            LinkZustand::Verbunden => self.transport.send_payload(&daten),
            LinkZustand::WartetAufKanal => {
                self.sende_puffer.push(daten);
                Ok(())
            }
            _ => Err(MeshError::NichtVerbunden),
        }
    }

    /// Markiert den Link als fehlgeschlagen und meldet das dem Besitzer
    ///
    /// Wird nie automatisch wiederholt: ein fehlgeschlagener Peer muss
    /// ueber eine frische Relay-Ankuendigung neu entdeckt werden.
    pub async fn fehlschlagen(&mut self, grund: String) {
        if self.zustand.ist_terminal() {
            return;
        }
        self.zustand = LinkZustand::Fehlgeschlagen;
        self.transport.close();
        self.melden(PeerMeldung::Fehlgeschlagen(grund)).await;
    }

    /// Schliesst den Link ohne Meldung (Abbau durch den Besitzer)
    pub fn schliessen(&mut self) {
        if self.zustand.ist_terminal() {
            return;
        }
        self.zustand = LinkZustand::Geschlossen;
        self.transport.close();
    }

    async fn melden(&mut self, meldung: PeerMeldung) {
        if self
            .meldung_tx
            .send((self.peer_id.clone(), meldung))
            .await
            .is_err()
        {
            tracing::debug!(peer_id = %self.peer_id, "Besitzer des Links nicht mehr erreichbar");
        }
    }
}

// ---------------------------------------------------------------------------
// Task-Treiber
// ---------------------------------------------------------------------------

/// Befehle des Koordinators an einen PeerLink-Task
///
/// Die Queue ist FIFO: die Ankunftsreihenfolge der Relay-Umschlaege eines
/// Peers bleibt damit auch bei der Verarbeitung erhalten.
#[derive(Debug)]
pub(crate) enum PeerBefehl {
    Initiieren,
    EntferntesAngebot(String),
    EntfernteAntwort(String),
    EntfernterKandidat(String),
    Senden(P2pMessage),
    Schliessen,
}

/// Treibt einen PeerLink bis zu einem terminalen Zustand
///
/// Laeuft als eigener Task pro Peer: ein wartender Transport-Aufruf
/// dieses Peers verzoegert nie die Verarbeitung anderer Peers.
pub(crate) async fn peer_link_task(
    mut link: PeerLink,
    mut befehle: mpsc::Receiver<PeerBefehl>,
    mut ereignisse: mpsc::Receiver<TransportEreignis>,
) {
    loop {
        let ergebnis = tokio::select! {
            befehl = befehle.recv() => match befehl {
                None | Some(PeerBefehl::Schliessen) => {
                    link.schliessen();
                    break;
                }
                Some(PeerBefehl::Initiieren) => link.initiieren().await,
                Some(PeerBefehl::EntferntesAngebot(sdp)) => link.entferntes_angebot(&sdp).await,
                Some(PeerBefehl::EntfernteAntwort(sdp)) => link.entfernte_antwort(&sdp).await,
                Some(PeerBefehl::EntfernterKandidat(kandidat)) => {
                    link.entfernter_kandidat(kandidat).await
                }
                Some(PeerBefehl::Senden(nachricht)) => match link.senden(&nachricht) {
                    // Rundruf-Nachrichten koennen eine Trennung ueberholen
                    Err(MeshError::NichtVerbunden) => {
                        tracing::debug!(
                            peer_id = %link.peer_id(),
                            "Nachricht an unverbundenen Link verworfen"
                        );
                        Ok(())
                    }
                    andere => andere,
                },
            },
            ereignis = ereignisse.recv() => match ereignis {
                Some(TransportEreignis::KanalOffen) => link.kanal_offen().await,
                Some(TransportEreignis::Nachricht(text)) => {
                    link.nachricht_empfangen(&text).await;
                    Ok(())
                }
                Some(TransportEreignis::KandidatEntdeckt(kandidat)) => {
                    link.kandidat_entdeckt(kandidat).await;
                    Ok(())
                }
                Some(TransportEreignis::KanalGeschlossen) | None => {
                    link.kanal_geschlossen().await;
                    break;
                }
            },
        };

        if let Err(fehler) = ergebnis {
            link.fehlschlagen(fehler.to_string()).await;
            break;
        }
        if link.zustand().ist_terminal() {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
