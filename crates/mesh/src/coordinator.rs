//! MeshCoordinator – Mitgliedschafts-State-Machine und Umschlag-Routing
//!
//! Der Koordinator besitzt die Peer-Tabelle, routet eingehende
//! Relay-Umschlaege an den richtigen PeerLink (und legt ihn beim ersten
//! Kontakt an), fuehrt die Signalisierung aller Links auf die
//! Relay-Verbindung zusammen und veroeffentlicht alles Beobachtbare als
//! einen vereinheitlichten Feed.
//!
//! ## Concurrency-Modell
//! Die Peer-Tabelle und der Kreis-Zustand werden ausschliesslich in der
//! Ereignisschleife dieses Tasks veraendert. Jeder PeerLink laeuft in
//! seinem eigenen Task mit einer FIFO-Befehls-Queue: die relative
//! Reihenfolge der Umschlaege EINES Peers bleibt erhalten, waehrend ein
//! wartender Transport-Aufruf eines Peers die anderen nie aufhaelt.
//! Die Zusammenfuehrung der ausgehenden Signalisierung sind geklonte
//! Sender EINER Queue – Peers kommen und gehen, ohne dass Nachrichten
//! anderer Links verloren gehen.

use std::collections::HashMap;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use trommel_core::{CircleId, PeerId};
use trommel_protocol::{P2pMessage, RelayEnvelope};

use crate::config::MeshConfig;
use crate::error::{MeshError, MeshResult};
use crate::feed::CircleEvent;
use crate::peer_link::{peer_link_task, PeerBefehl, PeerLink, PeerMeldung, PeerSignal};
use crate::relay_link::RelayLink;
use crate::transport::PeerTransportFabrik;

// ---------------------------------------------------------------------------
// Kreis-Zustand
// ---------------------------------------------------------------------------

/// Zustand der Kreis-Mitgliedschaft
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KreisZustand {
    /// Kein Kreis, keine Anfrage unterwegs
    Leerlauf,
    /// Erstellungs- oder Beitrittsanfrage liegt beim Relay
    Anfrage,
    /// Mitglied des benannten Kreises
    Beigetreten(CircleId),
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Befehle der Anwendung an den Koordinator
#[derive(Debug)]
enum KoordinatorBefehl {
    KreisErstellen,
    KreisBeitreten(CircleId),
    AnAlleSenden(P2pMessage),
    BenutzernameSetzen(String),
    Schliessen,
}

/// Bedienungs-Handle fuer einen laufenden Koordinator
///
/// Clone-bar; alle Methoden schlagen mit `KoordinatorBeendet` fehl
/// sobald der Koordinator abgebaut wurde.
#[derive(Clone)]
pub struct MeshHandle {
    befehl_tx: mpsc::Sender<KoordinatorBefehl>,
}

impl MeshHandle {
    /// Fordert die Erstellung eines neuen Kreises an
    ///
    /// Der Abschluss wird als `CircleEvent::Beigetreten` auf dem Feed
    /// gemeldet, sobald das Relay die Erstellung bestaetigt.
    pub async fn kreis_erstellen(&self) -> MeshResult<()> {
        self.senden(KoordinatorBefehl::KreisErstellen).await
    }

    /// Fordert den Beitritt zu einem bestehenden Kreis an
    pub async fn kreis_beitreten(&self, circle_id: CircleId) -> MeshResult<()> {
        self.senden(KoordinatorBefehl::KreisBeitreten(circle_id)).await
    }

    /// Sendet eine Anwendungsnachricht an alle verbundenen Peers
    ///
    /// Links in laufender Verhandlung erhalten nichts – auch nicht
    /// nachtraeglich, wenn sie sich spaeter oeffnen.
    pub async fn an_alle_senden(&self, nachricht: P2pMessage) -> MeshResult<()> {
        self.senden(KoordinatorBefehl::AnAlleSenden(nachricht)).await
    }

    /// Setzt den Anzeigenamen und kuendigt ihn allen verbundenen Peers an
    pub async fn benutzername_setzen(&self, name: String) -> MeshResult<()> {
        self.senden(KoordinatorBefehl::BenutzernameSetzen(name)).await
    }

    /// Baut den Koordinator ab (schliesst alle Links und das Relay)
    pub async fn schliessen(&self) -> MeshResult<()> {
        self.senden(KoordinatorBefehl::Schliessen).await
    }

    async fn senden(&self, befehl: KoordinatorBefehl) -> MeshResult<()> {
        self.befehl_tx
            .send(befehl)
            .await
            .map_err(|_| MeshError::KoordinatorBeendet)
    }
}

// ---------------------------------------------------------------------------
// MeshCoordinator
// ---------------------------------------------------------------------------

/// Eintrag der Peer-Tabelle
struct PeerEintrag {
    befehl_tx: mpsc::Sender<PeerBefehl>,
    verbunden: bool,
}

/// Koordinator eines Kreises
///
/// Besitzt die Relay-Verbindung und die Peer-Tabelle. Wird mit
/// `ausfuehren` in einem eigenen Task gestartet; die Anwendung spricht
/// ueber das `MeshHandle` und liest den Feed.
pub struct MeshCoordinator<S> {
    relay: RelayLink<S>,
    fabrik: Box<dyn PeerTransportFabrik>,
    config: MeshConfig,
    zustand: KreisZustand,
    benutzername: Option<String>,
    peers: HashMap<PeerId, PeerEintrag>,
    /// Zusammengefuehrte Meldungen aller PeerLink-Tasks
    meldung_tx: mpsc::Sender<(PeerId, PeerMeldung)>,
    meldung_rx: mpsc::Receiver<(PeerId, PeerMeldung)>,
    befehl_rx: mpsc::Receiver<KoordinatorBefehl>,
    feed_tx: mpsc::Sender<CircleEvent>,
}

impl MeshCoordinator<TcpStream> {
    /// Verbindet sich mit dem konfigurierten Relay
    pub async fn verbinden(
        fabrik: Box<dyn PeerTransportFabrik>,
        config: MeshConfig,
    ) -> MeshResult<(Self, MeshHandle, mpsc::Receiver<CircleEvent>)> {
        let relay = RelayLink::verbinden(&config.relay_adresse, config.max_frame_groesse).await?;
        Ok(Self::neu(relay, fabrik, config))
    }
}

impl<S> MeshCoordinator<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Erstellt einen Koordinator ueber einer bestehenden Relay-Verbindung
    pub fn neu(
        relay: RelayLink<S>,
        fabrik: Box<dyn PeerTransportFabrik>,
        config: MeshConfig,
    ) -> (Self, MeshHandle, mpsc::Receiver<CircleEvent>) {
        let (befehl_tx, befehl_rx) = mpsc::channel(config.peer_queue_kapazitaet);
        let (feed_tx, feed_rx) = mpsc::channel(config.feed_kapazitaet);
        let (meldung_tx, meldung_rx) = mpsc::channel(config.peer_queue_kapazitaet);

        let koordinator = Self {
            relay,
            fabrik,
            config,
            zustand: KreisZustand::Leerlauf,
            benutzername: None,
            peers: HashMap::new(),
            meldung_tx,
            meldung_rx,
            befehl_rx,
            feed_tx,
        };
        (koordinator, MeshHandle { befehl_tx }, feed_rx)
    }

    /// Gibt den aktuellen Mitgliedschafts-Zustand zurueck
    pub fn zustand(&self) -> &KreisZustand {
        &self.zustand
    }

    /// Gibt die Anzahl bekannter Peers zurueck
    pub fn peer_anzahl(&self) -> usize {
        self.peers.len()
    }

    /// Startet die Ereignisschleife
    ///
    /// Laeuft bis die Relay-Verbindung endet oder die Anwendung
    /// `schliessen` ruft; danach sind Handle-Aufrufe Fehler.
    pub async fn ausfuehren(mut self) {
        tracing::info!("MeshCoordinator gestartet");

        loop {
            tokio::select! {
                umschlag = self.relay.empfangen() => match umschlag {
                    Some(Ok(umschlag)) => self.dispatch(umschlag).await,
                    Some(Err(fehler)) => {
                        tracing::warn!(fehler = %fehler, "Relay-Verbindung korrupt");
                        self.feed(CircleEvent::RelayGetrennt).await;
                        break;
                    }
                    None => {
                        tracing::warn!("Relay-Verbindung getrennt");
                        self.feed(CircleEvent::RelayGetrennt).await;
                        break;
                    }
                },

                Some((peer_id, meldung)) = self.meldung_rx.recv() => {
                    self.peer_meldung(peer_id, meldung).await;
                }

                befehl = self.befehl_rx.recv() => match befehl {
                    Some(KoordinatorBefehl::Schliessen) | None => break,
                    Some(befehl) => self.befehl_verarbeiten(befehl).await,
                },
            }
        }

        self.abbauen().await;
    }

    // -----------------------------------------------------------------------
    // Eingehende Relay-Umschlaege
    // -----------------------------------------------------------------------

    /// Routet einen eingehenden Relay-Umschlag
    ///
    /// Kreis-Lebenszyklus wird direkt verarbeitet; Verhandlungs-Umschlaege
    /// werden an den zustaendigen PeerLink delegiert, der bei unbekannter
    /// Peer-ID vorher angelegt wird.
    async fn dispatch(&mut self, umschlag: RelayEnvelope) {
        match umschlag {
            RelayEnvelope::CircleCreated { circle_id } => {
                self.kreis_bestaetigt(circle_id, Vec::new()).await;
            }
            RelayEnvelope::CircleDiscovery { circle_id, members } => {
                self.kreis_bestaetigt(circle_id, members).await;
            }
            RelayEnvelope::NewMemberRtcOffer { member_id, sdp, .. } => {
                self.an_peer_delegieren(member_id, PeerBefehl::EntferntesAngebot(sdp))
                    .await;
            }
            RelayEnvelope::NewMemberRtcAnswer { member_id, sdp, .. } => {
                self.an_peer_delegieren(member_id, PeerBefehl::EntfernteAntwort(sdp))
                    .await;
            }
            RelayEnvelope::IceCandidate { member_id, ice, .. } => {
                self.an_peer_delegieren(member_id, PeerBefehl::EntfernterKandidat(ice))
                    .await;
            }
            RelayEnvelope::NewCircle | RelayEnvelope::JoinCircle { .. } => {
                tracing::warn!("Anfrage-Umschlag vom Relay empfangen – ignoriert");
            }
        }
    }

    /// Relay hat Erstellung oder Beitritt bestaetigt
    async fn kreis_bestaetigt(&mut self, circle_id: CircleId, mitglieder: Vec<PeerId>) {
        match &self.zustand {
            KreisZustand::Anfrage => {
                tracing::info!(
                    kreis = %circle_id,
                    mitglieder = mitglieder.len(),
                    "Kreis beigetreten"
                );
                self.zustand = KreisZustand::Beigetreten(circle_id.clone());
                self.feed(CircleEvent::Beigetreten { circle_id }).await;

                // Mit jedem bestehenden Mitglied die Verhandlung anstossen –
                // auf deren Abschluss wird nicht gewartet
                for peer_id in mitglieder {
                    self.an_peer_delegieren(Some(peer_id), PeerBefehl::Initiieren)
                        .await;
                }
            }
            KreisZustand::Beigetreten(bestehend) => {
                // Kreis-Identitaet ist nach der Zuweisung unveraenderlich
                if *bestehend != circle_id {
                    tracing::warn!(
                        bestehend = %bestehend,
                        neu = %circle_id,
                        "Kreis-Bestaetigung mit fremder ID ignoriert"
                    );
                }
            }
            KreisZustand::Leerlauf => {
                tracing::warn!(kreis = %circle_id, "Kreis-Bestaetigung ohne offene Anfrage ignoriert");
            }
        }
    }

    /// Stellt den PeerLink sicher und reiht den Befehl in seine Queue ein
    async fn an_peer_delegieren(&mut self, member_id: Option<PeerId>, befehl: PeerBefehl) {
        let Some(peer_id) = member_id else {
            tracing::warn!("Verhandlungs-Umschlag ohne Peer-ID verworfen");
            return;
        };

        self.peer_sicherstellen(&peer_id);
        if let Some(eintrag) = self.peers.get(&peer_id) {
            if eintrag.befehl_tx.send(befehl).await.is_err() {
                tracing::debug!(peer_id = %peer_id, "Peer-Task bereits beendet");
            }
        }
    }

    /// Legt den PeerLink an, falls er noch nicht existiert
    ///
    /// Idempotent: fuer eine bereits bekannte ID ist der Aufruf ein No-op
    /// und der bestehende Link wird weiterverwendet.
    fn peer_sicherstellen(&mut self, peer_id: &PeerId) {
        if self.peers.contains_key(peer_id) {
            return;
        }

        let (transport, transport_rx) = self.fabrik.neuer_transport();
        let (befehl_tx, befehl_rx) = mpsc::channel(self.config.peer_queue_kapazitaet);
        let link = PeerLink::neu(peer_id.clone(), transport, self.meldung_tx.clone());
        tokio::spawn(peer_link_task(link, befehl_rx, transport_rx));

        self.peers.insert(
            peer_id.clone(),
            PeerEintrag {
                befehl_tx,
                verbunden: false,
            },
        );
        tracing::debug!(peer_id = %peer_id, "Neuer PeerLink angelegt");
    }

    // -----------------------------------------------------------------------
    // Meldungen der PeerLink-Tasks
    // -----------------------------------------------------------------------

    async fn peer_meldung(&mut self, peer_id: PeerId, meldung: PeerMeldung) {
        match meldung {
            PeerMeldung::Signal(signal) => {
                self.signal_weiterleiten(peer_id, signal).await;
            }
            PeerMeldung::Verbunden => {
                if let Some(eintrag) = self.peers.get_mut(&peer_id) {
                    eintrag.verbunden = true;
                }
                tracing::info!(peer_id = %peer_id, "Peer verbunden");

                // Dem neuen Gegenueber direkt den eigenen Anzeigenamen nennen
                if let Some(name) = self.benutzername.clone() {
                    self.an_einen_senden(&peer_id, P2pMessage::Username { username: name })
                        .await;
                }
                self.feed(CircleEvent::PeerVerbunden { peer_id }).await;
            }
            PeerMeldung::Getrennt => {
                if self.peers.remove(&peer_id).is_some() {
                    tracing::info!(peer_id = %peer_id, "Peer getrennt");
                    self.feed(CircleEvent::PeerGetrennt { peer_id }).await;
                }
            }
            PeerMeldung::Fehlgeschlagen(grund) => {
                if self.peers.remove(&peer_id).is_some() {
                    tracing::warn!(peer_id = %peer_id, grund = %grund, "Verhandlung fehlgeschlagen");
                    self.feed(CircleEvent::PeerFehlgeschlagen { peer_id, grund })
                        .await;
                }
            }
            PeerMeldung::Nachricht(nachricht) => {
                self.feed(CircleEvent::PeerNachricht { peer_id, nachricht })
                    .await;
            }
        }
    }

    /// Verpackt ein Link-Signal in einen Umschlag und sendet ihn zum Relay
    async fn signal_weiterleiten(&mut self, peer_id: PeerId, signal: PeerSignal) {
        let kreis = self.aktuelle_kreis_id();
        let umschlag = match signal {
            PeerSignal::Angebot(sdp) => RelayEnvelope::angebot(kreis, peer_id, sdp),
            PeerSignal::Antwort(sdp) => RelayEnvelope::antwort(kreis, peer_id, sdp),
            PeerSignal::Kandidat(ice) => RelayEnvelope::kandidat(kreis, peer_id, ice),
        };
        if let Err(fehler) = self.relay.senden(umschlag).await {
            tracing::warn!(fehler = %fehler, "Senden an das Relay fehlgeschlagen");
        }
    }

    fn aktuelle_kreis_id(&self) -> Option<CircleId> {
        match &self.zustand {
            KreisZustand::Beigetreten(circle_id) => Some(circle_id.clone()),
            _ => None,
        }
    }

    // -----------------------------------------------------------------------
    // Befehle der Anwendung
    // -----------------------------------------------------------------------

    async fn befehl_verarbeiten(&mut self, befehl: KoordinatorBefehl) {
        match befehl {
            KoordinatorBefehl::KreisErstellen => {
                self.kreis_anfragen(RelayEnvelope::NewCircle).await;
            }
            KoordinatorBefehl::KreisBeitreten(circle_id) => {
                self.kreis_anfragen(RelayEnvelope::JoinCircle { circle_id })
                    .await;
            }
            KoordinatorBefehl::AnAlleSenden(nachricht) => {
                self.an_alle_senden(nachricht).await;
            }
            KoordinatorBefehl::BenutzernameSetzen(name) => {
                self.benutzername = Some(name.clone());
                self.an_alle_senden(P2pMessage::Username { username: name })
                    .await;
            }
            // Wird in der Hauptschleife behandelt
            KoordinatorBefehl::Schliessen => {}
        }
    }

    async fn kreis_anfragen(&mut self, anfrage: RelayEnvelope) {
        if self.zustand != KreisZustand::Leerlauf {
            tracing::warn!(zustand = ?self.zustand, "Kreis-Anfrage im falschen Zustand ignoriert");
            return;
        }

        self.zustand = KreisZustand::Anfrage;
        if let Err(fehler) = self.relay.senden(anfrage).await {
            tracing::warn!(fehler = %fehler, "Kreis-Anfrage konnte nicht gesendet werden");
            self.zustand = KreisZustand::Leerlauf;
        }
    }

    /// Reiht eine Nachricht bei allen VERBUNDENEN Links ein
    ///
    /// Links in laufender Verhandlung werden uebersprungen; es gibt keine
    /// Pufferung ueber die Verhandlung hinweg – hoehere Schichten senden
    /// ihren Zustand periodisch erneut.
    async fn an_alle_senden(&mut self, nachricht: P2pMessage) {
        for (peer_id, eintrag) in &self.peers {
            if !eintrag.verbunden {
                continue;
            }
            if eintrag
                .befehl_tx
                .send(PeerBefehl::Senden(nachricht.clone()))
                .await
                .is_err()
            {
                tracing::debug!(peer_id = %peer_id, "Peer-Task bereits beendet");
            }
        }
    }

    /// Reiht eine Nachricht bei genau einem bekannten Link ein
    async fn an_einen_senden(&mut self, peer_id: &PeerId, nachricht: P2pMessage) {
        if let Some(eintrag) = self.peers.get(peer_id) {
            if eintrag
                .befehl_tx
                .send(PeerBefehl::Senden(nachricht))
                .await
                .is_err()
            {
                tracing::debug!(peer_id = %peer_id, "Peer-Task bereits beendet");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Feed und Abbau
    // -----------------------------------------------------------------------

    async fn feed(&self, ereignis: CircleEvent) {
        if self.feed_tx.send(ereignis).await.is_err() {
            tracing::debug!("Feed-Empfaenger nicht mehr vorhanden");
        }
    }

    /// Schliesst alle PeerLinks und die Relay-Verbindung
    async fn abbauen(&mut self) {
        for (_, eintrag) in self.peers.drain() {
            let _ = eintrag.befehl_tx.send(PeerBefehl::Schliessen).await;
        }
        self.relay.schliessen().await;
        self.zustand = KreisZustand::Leerlauf;
        tracing::info!("MeshCoordinator beendet");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockFabrik, MockVerbindung};
    use crate::transport::TransportEreignis;
    use futures_util::{SinkExt, StreamExt};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::codec::Framed;
    use trommel_protocol::FrameCodec;

    /// Testaufbau: Koordinator am einen Ende einer Duplex-Leitung, der
    /// Test spielt das Relay am anderen Ende
    struct Aufbau {
        handle: MeshHandle,
        feed: mpsc::Receiver<CircleEvent>,
        relay: Framed<tokio::io::DuplexStream, FrameCodec>,
        verbindungen: Arc<Mutex<Vec<MockVerbindung>>>,
    }

    impl Aufbau {
        fn protokoll(&self, index: usize) -> Vec<String> {
            self.verbindungen.lock()[index].protokoll.lock().clone()
        }

        fn ereignis_tx(&self, index: usize) -> mpsc::Sender<TransportEreignis> {
            self.verbindungen.lock()[index].ereignis_tx.clone()
        }

        async fn naechster_umschlag(&mut self) -> RelayEnvelope {
            self.relay
                .next()
                .await
                .expect("Relay-Seite geschlossen")
                .expect("Frame-Fehler")
        }

        async fn naechstes_feed_ereignis(&mut self) -> CircleEvent {
            self.feed.recv().await.expect("Feed geschlossen")
        }

        /// Spielt den Beitritt zu einem Kreis mit den genannten Mitgliedern durch
        async fn beitreten(&mut self, kreis: &str, mitglieder: &[&str]) {
            self.handle
                .kreis_beitreten(CircleId::new(kreis))
                .await
                .unwrap();

            let anfrage = self.naechster_umschlag().await;
            assert!(matches!(anfrage, RelayEnvelope::JoinCircle { .. }));

            self.relay
                .send(RelayEnvelope::CircleDiscovery {
                    circle_id: CircleId::new(kreis),
                    members: mitglieder.iter().map(|m| PeerId::new(*m)).collect(),
                })
                .await
                .unwrap();

            let ereignis = self.naechstes_feed_ereignis().await;
            assert!(matches!(ereignis, CircleEvent::Beigetreten { .. }));
        }
    }

    fn aufbau() -> Aufbau {
        aufbau_mit(MockFabrik::neu())
    }

    fn aufbau_mit(fabrik: MockFabrik) -> Aufbau {
        protokollierung();

        let (client_seite, relay_seite) = tokio::io::duplex(64 * 1024);
        let config = MeshConfig::default();
        let verbindungen = fabrik.verbindungen();

        let relay = RelayLink::aus_stream(client_seite, config.max_frame_groesse);
        let (koordinator, handle, feed) = MeshCoordinator::neu(relay, Box::new(fabrik), config);
        tokio::spawn(koordinator.ausfuehren());

        Aufbau {
            handle,
            feed,
            relay: Framed::new(relay_seite, FrameCodec::new()),
            verbindungen,
        }
    }

    fn protokollierung() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    /// Pollt eine Bedingung bis sie zutrifft (die Peer-Tasks laufen nebenher)
    async fn warte_bis(bedingung: impl Fn() -> bool) {
        for _ in 0..200 {
            if bedingung() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("Bedingung nicht innerhalb der Frist erfuellt");
    }

    #[tokio::test]
    async fn beitritt_initiiert_verhandlung_mit_allen_mitgliedern() {
        let mut a = aufbau();
        a.beitreten("abc", &["p1", "p2"]).await;

        // Zwei Angebots-Umschlaege, je einer pro Mitglied, mit Kreis-ID
        let mut gesehen = Vec::new();
        for _ in 0..2 {
            match a.naechster_umschlag().await {
                RelayEnvelope::NewMemberRtcOffer {
                    circle_id,
                    member_id,
                    ..
                } => {
                    assert_eq!(circle_id, Some(CircleId::new("abc")));
                    gesehen.push(member_id.expect("Angebot ohne Peer-ID"));
                }
                andere => panic!("Angebot erwartet, war {:?}", andere),
            }
        }
        gesehen.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        assert_eq!(gesehen, vec![PeerId::new("p1"), PeerId::new("p2")]);

        // Genau zwei Transports wurden angelegt
        assert_eq!(a.verbindungen.lock().len(), 2);
    }

    #[tokio::test]
    async fn unbekannter_peer_wird_vor_der_pufferung_angelegt() {
        let mut a = aufbau();
        a.beitreten("abc", &[]).await;

        // Zwei Kandidaten fuer einen voellig unbekannten Peer
        for kandidat in ["k1", "k2"] {
            a.relay
                .send(RelayEnvelope::kandidat(
                    Some(CircleId::new("abc")),
                    PeerId::new("p9"),
                    kandidat.into(),
                ))
                .await
                .unwrap();
        }

        // Ein Link entsteht fuer p9 – die Kandidaten gehen nicht verloren
        warte_bis(|| a.verbindungen.lock().len() == 1).await;

        // Erst mit dem Angebot wird die Beschreibung gesetzt und gespuelt
        a.relay
            .send(RelayEnvelope::NewMemberRtcOffer {
                circle_id: Some(CircleId::new("abc")),
                member_id: Some(PeerId::new("p9")),
                sdp: "fern-angebot".into(),
            })
            .await
            .unwrap();

        // Die Antwort des Links kommt ueber das Relay zurueck
        match a.naechster_umschlag().await {
            RelayEnvelope::NewMemberRtcAnswer { member_id, .. } => {
                assert_eq!(member_id, Some(PeerId::new("p9")));
            }
            andere => panic!("Antwort erwartet, war {:?}", andere),
        }

        let protokoll = a.protokoll(0);
        let kandidaten: Vec<&String> = protokoll
            .iter()
            .filter(|e| e.starts_with("kandidat:"))
            .collect();
        assert_eq!(kandidaten, ["kandidat:k1", "kandidat:k2"]);

        let pos = |eintrag: &str| protokoll.iter().position(|e| e == eintrag).unwrap();
        assert!(
            pos("entfernt:fern-angebot") < pos("kandidat:k1"),
            "Kandidaten erst nach der Beschreibung"
        );

        // Alle drei Umschlaege betrafen denselben Link
        assert_eq!(a.verbindungen.lock().len(), 1);
    }

    #[tokio::test]
    async fn umschlag_ohne_peer_id_wird_verworfen() {
        let mut a = aufbau();
        a.beitreten("abc", &[]).await;

        a.relay
            .send(RelayEnvelope::IceCandidate {
                circle_id: Some(CircleId::new("abc")),
                member_id: None,
                ice: "verwaist".into(),
            })
            .await
            .unwrap();

        // Der Folge-Umschlag wird weiterhin normal verarbeitet
        a.relay
            .send(RelayEnvelope::NewMemberRtcOffer {
                circle_id: Some(CircleId::new("abc")),
                member_id: Some(PeerId::new("p1")),
                sdp: "fern-angebot".into(),
            })
            .await
            .unwrap();

        // Die Antwort fuer p1 belegt, dass beide Umschlaege verarbeitet sind
        let antwort = a.naechster_umschlag().await;
        assert!(matches!(antwort, RelayEnvelope::NewMemberRtcAnswer { .. }));
        assert_eq!(
            a.verbindungen.lock().len(),
            1,
            "Fuer den verwaisten Umschlag darf kein Link entstehen"
        );
    }

    #[tokio::test]
    async fn rundruf_erreicht_nur_verbundene_links() {
        let mut a = aufbau();
        a.beitreten("abc", &["p1", "p2"]).await;
        warte_bis(|| a.verbindungen.lock().len() == 2).await;

        // Nur p1 oeffnet seinen Kanal
        a.ereignis_tx(0)
            .send(TransportEreignis::KanalOffen)
            .await
            .unwrap();
        let ereignis = a.naechstes_feed_ereignis().await;
        assert!(matches!(ereignis, CircleEvent::PeerVerbunden { .. }));

        let nachricht = P2pMessage::Sound(trommel_protocol::SoundEvent::End {
            sound_id: trommel_core::SoundId::new("s1"),
        });
        a.handle.an_alle_senden(nachricht).await.unwrap();

        warte_bis(|| a.protokoll(0).iter().any(|e| e.starts_with("sende:"))).await;

        // p2 oeffnet sich erst jetzt – die Nachricht darf nie ankommen
        a.ereignis_tx(1)
            .send(TransportEreignis::KanalOffen)
            .await
            .unwrap();
        let ereignis = a.naechstes_feed_ereignis().await;
        assert!(matches!(ereignis, CircleEvent::PeerVerbunden { .. }));

        assert!(
            !a.protokoll(1).iter().any(|e| e.starts_with("sende:")),
            "Keine nachtraegliche Zustellung an spaet geoeffnete Links"
        );
    }

    #[tokio::test]
    async fn benutzername_wird_beim_verbinden_angekuendigt() {
        let mut a = aufbau();
        a.handle.benutzername_setzen("ada".into()).await.unwrap();
        a.beitreten("abc", &["p1"]).await;
        warte_bis(|| a.verbindungen.lock().len() == 1).await;

        a.ereignis_tx(0)
            .send(TransportEreignis::KanalOffen)
            .await
            .unwrap();
        let ereignis = a.naechstes_feed_ereignis().await;
        assert!(matches!(ereignis, CircleEvent::PeerVerbunden { .. }));

        warte_bis(|| {
            a.protokoll(0)
                .iter()
                .any(|e| e.starts_with("sende:") && e.contains("\"username\":\"ada\""))
        })
        .await;
    }

    #[tokio::test]
    async fn peer_nachrichten_erscheinen_auf_dem_feed() {
        let mut a = aufbau();
        a.beitreten("abc", &["p1"]).await;
        warte_bis(|| a.verbindungen.lock().len() == 1).await;

        let ereignis_tx = a.ereignis_tx(0);
        ereignis_tx.send(TransportEreignis::KanalOffen).await.unwrap();
        let ereignis = a.naechstes_feed_ereignis().await;
        assert!(matches!(ereignis, CircleEvent::PeerVerbunden { .. }));

        let text = P2pMessage::Username {
            username: "eve".into(),
        }
        .als_json()
        .unwrap();
        ereignis_tx
            .send(TransportEreignis::Nachricht(text))
            .await
            .unwrap();

        match a.naechstes_feed_ereignis().await {
            CircleEvent::PeerNachricht { peer_id, nachricht } => {
                assert_eq!(peer_id, PeerId::new("p1"));
                assert_eq!(
                    nachricht,
                    P2pMessage::Username {
                        username: "eve".into()
                    }
                );
            }
            andere => panic!("PeerNachricht erwartet, war {:?}", andere),
        }
    }

    #[tokio::test]
    async fn getrennter_peer_wird_entfernt_und_frisch_entdeckt() {
        let mut a = aufbau();
        a.beitreten("abc", &["p1"]).await;
        warte_bis(|| a.verbindungen.lock().len() == 1).await;

        a.ereignis_tx(0)
            .send(TransportEreignis::KanalGeschlossen)
            .await
            .unwrap();
        let ereignis = a.naechstes_feed_ereignis().await;
        assert!(matches!(ereignis, CircleEvent::PeerGetrennt { .. }));

        // Eine frische Entdeckung derselben ID erzeugt einen NEUEN Link
        a.relay
            .send(RelayEnvelope::kandidat(
                Some(CircleId::new("abc")),
                PeerId::new("p1"),
                "k1".into(),
            ))
            .await
            .unwrap();

        warte_bis(|| a.verbindungen.lock().len() == 2).await;
    }

    #[tokio::test]
    async fn fehlgeschlagene_verhandlung_wird_gemeldet() {
        let mut a = aufbau_mit(MockFabrik::mit_fehler_bei("create_answer"));
        a.beitreten("abc", &[]).await;

        a.relay
            .send(RelayEnvelope::NewMemberRtcOffer {
                circle_id: Some(CircleId::new("abc")),
                member_id: Some(PeerId::new("p1")),
                sdp: "fern-angebot".into(),
            })
            .await
            .unwrap();

        match a.naechstes_feed_ereignis().await {
            CircleEvent::PeerFehlgeschlagen { peer_id, grund } => {
                assert_eq!(peer_id, PeerId::new("p1"));
                assert!(grund.contains("create_answer"));
            }
            andere => panic!("PeerFehlgeschlagen erwartet, war {:?}", andere),
        }
    }

    #[tokio::test]
    async fn kreis_identitaet_ist_unveraenderlich() {
        let mut a = aufbau();
        a.handle.kreis_erstellen().await.unwrap();

        let anfrage = a.naechster_umschlag().await;
        assert!(matches!(anfrage, RelayEnvelope::NewCircle));

        a.relay
            .send(RelayEnvelope::CircleCreated {
                circle_id: CircleId::new("abc"),
            })
            .await
            .unwrap();
        match a.naechstes_feed_ereignis().await {
            CircleEvent::Beigetreten { circle_id } => assert_eq!(circle_id, CircleId::new("abc")),
            andere => panic!("Beigetreten erwartet, war {:?}", andere),
        }

        // Eine zweite Bestaetigung mit fremder ID wird ignoriert
        a.relay
            .send(RelayEnvelope::CircleCreated {
                circle_id: CircleId::new("xyz"),
            })
            .await
            .unwrap();

        // Der Koordinator verarbeitet weiterhin normal: ein Kandidat fuer
        // p1 erzeugt einen Link, dessen Signalisierung die alte ID traegt
        a.relay
            .send(RelayEnvelope::NewMemberRtcOffer {
                circle_id: Some(CircleId::new("abc")),
                member_id: Some(PeerId::new("p1")),
                sdp: "fern-angebot".into(),
            })
            .await
            .unwrap();

        match a.naechster_umschlag().await {
            RelayEnvelope::NewMemberRtcAnswer { circle_id, .. } => {
                assert_eq!(circle_id, Some(CircleId::new("abc")));
            }
            andere => panic!("Antwort erwartet, war {:?}", andere),
        }
    }

    #[tokio::test]
    async fn relay_trennung_ist_terminal() {
        let Aufbau {
            handle,
            mut feed,
            relay,
            ..
        } = aufbau();

        // Relay-Seite kappen
        drop(relay);

        let ereignis = feed.recv().await.expect("Feed geschlossen");
        assert!(matches!(ereignis, CircleEvent::RelayGetrennt));

        // Nach dem Abbau sind Handle-Aufrufe Fehler
        for _ in 0..200 {
            if handle.schliessen().await.is_err() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("Handle haette nach dem Abbau fehlschlagen muessen");
    }

    #[tokio::test]
    async fn neuer_koordinator_startet_im_leerlauf() {
        let (client_seite, _relay_seite) = tokio::io::duplex(4096);
        let config = MeshConfig::default();
        let relay = RelayLink::aus_stream(client_seite, config.max_frame_groesse);
        let (koordinator, _handle, _feed) =
            MeshCoordinator::neu(relay, Box::new(MockFabrik::neu()), config);

        assert_eq!(*koordinator.zustand(), KreisZustand::Leerlauf);
        assert_eq!(koordinator.peer_anzahl(), 0);
    }

    #[tokio::test]
    async fn doppelte_entdeckung_ist_idempotent() {
        let mut a = aufbau();
        a.beitreten("abc", &["p1"]).await;

        // Unser Angebot an p1 geht raus
        let angebot = a.naechster_umschlag().await;
        assert!(matches!(angebot, RelayEnvelope::NewMemberRtcOffer { .. }));

        // p1 antwortet; danach referenzieren weitere Umschlaege dieselbe ID
        a.relay
            .send(RelayEnvelope::antwort(
                Some(CircleId::new("abc")),
                PeerId::new("p1"),
                "fern-antwort".into(),
            ))
            .await
            .unwrap();
        for kandidat in ["k1", "k2", "k3"] {
            a.relay
                .send(RelayEnvelope::kandidat(
                    Some(CircleId::new("abc")),
                    PeerId::new("p1"),
                    kandidat.into(),
                ))
                .await
                .unwrap();
        }

        // Alle Umschlaege landen beim selben Link – es entsteht kein zweiter
        warte_bis(|| {
            a.protokoll(0)
                .iter()
                .filter(|e| e.starts_with("kandidat:"))
                .count()
                == 3
        })
        .await;
        assert_eq!(a.verbindungen.lock().len(), 1);
    }
}
