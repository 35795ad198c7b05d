//! SoundMachine – Lebenszyklus der aktiven Klang-Instanzen
//!
//! Die Maschine verbraucht Synthese-Ereignisse und uebersetzt sie in
//! Befehle an den Synthese-Thread (crossbeam-Kanal, analog zur
//! Steuerung eines Audio-Threads). Sie selbst erzeugt keinen Klang.
//!
//! ## Lebenszeichen-Modell
//! Ein `Play` aktualisiert eine laufende Instanz oder erzeugt sie, falls
//! noch keine mit dieser ID existiert – das erzeugende Ereignis kann auf
//! dem Transport verloren gegangen sein. Entfernte Instanzen verfallen,
//! wenn innerhalb der Frist kein weiteres Update eintrifft; jedes Update
//! setzt die Frist neu. Das kompensiert verlorene `End`-Ereignisse.
//! Lokale Instanzen enden ausschliesslich durch ein explizites `End`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Sender, TrySendError};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;
use trommel_core::SoundId;
use trommel_protocol::{Instrument, SoundEvent};

use crate::error::{SoundError, SoundResult};

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Frist ohne Lebenszeichen, nach der ein entfernter Klang beendet wird
pub const STANDARD_FENSTER: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Befehle und Statistik
// ---------------------------------------------------------------------------

/// Herkunft eines Synthese-Ereignisses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KlangHerkunft {
    /// Vom lokalen UI erzeugt
    Lokal,
    /// Von einem Peer ueber das Netz empfangen
    Entfernt,
}

/// Befehle an den Synthese-Thread
#[derive(Debug, Clone, PartialEq)]
pub enum SynthBefehl {
    /// Neue gehaltene Stimme anlegen
    StimmeErzeugen {
        sound_id: SoundId,
        instrument: Instrument,
        freq: f32,
        gain: f32,
    },
    /// Frequenz/Lautstaerke einer laufenden Stimme nachfuehren
    StimmeAktualisieren {
        sound_id: SoundId,
        freq: f32,
        gain: f32,
    },
    /// Stimme beenden
    StimmeStoppen { sound_id: SoundId },
    /// Einmalklang ohne Lebensdauer-Verwaltung anstossen
    Einmalklang {
        sound_id: SoundId,
        instrument: Instrument,
        gain: f32,
    },
}

/// Statistiken der Klangmaschine (Snapshot)
#[derive(Debug, Clone, Default)]
pub struct KlangStatistik {
    /// Aktuell aktive Instanzen
    pub aktiv: usize,
    /// Insgesamt erzeugte Instanzen
    pub erzeugt: u64,
    /// Insgesamt beendete Instanzen
    pub beendet: u64,
    /// Davon ueber die Lebenszeichen-Frist beendet
    pub frist_abgelaufen: u64,
}

// ---------------------------------------------------------------------------
// SoundMachine
// ---------------------------------------------------------------------------

/// Eine aktive Klang-Instanz
struct AktiverKlang {
    entfernt: bool,
    /// Verfallszeitpunkt; None fuer lokale Instanzen
    frist: Option<Instant>,
}

/// Verwaltet aktive Klaenge und ihre Lebenszeichen-Fristen
pub struct SoundMachine {
    befehl_tx: Sender<SynthBefehl>,
    aktive: HashMap<SoundId, AktiverKlang>,
    fenster: Duration,
    statistik: Arc<RwLock<KlangStatistik>>,
}

impl SoundMachine {
    /// Erstellt eine Maschine mit der Standard-Frist
    pub fn neu(befehl_tx: Sender<SynthBefehl>) -> Self {
        Self::mit_fenster(befehl_tx, STANDARD_FENSTER)
    }

    /// Erstellt eine Maschine mit eigener Lebenszeichen-Frist
    pub fn mit_fenster(befehl_tx: Sender<SynthBefehl>, fenster: Duration) -> Self {
        Self {
            befehl_tx,
            aktive: HashMap::new(),
            fenster,
            statistik: Arc::new(RwLock::new(KlangStatistik::default())),
        }
    }

    /// Gibt die Anzahl aktiver Instanzen zurueck
    pub fn aktive_anzahl(&self) -> usize {
        self.aktive.len()
    }

    /// Gibt true zurueck wenn mindestens eine Instanz klingt
    pub fn spielt(&self) -> bool {
        !self.aktive.is_empty()
    }

    /// Gibt einen Statistik-Snapshot zurueck
    pub fn statistik(&self) -> KlangStatistik {
        self.statistik.read().clone()
    }

    /// Verarbeitet ein einzelnes Synthese-Ereignis
    pub fn ereignis_verarbeiten(
        &mut self,
        herkunft: KlangHerkunft,
        ereignis: SoundEvent,
    ) -> SoundResult<()> {
        match ereignis {
            SoundEvent::Play {
                sound_id,
                instrument,
                freq,
                gain,
            } => self.spielen(herkunft, sound_id, instrument, freq, gain),
            SoundEvent::End { sound_id } => self.stoppen(&sound_id, false),
            SoundEvent::Sample {
                sound_id,
                instrument,
                gain,
            } => self.befehl(SynthBefehl::Einmalklang {
                sound_id,
                instrument,
                gain,
            }),
        }
    }

    fn spielen(
        &mut self,
        herkunft: KlangHerkunft,
        sound_id: SoundId,
        instrument: Instrument,
        freq: f32,
        gain: f32,
    ) -> SoundResult<()> {
        let jetzt = Instant::now();

        if let Some(klang) = self.aktive.get_mut(&sound_id) {
            // Jedes Update setzt die Frist eines entfernten Klangs neu
            if klang.entfernt {
                klang.frist = Some(jetzt + self.fenster);
            }
            return self.befehl(SynthBefehl::StimmeAktualisieren {
                sound_id,
                freq,
                gain,
            });
        }

        // Keine Instanz mit dieser ID: das erzeugende Ereignis ist verloren
        // gegangen oder der Klang wurde bereits ueber die Frist beendet –
        // dann wird aus dem Update neu erzeugt
        let entfernt = herkunft == KlangHerkunft::Entfernt;
        self.aktive.insert(
            sound_id.clone(),
            AktiverKlang {
                entfernt,
                frist: entfernt.then(|| jetzt + self.fenster),
            },
        );
        {
            let mut statistik = self.statistik.write();
            statistik.erzeugt += 1;
            statistik.aktiv = self.aktive.len();
        }
        self.befehl(SynthBefehl::StimmeErzeugen {
            sound_id,
            instrument,
            freq,
            gain,
        })
    }

    fn stoppen(&mut self, sound_id: &SoundId, abgelaufen: bool) -> SoundResult<()> {
        if self.aktive.remove(sound_id).is_none() {
            // End fuer eine unbekannte Instanz: das erzeugende Ereignis ist
            // nie angekommen – nichts zu tun
            tracing::debug!(sound_id = %sound_id, "End fuer unbekannten Klang ignoriert");
            return Ok(());
        }

        {
            let mut statistik = self.statistik.write();
            statistik.beendet += 1;
            if abgelaufen {
                statistik.frist_abgelaufen += 1;
            }
            statistik.aktiv = self.aktive.len();
        }
        self.befehl(SynthBefehl::StimmeStoppen {
            sound_id: sound_id.clone(),
        })
    }

    /// Gibt den fruehesten Verfallszeitpunkt zurueck
    pub fn naechste_frist(&self) -> Option<Instant> {
        self.aktive.values().filter_map(|klang| klang.frist).min()
    }

    /// Beendet alle Instanzen deren Frist erreicht ist
    ///
    /// Gibt die Anzahl der beendeten Instanzen zurueck.
    pub fn fristen_pruefen(&mut self, jetzt: Instant) -> SoundResult<usize> {
        let abgelaufen: Vec<SoundId> = self
            .aktive
            .iter()
            .filter(|(_, klang)| klang.frist.is_some_and(|frist| frist <= jetzt))
            .map(|(sound_id, _)| sound_id.clone())
            .collect();

        for sound_id in &abgelaufen {
            tracing::warn!(sound_id = %sound_id, "Lebenszeichen-Frist abgelaufen – Klang wird beendet");
            self.stoppen(sound_id, true)?;
        }
        Ok(abgelaufen.len())
    }

    /// Treibt die Maschine: verarbeitet Ereignisse und wacht ueber Fristen
    ///
    /// Endet wenn der Ereignis-Strom schliesst oder das Synthese-Backend
    /// nicht mehr erreichbar ist.
    pub async fn ausfuehren(mut self, mut ereignisse: mpsc::Receiver<(KlangHerkunft, SoundEvent)>) {
        loop {
            let ergebnis = tokio::select! {
                ereignis = ereignisse.recv() => match ereignis {
                    Some((herkunft, ereignis)) => self.ereignis_verarbeiten(herkunft, ereignis),
                    None => break,
                },
                _ = frist_abwarten(self.naechste_frist()) => {
                    self.fristen_pruefen(Instant::now()).map(|_| ())
                }
            };

            if let Err(fehler) = ergebnis {
                tracing::warn!(fehler = %fehler, "Klangmaschine beendet");
                break;
            }
        }
    }

    fn befehl(&self, befehl: SynthBefehl) -> SoundResult<()> {
        match self.befehl_tx.try_send(befehl) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                // Echtzeit-Semantik: der naechste Wert gewinnt ohnehin
                tracing::warn!("Synthese-Queue voll – Befehl verworfen");
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(SoundError::BackendGetrennt),
        }
    }
}

// ---------------------------------------------------------------------------
// Hilfsfunktionen
// ---------------------------------------------------------------------------

async fn frist_abwarten(frist: Option<Instant>) {
    match frist {
        Some(frist) => tokio::time::sleep_until(frist).await,
        None => std::future::pending::<()>().await,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{bounded, Receiver};

    fn maschine() -> (SoundMachine, Receiver<SynthBefehl>) {
        let (befehl_tx, befehle) = bounded(64);
        (SoundMachine::neu(befehl_tx), befehle)
    }

    fn spiel_ereignis(id: &str, freq: f32, gain: f32) -> SoundEvent {
        SoundEvent::Play {
            sound_id: SoundId::new(id),
            instrument: Instrument::Sine,
            freq,
            gain,
        }
    }

    #[test]
    fn play_erzeugt_stimme() {
        let (mut m, befehle) = maschine();
        m.ereignis_verarbeiten(KlangHerkunft::Lokal, spiel_ereignis("s1", 440.0, 0.5))
            .unwrap();

        assert!(matches!(
            befehle.try_recv().unwrap(),
            SynthBefehl::StimmeErzeugen { .. }
        ));
        assert_eq!(m.aktive_anzahl(), 1);
        assert!(m.spielt());
    }

    #[test]
    fn play_aktualisiert_bestehende_stimme() {
        let (mut m, befehle) = maschine();
        m.ereignis_verarbeiten(KlangHerkunft::Lokal, spiel_ereignis("s1", 440.0, 0.5))
            .unwrap();
        befehle.try_recv().unwrap();

        m.ereignis_verarbeiten(KlangHerkunft::Lokal, spiel_ereignis("s1", 523.25, 0.8))
            .unwrap();
        match befehle.try_recv().unwrap() {
            SynthBefehl::StimmeAktualisieren { freq, gain, .. } => {
                assert_eq!(freq, 523.25);
                assert_eq!(gain, 0.8);
            }
            andere => panic!("Aktualisierung erwartet, war {:?}", andere),
        }
        assert_eq!(m.aktive_anzahl(), 1, "Kein Duplikat angelegt");
    }

    #[test]
    fn end_stoppt_stimme() {
        let (mut m, befehle) = maschine();
        m.ereignis_verarbeiten(KlangHerkunft::Lokal, spiel_ereignis("s1", 440.0, 0.5))
            .unwrap();
        befehle.try_recv().unwrap();

        m.ereignis_verarbeiten(
            KlangHerkunft::Lokal,
            SoundEvent::End {
                sound_id: SoundId::new("s1"),
            },
        )
        .unwrap();

        assert!(matches!(
            befehle.try_recv().unwrap(),
            SynthBefehl::StimmeStoppen { .. }
        ));
        assert_eq!(m.aktive_anzahl(), 0);
        assert!(!m.spielt());
    }

    #[test]
    fn end_fuer_unbekannte_stimme_ist_harmlos() {
        let (mut m, befehle) = maschine();
        m.ereignis_verarbeiten(
            KlangHerkunft::Entfernt,
            SoundEvent::End {
                sound_id: SoundId::new("nie-gesehen"),
            },
        )
        .unwrap();

        assert!(befehle.try_recv().is_err(), "Kein Befehl fuer Unbekannte");
    }

    #[test]
    fn sample_ist_einmalklang() {
        let (mut m, befehle) = maschine();
        m.ereignis_verarbeiten(
            KlangHerkunft::Entfernt,
            SoundEvent::Sample {
                sound_id: SoundId::new("s1"),
                instrument: Instrument::Kick,
                gain: 1.0,
            },
        )
        .unwrap();

        assert!(matches!(
            befehle.try_recv().unwrap(),
            SynthBefehl::Einmalklang { .. }
        ));
        assert_eq!(m.aktive_anzahl(), 0, "Einmalklaenge werden nicht verwaltet");
    }

    #[tokio::test(start_paused = true)]
    async fn entfernte_stimme_verfaellt_ohne_lebenszeichen() {
        let (mut m, befehle) = maschine();
        m.ereignis_verarbeiten(KlangHerkunft::Entfernt, spiel_ereignis("s1", 440.0, 1.0))
            .unwrap();

        // Updates alle 3 Sekunden halten die Stimme am Leben
        for _ in 0..4 {
            tokio::time::advance(Duration::from_secs(3)).await;
            m.ereignis_verarbeiten(KlangHerkunft::Entfernt, spiel_ereignis("s1", 440.0, 1.0))
                .unwrap();
            assert_eq!(m.fristen_pruefen(Instant::now()).unwrap(), 0);
        }
        assert_eq!(m.aktive_anzahl(), 1, "Stimme lebt trotz 12 Sekunden Laufzeit");

        // Ohne weitere Updates verfaellt sie erst nach Ablauf der Frist
        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(m.fristen_pruefen(Instant::now()).unwrap(), 0);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(m.fristen_pruefen(Instant::now()).unwrap(), 1);
        assert_eq!(m.aktive_anzahl(), 0);

        let alle: Vec<SynthBefehl> = befehle.try_iter().collect();
        assert!(matches!(
            alle.last(),
            Some(SynthBefehl::StimmeStoppen { .. })
        ));
        assert_eq!(m.statistik().frist_abgelaufen, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn lokale_stimme_hat_keine_frist() {
        let (mut m, _befehle) = maschine();
        m.ereignis_verarbeiten(KlangHerkunft::Lokal, spiel_ereignis("s1", 440.0, 1.0))
            .unwrap();

        assert!(m.naechste_frist().is_none());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(m.fristen_pruefen(Instant::now()).unwrap(), 0);
        assert_eq!(m.aktive_anzahl(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn verspaetetes_update_erzeugt_stimme_neu() {
        let (mut m, befehle) = maschine();
        m.ereignis_verarbeiten(KlangHerkunft::Entfernt, spiel_ereignis("s1", 440.0, 1.0))
            .unwrap();

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(m.fristen_pruefen(Instant::now()).unwrap(), 1);

        // Ein Nachzuegler-Update erzeugt die Instanz neu statt zu verpuffen
        m.ereignis_verarbeiten(KlangHerkunft::Entfernt, spiel_ereignis("s1", 440.0, 1.0))
            .unwrap();
        assert_eq!(m.aktive_anzahl(), 1);

        let alle: Vec<SynthBefehl> = befehle.try_iter().collect();
        assert!(matches!(
            alle.last(),
            Some(SynthBefehl::StimmeErzeugen { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn ausfuehren_beendet_abgelaufene_stimmen() {
        let (befehl_tx, befehle) = bounded(64);
        let (ereignis_tx, ereignis_rx) = mpsc::channel(16);
        let maschine = SoundMachine::neu(befehl_tx);
        let aufgabe = tokio::spawn(maschine.ausfuehren(ereignis_rx));

        ereignis_tx
            .send((KlangHerkunft::Entfernt, spiel_ereignis("s1", 440.0, 1.0)))
            .await
            .unwrap();

        // Maschine das Ereignis verarbeiten lassen
        let mut erzeugt = false;
        for _ in 0..100 {
            if let Ok(SynthBefehl::StimmeErzeugen { .. }) = befehle.try_recv() {
                erzeugt = true;
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(erzeugt, "StimmeErzeugen erwartet");

        // Frist verstreichen lassen – die Schleife beendet die Stimme selbst
        tokio::time::advance(STANDARD_FENSTER).await;
        let mut gestoppt = false;
        for _ in 0..100 {
            if let Ok(SynthBefehl::StimmeStoppen { .. }) = befehle.try_recv() {
                gestoppt = true;
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(gestoppt, "StimmeStoppen erwartet");

        // Ohne Ereignis-Strom endet die Schleife
        drop(ereignis_tx);
        aufgabe.await.unwrap();
    }

    #[test]
    fn backend_trennung_ist_fehler() {
        let (befehl_tx, befehle) = bounded(64);
        let mut m = SoundMachine::neu(befehl_tx);
        drop(befehle);

        let ergebnis =
            m.ereignis_verarbeiten(KlangHerkunft::Lokal, spiel_ereignis("s1", 440.0, 1.0));
        assert!(matches!(ergebnis, Err(SoundError::BackendGetrennt)));
    }
}
