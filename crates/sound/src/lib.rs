//! trommel-sound – Klang-Lebenszyklus
//!
//! Verbraucht Synthese-Ereignisse (lokal vom UI, entfernt vom Feed des
//! Koordinators) und verwaltet daraus die aktiven Klang-Instanzen samt
//! Lebenszeichen-Fristen. Die eigentliche Klangerzeugung (DSP, Geraete)
//! liegt hinter dem Befehls-Kanal und ist nicht Teil dieses Crates.

pub mod error;
pub mod freqs;
pub mod machine;

// Bequeme Re-Exporte der wichtigsten Typen
pub use error::{SoundError, SoundResult};
pub use freqs::{tonleiter_erzeugen, Note, NoteName, Tonleiter};
pub use machine::{KlangHerkunft, KlangStatistik, SoundMachine, SynthBefehl, STANDARD_FENSTER};
