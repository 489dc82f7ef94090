//! Crate audio du client vocal temps réel
//!
//! Ce crate gère toute la chaîne audio locale :
//! - Conversion PCM16 et encodage base64 pour le transport (`codec`)
//! - Capture microphone avec cpal, adaptée au format 24 kHz mono (`capture`)
//! - Séquencement sans trou des réponses vocales (`sequencer`)
//! - Lecture audio avec cpal (`playback`)
//! - Doublures de test sans matériel (`mock`)

pub mod config; // Configuration audio
pub mod types; // Types de données (AudioFrame, PlaybackStats...)
pub mod traits; // Traits abstraits
pub mod codec; // PCM16 + base64
pub mod convert; // Downmix et rééchantillonnage
pub mod capture; // Implémentation capture avec cpal
pub mod playback; // Implémentation lecture avec cpal
pub mod sequencer; // Planification des chunks de lecture
pub mod mock; // Périphériques factices
pub mod error; // Gestion d'erreurs

// Réexports pour faciliter l'utilisation
pub use config::*;
pub use error::*;
pub use traits::*;
pub use types::*;

// Réexports des implémentations principales
pub use capture::{CpalCapture, CpalCaptureSource};
pub use playback::CpalPlayback;
pub use sequencer::{MonotonicClock, PlaybackSequencer, ScheduledChunk};

#[cfg(test)]
mod integration_tests {
    use super::*;
    use crate::mock::{ManualClock, MockCaptureSource, MockPlayback};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_test::assert_ok;

    /// Bloc capturé -> PCM16 -> base64 -> PCM16 -> flottants -> séquenceur
    #[tokio::test]
    async fn test_capture_to_playback_path() {
        let source = MockCaptureSource::with_tone(3, 0.5);
        let mut capture = assert_ok!(source.open());
        assert_ok!(capture.start().await);

        let clock = ManualClock::new();
        let playback = MockPlayback::new();
        let mut sequencer =
            PlaybackSequencer::new(Box::new(playback.clone()), Arc::new(clock.clone()), 24_000);

        let mut last_end = Duration::ZERO;
        for _ in 0..3 {
            let frame = assert_ok!(capture.next_frame().await);
            let wire = codec::encode_pcm16(&frame.to_pcm16());
            let decoded = codec::int16_to_float(&assert_ok!(codec::decode_pcm16(&wire)));
            assert_eq!(decoded, vec![0.5; 480]);

            let chunk = assert_ok!(sequencer.enqueue(decoded).await);
            assert_eq!(chunk.start, last_end);
            last_end = chunk.end();
        }

        assert_ok!(capture.stop().await);
        assert!(!source.probe().is_active());
        assert_eq!(playback.played_samples(), 1440);
        assert_eq!(last_end, Duration::from_millis(60));
    }
}
