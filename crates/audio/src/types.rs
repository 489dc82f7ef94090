//! Types de données pour le système audio
//!
//! - AudioFrame : bloc d'échantillons flottants (capture ou lecture)
//! - PlaybackStats : compteurs de la lecture

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::codec;

/// Durée exacte (à la nanoseconde près) de `sample_count` échantillons mono
pub fn samples_to_duration(sample_count: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(sample_count as u64 * 1_000_000_000 / sample_rate as u64)
}

/// Type pour un échantillon audio
///
/// Valeurs entre -1.0 et +1.0, 0.0 = silence
pub type Sample = f32;

/// Frame d'audio brute (non compressée)
///
/// Exemple pour 20ms à 24kHz mono : 480 échantillons
#[derive(Clone, Debug, PartialEq)]
pub struct AudioFrame {
    /// Les échantillons audio bruts (mono)
    pub samples: Vec<Sample>,

    /// Timestamp de création de cette frame
    pub timestamp: Instant,

    /// Numéro de séquence attribué par la source (capture ou décodage)
    pub sequence_number: u64,
}

impl AudioFrame {
    /// Crée une nouvelle frame audio
    ///
    /// # Example
    /// ```rust
    /// use audio::AudioFrame;
    ///
    /// let frame = AudioFrame::new(vec![0.1, 0.2, -0.1, 0.0], 42);
    /// assert_eq!(frame.len(), 4);
    /// ```
    pub fn new(samples: Vec<Sample>, sequence_number: u64) -> Self {
        Self {
            samples,
            timestamp: Instant::now(),
            sequence_number,
        }
    }

    /// Crée une frame de silence
    pub fn silence(sample_count: usize, sequence_number: u64) -> Self {
        Self::new(vec![0.0; sample_count], sequence_number)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Durée de la frame pour une fréquence d'échantillonnage donnée
    pub fn duration(&self, sample_rate: u32) -> Duration {
        samples_to_duration(self.samples.len(), sample_rate)
    }

    /// Vérifie si cette frame est essentiellement silencieuse
    pub fn is_silence(&self, threshold: f32) -> bool {
        self.samples.iter().all(|&sample| sample.abs() < threshold)
    }

    /// Calcule le niveau sonore RMS (Root Mean Square)
    pub fn rms_level(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }

        let sum_squares: f32 = self.samples.iter().map(|&s| s * s).sum();

        (sum_squares / self.samples.len() as f32).sqrt()
    }

    /// Convertit la frame en échantillons 16 bits prêts pour l'envoi
    pub fn to_pcm16(&self) -> Vec<i16> {
        codec::float_to_int16(&self.samples)
    }
}

/// Statistiques de lecture pour le monitoring
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybackStats {
    /// Chunks acceptés par la sortie
    pub chunks_scheduled: u64,

    /// Échantillons acceptés par la sortie
    pub samples_scheduled: u64,

    /// Chunks dont la sortie a échoué (non fatal)
    pub device_errors: u64,

    /// Nombre de remises à zéro de la timeline
    pub resets: u64,
}

impl PlaybackStats {
    /// Remet les statistiques à zéro
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_frame_creation() {
        let samples = vec![0.1, -0.2, 0.3, 0.0];
        let frame = AudioFrame::new(samples.clone(), 42);

        assert_eq!(frame.samples, samples);
        assert_eq!(frame.sequence_number, 42);
        assert!(frame.timestamp.elapsed().as_millis() < 100);
    }

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::silence(480, 0);
        assert_eq!(frame.duration(24_000), Duration::from_millis(20));
        assert!(frame.is_silence(0.01));
    }

    #[test]
    fn test_rms_calculation() {
        let frame = AudioFrame::new(vec![0.5, -0.5, 0.5, -0.5], 1);
        assert!((frame.rms_level() - 0.5).abs() < 0.001);
        assert_eq!(AudioFrame::new(vec![], 0).rms_level(), 0.0);
    }
}
