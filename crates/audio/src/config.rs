//! Configuration audio du client vocal
//!
//! Le format filaire est imposé par le service distant : 24 kHz, mono, PCM16.
//! Les autres paramètres règlent la taille des blocs capturés et les limites
//! de mise en tampon côté lecture.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Fréquence d'échantillonnage imposée par le protocole
pub const WIRE_SAMPLE_RATE: u32 = 24_000;

/// Nombre de canaux imposé par le protocole
pub const WIRE_CHANNELS: u16 = 1;

/// Configuration principale pour tout le système audio
///
/// `#[derive(Serialize, Deserialize)]` : Permet de sauvegarder/charger depuis un fichier
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Fréquence d'échantillonnage en Hz
    ///
    /// 24000 Hz est la seule valeur acceptée par le service.
    pub sample_rate: u32,

    /// Nombre de canaux audio (mono pour le protocole)
    pub channels: u16,

    /// Durée de chaque bloc capturé en millisecondes
    ///
    /// 20ms à 24 kHz = 480 échantillons par bloc
    pub frame_duration_ms: u16,

    /// Nombre de blocs capturés pouvant attendre l'envoi
    ///
    /// Au-delà, le callback cpal jette les blocs plutôt que de bloquer.
    pub capture_queue_frames: usize,

    /// Quantité maximale d'audio en attente de lecture (ms)
    pub max_playback_buffer_ms: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: WIRE_SAMPLE_RATE,
            channels: WIRE_CHANNELS,
            frame_duration_ms: 20,
            capture_queue_frames: 32,
            max_playback_buffer_ms: 10_000,
        }
    }
}

impl AudioConfig {
    /// Calcule le nombre d'échantillons par bloc
    ///
    /// Formule : (sample_rate * frame_duration_ms) / 1000
    /// Exemple : (24000 * 20) / 1000 = 480 échantillons
    pub fn samples_per_frame(&self) -> usize {
        (self.sample_rate as usize * self.frame_duration_ms as usize) / 1000
    }

    /// Durée d'un bloc capturé
    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(self.frame_duration_ms as u64)
    }

    /// Durée couverte par `sample_count` échantillons mono
    pub fn duration_of(&self, sample_count: usize) -> Duration {
        crate::types::samples_to_duration(sample_count, self.sample_rate)
    }

    /// Capacité du tampon de lecture en échantillons
    pub fn playback_capacity_samples(&self) -> usize {
        (self.sample_rate as usize * self.max_playback_buffer_ms as usize) / 1000
    }

    /// Valide que la configuration est compatible avec le protocole
    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate != WIRE_SAMPLE_RATE {
            return Err(format!(
                "Sample rate invalide: {} (le protocole impose {} Hz)",
                self.sample_rate, WIRE_SAMPLE_RATE
            ));
        }

        if self.channels != WIRE_CHANNELS {
            return Err(format!(
                "Nombre de canaux invalide: {} (le protocole impose du mono)",
                self.channels
            ));
        }

        if self.frame_duration_ms < 10 || self.frame_duration_ms > 100 {
            return Err(format!(
                "Durée de bloc invalide: {}ms (doit être entre 10 et 100)",
                self.frame_duration_ms
            ));
        }

        if self.capture_queue_frames == 0 {
            return Err("La file de capture doit contenir au moins un bloc".to_string());
        }

        if self.max_playback_buffer_ms < self.frame_duration_ms as u32 {
            return Err(format!(
                "Tampon de lecture trop petit: {}ms (minimum un bloc de {}ms)",
                self.max_playback_buffer_ms, self.frame_duration_ms
            ));
        }

        Ok(())
    }

    /// Configuration avec des blocs plus courts pour réduire la latence d'envoi
    pub fn low_latency() -> Self {
        Self {
            frame_duration_ms: 10,
            capture_queue_frames: 64,
            ..Default::default()
        }
    }

    /// Configuration avec des blocs plus longs (moins de frames sur le socket)
    pub fn batched() -> Self {
        Self {
            frame_duration_ms: 100,
            capture_queue_frames: 8,
            ..Default::default()
        }
    }
}
