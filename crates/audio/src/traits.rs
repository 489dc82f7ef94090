//! Traits abstraits pour le système audio
//!
//! Ce module définit les interfaces (traits) que doivent implémenter
//! tous les composants audio. Les implémentations cpal et les doublures
//! de test (`mock`) sont interchangeables derrière ces traits.

use std::time::Duration;

use async_trait::async_trait;

use crate::{AudioError, AudioFrame, AudioResult};

/// Trait pour capturer l'audio depuis un périphérique d'entrée
///
/// Implémentations :
/// - CpalCapture : Implémentation avec la librairie cpal
/// - MockCapture : Implémentation factice pour les tests
///
/// `#[async_trait]` permet d'avoir des fonctions async dans les traits.
/// `Send` indique que l'objet peut être transféré entre threads.
#[async_trait]
pub trait AudioCapture: Send + Sync {
    /// Démarre la capture audio
    ///
    /// # Erreurs
    /// - `AudioError::NoDeviceFound` : Aucun microphone trouvé
    /// - `AudioError::Capture` : Accès au microphone refusé
    async fn start(&mut self) -> AudioResult<()>;

    /// Arrête la capture audio et libère le microphone
    ///
    /// Doit être idempotent : le contrôleur l'appelle sur tous les chemins de sortie.
    async fn stop(&mut self) -> AudioResult<()>;

    /// Récupère le prochain bloc audio (mono, format du protocole)
    ///
    /// # Erreurs
    /// - `AudioError::DeviceDisconnected` : Microphone débranché
    ///
    /// # Example
    /// ```rust,no_run
    /// use audio::{AudioCapture, CpalCapture, AudioConfig};
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let mut capture = CpalCapture::new(AudioConfig::default())?;
    ///
    /// capture.start().await?;
    /// let frame = capture.next_frame().await?;
    /// println!("Reçu bloc de {} échantillons", frame.samples.len());
    /// capture.stop().await?;
    /// # Ok(())
    /// # }
    /// ```
    async fn next_frame(&mut self) -> AudioResult<AudioFrame>;

    /// Vérifie si la capture est active
    fn is_recording(&self) -> bool;

    /// Retourne des informations sur le périphérique utilisé
    fn device_info(&self) -> String {
        "Périphérique inconnu".to_string()
    }
}

/// Fournisseur de captures : ouvre un flux microphone pour un tour de parole
///
/// Le contrôleur vocal acquiert une capture à chaque `start_recording`
/// et la relâche à la fin du tour.
pub trait CaptureSource: Send + Sync {
    /// Ouvre une nouvelle capture (non démarrée)
    ///
    /// # Erreurs
    /// - `AudioError::NoDeviceFound` / `AudioError::Capture`
    fn open(&self) -> AudioResult<Box<dyn AudioCapture>>;
}

/// Trait pour jouer l'audio sur un périphérique de sortie
#[async_trait]
pub trait AudioPlayback: Send + Sync {
    /// Démarre la lecture audio
    async fn start(&mut self) -> AudioResult<()>;

    /// Arrête la lecture audio
    async fn stop(&mut self) -> AudioResult<()>;

    /// Met une frame en queue pour lecture
    ///
    /// La frame est jouée à la suite des précédentes, sans trou.
    ///
    /// # Erreurs
    /// - `AudioError::BufferOverflow` : Tampon plein, frame rejetée
    /// - `AudioError::DeviceDisconnected` : Haut-parleurs débranchés
    async fn play_frame(&mut self, frame: AudioFrame) -> AudioResult<()>;

    /// Vérifie si la lecture est active
    fn is_playing(&self) -> bool;

    /// Nombre d'échantillons en attente de lecture
    fn buffer_level(&self) -> usize;

    /// Vide le tampon de lecture
    async fn flush_buffer(&mut self) -> AudioResult<()> {
        Ok(())
    }

    /// Retourne des informations sur le périphérique de sortie
    fn device_info(&self) -> String {
        "Périphérique de sortie inconnu".to_string()
    }
}

/// Horloge de la sortie audio, utilisée pour positionner les chunks
///
/// Retourne le temps écoulé depuis une origine arbitraire mais fixe.
pub trait PlaybackClock: Send + Sync {
    fn now(&self) -> Duration;
}

/// Trait pour les dispositifs audio factices (tests)
pub trait MockAudioDevice: Send + Sync {
    /// Configure le dispositif factice avec des données de test
    fn set_test_data(&mut self, frames: Vec<AudioFrame>);

    /// Simule une erreur de périphérique (consommée au prochain appel)
    fn simulate_error(&mut self, error: AudioError);

    /// Active/désactive la simulation de latence
    fn set_simulated_latency(&mut self, latency_ms: u32);
}
