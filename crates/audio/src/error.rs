//! Gestion d'erreurs pour le système audio
//!
//! Ce module définit les erreurs de la chaîne audio : périphériques cpal,
//! conversion PCM16 et encodage base64 pour le transport.

use thiserror::Error;

/// Énumération de toutes les erreurs possibles dans le système audio
///
/// `thiserror::Error` génère automatiquement l'implémentation du trait Error
/// et nous permet de définir des messages d'erreur avec `#[error("...")]`
#[derive(Error, Debug)]
pub enum AudioError {
    /// Aucun périphérique audio (microphone ou haut-parleurs) n'a été trouvé
    #[error("Aucun périphérique audio trouvé")]
    NoDeviceFound,

    /// Erreur lors de la configuration des paramètres audio (sample rate, etc.)
    #[error("Erreur de configuration audio: {0}")]
    ConfigError(String),

    /// Erreur provenant de la librairie cpal au démarrage d'un stream
    #[error("Erreur cpal: {0}")]
    CpalError(#[from] cpal::PlayStreamError),

    /// Données audio mal formées (base64 invalide, nombre d'octets impair...)
    ///
    /// La frame concernée est rejetée entière, jamais tronquée.
    #[error("Erreur de codec PCM16: {0}")]
    Codec(String),

    /// Échec du rééchantillonnage d'un bloc
    #[error("Erreur de rééchantillonnage: {0}")]
    Resample(String),

    /// Impossible d'acquérir ou de lire le microphone
    #[error("Erreur de capture: {0}")]
    Capture(String),

    /// Le buffer de lecture est plein - le chunk est rejeté
    #[error("Buffer overflow - {pending} échantillons en attente (max {capacity})")]
    BufferOverflow { pending: usize, capacity: usize },

    /// Le périphérique audio a été débranché pendant l'utilisation
    #[error("Périphérique audio déconnecté")]
    DeviceDisconnected,

    /// Erreur lors de l'initialisation d'un composant
    #[error("Erreur d'initialisation: {0}")]
    InitializationError(String),
}

impl AudioError {
    /// Crée une erreur de codec avec contexte
    pub fn codec(reason: impl Into<String>) -> Self {
        Self::Codec(reason.into())
    }

    /// Crée une erreur de capture avec contexte
    pub fn capture(reason: impl Into<String>) -> Self {
        Self::Capture(reason.into())
    }

    /// Indique si l'erreur concerne le périphérique (sortie dégradée mais session intacte)
    pub fn is_device_error(&self) -> bool {
        matches!(
            self,
            AudioError::NoDeviceFound
                | AudioError::CpalError(_)
                | AudioError::DeviceDisconnected
                | AudioError::BufferOverflow { .. }
        )
    }
}

/// Conversion des erreurs base64 vers AudioError
impl From<base64::DecodeError> for AudioError {
    fn from(err: base64::DecodeError) -> Self {
        AudioError::Codec(format!("base64 invalide: {}", err))
    }
}

/// Conversion des erreurs cpal::BuildStreamError
impl From<cpal::BuildStreamError> for AudioError {
    fn from(err: cpal::BuildStreamError) -> Self {
        AudioError::ConfigError(format!("Erreur construction stream: {:?}", err))
    }
}

/// Conversion des erreurs cpal::DefaultStreamConfigError
impl From<cpal::DefaultStreamConfigError> for AudioError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        AudioError::ConfigError(format!("Erreur config par défaut: {:?}", err))
    }
}

/// Conversion des erreurs cpal::PauseStreamError
impl From<cpal::PauseStreamError> for AudioError {
    fn from(err: cpal::PauseStreamError) -> Self {
        AudioError::ConfigError(format!("Erreur pause stream: {:?}", err))
    }
}

/// Conversion des erreurs de construction du rééchantillonneur
impl From<rubato::ResamplerConstructionError> for AudioError {
    fn from(err: rubato::ResamplerConstructionError) -> Self {
        AudioError::ConfigError(format!("Rééchantillonneur invalide: {}", err))
    }
}

/// Conversion des erreurs de rééchantillonnage
impl From<rubato::ResampleError> for AudioError {
    fn from(err: rubato::ResampleError) -> Self {
        AudioError::Resample(err.to_string())
    }
}

/// Type Result personnalisé pour notre crate
pub type AudioResult<T> = Result<T, AudioError>;
