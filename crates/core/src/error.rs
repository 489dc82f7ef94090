//! Erreurs du contrôleur vocal
//!
//! Les messages `Display` de `NotConnected`, `Connection` et `Capture` sont
//! ceux affichés à l'utilisateur via `VoiceState::error`.

use network::NetworkError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    /// Tour textuel demandé sans session active
    #[error("Not connected to Realtime API")]
    NotConnected,

    /// Nouveau tour refusé par `BargeInPolicy::Reject`
    #[error("Un tour est déjà en cours de traitement")]
    TurnInFlight,

    /// Échec de la connexion (explicite ou implicite)
    #[error("Failed to connect to Realtime API: {0}")]
    Connection(String),

    /// Microphone inaccessible
    #[error("Failed to access microphone: {0}")]
    Capture(String),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

pub type VoiceResult<T> = Result<T, VoiceError>;
