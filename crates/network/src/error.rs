//! Gestion d'erreurs pour le client de protocole temps réel
//!
//! Ce module définit tous les types d'erreurs possibles côté réseau.
//! Il suit les mêmes patterns que le module audio pour la cohérence du code.
//!
//! Aucune de ces erreurs ne doit terminer le processus : elles sont
//! récupérées à la frontière du composant où elles surviennent.

use audio::AudioError;
use thiserror::Error;

/// Énumération de toutes les erreurs possibles dans le système réseau
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Le transport n'a pas pu s'ouvrir ou s'est fermé de façon inattendue
    #[error("Connexion impossible: {reason}")]
    Connection { reason: String },

    /// Envoi tenté alors que la session n'est pas active (non fatal)
    #[error("Envoi de {operation} impossible dans l'état {state}")]
    Transmission { operation: String, state: String },

    /// Opération tentée alors que la connexion n'est pas dans le bon état
    #[error("Opération {operation} invalide dans l'état {current_state}")]
    InvalidState {
        operation: String,
        current_state: String,
    },

    /// Erreur lors de la sérialisation/désérialisation des frames JSON
    #[error("Erreur de sérialisation: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Erreur du transport WebSocket
    #[error("Erreur WebSocket: {0}")]
    WebSocket(String),

    /// Audio mal formé dans une frame (la frame est ignorée)
    #[error("Erreur de codec: {0}")]
    Codec(#[from] AudioError),

    /// Configuration client invalide (clé API absente, URL invalide...)
    #[error("Configuration invalide: {0}")]
    ConfigError(String),
}

/// Conversion des erreurs tungstenite
impl From<tokio_tungstenite::tungstenite::Error> for NetworkError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        NetworkError::WebSocket(err.to_string())
    }
}

/// Type Result personnalisé pour notre crate network
pub type NetworkResult<T> = Result<T, NetworkError>;

/// Fonctions utilitaires pour créer des erreurs communes
impl NetworkError {
    /// Crée une erreur de connexion avec contexte
    pub fn connection(reason: impl Into<String>) -> Self {
        Self::Connection {
            reason: reason.into(),
        }
    }

    /// Crée une erreur d'envoi hors session active
    pub fn transmission(operation: &str, state: impl std::fmt::Display) -> Self {
        Self::Transmission {
            operation: operation.to_string(),
            state: state.to_string(),
        }
    }

    /// Crée une erreur d'état invalide
    pub fn invalid_state(operation: &str, state: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            operation: operation.to_string(),
            current_state: state.to_string(),
        }
    }

    /// Vérifie si l'erreur est récupérable sans toucher à la connexion
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            NetworkError::Transmission { .. }
                | NetworkError::Codec(_)
                | NetworkError::Serialization(_)
        )
    }

    /// Vérifie si l'erreur nécessite une reconnexion (nouveau client)
    pub fn requires_reconnection(&self) -> bool {
        matches!(
            self,
            NetworkError::Connection { .. } | NetworkError::WebSocket(_)
        )
    }
}
