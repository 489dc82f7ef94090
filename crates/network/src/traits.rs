//! Traits abstraits pour le transport
//!
//! Le client de protocole ne connaît que ces interfaces. Deux implémentations :
//! - `WebSocketConnector` : vrai WebSocket TLS (tokio-tungstenite)
//! - `SimulatedConnector` : transport en mémoire piloté par les tests

use async_trait::async_trait;

use crate::{ClientConfig, NetworkResult};

/// Message brut reçu du transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportFrame {
    /// Frame texte (JSON)
    Text(String),
    /// Frame binaire (non utilisée par le protocole)
    Binary(Vec<u8>),
    /// Fermeture initiée par le pair, avec raison éventuelle
    Closed(Option<String>),
}

/// Moitié émission d'un transport ouvert
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Envoie une frame texte
    ///
    /// # Erreurs
    /// - `NetworkError::WebSocket` / `NetworkError::Connection` si le transport est rompu
    async fn send_text(&mut self, text: String) -> NetworkResult<()>;

    /// Ferme le transport ; appeler plusieurs fois est sans effet
    async fn close(&mut self) -> NetworkResult<()>;
}

/// Moitié réception d'un transport ouvert
#[async_trait]
pub trait FrameSource: Send {
    /// Attend la prochaine frame ; `None` quand le flux est terminé
    async fn next_frame(&mut self) -> Option<NetworkResult<TransportFrame>>;
}

/// Transport ouvert, séparé en deux moitiés indépendantes
pub struct TransportHandle {
    pub outbound: Box<dyn FrameSink>,
    pub inbound: Box<dyn FrameSource>,
}

/// Fabrique de transports
///
/// Chaque appel à `open` produit un transport neuf, possédé exclusivement
/// par le client qui l'a demandé.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Ouvre un transport et attend la fin de la poignée de main
    ///
    /// # Erreurs
    /// - `NetworkError::Connection` si l'ouverture échoue
    async fn open(&self, config: &ClientConfig) -> NetworkResult<TransportHandle>;

    /// Nom pour les logs
    fn name(&self) -> &'static str {
        "transport"
    }
}
