//! Crate network - Client du protocole de session vocale temps réel
//!
//! Ce crate parle au service temps réel via une connexion WebSocket persistante :
//! configuration de session, envoi d'audio PCM16 et de messages textuels,
//! réception des deltas audio/texte et des signaux du détecteur de parole.
//!
//! # Architecture
//!
//! - `error` : Gestion d'erreurs avec types spécialisés réseau
//! - `types` : États de session, configurations, statistiques
//! - `protocol` : Frames JSON client/serveur (discriminées par `type`)
//! - `events` : Événements entrants typés et `EventBus`
//! - `traits` : Abstractions du transport (`Connector`, `FrameSink`, `FrameSource`)
//! - `transport` : WebSocket réel et transport simulé pour les tests
//! - `client` : `RealtimeClient`, cycle de vie et dispatch des frames
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use network::{ClientConfig, EventBus, EventKind, InboundEvent, RealtimeClient, WebSocketConnector};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = Arc::new(EventBus::new());
//! bus.subscribe(EventKind::TextDelta, |event| {
//!     if let InboundEvent::TextDelta { delta } = event {
//!         print!("{delta}");
//!     }
//!     Ok(())
//! });
//!
//! let client = RealtimeClient::new(
//!     Arc::new(ClientConfig::from_env()?),
//!     Arc::new(WebSocketConnector::new()),
//!     bus,
//! );
//! client.connect().await?;
//! client.send_text("Que vois-tu ?", Some("un tableur")).await?;
//! // ... les deltas arrivent via l'EventBus
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

// Modules internes
mod error;
mod types;
mod traits;

pub mod client;
pub mod events;
pub mod protocol;
pub mod transport;

// Re-exports publics
pub use error::{NetworkError, NetworkResult};

pub use types::{
    ClientConfig, ClientStats, InputAudioTranscription, SessionConfig, SessionState,
    TurnDetection, DEFAULT_ENDPOINT, DEFAULT_INSTRUCTIONS, DEFAULT_MODEL,
};

pub use traits::{Connector, FrameSink, FrameSource, TransportFrame, TransportHandle};

pub use client::RealtimeClient;
pub use events::{DispatchOutcome, EventBus, EventKind, Handler, InboundEvent, SubscriptionId};
pub use protocol::{ClientFrame, ServerError, ServerFrame};
pub use transport::{SimulatedConnector, SimulatedServer, WebSocketConnector};

/// Version du crate network
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Fonctions utilitaires pour l'affichage
pub mod utils {
    use std::time::Duration;

    /// Formate une durée de façon lisible
    ///
    /// # Example
    /// ```rust
    /// use network::utils;
    /// use std::time::Duration;
    ///
    /// assert_eq!(utils::format_duration(Duration::from_millis(1234)), "1.23s");
    /// assert_eq!(utils::format_duration(Duration::from_millis(56)), "56ms");
    /// ```
    pub fn format_duration(duration: Duration) -> String {
        let ms = duration.as_millis();
        if ms >= 1000 {
            format!("{:.2}s", ms as f64 / 1000.0)
        } else {
            format!("{ms}ms")
        }
    }

    /// Formate une taille en octets
    ///
    /// # Example
    /// ```rust
    /// use network::utils;
    ///
    /// assert_eq!(utils::format_bytes(1536), "1.5 KB");
    /// assert_eq!(utils::format_bytes(500), "500 B");
    /// ```
    pub fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB"];

        let mut size = bytes as f64;
        let mut unit = 0;
        while size >= 1024.0 && unit < UNITS.len() - 1 {
            size /= 1024.0;
            unit += 1;
        }

        if unit == 0 {
            format!("{bytes} {}", UNITS[0])
        } else {
            format!("{size:.1} {}", UNITS[unit])
        }
    }
}

/// Tests d'intégration du crate complet
#[cfg(test)]
mod integration_tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_full_text_turn_over_simulated_transport() {
        let connector = Arc::new(SimulatedConnector::new());
        let bus = Arc::new(EventBus::new());

        let text = Arc::new(parking_lot::Mutex::new(String::new()));
        let done = Arc::new(AtomicUsize::new(0));
        {
            let text = Arc::clone(&text);
            bus.subscribe(EventKind::TextDelta, move |event| {
                if let InboundEvent::TextDelta { delta } = event {
                    text.lock().push_str(delta);
                }
                Ok(())
            });
            let done = Arc::clone(&done);
            bus.subscribe(EventKind::ResponseDone, move |_| {
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        let client = RealtimeClient::new(Arc::new(ClientConfig::test_config()), connector.clone(), bus);
        client.connect().await.unwrap();
        let mut server = connector.next_server().unwrap();

        client.send_text("Résume l'écran", None).await.unwrap();
        let kinds: Vec<_> = [
            server.recv_frame().await.unwrap(),
            server.recv_frame().await.unwrap(),
            server.recv_frame().await.unwrap(),
        ]
        .iter()
        .map(|frame| frame["type"].as_str().unwrap_or_default().to_string())
        .collect();
        assert_eq!(kinds, ["session.update", "conversation.item.create", "response.create"]);

        server.push_json(json!({"type": "response.text.delta", "delta": "Un "}));
        server.push_json(json!({"type": "response.text.delta", "delta": "tableur"}));
        server.push_json(json!({"type": "response.done", "response": {"id": "r", "status": "completed"}}));

        for _ in 0..200 {
            if done.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(*text.lock(), "Un tableur");

        let stats = client.stats();
        assert_eq!(stats.frames_sent, 3);
        assert_eq!(stats.frames_received, 3);

        client.disconnect().await.unwrap();
        assert!(client.state().is_closed());
    }

    #[test]
    fn test_session_update_wire_shape() {
        let frame = ClientFrame::SessionUpdate {
            session: SessionConfig::default(),
        };
        let value: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({
                "type": "session.update",
                "session": {
                    "modalities": ["text", "audio"],
                    "instructions": DEFAULT_INSTRUCTIONS,
                    "voice": "alloy",
                    "input_audio_format": "pcm16",
                    "output_audio_format": "pcm16",
                    "input_audio_transcription": {"model": "whisper-1"},
                    "turn_detection": {
                        "type": "server_vad",
                        "threshold": 0.5,
                        "prefix_padding_ms": 300,
                        "silence_duration_ms": 500
                    }
                }
            })
        );
    }

    #[test]
    fn test_utility_functions() {
        assert_eq!(utils::format_duration(Duration::from_millis(1500)), "1.50s");
        assert_eq!(utils::format_bytes(2048), "2.0 KB");
    }
}
