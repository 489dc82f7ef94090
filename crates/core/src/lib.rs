//! Crate voice-core - Contrôleur d'interaction vocale
//!
//! Surface principale exposée à l'interface : un `VoiceController` qui
//! pilote le client temps réel (crate `network`) et la chaîne audio
//! (crate `audio`), et publie un `VoiceState` résumé :
//!
//! - `connected`, `recording`, `processing`
//! - `transcript`, `response` (reconstruits à partir des deltas)
//! - `error` (un seul message à la fois)
//!
//! Opérations : `connect`, `start_recording`, `stop_recording`,
//! `send_text_with_context`, `clear_responses`, `disconnect`, `reconnect`.

mod error;
mod playback;
mod state;

pub mod controller;

pub use controller::VoiceController;
pub use error::{VoiceError, VoiceResult};
pub use state::{BargeInPolicy, VoiceState};

/// Tests d'intégration : scénarios complets sur transport simulé
#[cfg(test)]
mod integration_tests {
    use super::*;
    use audio::mock::MockCaptureSource;
    use network::{ClientConfig, SimulatedConnector, SimulatedServer};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_test::assert_ok;

    fn controller(connector: &Arc<SimulatedConnector>) -> VoiceController {
        VoiceController::new(
            ClientConfig::test_config(),
            connector.clone(),
            Arc::new(MockCaptureSource::with_tone(2, 0.5)),
        )
    }

    async fn connected() -> (VoiceController, SimulatedServer) {
        let connector = Arc::new(SimulatedConnector::new());
        let controller = controller(&connector);
        assert_ok!(controller.connect().await);
        let mut server = connector.next_server().unwrap();
        assert_eq!(server.recv_frame().await.unwrap()["type"], "session.update");
        (controller, server)
    }

    async fn settle(controller: &VoiceController, predicate: impl Fn(&VoiceState) -> bool) {
        let mut receiver = controller.state_receiver();
        let reached = tokio::time::timeout(Duration::from_secs(2), receiver.wait_for(|s| predicate(s)))
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false);
        assert!(reached, "état inattendu: {:?}", controller.snapshot());
    }

    #[tokio::test]
    async fn test_fresh_connection_state() {
        let (controller, _server) = connected().await;

        let state = controller.snapshot();
        assert!(state.connected);
        assert_eq!(state.transcript, "");
        assert_eq!(state.response, "");
        assert!(!state.processing);
        assert_eq!(state.error, None);
    }

    #[tokio::test]
    async fn test_text_turn_with_context() {
        let (controller, mut server) = connected().await;

        assert_ok!(
            controller
                .send_text_with_context("What's this?", Some("a spreadsheet"))
                .await
        );
        assert!(controller.snapshot().processing);

        let item = server.recv_frame().await.unwrap();
        assert_eq!(
            item["item"]["content"][0]["text"],
            "Screen Context: a spreadsheet\n\nUser: What's this?"
        );
        assert_eq!(server.recv_frame().await.unwrap()["type"], "response.create");
    }

    #[tokio::test]
    async fn test_response_deltas_then_done() {
        let (controller, server) = connected().await;
        assert_ok!(controller.send_text_with_context("Salut", None).await);

        server.push_json(json!({"type": "response.text.delta", "delta": "Hel"}));
        server.push_json(json!({"type": "response.text.delta", "delta": "lo"}));
        server.push_json(json!({"type": "response.done"}));

        settle(&controller, |s| !s.processing).await;
        assert_eq!(controller.snapshot().response, "Hello");
    }

    #[tokio::test]
    async fn test_completed_transcription_overwrites_deltas() {
        let (controller, server) = connected().await;

        server.push_json(json!({"type": "response.audio_transcript.delta", "delta": "h"}));
        server.push_json(json!({"type": "response.audio_transcript.delta", "delta": "i "}));
        server.push_json(json!({
            "type": "conversation.item.input_audio_transcription.completed",
            "transcript": "hi there"
        }));

        settle(&controller, |s| s.transcript == "hi there").await;
    }

    #[tokio::test]
    async fn test_implicit_connect_failure_prevents_recording() {
        let connector = Arc::new(SimulatedConnector::new());
        connector.refuse_connections("réseau indisponible");
        let source = MockCaptureSource::with_tone(2, 0.5);
        let probe = source.probe();
        let controller = VoiceController::new(ClientConfig::test_config(), connector.clone(), Arc::new(source));

        let err = controller.start_recording().await.unwrap_err();
        assert!(matches!(err, VoiceError::Connection(_)));
        assert_eq!(probe.opened(), 0);

        let state = controller.snapshot();
        assert!(!state.recording);
        assert!(!state.connected);
        assert!(
            state
                .error
                .as_deref()
                .is_some_and(|e| e.starts_with("Failed to connect to Realtime API: "))
        );
    }

    #[tokio::test]
    async fn test_implicit_connect_then_recording() {
        let connector = Arc::new(SimulatedConnector::new());
        let controller = controller(&connector);

        assert_ok!(controller.start_recording().await);
        let mut server = connector.next_server().unwrap();

        // Ordre filaire : configuration, vidage, puis audio
        let kinds: Vec<_> = [
            server.recv_frame().await.unwrap(),
            server.recv_frame().await.unwrap(),
            server.recv_frame().await.unwrap(),
        ]
        .iter()
        .map(|f| f["type"].as_str().unwrap_or_default().to_string())
        .collect();
        assert_eq!(
            kinds,
            ["session.update", "input_audio_buffer.clear", "input_audio_buffer.append"]
        );

        assert_ok!(controller.stop_recording().await);
        assert!(controller.snapshot().processing);
    }

    #[tokio::test]
    async fn test_server_error_keeps_connection() {
        let (controller, server) = connected().await;
        assert_ok!(controller.send_text_with_context("question", None).await);

        server.push_json(json!({
            "type": "error",
            "error": {"type": "invalid_request_error", "code": "invalid_value", "message": "Invalid input"}
        }));

        settle(&controller, |s| s.error.is_some()).await;
        let state = controller.snapshot();
        assert_eq!(state.error.as_deref(), Some("Invalid input"));
        assert!(!state.processing);
        assert!(state.connected);
        assert!(!server.client_closed());
    }

    #[tokio::test]
    async fn test_fatal_server_error_closes_session() {
        let (controller, server) = connected().await;

        server.push_json(json!({
            "type": "error",
            "error": {"code": "invalid_api_key", "message": "Incorrect API key provided"}
        }));

        settle(&controller, |s| !s.connected).await;
        assert_eq!(controller.snapshot().error.as_deref(), Some("Incorrect API key provided"));
        for _ in 0..200 {
            if server.client_closed() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(server.client_closed());
    }

    #[tokio::test]
    async fn test_null_error_message_falls_back_and_ends_turn() {
        let (controller, server) = connected().await;
        assert_ok!(controller.send_text_with_context("question", None).await);
        assert!(controller.snapshot().processing);

        server.push_json(json!({"type": "error", "error": {"message": null, "code": null}}));

        settle(&controller, |s| s.error.is_some()).await;
        let state = controller.snapshot();
        assert_eq!(state.error.as_deref(), Some("An error occurred"));
        assert!(!state.processing);
        assert!(state.connected);
    }

    #[tokio::test]
    async fn test_clear_responses_clears_error() {
        let (controller, server) = connected().await;
        server.push_json(json!({"type": "error", "error": {"message": ""}}));
        settle(&controller, |s| s.error.as_deref() == Some("An error occurred")).await;

        controller.clear_responses();
        let state = controller.snapshot();
        assert_eq!(state.error, None);
        assert_eq!(state.transcript, "");
        assert_eq!(state.response, "");
    }

    #[tokio::test]
    async fn test_text_turn_requires_connection() {
        let connector = Arc::new(SimulatedConnector::new());
        let controller = controller(&connector);

        let err = controller.send_text_with_context("hello", None).await.unwrap_err();
        assert!(matches!(err, VoiceError::NotConnected));
        assert_eq!(controller.snapshot().error.as_deref(), Some("Not connected to Realtime API"));
        assert!(!controller.snapshot().processing);
        assert_eq!(connector.connection_count(), 0);
    }
}
