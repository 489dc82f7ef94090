//! Client du protocole de session temps réel
//!
//! `RealtimeClient` possède une connexion persistante et exclusive :
//! - `connect()` ouvre le transport puis envoie `session.update`, strictement
//!   avant toute autre frame
//! - les envois (`send_audio`, `commit_audio`, `clear_audio`, `send_text`) ne
//!   sont valides qu'en `Active` ; sinon ils échouent immédiatement sans
//!   changer l'état
//! - une tâche de lecture parse chaque frame reçue et la republie sur l'`EventBus`
//!
//! Cycle de vie : `Idle → Connecting → Active → Closed`, sans retour depuis
//! `Closed`. La politique de reconnexion appartient à l'appelant, qui crée
//! un nouveau client.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use audio::codec::{decode_pcm16, int16_to_float};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::protocol::{ClientFrame, ServerFrame, format_user_message};
use crate::{
    ClientConfig, ClientStats, Connector, EventBus, FrameSink, FrameSource, InboundEvent,
    NetworkError, NetworkResult, SessionState, TransportFrame, TransportHandle,
};

type SharedSink = Arc<tokio::sync::Mutex<Option<Box<dyn FrameSink>>>>;

/// État partagé entre le client et sa tâche de lecture
struct Shared {
    session_id: u32,
    state: Mutex<SessionState>,
    stats: Mutex<ClientStats>,
    disconnect_published: AtomicBool,
    bus: Arc<EventBus>,
    sink: SharedSink,
}

impl Shared {
    /// Passe en `Closed` et retourne l'état précédent
    fn close_state(&self) -> SessionState {
        std::mem::replace(&mut *self.state.lock(), SessionState::Closed)
    }

    /// Publie `Disconnected` une seule fois par session
    fn publish_disconnected(&self, reason: Option<String>) {
        if self.disconnect_published.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(session_id = self.session_id, reason = ?reason, "🔌 Session fermée");
        self.bus.publish(&InboundEvent::Disconnected {
            session_id: self.session_id,
            reason,
        });
    }

    fn drop_frame(&self, reason: String) {
        self.stats.lock().frames_dropped += 1;
        warn!(session_id = self.session_id, %reason, "Frame entrante ignorée");
        self.bus.publish(&InboundEvent::FrameDropped { reason });
    }

    async fn close_sink(&self) {
        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            if let Err(e) = sink.close().await {
                debug!(session_id = self.session_id, error = %e, "Fermeture du transport incomplète");
            }
        }
    }
}

/// Client du protocole temps réel
pub struct RealtimeClient {
    config: Arc<ClientConfig>,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeClient {
    /// Crée un client inactif (`Idle`)
    ///
    /// # Arguments
    /// * `config` - Configuration (clé, modèle, configuration de session)
    /// * `connector` - Fabrique de transport (WebSocket ou simulé)
    /// * `bus` - Bus sur lequel les événements entrants sont publiés
    pub fn new(config: Arc<ClientConfig>, connector: Arc<dyn Connector>, bus: Arc<EventBus>) -> Self {
        Self {
            config,
            connector,
            shared: Arc::new(Shared {
                session_id: fastrand::u32(..),
                state: Mutex::new(SessionState::Idle),
                stats: Mutex::new(ClientStats::default()),
                disconnect_published: AtomicBool::new(false),
                bus,
                sink: Arc::new(tokio::sync::Mutex::new(None)),
            }),
            reader: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> u32 {
        self.shared.session_id
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.lock()
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    pub fn stats(&self) -> ClientStats {
        self.shared.stats.lock().clone()
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.shared.bus
    }

    /// Ouvre la connexion et envoie la configuration de session
    ///
    /// Se termine quand la poignée de main est faite et `session.update` envoyé.
    ///
    /// # Erreurs
    /// - `NetworkError::InvalidState` si le client n'est pas `Idle`
    /// - `NetworkError::Connection` si le transport ne s'ouvre pas (le client passe en `Closed`)
    pub async fn connect(&self) -> NetworkResult<()> {
        {
            let mut state = self.shared.state.lock();
            if *state != SessionState::Idle {
                return Err(NetworkError::invalid_state("connect", *state));
            }
            *state = SessionState::Connecting;
        }

        let session_id = self.shared.session_id;
        info!(session_id, transport = self.connector.name(), model = %self.config.model, "🚀 Connexion au service temps réel");

        let TransportHandle {
            mut outbound,
            inbound,
        } = match self.connector.open(&self.config).await {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.close_state();
                warn!(session_id, error = %e, "❌ Échec de connexion");
                return Err(match e {
                    NetworkError::Connection { .. } => e,
                    other => NetworkError::connection(other.to_string()),
                });
            }
        };

        // disconnect() pendant la poignée de main : rien ne part sur ce transport
        if self.state() != SessionState::Connecting {
            let _ = outbound.close().await;
            info!(session_id, "Connexion abandonnée pendant la poignée de main");
            return Err(NetworkError::connection("déconnecté pendant la connexion"));
        }

        let update = ClientFrame::SessionUpdate {
            session: self.config.session.clone(),
        };
        let sent = match update.to_json() {
            Ok(json) => outbound.send_text(json).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            self.shared.close_state();
            let _ = outbound.close().await;
            warn!(session_id, error = %e, "❌ Envoi de session.update impossible");
            return Err(NetworkError::connection(format!("session.update: {e}")));
        }

        let mut sink = self.shared.sink.lock().await;
        let still_connecting = {
            let mut state = self.shared.state.lock();
            if *state == SessionState::Connecting {
                *state = SessionState::Active;
                true
            } else {
                false
            }
        };
        if !still_connecting {
            drop(sink);
            let _ = outbound.close().await;
            return Err(NetworkError::connection("déconnecté pendant la connexion"));
        }
        *sink = Some(outbound);
        drop(sink);

        {
            let mut stats = self.shared.stats.lock();
            stats.frames_sent += 1;
            stats.connected_at = Some(Instant::now());
        }

        let shared = Arc::clone(&self.shared);
        *self.reader.lock() = Some(tokio::spawn(read_loop(inbound, shared)));

        info!(session_id, "✅ Session active");
        Ok(())
    }

    /// Ferme le transport et le libère ; idempotent
    pub async fn disconnect(&self) -> NetworkResult<()> {
        let previous = self.shared.close_state();
        self.shared.close_sink().await;

        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }

        if matches!(previous, SessionState::Active | SessionState::Connecting) {
            self.shared
                .publish_disconnected(Some("déconnexion demandée".to_string()));
        }
        Ok(())
    }

    /// Envoie un bloc audio PCM16 (`input_audio_buffer.append`)
    ///
    /// Hors session active : aucun envoi, erreur `Transmission` non fatale.
    pub async fn send_audio(&self, samples: &[i16]) -> NetworkResult<()> {
        if samples.is_empty() {
            return Ok(());
        }
        self.send_frame(ClientFrame::append_audio(samples)).await?;
        self.shared.stats.lock().audio_bytes_sent += samples.len() as u64 * 2;
        Ok(())
    }

    /// Clôt l'énoncé en cours (`input_audio_buffer.commit`)
    pub async fn commit_audio(&self) -> NetworkResult<()> {
        self.send_frame(ClientFrame::InputAudioCommit).await
    }

    /// Vide l'audio non validé côté serveur (`input_audio_buffer.clear`)
    pub async fn clear_audio(&self) -> NetworkResult<()> {
        self.send_frame(ClientFrame::InputAudioClear).await
    }

    /// Envoie un message utilisateur puis demande une réponse
    ///
    /// Avec contexte, le contenu est `"Screen Context: {context}\n\nUser: {text}"`.
    pub async fn send_text(&self, text: &str, context: Option<&str>) -> NetworkResult<()> {
        let content = format_user_message(text, context);
        self.send_frame(ClientFrame::user_text(content)).await?;
        self.send_frame(ClientFrame::ResponseCreate).await
    }

    async fn send_frame(&self, frame: ClientFrame) -> NetworkResult<()> {
        let kind = frame.kind();
        let state = self.state();
        if !state.is_active() {
            warn!(session_id = self.shared.session_id, kind, %state, "Envoi ignoré : session inactive");
            return Err(NetworkError::transmission(kind, state));
        }

        let json = frame.to_json()?;
        let mut sink = self.shared.sink.lock().await;
        let Some(sink) = sink.as_mut() else {
            return Err(NetworkError::transmission(kind, self.state()));
        };

        sink.send_text(json).await.inspect_err(|e| {
            warn!(session_id = self.shared.session_id, kind, error = %e, "Envoi échoué");
        })?;

        self.shared.stats.lock().frames_sent += 1;
        trace!(session_id = self.shared.session_id, kind, "Frame envoyée");
        Ok(())
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

/// Boucle de lecture : une frame reçue = un événement publié
async fn read_loop(mut inbound: Box<dyn FrameSource>, shared: Arc<Shared>) {
    let (reason, fatal) = loop {
        match inbound.next_frame().await {
            None => break (Some("flux terminé".to_string()), false),
            Some(Err(e)) => {
                warn!(session_id = shared.session_id, error = %e, "Erreur de transport");
                break (Some(e.to_string()), false);
            }
            Some(Ok(TransportFrame::Closed(reason))) => {
                break (reason.or_else(|| Some("fermé par le serveur".to_string())), false);
            }
            Some(Ok(TransportFrame::Binary(bytes))) => {
                shared.drop_frame(format!("frame binaire inattendue ({} octets)", bytes.len()));
            }
            Some(Ok(TransportFrame::Text(text))) => {
                shared.stats.lock().frames_received += 1;
                if let Some(message) = dispatch_text(&shared, &text) {
                    break (Some(message), true);
                }
            }
        }
    };

    // Publication avant tout point d'attente : un disconnect() concurrent
    // peut annuler la tâche sur le verrou du transport
    shared.close_state();
    shared.publish_disconnected(reason);

    if fatal {
        shared.close_sink().await;
    } else {
        shared.sink.lock().await.take();
    }
}

/// Classe une frame texte et publie l'événement correspondant
///
/// Retourne `Some(message)` si la frame impose la fermeture de la session.
fn dispatch_text(shared: &Shared, text: &str) -> Option<String> {
    let frame = match ServerFrame::parse(text) {
        Ok(frame) => frame,
        Err(e) => {
            shared.drop_frame(format!("JSON invalide: {e}"));
            return None;
        }
    };

    let bus = &shared.bus;
    match frame {
        ServerFrame::AudioDelta { delta, response_id } => match decode_pcm16(&delta) {
            Ok(pcm) => {
                let samples = int16_to_float(&pcm);
                let count = samples.len();
                shared.stats.lock().audio_deltas_received += 1;
                bus.publish(&InboundEvent::AudioDelta {
                    samples,
                    response_id: response_id.clone(),
                });
                bus.publish(&InboundEvent::AudioPlaying {
                    samples: count,
                    response_id,
                });
            }
            Err(e) => shared.drop_frame(format!("audio invalide: {e}")),
        },
        ServerFrame::AudioTranscriptDelta { delta } => {
            bus.publish(&InboundEvent::TranscriptDelta { delta });
        }
        ServerFrame::TextDelta { delta } => {
            bus.publish(&InboundEvent::TextDelta { delta });
        }
        ServerFrame::ResponseDone { response } => {
            bus.publish(&InboundEvent::ResponseDone {
                response_id: response.and_then(|r| r.id),
            });
        }
        ServerFrame::SpeechStarted { .. } => {
            bus.publish(&InboundEvent::SpeechStarted);
        }
        ServerFrame::SpeechStopped { .. } => {
            bus.publish(&InboundEvent::SpeechStopped);
        }
        ServerFrame::TranscriptionCompleted { transcript } => {
            bus.publish(&InboundEvent::TranscriptionCompleted { transcript });
        }
        ServerFrame::Error { error } => {
            shared.stats.lock().server_errors += 1;
            error!(
                session_id = shared.session_id,
                code = error.code_or_unknown(),
                message = error.display_message(),
                "Erreur signalée par le serveur"
            );
            let fatal = error.is_fatal().then(|| error.display_message().to_string());
            bus.publish(&InboundEvent::Error(error));
            return fatal;
        }
        ServerFrame::Unknown => {
            trace!(session_id = shared.session_id, "Frame serveur non gérée ignorée");
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EventKind, SimulatedConnector, SimulatedServer};
    use serde_json::json;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    struct Harness {
        client: RealtimeClient,
        connector: Arc<SimulatedConnector>,
        events: Arc<StdMutex<Vec<InboundEvent>>>,
    }

    fn harness() -> Harness {
        let connector = Arc::new(SimulatedConnector::new());
        let bus = Arc::new(EventBus::new());
        let events = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        bus.subscribe_all(move |event| {
            sink.lock().unwrap().push(event.clone());
            Ok(())
        });

        let client = RealtimeClient::new(
            Arc::new(ClientConfig::test_config()),
            connector.clone(),
            bus,
        );
        Harness {
            client,
            connector,
            events,
        }
    }

    async fn connected() -> (Harness, SimulatedServer) {
        let h = harness();
        assert_ok!(h.client.connect().await);
        let mut server = h.connector.next_server().unwrap();
        let first = server.recv_frame().await.unwrap();
        assert_eq!(first["type"], "session.update");
        (h, server)
    }

    async fn wait_for<F: Fn(&[InboundEvent]) -> bool>(events: &StdMutex<Vec<InboundEvent>>, predicate: F) {
        for _ in 0..200 {
            if predicate(&events.lock().unwrap()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("événement attendu non reçu: {:?}", events.lock().unwrap());
    }

    async fn wait_client_closed(server: &SimulatedServer) {
        for _ in 0..200 {
            if server.client_closed() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("transport client jamais fermé");
    }

    #[tokio::test]
    async fn test_connect_sends_session_update_first() {
        let (h, mut server) = connected().await;
        assert_eq!(h.client.state(), SessionState::Active);

        assert_ok!(h.client.send_audio(&[0, 1]).await);
        assert_eq!(server.recv_frame().await.unwrap()["type"], "input_audio_buffer.append");
        assert_eq!(h.client.stats().frames_sent, 2);
        assert_eq!(h.client.stats().audio_bytes_sent, 4);
    }

    #[tokio::test]
    async fn test_connect_twice_is_rejected() {
        let (h, _server) = connected().await;
        let err = h.client.connect().await.unwrap_err();
        assert!(matches!(err, NetworkError::InvalidState { .. }));
        assert_eq!(h.connector.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_handshake_failure_closes_client() {
        let h = harness();
        h.connector.refuse_connections("refusé");

        let err = h.client.connect().await.unwrap_err();
        assert!(matches!(err, NetworkError::Connection { .. }));
        assert_eq!(h.client.state(), SessionState::Closed);

        // Pas de retour depuis Closed
        h.connector.accept_connections();
        assert_err!(h.client.connect().await);
    }

    #[tokio::test]
    async fn test_send_while_idle_is_non_fatal() {
        let h = harness();

        let err = h.client.send_audio(&[1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, NetworkError::Transmission { .. }));
        assert!(err.is_recoverable());
        assert_err!(h.client.commit_audio().await);
        assert_err!(h.client.send_text("x", None).await);
        assert_eq!(h.client.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_send_text_with_context() {
        let (h, mut server) = connected().await;

        assert_ok!(h.client.send_text("What's this?", Some("a spreadsheet")).await);

        let item = server.recv_frame().await.unwrap();
        assert_eq!(item["type"], "conversation.item.create");
        assert_eq!(
            item["item"]["content"][0]["text"],
            "Screen Context: a spreadsheet\n\nUser: What's this?"
        );
        assert_eq!(server.recv_frame().await.unwrap()["type"], "response.create");
    }

    #[tokio::test]
    async fn test_control_frames() {
        let (h, mut server) = connected().await;

        assert_ok!(h.client.clear_audio().await);
        assert_ok!(h.client.commit_audio().await);
        assert_eq!(server.recv_frame().await.unwrap(), json!({"type": "input_audio_buffer.clear"}));
        assert_eq!(server.recv_frame().await.unwrap(), json!({"type": "input_audio_buffer.commit"}));
    }

    #[tokio::test]
    async fn test_inbound_frames_are_published_in_order() {
        let (h, server) = connected().await;

        server.push_json(json!({"type": "input_audio_buffer.speech_started", "audio_start_ms": 10}));
        server.push_json(json!({"type": "response.audio_transcript.delta", "delta": "Bon"}));
        server.push_json(json!({"type": "response.text.delta", "delta": "jour"}));
        server.push_json(json!({"type": "session.created", "session": {}}));
        server.push_json(json!({"type": "response.done", "response": {"id": "resp_1"}}));

        wait_for(&h.events, |e| e.iter().any(|ev| ev.kind() == EventKind::ResponseDone)).await;
        let events = h.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                InboundEvent::SpeechStarted,
                InboundEvent::TranscriptDelta { delta: "Bon".into() },
                InboundEvent::TextDelta { delta: "jour".into() },
                InboundEvent::ResponseDone { response_id: Some("resp_1".into()) },
            ]
        );
    }

    #[tokio::test]
    async fn test_audio_delta_is_decoded() {
        let (h, server) = connected().await;

        // [0x0000, 0x4000] -> [0.0, 0.5]
        server.push_json(json!({"type": "response.audio.delta", "delta": "AAAAQA==", "response_id": "r1"}));

        wait_for(&h.events, |e| e.iter().any(|ev| ev.kind() == EventKind::AudioPlaying)).await;
        let events = h.events.lock().unwrap().clone();
        assert_eq!(
            events[0],
            InboundEvent::AudioDelta {
                samples: vec![0.0, 0.5],
                response_id: Some("r1".into())
            }
        );
        assert_eq!(
            events[1],
            InboundEvent::AudioPlaying {
                samples: 2,
                response_id: Some("r1".into())
            }
        );
        assert_eq!(h.client.stats().audio_deltas_received, 1);
    }

    #[tokio::test]
    async fn test_malformed_frames_are_dropped_and_session_continues() {
        let (h, server) = connected().await;

        server.push_text("{pas du json");
        server.push_json(json!({"type": "response.audio.delta", "delta": "AQ=="}));
        server.push_json(json!({"type": "response.text.delta", "delta": "ok"}));

        wait_for(&h.events, |e| e.iter().any(|ev| ev.kind() == EventKind::TextDelta)).await;
        let dropped = h
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|ev| ev.kind() == EventKind::FrameDropped)
            .count();
        assert_eq!(dropped, 2);
        assert_eq!(h.client.stats().frames_dropped, 2);
        assert!(h.client.is_active());
    }

    #[tokio::test]
    async fn test_non_fatal_error_keeps_connection() {
        let (h, server) = connected().await;

        server.push_json(json!({"type": "error", "error": {"code": "invalid_value", "message": "Bad input"}}));
        wait_for(&h.events, |e| e.iter().any(|ev| ev.kind() == EventKind::Error)).await;

        assert!(h.client.is_active());
        assert!(!server.client_closed());
        assert_eq!(h.client.stats().server_errors, 1);
    }

    #[tokio::test]
    async fn test_fatal_error_closes_session() {
        let (h, server) = connected().await;

        server.push_json(json!({"type": "error", "error": {"code": "session_expired", "message": "Expired"}}));
        wait_for(&h.events, |e| e.iter().any(|ev| ev.kind() == EventKind::Disconnected)).await;

        assert_eq!(h.client.state(), SessionState::Closed);
        wait_client_closed(&server).await;
        let events = h.events.lock().unwrap().clone();
        assert!(matches!(events[0], InboundEvent::Error(_)));
        assert_eq!(
            events[1],
            InboundEvent::Disconnected {
                session_id: h.client.session_id(),
                reason: Some("Expired".into())
            }
        );
    }

    #[tokio::test]
    async fn test_server_close_publishes_disconnected_once() {
        let (h, server) = connected().await;

        server.close(Some("bye"));
        wait_for(&h.events, |e| !e.is_empty()).await;
        assert_eq!(h.client.state(), SessionState::Closed);

        assert_ok!(h.client.disconnect().await);
        let count = h
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|ev| ev.kind() == EventKind::Disconnected)
            .count();
        assert_eq!(count, 1);
        assert_err!(h.client.send_audio(&[1]).await);
    }

    #[tokio::test]
    async fn test_server_close_is_published_while_transport_is_busy() {
        let (h, server) = connected().await;

        // Verrou du transport tenu : la tâche de lecture ne peut pas le libérer
        let guard = h.client.shared.sink.lock().await;
        server.close(Some("bye"));
        wait_for(&h.events, |e| e.iter().any(|ev| ev.kind() == EventKind::Disconnected)).await;
        assert_eq!(h.client.state(), SessionState::Closed);
        drop(guard);

        assert_ok!(h.client.disconnect().await);
        let count = h
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|ev| ev.kind() == EventKind::Disconnected)
            .count();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_disconnect_during_handshake_sends_nothing() {
        let h = harness();
        h.connector.set_open_delay(Duration::from_millis(50));
        let client = Arc::new(h.client);

        let connecting = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.connect().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(client.state(), SessionState::Connecting);
        assert_ok!(client.disconnect().await);

        let result = connecting.await.unwrap();
        assert!(matches!(result, Err(NetworkError::Connection { .. })));
        assert_eq!(client.state(), SessionState::Closed);

        let mut server = h.connector.next_server().unwrap();
        assert!(server.drain_frames().is_empty());
        assert!(server.client_closed());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (h, server) = connected().await;

        assert_ok!(h.client.disconnect().await);
        assert_ok!(h.client.disconnect().await);
        assert!(server.client_closed());
        assert_eq!(h.client.state(), SessionState::Closed);

        let disconnects: Vec<_> = h
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|ev| ev.kind() == EventKind::Disconnected)
            .cloned()
            .collect();
        assert_eq!(disconnects.len(), 1);
    }
}
