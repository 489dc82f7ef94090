//! Contrôleur d'interaction vocale
//!
//! Traduit les intentions de l'interface (parler, arrêter, envoyer du texte)
//! en opérations du protocole, et résume les événements du bus en un
//! `VoiceState` observable.
//!
//! Ressources possédées :
//! - au plus un `RealtimeClient` vivant ; un client fermé est remplacé par
//!   un neuf à la connexion suivante
//! - le microphone, acquis pour la durée d'un tour vocal seulement et
//!   toujours relâché par la tâche de capture à sa sortie
//! - la tâche de lecture optionnelle (`with_playback`)

use std::sync::Arc;

use audio::{AudioCapture, AudioError, CaptureSource, PlaybackSequencer, PlaybackStats};
use network::{ClientConfig, ClientStats, Connector, EventBus, EventKind, InboundEvent, RealtimeClient};
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::playback::{PlaybackCommand, PlaybackHandle};
use crate::{BargeInPolicy, VoiceError, VoiceResult, VoiceState};

/// Tour vocal en cours : la tâche de capture et son signal d'arrêt
struct RecordingTurn {
    stop: oneshot::Sender<()>,
    /// Retourne le nombre de blocs envoyés
    task: JoinHandle<usize>,
}

impl RecordingTurn {
    /// Arrête l'envoi et attend que le micro soit relâché
    async fn finish(self) -> usize {
        let _ = self.stop.send(());
        match self.task.await {
            Ok(sent) => sent,
            Err(e) => {
                warn!(error = %e, "Tâche de capture interrompue");
                0
            }
        }
    }
}

/// Contrôleur vocal
///
/// # Example
/// ```rust,no_run
/// use std::sync::Arc;
/// use audio::{AudioConfig, CpalCaptureSource};
/// use network::{ClientConfig, WebSocketConnector};
/// use voice_core::VoiceController;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let controller = VoiceController::new(
///     ClientConfig::from_env()?,
///     Arc::new(WebSocketConnector::new()),
///     Arc::new(CpalCaptureSource::new(AudioConfig::default())),
/// );
///
/// controller.start_recording().await?; // connexion implicite
/// tokio::time::sleep(std::time::Duration::from_secs(3)).await;
/// controller.stop_recording().await?;
///
/// let mut state = controller.state_receiver();
/// state.wait_for(|s| !s.processing).await?;
/// println!("{}", controller.snapshot().response);
/// # Ok(())
/// # }
/// ```
pub struct VoiceController {
    config: Arc<ClientConfig>,
    connector: Arc<dyn Connector>,
    capture: Arc<dyn CaptureSource>,
    bus: Arc<EventBus>,
    state: Arc<watch::Sender<VoiceState>>,
    client: Mutex<Option<Arc<RealtimeClient>>>,
    turn: Mutex<Option<RecordingTurn>>,
    playback: Option<PlaybackHandle>,
    policy: BargeInPolicy,
}

impl VoiceController {
    /// Crée un contrôleur déconnecté, sans sortie audio
    pub fn new(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        capture: Arc<dyn CaptureSource>,
    ) -> Self {
        let bus = Arc::new(EventBus::new());
        let state = Arc::new(watch::channel(VoiceState::default()).0);

        let reducer = Arc::clone(&state);
        bus.subscribe_all(move |event| {
            reducer.send_if_modified(|state| state.apply_event(event));
            Ok(())
        });

        Self {
            config: Arc::new(config),
            connector,
            capture,
            bus,
            state,
            client: Mutex::new(None),
            turn: Mutex::new(None),
            playback: None,
            policy: BargeInPolicy::default(),
        }
    }

    /// Joue les réponses vocales sur ce séquenceur
    ///
    /// Lance une tâche tokio : à appeler dans un runtime, une seule fois.
    pub fn with_playback(mut self, sequencer: PlaybackSequencer) -> Self {
        let handle = PlaybackHandle::spawn(sequencer);
        let sender = handle.sender();
        self.bus.subscribe(EventKind::AudioDelta, move |event| {
            if let InboundEvent::AudioDelta { samples, .. } = event {
                sender
                    .send(PlaybackCommand::Chunk(samples.clone()))
                    .map_err(|_| anyhow::anyhow!("tâche de lecture arrêtée"))?;
            }
            Ok(())
        });
        self.playback = Some(handle);
        self
    }

    pub fn with_barge_in_policy(mut self, policy: BargeInPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Bus des événements entrants, pour les abonnés de l'application
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn snapshot(&self) -> VoiceState {
        self.state.borrow().clone()
    }

    /// Récepteur notifié à chaque changement d'état
    pub fn state_receiver(&self) -> watch::Receiver<VoiceState> {
        self.state.subscribe()
    }

    /// Statistiques du client courant
    pub async fn client_stats(&self) -> Option<ClientStats> {
        self.client.lock().await.as_ref().map(|client| client.stats())
    }

    pub fn playback_stats(&self) -> Option<PlaybackStats> {
        self.playback.as_ref().map(PlaybackHandle::stats)
    }

    /// Ouvre une session ; sans effet si déjà connecté
    ///
    /// # Erreurs
    /// - `VoiceError::Connection`, également exposée dans `VoiceState::error`
    pub async fn connect(&self) -> VoiceResult<()> {
        self.ensure_connected().await.map(|_| ())
    }

    /// Ferme la session courante puis tente une seule nouvelle connexion
    pub async fn reconnect(&self) -> VoiceResult<()> {
        self.disconnect().await?;
        self.connect().await
    }

    /// Abandonne le tour en cours et ferme la session
    pub async fn disconnect(&self) -> VoiceResult<()> {
        let turn = self.turn.lock().await.take();
        if let Some(turn) = turn {
            turn.finish().await;
        }

        let client = self.client.lock().await.take();
        if let Some(client) = client {
            client.disconnect().await?;
            info!(session_id = client.session_id(), "🔌 Session fermée par l'utilisateur");
        }

        self.reset_playback();
        self.state.send_modify(|state| {
            state.connected = false;
            state.recording = false;
            state.processing = false;
            state.session_id = None;
        });
        Ok(())
    }

    /// Démarre un tour vocal
    ///
    /// Connecte si besoin, acquiert le micro, remet l'état du tour à zéro,
    /// vide le tampon serveur puis envoie chaque bloc capturé.
    /// Sans effet si un enregistrement est déjà en cours.
    ///
    /// # Erreurs
    /// - `VoiceError::Connection` : la connexion implicite a échoué, le micro n'est pas ouvert
    /// - `VoiceError::Capture` : micro inaccessible
    /// - `VoiceError::TurnInFlight` : réponse en cours avec `BargeInPolicy::Reject`
    pub async fn start_recording(&self) -> VoiceResult<()> {
        self.check_barge_in()?;

        let mut turn = self.turn.lock().await;
        if let Some(active) = turn.take() {
            if !active.task.is_finished() {
                debug!("Enregistrement déjà en cours");
                *turn = Some(active);
                return Ok(());
            }
            // Capture terminée d'elle-même (session fermée ou micro perdu)
            active.finish().await;
        }

        let client = self.ensure_connected().await?;

        let mut capture = self.capture.open().map_err(|e| self.capture_failed(e))?;
        if let Err(e) = capture.start().await {
            let _ = capture.stop().await;
            return Err(self.capture_failed(e));
        }

        self.reset_playback();
        self.state.send_modify(VoiceState::begin_recording);

        if let Err(e) = client.clear_audio().await {
            let _ = capture.stop().await;
            self.state.send_modify(|state| state.recording = false);
            return Err(e.into());
        }

        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(feed_capture(capture, client, stop_rx, Arc::clone(&self.state)));
        *turn = Some(RecordingTurn { stop, task });

        info!("🎙️ Enregistrement démarré");
        Ok(())
    }

    /// Termine le tour vocal : relâche le micro puis valide l'énoncé
    ///
    /// Sans effet si rien n'est enregistré ou si aucun bloc n'a été envoyé.
    pub async fn stop_recording(&self) -> VoiceResult<()> {
        let turn = self.turn.lock().await.take();
        let Some(turn) = turn else {
            debug!("Aucun enregistrement à arrêter");
            return Ok(());
        };

        let sent = turn.finish().await;
        self.state.send_modify(|state| state.recording = false);

        if sent == 0 {
            info!("Aucun audio envoyé, rien à valider");
            return Ok(());
        }

        let client = self.active_client().await.ok_or(VoiceError::NotConnected)?;

        // processing passe à vrai avant l'envoi : la réponse peut arriver avant le retour
        self.state.send_modify(|state| state.processing = true);
        if let Err(e) = client.commit_audio().await {
            self.state.send_modify(|state| state.processing = false);
            return Err(e.into());
        }

        info!(blocks = sent, "⏹️ Énoncé validé");
        Ok(())
    }

    /// Démarre un tour textuel, avec contexte d'écran optionnel
    ///
    /// # Erreurs
    /// - `VoiceError::NotConnected` : aucune session active (aussi exposée dans l'état)
    /// - `VoiceError::TurnInFlight` : réponse en cours avec `BargeInPolicy::Reject`
    pub async fn send_text_with_context(&self, text: &str, context: Option<&str>) -> VoiceResult<()> {
        let Some(client) = self.active_client().await else {
            let err = VoiceError::NotConnected;
            self.state
                .send_modify(|state| state.error = Some(err.to_string()));
            return Err(err);
        };
        self.check_barge_in()?;

        self.reset_playback();
        self.state.send_modify(|state| state.begin_text_turn(text));

        if let Err(e) = client.send_text(text, context).await {
            let err = VoiceError::from(e);
            self.state.send_modify(|state| {
                state.processing = false;
                state.error = Some(err.to_string());
            });
            return Err(err);
        }

        debug!(chars = text.len(), with_context = context.is_some(), "Message envoyé");
        Ok(())
    }

    /// Efface transcription, réponse et erreur
    pub fn clear_responses(&self) {
        self.state.send_modify(VoiceState::clear_responses);
    }

    async fn ensure_connected(&self) -> VoiceResult<Arc<RealtimeClient>> {
        let mut slot = self.client.lock().await;
        if let Some(client) = slot.as_ref().filter(|client| client.is_active()) {
            debug!(session_id = client.session_id(), "Déjà connecté");
            return Ok(Arc::clone(client));
        }

        if let Some(stale) = slot.take() {
            let _ = stale.disconnect().await;
        }

        let client = Arc::new(RealtimeClient::new(
            Arc::clone(&self.config),
            Arc::clone(&self.connector),
            Arc::clone(&self.bus),
        ));
        let session_id = client.session_id();

        // Connu avant la connexion : un Disconnected immédiat ne doit pas être pris pour un ancien
        self.state
            .send_modify(|state| state.session_id = Some(session_id));

        if let Err(e) = client.connect().await {
            let err = VoiceError::Connection(e.to_string());
            warn!(session_id, error = %e, "❌ Connexion impossible");
            self.state.send_modify(|state| {
                state.connected = false;
                state.session_id = None;
                state.error = Some(err.to_string());
            });
            return Err(err);
        }

        self.state.send_modify(|state| {
            state.connected = true;
            state.error = None;
        });
        *slot = Some(Arc::clone(&client));
        Ok(client)
    }

    async fn active_client(&self) -> Option<Arc<RealtimeClient>> {
        self.client
            .lock()
            .await
            .as_ref()
            .filter(|client| client.is_active())
            .cloned()
    }

    fn check_barge_in(&self) -> VoiceResult<()> {
        if self.policy == BargeInPolicy::Reject && self.state.borrow().processing {
            return Err(VoiceError::TurnInFlight);
        }
        Ok(())
    }

    fn capture_failed(&self, error: AudioError) -> VoiceError {
        let err = VoiceError::Capture(describe_capture_error(&error));
        warn!(error = %error, "❌ Microphone inaccessible");
        self.state.send_modify(|state| {
            state.recording = false;
            state.error = Some(err.to_string());
        });
        err
    }

    fn reset_playback(&self) {
        if let Some(playback) = &self.playback {
            playback.reset();
        }
    }
}

fn describe_capture_error(error: &AudioError) -> String {
    match error {
        AudioError::Capture(reason) => reason.clone(),
        other => other.to_string(),
    }
}

/// Envoie les blocs capturés jusqu'au signal d'arrêt, puis relâche le micro
async fn feed_capture(
    mut capture: Box<dyn AudioCapture>,
    client: Arc<RealtimeClient>,
    mut stop: oneshot::Receiver<()>,
    state: Arc<watch::Sender<VoiceState>>,
) -> usize {
    let mut sent = 0;

    loop {
        let frame = tokio::select! {
            biased;
            _ = &mut stop => break,
            frame = capture.next_frame() => frame,
        };

        match frame {
            Ok(frame) if frame.is_empty() => continue,
            Ok(frame) => match client.send_audio(&frame.to_pcm16()).await {
                Ok(()) => sent += 1,
                Err(e) if client.is_active() => {
                    warn!(error = %e, sequence = frame.sequence_number, "Bloc audio non envoyé");
                }
                Err(_) => {
                    warn!("Session fermée pendant l'enregistrement");
                    break;
                }
            },
            Err(e) => {
                let message = VoiceError::Capture(describe_capture_error(&e)).to_string();
                warn!(error = %e, "Capture interrompue");
                state.send_modify(|state| {
                    state.recording = false;
                    state.error = Some(message);
                });
                break;
            }
        }
    }

    if let Err(e) = capture.stop().await {
        warn!(error = %e, "Libération du microphone incomplète");
    }
    debug!(blocks = sent, "Microphone relâché");
    sent
}
