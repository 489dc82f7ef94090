//! État exposé à l'interface
//!
//! `VoiceState` est la seule surface observable du contrôleur. Il est
//! reconstruit à partir des événements du bus par `apply_event`.

use network::InboundEvent;
use serde::Serialize;

/// Comportement quand un nouveau tour démarre pendant `processing`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BargeInPolicy {
    /// Le tour précédent est abandonné : l'état est remis à zéro et l'audio
    /// en attente est vidé. Les deltas tardifs du tour abandonné s'ajoutent
    /// au nouvel état.
    #[default]
    AllowAndDiscard,

    /// Le nouveau tour échoue avec `VoiceError::TurnInFlight`
    Reject,
}

/// Instantané de l'état vocal
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct VoiceState {
    pub connected: bool,
    pub recording: bool,
    /// Vrai entre l'envoi d'un tour et `response.done` (ou une erreur)
    pub processing: bool,
    pub transcript: String,
    pub response: String,
    /// Un seul message à la fois ; le suivant remplace le précédent
    pub error: Option<String>,
    /// Session du client courant
    pub session_id: Option<u32>,
}

impl VoiceState {
    /// Applique un événement du bus ; retourne `true` si l'état a changé
    pub fn apply_event(&mut self, event: &InboundEvent) -> bool {
        match event {
            InboundEvent::TranscriptDelta { delta } => {
                self.transcript.push_str(delta);
                !delta.is_empty()
            }
            InboundEvent::TextDelta { delta } => {
                self.response.push_str(delta);
                !delta.is_empty()
            }
            InboundEvent::TranscriptionCompleted { transcript } => {
                // La transcription finale du serveur remplace l'accumulation locale
                if self.transcript == *transcript {
                    return false;
                }
                self.transcript = transcript.clone();
                true
            }
            InboundEvent::ResponseDone { .. } => {
                std::mem::replace(&mut self.processing, false)
            }
            InboundEvent::Error(error) => {
                self.error = Some(error.display_message().to_string());
                self.processing = false;
                true
            }
            InboundEvent::Disconnected { session_id, .. } => {
                // Un client remplacé ne doit pas faire tomber le suivant
                if self.session_id != Some(*session_id) {
                    return false;
                }
                let changed = self.connected || self.processing || self.recording;
                self.connected = false;
                self.processing = false;
                self.recording = false;
                changed
            }
            InboundEvent::AudioDelta { .. }
            | InboundEvent::AudioPlaying { .. }
            | InboundEvent::SpeechStarted
            | InboundEvent::SpeechStopped
            | InboundEvent::FrameDropped { .. } => false,
        }
    }

    /// Début d'un tour vocal : accumulation remise à zéro
    pub(crate) fn begin_recording(&mut self) {
        self.transcript.clear();
        self.response.clear();
        self.error = None;
        self.recording = true;
    }

    /// Début d'un tour textuel : le texte envoyé devient la transcription
    pub(crate) fn begin_text_turn(&mut self, text: &str) {
        self.transcript = text.to_string();
        self.response.clear();
        self.error = None;
        self.processing = true;
    }

    /// Efface transcription, réponse et erreur
    pub fn clear_responses(&mut self) {
        self.transcript.clear();
        self.response.clear();
        self.error = None;
    }
}
