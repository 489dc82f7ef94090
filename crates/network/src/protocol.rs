//! Frames JSON échangées avec le service temps réel
//!
//! Une frame = un message WebSocket texte, discriminé par son champ `type`.
//!
//! ```text
//! client ──▸ session.update, input_audio_buffer.{append,commit,clear},
//!            conversation.item.create, response.create
//! serveur ─▸ response.audio.delta, response.audio_transcript.delta,
//!            response.text.delta, response.done,
//!            input_audio_buffer.speech_{started,stopped},
//!            conversation.item.input_audio_transcription.completed, error
//! ```
//!
//! Les types serveur inconnus sont désérialisés en `ServerFrame::Unknown`
//! et ignorés, ce qui garde le client compatible avec les ajouts du protocole.

use serde::{Deserialize, Serialize};

use crate::{NetworkResult, SessionConfig};

/// Codes d'erreur serveur après lesquels la session est inutilisable
pub const FATAL_ERROR_CODES: &[&str] = &["session_expired", "invalid_api_key", "insufficient_quota"];

/// Message affiché quand le serveur n'en fournit pas
pub const DEFAULT_ERROR_MESSAGE: &str = "An error occurred";

// ── Client → Serveur ──────────────────────────────────────────────

/// Frames envoyées par le client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Configuration de session, envoyée juste après l'ouverture
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    /// Audio PCM16 LE encodé en base64
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioAppend { audio: String },

    /// Fin d'un énoncé
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioCommit,

    /// Abandon de l'audio non validé côté serveur
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioClear,

    /// Message utilisateur textuel
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    /// Demande de génération de réponse
    #[serde(rename = "response.create")]
    ResponseCreate,
}

impl ClientFrame {
    /// Frame d'ajout audio à partir d'échantillons 16 bits
    pub fn append_audio(samples: &[i16]) -> Self {
        ClientFrame::InputAudioAppend {
            audio: audio::codec::encode_pcm16(samples),
        }
    }

    /// Frame de message utilisateur
    pub fn user_text(text: impl Into<String>) -> Self {
        ClientFrame::ConversationItemCreate {
            item: ConversationItem::user_text(text),
        }
    }

    /// Nom filaire de la frame
    pub fn kind(&self) -> &'static str {
        match self {
            ClientFrame::SessionUpdate { .. } => "session.update",
            ClientFrame::InputAudioAppend { .. } => "input_audio_buffer.append",
            ClientFrame::InputAudioCommit => "input_audio_buffer.commit",
            ClientFrame::InputAudioClear => "input_audio_buffer.clear",
            ClientFrame::ConversationItemCreate { .. } => "conversation.item.create",
            ClientFrame::ResponseCreate => "response.create",
        }
    }

    pub fn to_json(&self) -> NetworkResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Élément de conversation (`item` de `conversation.item.create`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub role: String,
    pub content: Vec<ContentPart>,
}

impl ConversationItem {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            kind: "message".to_string(),
            role: "user".to_string(),
            content: vec![ContentPart::InputText { text: text.into() }],
        }
    }

    /// Concaténation des parties textuelles
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|part| match part {
                ContentPart::InputText { text } => text.as_str(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "input_text")]
    InputText { text: String },
}

/// Construit le contenu d'un message utilisateur
///
/// Avec contexte : `"Screen Context: {context}\n\nUser: {text}"`, sinon `text` tel quel.
pub fn format_user_message(text: &str, context: Option<&str>) -> String {
    match context {
        Some(context) => format!("Screen Context: {context}\n\nUser: {text}"),
        None => text.to_string(),
    }
}

// ── Serveur → Client ──────────────────────────────────────────────

/// Frames reçues du serveur
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        delta: String,
        #[serde(default)]
        response_id: Option<String>,
    },

    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta { delta: String },

    #[serde(rename = "response.text.delta")]
    TextDelta { delta: String },

    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: Option<ResponseSummary>,
    },

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default)]
        audio_start_ms: Option<u64>,
    },

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        #[serde(default)]
        audio_end_ms: Option<u64>,
    },

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted { transcript: String },

    #[serde(rename = "error")]
    Error { error: ServerError },

    /// Tout autre type : ignoré
    #[serde(other)]
    Unknown,
}

impl ServerFrame {
    /// Parse une frame texte
    ///
    /// # Erreurs
    /// - `NetworkError::Serialization` si le JSON est invalide, sans `type`,
    ///   ou si une frame connue a un payload incomplet
    pub fn parse(text: &str) -> NetworkResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Résumé d'une réponse terminée
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseSummary {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Corps d'une frame `error`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    /// Peut être absent ou `null`
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub param: Option<String>,
    #[serde(default)]
    pub event_id: Option<String>,
}

impl ServerError {
    /// Vrai si le code impose la fermeture de la session
    pub fn is_fatal(&self) -> bool {
        self.code
            .as_deref()
            .is_some_and(|code| FATAL_ERROR_CODES.contains(&code))
    }

    /// Message lisible, avec repli si le serveur n'en fournit pas
    pub fn display_message(&self) -> &str {
        match self.message.as_deref() {
            Some(message) if !message.trim().is_empty() => message,
            _ => DEFAULT_ERROR_MESSAGE,
        }
    }

    pub fn code_or_unknown(&self) -> &str {
        self.code.as_deref().unwrap_or("unknown")
    }
}
