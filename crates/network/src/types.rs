//! Types de données pour le client de protocole temps réel
//!
//! Ce module définit les structures principales :
//! - SessionState : cycle de vie d'une session (Idle → Connecting → Active → Closed)
//! - SessionConfig : comportement demandé au serveur, envoyé via `session.update`
//! - ClientConfig : point d'accès, modèle et clé API
//! - ClientStats : statistiques et métriques de la session

use std::fmt;
use std::time::{Duration, Instant};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Point d'accès par défaut du service
pub const DEFAULT_ENDPOINT: &str = "wss://api.openai.com/v1/realtime";

/// Modèle utilisé par défaut
pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";

/// Instructions système par défaut
pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful AI assistant analyzing screen content. Provide clear, concise guidance based on what the user shares.";

/// États d'une session de protocole
///
/// Transitions autorisées :
/// - `Idle → Connecting` sur `connect()`
/// - `Connecting → Active` quand la poignée de main réussit
/// - `Connecting → Closed` si elle échoue
/// - `Active → Closed` sur fermeture du transport, erreur serveur fatale ou `disconnect()`
///
/// Aucun retour depuis `Closed` : il faut un nouveau client pour se reconnecter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Closed,
}

impl SessionState {
    /// Seul état où les envois sont valides
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed)
    }

    /// Description textuelle de l'état pour l'UI
    pub fn description(&self) -> &'static str {
        match self {
            SessionState::Idle => "Non connecté",
            SessionState::Connecting => "Connexion en cours",
            SessionState::Active => "Connecté",
            SessionState::Closed => "Fermé",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "Idle",
            SessionState::Connecting => "Connecting",
            SessionState::Active => "Active",
            SessionState::Closed => "Closed",
        };
        f.write_str(name)
    }
}

/// Paramètres de détection d'activité vocale côté serveur
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnDetection {
    /// Type de détecteur (`server_vad`)
    #[serde(rename = "type")]
    pub kind: String,

    /// Seuil d'énergie (0.0 - 1.0)
    pub threshold: f32,

    /// Audio conservé avant le début détecté de la parole (ms)
    pub prefix_padding_ms: u32,

    /// Silence requis pour clore un énoncé (ms)
    pub silence_duration_ms: u32,
}

impl Default for TurnDetection {
    fn default() -> Self {
        Self {
            kind: "server_vad".to_string(),
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
        }
    }
}

/// Modèle de transcription de l'audio d'entrée
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InputAudioTranscription {
    pub model: String,
}

/// Configuration de session envoyée au serveur une fois par connexion
///
/// Sérialisée telle quelle dans le champ `session` de `session.update`.
/// Immuable pour la durée d'une connexion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Modalités de réponse (`text`, `audio`)
    pub modalities: Vec<String>,

    /// Instructions système
    pub instructions: String,

    /// Voix de synthèse
    pub voice: String,

    /// Encodage de l'audio envoyé (`pcm16`)
    pub input_audio_format: String,

    /// Encodage de l'audio reçu (`pcm16`)
    pub output_audio_format: String,

    /// Transcription de l'audio d'entrée par le serveur
    pub input_audio_transcription: InputAudioTranscription,

    /// Détection d'activité vocale
    pub turn_detection: TurnDetection,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            modalities: vec!["text".to_string(), "audio".to_string()],
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            voice: "alloy".to_string(),
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            input_audio_transcription: InputAudioTranscription {
                model: "whisper-1".to_string(),
            },
            turn_detection: TurnDetection::default(),
        }
    }
}

impl SessionConfig {
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    /// Vrai si le serveur doit renvoyer de l'audio
    pub fn wants_audio(&self) -> bool {
        self.modalities.iter().any(|m| m == "audio")
    }
}

/// Configuration du client
///
/// La clé API est gardée dans un `SecretString` : elle n'apparaît ni dans
/// `Debug` ni dans les logs.
#[derive(Debug)]
pub struct ClientConfig {
    /// Clé API (en-tête `Authorization: Bearer`)
    pub api_key: SecretString,

    /// Modèle demandé (paramètre `model` de l'URL)
    pub model: String,

    /// Point d'accès WebSocket
    pub endpoint: String,

    /// Configuration envoyée à chaque connexion
    pub session: SessionConfig,

    /// Délai maximal pour la poignée de main WebSocket
    pub connect_timeout: Duration,
}

impl ClientConfig {
    /// Crée une configuration avec les valeurs par défaut
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::from(api_key.into()),
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            session: SessionConfig::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Lit la configuration depuis l'environnement
    ///
    /// - `OPENAI_API_KEY` (obligatoire)
    /// - `REALTIME_MODEL`, `REALTIME_ENDPOINT` (optionnels)
    ///
    /// # Erreurs
    /// - `NetworkError::ConfigError` si la clé est absente ou vide
    pub fn from_env() -> crate::NetworkResult<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                crate::NetworkError::ConfigError("OPENAI_API_KEY non définie".to_string())
            })?;

        let mut config = Self::new(api_key);
        if let Ok(model) = std::env::var("REALTIME_MODEL") {
            config.model = model;
        }
        if let Ok(endpoint) = std::env::var("REALTIME_ENDPOINT") {
            config.endpoint = endpoint;
        }
        Ok(config)
    }

    /// Configuration pour les tests (clé factice, délai court)
    pub fn test_config() -> Self {
        Self {
            connect_timeout: Duration::from_millis(500),
            ..Self::new("sk-test")
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// URL complète de connexion
    pub fn url(&self) -> String {
        format!("{}?model={}", self.endpoint, self.model)
    }
}

/// Statistiques d'une session
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ClientStats {
    /// Frames envoyées au serveur
    pub frames_sent: u64,

    /// Frames reçues du serveur
    pub frames_received: u64,

    /// Octets PCM16 envoyés (avant base64)
    pub audio_bytes_sent: u64,

    /// Deltas audio reçus et décodés
    pub audio_deltas_received: u64,

    /// Frames reçues ignorées (JSON ou audio invalide)
    pub frames_dropped: u64,

    /// Frames `error` reçues
    pub server_errors: u64,

    /// Début de la session active
    #[serde(skip)]
    pub connected_at: Option<Instant>,
}

impl ClientStats {
    /// Remet les statistiques à zéro
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Durée depuis l'ouverture de la session
    pub fn uptime(&self) -> Duration {
        self.connected_at
            .map(|at| at.elapsed())
            .unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_session_state_helpers() {
        assert!(SessionState::Active.is_active());
        assert!(!SessionState::Connecting.is_active());
        assert!(SessionState::Closed.is_closed());
        assert_eq!(SessionState::Idle.to_string(), "Idle");
    }

    #[test]
    fn test_default_session_config_wire_shape() {
        let json = serde_json::to_value(SessionConfig::default()).unwrap();

        assert_eq!(json["modalities"], serde_json::json!(["text", "audio"]));
        assert_eq!(json["voice"], "alloy");
        assert_eq!(json["input_audio_format"], "pcm16");
        assert_eq!(json["output_audio_format"], "pcm16");
        assert_eq!(json["input_audio_transcription"]["model"], "whisper-1");
        assert_eq!(json["turn_detection"]["type"], "server_vad");
        assert_eq!(json["turn_detection"]["threshold"], 0.5);
        assert_eq!(json["turn_detection"]["prefix_padding_ms"], 300);
        assert_eq!(json["turn_detection"]["silence_duration_ms"], 500);
    }

    #[test]
    fn test_client_config_url_and_secret() {
        let config = ClientConfig::new("sk-abc").with_model("gpt-test");
        assert_eq!(config.url(), "wss://api.openai.com/v1/realtime?model=gpt-test");
        assert_eq!(config.api_key.expose_secret(), "sk-abc");
        assert!(!format!("{:?}", config).contains("sk-abc"));
    }

    #[test]
    fn test_session_config_builders() {
        let session = SessionConfig::default()
            .with_voice("verse")
            .with_instructions("Réponds en français");
        assert_eq!(session.voice, "verse");
        assert!(session.wants_audio());
    }
}
