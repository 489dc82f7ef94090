//! Événements entrants et bus de publication
//!
//! Chaque frame serveur reconnue devient un `InboundEvent`, type somme fermé :
//! le dispatch est exhaustif et vérifié à la compilation. Le client y ajoute
//! ses propres événements (audio décodé prêt à jouer, frame rejetée, déconnexion).
//!
//! `EventBus` associe chaque `EventKind` à une liste ordonnée d'abonnés :
//! - `publish` appelle les abonnés dans l'ordre d'inscription, sur le contexte appelant
//! - un abonné qui échoue (erreur ou panique) n'empêche pas les suivants de s'exécuter
//! - la liste est copiée avant l'appel : se désabonner pendant un dispatch
//!   n'affecte pas ce dispatch

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::protocol::ServerError;

/// Événements publiés par le client de protocole
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Chunk audio décodé (flottants 24 kHz mono)
    AudioDelta {
        samples: Vec<f32>,
        response_id: Option<String>,
    },

    /// Fragment de transcription de la réponse vocale
    TranscriptDelta { delta: String },

    /// Fragment de réponse textuelle
    TextDelta { delta: String },

    /// Fin d'une réponse
    ResponseDone { response_id: Option<String> },

    /// Le détecteur serveur a entendu le début de la parole
    SpeechStarted,

    /// Le détecteur serveur a détecté la fin de la parole
    SpeechStopped,

    /// Transcription finale de l'audio utilisateur
    TranscriptionCompleted { transcript: String },

    /// Erreur signalée par le serveur
    Error(ServerError),

    /// Audio décodé transmis vers la lecture
    AudioPlaying {
        samples: usize,
        response_id: Option<String>,
    },

    /// Frame entrante ignorée (JSON ou audio invalide)
    FrameDropped { reason: String },

    /// Transport fermé (par le serveur, une erreur ou `disconnect()`)
    Disconnected {
        session_id: u32,
        reason: Option<String>,
    },
}

impl InboundEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            InboundEvent::AudioDelta { .. } => EventKind::AudioDelta,
            InboundEvent::TranscriptDelta { .. } => EventKind::TranscriptDelta,
            InboundEvent::TextDelta { .. } => EventKind::TextDelta,
            InboundEvent::ResponseDone { .. } => EventKind::ResponseDone,
            InboundEvent::SpeechStarted => EventKind::SpeechStarted,
            InboundEvent::SpeechStopped => EventKind::SpeechStopped,
            InboundEvent::TranscriptionCompleted { .. } => EventKind::TranscriptionCompleted,
            InboundEvent::Error(_) => EventKind::Error,
            InboundEvent::AudioPlaying { .. } => EventKind::AudioPlaying,
            InboundEvent::FrameDropped { .. } => EventKind::FrameDropped,
            InboundEvent::Disconnected { .. } => EventKind::Disconnected,
        }
    }
}

/// Discriminant d'un `InboundEvent`, clé d'abonnement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    AudioDelta,
    TranscriptDelta,
    TextDelta,
    ResponseDone,
    SpeechStarted,
    SpeechStopped,
    TranscriptionCompleted,
    Error,
    AudioPlaying,
    FrameDropped,
    Disconnected,
}

impl EventKind {
    pub const ALL: [EventKind; 11] = [
        EventKind::AudioDelta,
        EventKind::TranscriptDelta,
        EventKind::TextDelta,
        EventKind::ResponseDone,
        EventKind::SpeechStarted,
        EventKind::SpeechStopped,
        EventKind::TranscriptionCompleted,
        EventKind::Error,
        EventKind::AudioPlaying,
        EventKind::FrameDropped,
        EventKind::Disconnected,
    ];
}

/// Jeton retourné par `subscribe`, à rendre à `unsubscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Abonné : fonction synchrone, peut échouer sans interrompre le dispatch
pub type Handler = Arc<dyn Fn(&InboundEvent) -> anyhow::Result<()> + Send + Sync>;

/// Bilan d'un `publish`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Abonnés appelés
    pub invoked: usize,
    /// Abonnés ayant renvoyé une erreur ou paniqué
    pub failures: usize,
}

/// Registre publication/abonnement typé
#[derive(Default)]
pub struct EventBus {
    handlers: Mutex<HashMap<EventKind, Vec<(SubscriptionId, Handler)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inscrit un abonné pour un type d'événement
    ///
    /// # Example
    /// ```rust
    /// use network::{EventBus, EventKind, InboundEvent};
    ///
    /// let bus = EventBus::new();
    /// let id = bus.subscribe(EventKind::TextDelta, |event| {
    ///     if let InboundEvent::TextDelta { delta } = event {
    ///         print!("{delta}");
    ///     }
    ///     Ok(())
    /// });
    /// bus.publish(&InboundEvent::TextDelta { delta: "Bonjour".into() });
    /// assert!(bus.unsubscribe(EventKind::TextDelta, id));
    /// ```
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&InboundEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Inscrit le même abonné pour tous les types d'événements
    pub fn subscribe_all<F>(&self, handler: F) -> Vec<(EventKind, SubscriptionId)>
    where
        F: Fn(&InboundEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let shared: Handler = Arc::new(handler);
        EventKind::ALL
            .iter()
            .map(|&kind| {
                let handler = Arc::clone(&shared);
                (kind, self.subscribe(kind, move |event| handler(event)))
            })
            .collect()
    }

    /// Retire un abonné ; retourne `false` s'il n'était pas inscrit
    pub fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.lock();
        let Some(list) = handlers.get_mut(&kind) else {
            return false;
        };

        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;

        if list.is_empty() {
            handlers.remove(&kind);
        }
        removed
    }

    /// Nombre d'abonnés pour un type
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.handlers.lock().get(&kind).map_or(0, Vec::len)
    }

    /// Publie un événement à tous ses abonnés, dans l'ordre d'inscription
    ///
    /// Le verrou est relâché avant l'appel des abonnés : un abonné peut
    /// s'inscrire, se désinscrire ou publier sans interblocage.
    pub fn publish(&self, event: &InboundEvent) -> DispatchOutcome {
        let kind = event.kind();
        let snapshot: Vec<Handler> = match self.handlers.lock().get(&kind) {
            Some(list) => list.iter().map(|(_, handler)| Arc::clone(handler)).collect(),
            None => return DispatchOutcome::default(),
        };

        let mut outcome = DispatchOutcome::default();
        for handler in snapshot {
            outcome.invoked += 1;
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    outcome.failures += 1;
                    warn!(?kind, error = %e, "Abonné en échec");
                }
                Err(_) => {
                    outcome.failures += 1;
                    warn!(?kind, "Abonné a paniqué");
                }
            }
        }

        trace!(?kind, invoked = outcome.invoked, "Événement publié");
        outcome
    }
}
