//! Tâche de lecture des réponses vocales
//!
//! Le bus appelle ses abonnés depuis la boucle de réception réseau : l'abonné
//! audio ne fait que pousser les chunks dans un canal, et cette tâche les
//! planifie ensuite sur le `PlaybackSequencer` sans bloquer la réception.

use std::sync::Arc;

use audio::{PlaybackSequencer, PlaybackStats};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub(crate) enum PlaybackCommand {
    Chunk(Vec<f32>),
    /// Nouveau tour : vide la sortie et repart d'une timeline neuve
    Reset,
}

/// Poignée sur la tâche de lecture
pub(crate) struct PlaybackHandle {
    commands: mpsc::UnboundedSender<PlaybackCommand>,
    stats: Arc<Mutex<PlaybackStats>>,
    task: JoinHandle<()>,
}

impl PlaybackHandle {
    /// Lance la tâche ; doit être appelé dans un runtime tokio
    pub(crate) fn spawn(sequencer: PlaybackSequencer) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let stats = Arc::new(Mutex::new(PlaybackStats::default()));
        let task = tokio::spawn(run(sequencer, receiver, Arc::clone(&stats)));
        Self {
            commands,
            stats,
            task,
        }
    }

    pub(crate) fn sender(&self) -> mpsc::UnboundedSender<PlaybackCommand> {
        self.commands.clone()
    }

    pub(crate) fn reset(&self) {
        if self.commands.send(PlaybackCommand::Reset).is_err() {
            debug!("Tâche de lecture déjà arrêtée");
        }
    }

    pub(crate) fn stats(&self) -> PlaybackStats {
        self.stats.lock().clone()
    }
}

impl Drop for PlaybackHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    mut sequencer: PlaybackSequencer,
    mut commands: mpsc::UnboundedReceiver<PlaybackCommand>,
    stats: Arc<Mutex<PlaybackStats>>,
) {
    debug!(device = %sequencer.device_info(), "Tâche de lecture démarrée");

    while let Some(command) = commands.recv().await {
        match command {
            // Erreurs déjà comptées et journalisées par le séquenceur
            PlaybackCommand::Chunk(samples) => {
                let _ = sequencer.enqueue(samples).await;
            }
            PlaybackCommand::Reset => sequencer.reset().await,
        }
        *stats.lock() = sequencer.stats().clone();
    }

    if let Err(e) = sequencer.stop().await {
        warn!(error = %e, "Arrêt de la sortie audio incomplet");
    }
}
