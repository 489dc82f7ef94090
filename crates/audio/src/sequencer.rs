//! Séquenceur de lecture
//!
//! Les deltas audio arrivent par morceaux de taille variable. Le séquenceur
//! positionne chaque chunk sur une timeline continue :
//! - si rien n'est en cours de lecture, le chunk démarre immédiatement
//! - sinon il démarre exactement à la fin du chunk précédent (ni trou ni chevauchement)
//!
//! Les instants de départ sont monotones non décroissants au sein d'une timeline.
//! `reset()` ouvre une nouvelle timeline (nouveau tour, barge-in).
//!
//! Les erreurs du périphérique de sortie ne sont jamais fatales : elles sont
//! comptées, journalisées et renvoyées à l'appelant qui les ignore.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::{
    AudioFrame, AudioPlayback, AudioResult, PlaybackClock, PlaybackStats,
    types::samples_to_duration,
};

/// Horloge monotone basée sur `Instant`
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackClock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Position d'un chunk sur la timeline de lecture
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduledChunk {
    /// Rang du chunk dans la session de lecture
    pub sequence_number: u64,

    /// Instant de départ (horloge de lecture)
    pub start: Duration,

    /// Durée du chunk
    pub duration: Duration,
}

impl ScheduledChunk {
    /// Instant de fin du chunk
    pub fn end(&self) -> Duration {
        self.start + self.duration
    }
}

/// Séquenceur de lecture sans trou
pub struct PlaybackSequencer {
    output: Box<dyn AudioPlayback>,
    clock: Arc<dyn PlaybackClock>,
    sample_rate: u32,
    /// Fin du dernier chunk accepté, `None` sur une timeline neuve
    next_start: Option<Duration>,
    next_sequence: u64,
    output_started: bool,
    stats: PlaybackStats,
}

impl PlaybackSequencer {
    /// Crée un séquenceur au-dessus d'une sortie audio
    ///
    /// # Arguments
    /// * `output` - Sortie audio (cpal ou factice)
    /// * `clock` - Horloge de référence de la sortie
    /// * `sample_rate` - Fréquence des chunks reçus (24000 pour le protocole)
    pub fn new(
        output: Box<dyn AudioPlayback>,
        clock: Arc<dyn PlaybackClock>,
        sample_rate: u32,
    ) -> Self {
        Self {
            output,
            clock,
            sample_rate,
            next_start: None,
            next_sequence: 0,
            output_started: false,
            stats: PlaybackStats::default(),
        }
    }

    /// Calcule la position du prochain chunk sans modifier la timeline
    pub fn plan(&self, sample_count: usize) -> ScheduledChunk {
        let now = self.clock.now();
        let start = match self.next_start {
            Some(next) if next > now => next,
            _ => now,
        };

        ScheduledChunk {
            sequence_number: self.next_sequence,
            start,
            duration: samples_to_duration(sample_count, self.sample_rate),
        }
    }

    /// Planifie un chunk et le transmet à la sortie
    ///
    /// La timeline n'avance que si la sortie accepte le chunk.
    ///
    /// # Erreurs
    /// Toute erreur de la sortie est comptée dans `device_errors` puis renvoyée.
    pub async fn enqueue(&mut self, samples: Vec<f32>) -> AudioResult<ScheduledChunk> {
        if !self.output_started {
            if let Err(e) = self.output.start().await {
                self.stats.device_errors += 1;
                warn!(error = %e, "Impossible de démarrer la sortie audio");
                return Err(e);
            }
            self.output_started = true;
        }

        let chunk = self.plan(samples.len());
        let sample_count = samples.len();

        if let Err(e) = self
            .output
            .play_frame(AudioFrame::new(samples, chunk.sequence_number))
            .await
        {
            self.stats.device_errors += 1;
            warn!(error = %e, sequence = chunk.sequence_number, "Chunk audio non joué");
            return Err(e);
        }

        self.next_start = Some(chunk.end());
        self.next_sequence += 1;
        self.stats.chunks_scheduled += 1;
        self.stats.samples_scheduled += sample_count as u64;

        debug!(
            sequence = chunk.sequence_number,
            start_ms = chunk.start.as_millis() as u64,
            duration_ms = chunk.duration.as_millis() as u64,
            "Chunk planifié"
        );

        Ok(chunk)
    }

    /// Abandonne l'audio en attente et ouvre une nouvelle timeline
    pub async fn reset(&mut self) {
        self.next_start = None;
        self.stats.resets += 1;

        if self.output_started {
            if let Err(e) = self.output.flush_buffer().await {
                self.stats.device_errors += 1;
                warn!(error = %e, "Impossible de vider la sortie audio");
            }
        }
    }

    /// Arrête la sortie audio
    pub async fn stop(&mut self) -> AudioResult<()> {
        if self.output_started {
            self.output_started = false;
            self.output.stop().await?;
        }
        Ok(())
    }

    /// Quantité d'audio planifiée au-delà de l'instant présent
    pub fn buffered_ahead(&self) -> Duration {
        self.next_start
            .map(|next| next.saturating_sub(self.clock.now()))
            .unwrap_or(Duration::ZERO)
    }

    pub fn stats(&self) -> &PlaybackStats {
        &self.stats
    }

    pub fn device_info(&self) -> String {
        self.output.device_info()
    }
}
