//! Périphériques audio factices pour les tests
//!
//! Permettent de dérouler des tours de parole complets sans microphone
//! ni haut-parleurs : la capture rejoue des blocs préparés, la lecture
//! enregistre ce qu'on lui donne, et l'horloge avance à la main.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::{
    AudioCapture, AudioError, AudioFrame, AudioPlayback, AudioResult, CaptureSource,
    MockAudioDevice, PlaybackClock,
};

/// Compteurs partagés entre une source factice et les captures qu'elle ouvre
#[derive(Debug, Default)]
pub struct CaptureProbe {
    opened: AtomicUsize,
    started: AtomicUsize,
    stopped: AtomicUsize,
    active: AtomicBool,
}

impl CaptureProbe {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Vrai tant qu'une capture démarrée n'a pas été arrêtée
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Capture factice : rejoue des frames préparées puis attend indéfiniment
pub struct MockCapture {
    frames: VecDeque<AudioFrame>,
    recording: bool,
    pending_error: Option<AudioError>,
    start_error: Option<String>,
    latency: Duration,
    probe: Arc<CaptureProbe>,
}

impl MockCapture {
    pub fn new(frames: Vec<AudioFrame>) -> Self {
        Self {
            frames: frames.into(),
            recording: false,
            pending_error: None,
            start_error: None,
            latency: Duration::ZERO,
            probe: Arc::new(CaptureProbe::default()),
        }
    }

    pub fn probe(&self) -> Arc<CaptureProbe> {
        Arc::clone(&self.probe)
    }
}

#[async_trait]
impl AudioCapture for MockCapture {
    async fn start(&mut self) -> AudioResult<()> {
        if let Some(reason) = self.start_error.take() {
            return Err(AudioError::capture(reason));
        }
        self.recording = true;
        self.probe.started.fetch_add(1, Ordering::SeqCst);
        self.probe.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&mut self) -> AudioResult<()> {
        if self.recording {
            self.recording = false;
            self.probe.stopped.fetch_add(1, Ordering::SeqCst);
            self.probe.active.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn next_frame(&mut self) -> AudioResult<AudioFrame> {
        if let Some(error) = self.pending_error.take() {
            return Err(error);
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match self.frames.pop_front() {
            Some(frame) => Ok(frame),
            // Plus de données : se comporte comme un micro silencieux qui n'émet rien
            None => std::future::pending().await,
        }
    }

    fn is_recording(&self) -> bool {
        self.recording
    }

    fn device_info(&self) -> String {
        "Microphone factice".to_string()
    }
}

impl MockAudioDevice for MockCapture {
    fn set_test_data(&mut self, frames: Vec<AudioFrame>) {
        self.frames = frames.into();
    }

    fn simulate_error(&mut self, error: AudioError) {
        self.pending_error = Some(error);
    }

    fn set_simulated_latency(&mut self, latency_ms: u32) {
        self.latency = Duration::from_millis(latency_ms as u64);
    }
}

/// Source factice : chaque `open()` produit une `MockCapture` avec les mêmes frames
pub struct MockCaptureSource {
    frames: Vec<AudioFrame>,
    open_error: Option<String>,
    start_error: Option<String>,
    latency_ms: u32,
    probe: Arc<CaptureProbe>,
}

impl MockCaptureSource {
    pub fn with_frames(frames: Vec<AudioFrame>) -> Self {
        Self {
            frames,
            open_error: None,
            start_error: None,
            latency_ms: 0,
            probe: Arc::new(CaptureProbe::default()),
        }
    }

    /// Source qui rejoue `count` blocs de 480 échantillons à amplitude constante
    pub fn with_tone(count: usize, amplitude: f32) -> Self {
        let frames = (0..count)
            .map(|i| AudioFrame::new(vec![amplitude; 480], i as u64))
            .collect();
        Self::with_frames(frames)
    }

    /// Source dont l'ouverture échoue (micro refusé)
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            open_error: Some(reason.into()),
            ..Self::with_frames(Vec::new())
        }
    }

    /// Les captures ouvertes échoueront au démarrage
    pub fn fail_on_start(mut self, reason: impl Into<String>) -> Self {
        self.start_error = Some(reason.into());
        self
    }

    pub fn with_latency(mut self, latency_ms: u32) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn probe(&self) -> Arc<CaptureProbe> {
        Arc::clone(&self.probe)
    }
}

impl CaptureSource for MockCaptureSource {
    fn open(&self) -> AudioResult<Box<dyn AudioCapture>> {
        if let Some(reason) = &self.open_error {
            return Err(AudioError::capture(reason.clone()));
        }

        self.probe.opened.fetch_add(1, Ordering::SeqCst);

        let mut capture = MockCapture::new(self.frames.clone());
        capture.probe = Arc::clone(&self.probe);
        capture.start_error = self.start_error.clone();
        capture.set_simulated_latency(self.latency_ms);
        Ok(Box::new(capture))
    }
}

#[derive(Default)]
struct PlaybackInner {
    played: Vec<AudioFrame>,
    pending_error: Option<AudioError>,
    playing: bool,
    flushes: usize,
    latency: Duration,
}

/// Sortie factice : conserve les frames reçues, clonable pour inspection
#[derive(Clone, Default)]
pub struct MockPlayback {
    inner: Arc<Mutex<PlaybackInner>>,
}

impl MockPlayback {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PlaybackInner> {
        // Un test qui panique en tenant le verrou ne doit pas masquer les suivants
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Frames reçues, dans l'ordre
    pub fn played(&self) -> Vec<AudioFrame> {
        self.lock().played.clone()
    }

    /// Nombre total d'échantillons reçus
    pub fn played_samples(&self) -> usize {
        self.lock().played.iter().map(|f| f.samples.len()).sum()
    }

    pub fn flush_count(&self) -> usize {
        self.lock().flushes
    }
}

#[async_trait]
impl AudioPlayback for MockPlayback {
    async fn start(&mut self) -> AudioResult<()> {
        self.lock().playing = true;
        Ok(())
    }

    async fn stop(&mut self) -> AudioResult<()> {
        self.lock().playing = false;
        Ok(())
    }

    async fn play_frame(&mut self, frame: AudioFrame) -> AudioResult<()> {
        let latency = {
            let mut inner = self.lock();
            if let Some(error) = inner.pending_error.take() {
                return Err(error);
            }
            inner.played.push(frame);
            inner.latency
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.lock().playing
    }

    fn buffer_level(&self) -> usize {
        self.played_samples()
    }

    async fn flush_buffer(&mut self) -> AudioResult<()> {
        self.lock().flushes += 1;
        Ok(())
    }

    fn device_info(&self) -> String {
        "Haut-parleur factice".to_string()
    }
}

impl MockAudioDevice for MockPlayback {
    fn set_test_data(&mut self, frames: Vec<AudioFrame>) {
        self.lock().played = frames;
    }

    fn simulate_error(&mut self, error: AudioError) {
        self.lock().pending_error = Some(error);
    }

    fn set_simulated_latency(&mut self, latency_ms: u32) {
        self.lock().latency = Duration::from_millis(latency_ms as u64);
    }
}

/// Horloge pilotée à la main
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, at: Duration) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = at;
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) += by;
    }
}

impl PlaybackClock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_mock_capture_replays_then_pends() {
        let source = MockCaptureSource::with_tone(2, 0.25);
        let mut capture = source.open().unwrap();

        capture.start().await.unwrap();
        assert_eq!(capture.next_frame().await.unwrap().sequence_number, 0);
        assert_eq!(capture.next_frame().await.unwrap().sequence_number, 1);

        let third = timeout(Duration::from_millis(20), capture.next_frame()).await;
        assert!(third.is_err(), "la capture doit attendre quand elle est vide");

        capture.stop().await.unwrap();
        capture.stop().await.unwrap();
        let probe = source.probe();
        assert_eq!(probe.opened(), 1);
        assert_eq!(probe.stopped(), 1);
        assert!(!probe.is_active());
    }

    #[tokio::test]
    async fn test_failing_sources() {
        let refused = MockCaptureSource::failing("permission refusée");
        assert!(matches!(refused.open(), Err(AudioError::Capture(_))));

        let broken = MockCaptureSource::with_tone(1, 0.1).fail_on_start("occupé");
        let mut capture = broken.open().unwrap();
        assert!(capture.start().await.is_err());
        assert!(!broken.probe().is_active());
    }

    #[tokio::test]
    async fn test_mock_capture_simulated_error() {
        let mut capture = MockCapture::new(vec![AudioFrame::silence(480, 0)]);
        capture.simulate_error(AudioError::DeviceDisconnected);

        assert!(matches!(capture.next_frame().await, Err(AudioError::DeviceDisconnected)));
        assert!(capture.next_frame().await.is_ok());
    }
}
