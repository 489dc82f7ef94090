//! Module de capture audio utilisant cpal
//!
//! Ce module implémente le trait AudioCapture en utilisant la librairie cpal
//! pour capturer l'audio depuis le microphone, puis l'adapte au format du
//! protocole (24 kHz mono) avant de le découper en blocs fixes.
//!
//! cpal supporte Windows (WASAPI), macOS (CoreAudio), et Linux (ALSA/PulseAudio).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::convert::{MonoResampler, downmix};
use crate::{AudioCapture, AudioConfig, AudioError, AudioFrame, AudioResult, CaptureSource};

/// Accumulateur exécuté dans le callback cpal (thread temps réel)
///
/// Convertit, descend en mono, rééchantillonne puis émet des blocs de
/// `samples_per_frame` échantillons. Ne bloque jamais : si la file est
/// pleine, le bloc est perdu et compté.
struct BlockAssembler {
    channels: usize,
    samples_per_frame: usize,
    resampler: MonoResampler,
    mono: Vec<f32>,
    pending: Vec<f32>,
    sequence: u64,
    sender: mpsc::Sender<AudioFrame>,
    dropped: Arc<AtomicU64>,
}

impl BlockAssembler {
    fn push<T>(&mut self, data: &[T])
    where
        T: SizedSample,
        f32: cpal::FromSample<T>,
    {
        self.mono.clear();
        let converted: Vec<f32> = data.iter().map(|s| s.to_sample::<f32>()).collect();
        downmix(&converted, self.channels, &mut self.mono);
        if let Err(e) = self.resampler.process(&self.mono, &mut self.pending) {
            debug!(error = %e, "Buffer de capture ignoré");
            return;
        }

        while self.pending.len() >= self.samples_per_frame {
            let block: Vec<f32> = self.pending.drain(..self.samples_per_frame).collect();
            let frame = AudioFrame::new(block, self.sequence);
            self.sequence += 1;

            if self.sender.try_send(frame).is_err() {
                // File pleine ou récepteur fermé : on perd ce bloc
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Implémentation de capture audio avec cpal
///
/// # Architecture thread
///
/// cpal fonctionne avec des callbacks. Le callback accumule les échantillons
/// et envoie chaque bloc complet via un channel tokio vers la tâche async
/// qui appelle `next_frame()`.
pub struct CpalCapture {
    device: Device,
    config: AudioConfig,
    stream: Option<Stream>,
    receiver: Option<mpsc::Receiver<AudioFrame>>,
    is_recording: bool,
    device_name: String,
    dropped_frames: Arc<AtomicU64>,
}

impl CpalCapture {
    /// Crée une nouvelle instance de capture sur le micro par défaut
    ///
    /// # Erreurs
    /// - `AudioError::NoDeviceFound` si aucun microphone n'est disponible
    /// - `AudioError::ConfigError` si la configuration est invalide
    pub fn new(config: AudioConfig) -> AudioResult<Self> {
        config.validate().map_err(AudioError::ConfigError)?;

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(AudioError::NoDeviceFound)?;

        let device_name = device
            .description()
            .ok()
            .map(|desc| desc.name().to_string())
            .unwrap_or_else(|| "Périphérique inconnu".to_string());

        info!(device = %device_name, "🎤 Périphérique de capture trouvé");

        Ok(Self {
            device,
            config,
            stream: None,
            receiver: None,
            is_recording: false,
            device_name,
            dropped_frames: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Nombre de blocs perdus faute de place dans la file
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Choisit la configuration du stream
    ///
    /// Préfère une configuration native à 24 kHz ; sinon prend la configuration
    /// par défaut du périphérique et rééchantillonne dans le callback.
    fn select_config(&self) -> AudioResult<(StreamConfig, SampleFormat)> {
        let wanted = self.config.sample_rate;

        if let Ok(ranges) = self.device.supported_input_configs() {
            for range in ranges {
                if range.min_sample_rate() <= wanted && wanted <= range.max_sample_rate() {
                    let supported = range.with_sample_rate(wanted);
                    return Ok((supported.config(), supported.sample_format()));
                }
            }
        }

        let fallback = self.device.default_input_config()?;
        debug!(
            sample_rate = fallback.sample_rate(),
            channels = fallback.channels(),
            "24 kHz non supporté nativement, rééchantillonnage logiciel"
        );
        Ok((fallback.config(), fallback.sample_format()))
    }

    fn build_stream(&self, sender: mpsc::Sender<AudioFrame>) -> AudioResult<Stream> {
        let (stream_config, sample_format) = self.select_config()?;

        info!(
            device_rate = stream_config.sample_rate,
            channels = stream_config.channels,
            format = ?sample_format,
            samples_per_frame = self.config.samples_per_frame(),
            "🎵 Démarrage capture"
        );

        let assembler = BlockAssembler {
            channels: stream_config.channels as usize,
            samples_per_frame: self.config.samples_per_frame(),
            resampler: MonoResampler::new(stream_config.sample_rate, self.config.sample_rate)?,
            mono: Vec::new(),
            pending: Vec::with_capacity(self.config.samples_per_frame() * 2),
            sequence: 0,
            sender,
            dropped: Arc::clone(&self.dropped_frames),
        };

        match sample_format {
            SampleFormat::F32 => self.build_typed_stream::<f32>(&stream_config, assembler),
            SampleFormat::I16 => self.build_typed_stream::<i16>(&stream_config, assembler),
            SampleFormat::U16 => self.build_typed_stream::<u16>(&stream_config, assembler),
            other => Err(AudioError::ConfigError(format!(
                "Format d'échantillon non supporté : {:?}",
                other
            ))),
        }
    }

    fn build_typed_stream<T>(
        &self,
        config: &StreamConfig,
        mut assembler: BlockAssembler,
    ) -> AudioResult<Stream>
    where
        T: SizedSample,
        f32: cpal::FromSample<T>,
    {
        let stream = self.device.build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| assembler.push(data),
            move |err| error!(error = %err, "❌ Erreur stream audio"),
            None,
        )?;
        Ok(stream)
    }
}

#[async_trait]
impl AudioCapture for CpalCapture {
    async fn start(&mut self) -> AudioResult<()> {
        if self.is_recording {
            return Ok(());
        }

        let (sender, receiver) = mpsc::channel(self.config.capture_queue_frames);
        let stream = self
            .build_stream(sender)
            .map_err(|e| AudioError::capture(e.to_string()))?;
        stream.play()?;

        self.stream = Some(stream);
        self.receiver = Some(receiver);
        self.is_recording = true;

        info!("✅ Capture audio démarrée");
        Ok(())
    }

    async fn stop(&mut self) -> AudioResult<()> {
        if !self.is_recording {
            return Ok(());
        }

        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                warn!(error = %e, "Pause du stream impossible, libération directe");
            }
        }

        self.receiver = None;
        self.is_recording = false;

        info!(dropped = self.dropped_frames(), "🛑 Capture audio arrêtée");
        Ok(())
    }

    async fn next_frame(&mut self) -> AudioResult<AudioFrame> {
        let receiver = self.receiver.as_mut().ok_or_else(|| {
            AudioError::InitializationError("Capture non démarrée".to_string())
        })?;

        receiver.recv().await.ok_or(AudioError::DeviceDisconnected)
    }

    fn is_recording(&self) -> bool {
        self.is_recording
    }

    fn device_info(&self) -> String {
        self.device_name.clone()
    }
}

/// Source de captures sur le micro par défaut du système
#[derive(Clone, Debug, Default)]
pub struct CpalCaptureSource {
    config: AudioConfig,
}

impl CpalCaptureSource {
    pub fn new(config: AudioConfig) -> Self {
        Self { config }
    }
}

impl CaptureSource for CpalCaptureSource {
    fn open(&self) -> AudioResult<Box<dyn AudioCapture>> {
        Ok(Box::new(CpalCapture::new(self.config.clone())?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn assembler(channels: usize, device_rate: u32) -> (BlockAssembler, mpsc::Receiver<AudioFrame>) {
        let (sender, receiver) = mpsc::channel(4);
        let assembler = BlockAssembler {
            channels,
            samples_per_frame: 480,
            resampler: MonoResampler::new(device_rate, 24_000).unwrap(),
            mono: Vec::new(),
            pending: Vec::new(),
            sequence: 0,
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (assembler, receiver)
    }

    #[test]
    fn test_assembler_emits_fixed_blocks() {
        let (mut asm, mut rx) = assembler(1, 24_000);
        asm.push(vec![0.25_f32; 1000].as_slice());

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.samples.len(), 480);
        assert_eq!((first.sequence_number, second.sequence_number), (0, 1));
        assert!(rx.try_recv().is_err());
        assert_eq!(asm.pending.len(), 40);
    }

    #[test]
    fn test_assembler_converts_stereo_i16_at_48k() {
        let (mut asm, mut rx) = assembler(2, 48_000);
        // 1920 trames stéréo à 48 kHz = 40ms, soit au moins un bloc de 20ms à 24 kHz
        asm.push(vec![16384_i16; 3840].as_slice());

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.samples.len(), 480);
        assert!((frame.samples[479] - 0.5).abs() < 1e-3);
        assert_eq!(asm.resampler.pending(), 0);
    }

    #[test]
    fn test_assembler_drops_when_queue_full() {
        let (mut asm, _rx) = assembler(1, 24_000);
        asm.push(vec![0.0_f32; 480 * 6].as_slice());
        assert_eq!(asm.dropped.load(Ordering::Relaxed), 2);
    }

    // Nécessite un vrai microphone
    #[tokio::test]
    #[ignore]
    async fn test_capture_frame() {
        let Ok(mut capture) = CpalCapture::new(AudioConfig::default()) else {
            return;
        };

        if capture.start().await.is_ok() {
            match timeout(Duration::from_secs(5), capture.next_frame()).await {
                Ok(Ok(frame)) => assert_eq!(frame.samples.len(), 480),
                Ok(Err(e)) => panic!("Erreur lors de la capture: {}", e),
                Err(_) => panic!("Timeout - aucune frame reçue"),
            }
            capture.stop().await.unwrap();
        }
    }
}
