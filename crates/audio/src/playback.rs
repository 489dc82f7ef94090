//! Module de lecture audio utilisant cpal
//!
//! Ce module implémente le trait AudioPlayback pour jouer les réponses vocales
//! du service (24 kHz mono) sur les haut-parleurs.
//!
//! Les chunks sont rééchantillonnés à la fréquence du périphérique au moment
//! de `play_frame`, puis déposés dans une file d'échantillons mono. Le callback
//! cpal vide cette file et duplique chaque échantillon sur tous les canaux.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use tracing::{error, info, warn};

use crate::convert::MonoResampler;
use crate::{AudioConfig, AudioError, AudioFrame, AudioPlayback, AudioResult};

type SampleQueue = Arc<Mutex<VecDeque<f32>>>;

/// Implémentation de lecture audio avec cpal
///
/// # Architecture thread
///
/// La tâche async ajoute des échantillons via `play_frame()`.
/// Le callback cpal (thread temps réel) les retire avec `try_lock` pour ne
/// jamais bloquer ; en cas de contention ou de file vide il écrit du silence.
pub struct CpalPlayback {
    device: Device,
    config: AudioConfig,
    stream_config: StreamConfig,
    sample_format: SampleFormat,
    stream: Option<Stream>,
    queue: SampleQueue,
    resampler: MonoResampler,
    is_playing: bool,
    device_name: String,
    /// Capacité de la file, en échantillons à la fréquence du périphérique
    capacity: usize,
    underruns: Arc<AtomicU64>,
}

impl CpalPlayback {
    /// Crée une nouvelle instance de lecture sur la sortie par défaut
    ///
    /// # Erreurs
    /// - `AudioError::NoDeviceFound` si aucun haut-parleur n'est disponible
    /// - `AudioError::ConfigError` si la configuration n'est pas supportée
    pub fn new(config: AudioConfig) -> AudioResult<Self> {
        config.validate().map_err(AudioError::ConfigError)?;

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(AudioError::NoDeviceFound)?;

        let device_name = device
            .description()
            .ok()
            .map(|desc| desc.name().to_string())
            .unwrap_or_else(|| "Périphérique inconnu".to_string());

        let supported = device.default_output_config()?;
        let stream_config = supported.config();
        let sample_format = supported.sample_format();

        let device_rate = stream_config.sample_rate;
        let capacity = (device_rate as usize * config.max_playback_buffer_ms as usize) / 1000;

        info!(
            device = %device_name,
            device_rate,
            channels = stream_config.channels,
            "🔊 Périphérique de lecture trouvé"
        );

        Ok(Self {
            device,
            resampler: MonoResampler::new(config.sample_rate, device_rate)?,
            config,
            stream_config,
            sample_format,
            stream: None,
            queue: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            is_playing: false,
            device_name,
            capacity,
            underruns: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Nombre de callbacks ayant manqué de données
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    fn build_stream(&self) -> AudioResult<Stream> {
        match self.sample_format {
            SampleFormat::F32 => self.build_typed_stream::<f32>(),
            SampleFormat::I16 => self.build_typed_stream::<i16>(),
            SampleFormat::U16 => self.build_typed_stream::<u16>(),
            other => Err(AudioError::ConfigError(format!(
                "Format d'échantillon non supporté : {:?}",
                other
            ))),
        }
    }

    fn build_typed_stream<T>(&self) -> AudioResult<Stream>
    where
        T: SizedSample + FromSample<f32>,
    {
        let queue = Arc::clone(&self.queue);
        let underruns = Arc::clone(&self.underruns);
        let channels = self.stream_config.channels as usize;

        let stream = self.device.build_output_stream(
            &self.stream_config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                fill_interleaved(data, channels, &queue, &underruns);
            },
            move |err| error!(error = %err, "❌ Erreur stream audio sortie"),
            None,
        )?;
        Ok(stream)
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<f32>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Remplit un buffer de sortie entrelacé depuis la file mono
fn fill_interleaved<T>(
    data: &mut [T],
    channels: usize,
    queue: &Mutex<VecDeque<f32>>,
    underruns: &AtomicU64,
) where
    T: SizedSample + FromSample<f32>,
{
    let channels = channels.max(1);
    let mut starved = false;

    match queue.try_lock() {
        Ok(mut pending) => {
            for frame in data.chunks_mut(channels) {
                let value = match pending.pop_front() {
                    Some(sample) => sample,
                    None => {
                        starved = true;
                        0.0
                    }
                };
                for slot in frame {
                    *slot = T::from_sample(value);
                }
            }
        }
        Err(_) => {
            data.fill(T::EQUILIBRIUM);
            starved = true;
        }
    }

    if starved {
        underruns.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl AudioPlayback for CpalPlayback {
    async fn start(&mut self) -> AudioResult<()> {
        if self.is_playing {
            return Ok(());
        }

        let stream = self.build_stream()?;
        stream.play()?;

        self.stream = Some(stream);
        self.is_playing = true;

        info!(
            playback_rate = self.config.sample_rate,
            "✅ Lecture audio démarrée"
        );
        Ok(())
    }

    async fn stop(&mut self) -> AudioResult<()> {
        if !self.is_playing {
            return Ok(());
        }

        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                warn!(error = %e, "Pause du stream de sortie impossible");
            }
        }

        self.lock_queue().clear();
        self.resampler.reset();
        self.is_playing = false;

        info!(underruns = self.underruns(), "🛑 Lecture audio arrêtée");
        Ok(())
    }

    async fn play_frame(&mut self, frame: AudioFrame) -> AudioResult<()> {
        let mut converted = Vec::with_capacity(frame.samples.len() * 2);
        self.resampler.process(&frame.samples, &mut converted)?;

        let mut queue = self.lock_queue();
        if queue.len() + converted.len() > self.capacity {
            return Err(AudioError::BufferOverflow {
                pending: queue.len(),
                capacity: self.capacity,
            });
        }
        queue.extend(converted);
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.is_playing
    }

    fn buffer_level(&self) -> usize {
        self.queue.try_lock().map(|q| q.len()).unwrap_or(0)
    }

    async fn flush_buffer(&mut self) -> AudioResult<()> {
        self.lock_queue().clear();
        self.resampler.reset();
        Ok(())
    }

    fn device_info(&self) -> String {
        self.device_name.clone()
    }
}
