//! Adaptation entre le format des périphériques et le format du protocole
//!
//! Les périphériques tournent souvent à 44.1 ou 48 kHz en stéréo alors que le
//! protocole impose du 24 kHz mono. `downmix` et `MonoResampler` font le pont
//! dans les deux sens (capture et lecture).

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use crate::{AudioError, AudioResult};

/// Durée d'un bloc d'entrée du rééchantillonneur
const RESAMPLER_CHUNK_MS: u32 = 10;

/// Moyenne des canaux d'un buffer entrelacé vers du mono
pub fn downmix(interleaved: &[f32], channels: usize, out: &mut Vec<f32>) {
    if channels <= 1 {
        out.extend_from_slice(interleaved);
        return;
    }

    out.extend(
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32),
    );
}

/// Crée un rééchantillonneur rubato mono à interpolation cubique
pub fn create_resampler(
    input_rate: u32,
    output_rate: u32,
    chunk_size: usize,
) -> AudioResult<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        output_rate as f64 / input_rate as f64,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Rééchantillonneur mono utilisable en flux
///
/// rubato travaille par blocs d'entrée de taille fixe : les échantillons qui
/// ne remplissent pas un bloc complet restent en attente jusqu'au prochain
/// appel, ce qui enchaîne les buffers successifs sans discontinuité.
pub struct MonoResampler {
    /// `None` quand les deux fréquences sont identiques
    inner: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
}

impl MonoResampler {
    pub fn new(input_rate: u32, output_rate: u32) -> AudioResult<Self> {
        if input_rate == 0 || output_rate == 0 {
            return Err(AudioError::ConfigError(format!(
                "Fréquences invalides : {} -> {} Hz",
                input_rate, output_rate
            )));
        }

        let inner = if input_rate == output_rate {
            None
        } else {
            let chunk_size = (input_rate * RESAMPLER_CHUNK_MS / 1000) as usize;
            Some(create_resampler(input_rate, output_rate, chunk_size)?)
        };

        Ok(Self {
            inner,
            pending: Vec::new(),
        })
    }

    /// Vrai si les deux fréquences sont identiques (copie directe)
    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Échantillons d'entrée en attente d'un bloc complet
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        if let Some(inner) = self.inner.as_mut() {
            inner.reset();
        }
    }

    /// Rééchantillonne `input` et ajoute le résultat à `out`
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) -> AudioResult<()> {
        let Some(inner) = self.inner.as_mut() else {
            out.extend_from_slice(input);
            return Ok(());
        };

        self.pending.extend_from_slice(input);
        let mut consumed = 0;
        loop {
            let needed = inner.input_frames_next();
            if self.pending.len() - consumed < needed {
                break;
            }
            let block = &self.pending[consumed..consumed + needed];
            let resampled = inner.process(&[block], None)?;
            out.extend_from_slice(&resampled[0]);
            consumed += needed;
        }
        self.pending.drain(..consumed);
        Ok(())
    }
}
