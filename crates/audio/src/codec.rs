//! Conversion PCM16 et encodage de transport
//!
//! Le service distant échange de l'audio linéaire 16 bits signé, little-endian,
//! mono à 24 kHz, encodé en base64 dans des frames JSON. Ce module fournit :
//! - Les conversions f32 <-> i16 (`float_to_int16`, `int16_to_float`)
//! - Les conversions i16 <-> octets LE (`int16_to_bytes`, `bytes_to_int16`)
//! - L'encodage texte de transport (`encode_for_transport`, `decode_from_transport`)
//!
//! Aucune compression : la seule représentation filaire supportée est le PCM16.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::{AudioError, AudioResult};

/// Facteur d'échelle entre un échantillon flottant et un échantillon 16 bits
pub const PCM16_SCALE: f32 = 32768.0;

/// Convertit des échantillons flottants [-1.0, 1.0] en i16
///
/// Chaque échantillon est multiplié par 32768 puis écrêté dans
/// [-32768, 32767]. Le cast tronque vers zéro.
///
/// # Example
/// ```rust
/// use audio::codec::float_to_int16;
///
/// assert_eq!(float_to_int16(&[0.0, 1.0, -1.0]), vec![0, 32767, -32768]);
/// ```
pub fn float_to_int16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * PCM16_SCALE).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Convertit des échantillons i16 en flottants (division par 32768.0)
pub fn int16_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / PCM16_SCALE).collect()
}

/// Sérialise des échantillons i16 en octets little-endian
pub fn int16_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Désérialise des octets little-endian en échantillons i16
///
/// # Erreurs
/// - `AudioError::Codec` si le nombre d'octets est impair (aucune troncature)
pub fn bytes_to_int16(bytes: &[u8]) -> AudioResult<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(AudioError::codec(format!(
            "{} octets ne forment pas un nombre entier d'échantillons 16 bits",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Encode un buffer binaire en texte sûr pour le transport (base64 standard)
pub fn encode_for_transport(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Inverse exact de `encode_for_transport`
///
/// # Erreurs
/// - `AudioError::Codec` si le texte n'est pas du base64 valide
pub fn decode_from_transport(text: &str) -> AudioResult<Vec<u8>> {
    Ok(STANDARD.decode(text)?)
}

/// Raccourci : échantillons i16 -> texte de transport
pub fn encode_pcm16(samples: &[i16]) -> String {
    encode_for_transport(&int16_to_bytes(samples))
}

/// Raccourci : texte de transport -> échantillons i16
pub fn decode_pcm16(text: &str) -> AudioResult<Vec<i16>> {
    bytes_to_int16(&decode_from_transport(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_to_int16_scaling_and_clamp() {
        let out = float_to_int16(&[0.0, 0.5, -0.5, 1.0, -1.0, 1.7, -3.0]);
        assert_eq!(out, vec![0, 16384, -16384, 32767, -32768, 32767, -32768]);
    }

    #[test]
    fn test_float_to_int16_truncates() {
        // 0.00005 * 32768 = 1.6384 -> 1 ; -0.00005 * 32768 = -1.6384 -> -1
        assert_eq!(float_to_int16(&[0.00005, -0.00005]), vec![1, -1]);
    }

    #[test]
    fn test_lengths_are_preserved() {
        let input = vec![0.25_f32; 480];
        assert_eq!(float_to_int16(&input).len(), 480);
        assert_eq!(int16_to_float(&[1, 2, 3]).len(), 3);
        assert!(float_to_int16(&[]).is_empty());
    }

    #[test]
    fn test_quantization_error_is_bounded() {
        let step = 1.0 / PCM16_SCALE;
        let mut x = -1.0_f32;
        while x <= 1.0 {
            let back = int16_to_float(&float_to_int16(&[x]))[0];
            assert!(
                (back - x).abs() <= step,
                "x={} back={} écart={}",
                x,
                back,
                (back - x).abs()
            );
            x += 0.0137;
        }
        // Bornes exactes
        assert!((int16_to_float(&float_to_int16(&[1.0]))[0] - 1.0).abs() <= step);
        assert_eq!(int16_to_float(&float_to_int16(&[-1.0]))[0], -1.0);
    }

    #[test]
    fn test_little_endian_layout() {
        assert_eq!(int16_to_bytes(&[0x0102, -2]), vec![0x02, 0x01, 0xFE, 0xFF]);
        assert_eq!(bytes_to_int16(&[0x02, 0x01, 0xFE, 0xFF]).unwrap(), vec![0x0102, -2]);
    }

    #[test]
    fn test_odd_byte_count_is_rejected() {
        let result = bytes_to_int16(&[1, 2, 3]);
        assert!(matches!(result, Err(AudioError::Codec(_))));
    }

    #[test]
    fn test_transport_encoding_inverse() {
        assert_eq!(encode_for_transport(&[]), "");
        assert_eq!(decode_from_transport("").unwrap(), Vec::<u8>::new());

        let bytes: Vec<u8> = (0..=255).collect();
        assert_eq!(decode_from_transport(&encode_for_transport(&bytes)).unwrap(), bytes);

        // base64 standard, avec padding
        assert_eq!(encode_for_transport(b"ab"), "YWI=");
    }

    #[test]
    fn test_malformed_transport_text() {
        assert!(matches!(decode_from_transport("@@not base64@@"), Err(AudioError::Codec(_))));
        // "AAA=" décode en 2 octets valides, "AQ==" en 1 octet : rejeté comme PCM16
        assert_eq!(decode_pcm16("AAA=").unwrap(), vec![0]);
        assert!(matches!(decode_pcm16("AQ=="), Err(AudioError::Codec(_))));
    }

    #[test]
    fn test_wire_payload_layout() {
        // 16384 = 0x4000, -32768 = 0x8000 -> [00 40 00 80]
        assert_eq!(encode_pcm16(&float_to_int16(&[0.5, -1.0])), "AEAAgA==");
    }
}
