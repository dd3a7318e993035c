//! Audio data model and PCM helpers.

pub mod ingest;
pub mod segmenter;

/// One fixed-duration frame of normalized mono audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Mono samples in [-1, 1].
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Seconds since the first sample of the session.
    pub t_start: f64,
}

impl AudioFrame {
    pub fn duration_ms(&self) -> f64 {
        self.samples.len() as f64 * 1000.0 / self.sample_rate as f64
    }
}

/// A complete span of user speech, delimited by silence and ready for ASR.
/// Immutable after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub t_start: f64,
    pub t_end: f64,
    /// Milliseconds of pre-speech audio prepended at the front.
    pub pre_roll_ms: u32,
}

impl Utterance {
    pub fn duration_ms(&self) -> f64 {
        self.samples.len() as f64 * 1000.0 / self.sample_rate as f64
    }
}

/// One unit of synthesized output audio, 24 kHz mono i16 by convention.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub pcm: Vec<i16>,
    pub sample_rate: u32,
}

/// Decode little-endian signed 16-bit PCM bytes into normalized f32 samples.
/// A trailing odd byte is ignored.
pub fn pcm_i16le_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}

pub fn pcm_f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
        .collect()
}

pub fn pcm_i16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

pub fn pcm_i16le_bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Number of samples covered by `ms` milliseconds at `sample_rate`.
pub fn samples_for_ms(sample_rate: u32, ms: u32) -> usize {
    (sample_rate as usize * ms as usize) / 1000
}

/// Linear fade-in over the first `n` samples, in place. No-op when the
/// buffer is shorter than `n`.
pub fn apply_fade_in(pcm: &mut [i16], n: usize) {
    if n == 0 || pcm.len() < n {
        return;
    }
    for (i, sample) in pcm[..n].iter_mut().enumerate() {
        let gain = i as f64 / n as f64;
        *sample = (*sample as f64 * gain) as i16;
    }
}

/// Linear fade-out over the last `n` samples, in place.
pub fn apply_fade_out(pcm: &mut [i16], n: usize) {
    if n == 0 || pcm.len() < n {
        return;
    }
    let start = pcm.len() - n;
    for (i, sample) in pcm[start..].iter_mut().enumerate() {
        let gain = 1.0 - (i + 1) as f64 / n as f64;
        *sample = (*sample as f64 * gain) as i16;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i16le_round_trips_through_f32() {
        let bytes = pcm_i16_to_le_bytes(&[0, 16384, -16384, 32767, -32768]);
        let floats = pcm_i16le_to_f32(&bytes);
        assert_eq!(floats.len(), 5);
        assert!((floats[0]).abs() < 1e-6);
        assert!((floats[1] - 0.5).abs() < 1e-3);
        assert!((floats[2] + 0.5).abs() < 1e-3);

        let back = pcm_f32_to_i16(&floats);
        assert_eq!(back[0], 0);
        assert!((back[1] - 16384).abs() <= 1);
    }

    #[test]
    fn odd_trailing_byte_is_dropped() {
        let floats = pcm_i16le_to_f32(&[0, 0, 7]);
        assert_eq!(floats.len(), 1);
    }

    #[test]
    fn fade_in_ramps_from_silence() {
        let mut pcm = vec![10000i16; 8];
        apply_fade_in(&mut pcm, 4);
        assert_eq!(pcm[0], 0);
        assert!(pcm[1] < pcm[2] && pcm[2] < pcm[3]);
        assert_eq!(pcm[4], 10000);
    }

    #[test]
    fn fade_out_ends_in_silence() {
        let mut pcm = vec![10000i16; 8];
        apply_fade_out(&mut pcm, 4);
        assert_eq!(pcm[3], 10000);
        assert!(pcm[4] > pcm[5] && pcm[5] > pcm[6]);
        assert_eq!(pcm[7], 0);
    }

    #[test]
    fn fades_skip_short_buffers() {
        let mut pcm = vec![5000i16; 3];
        apply_fade_in(&mut pcm, 10);
        apply_fade_out(&mut pcm, 10);
        assert_eq!(pcm, vec![5000i16; 3]);
    }
}
