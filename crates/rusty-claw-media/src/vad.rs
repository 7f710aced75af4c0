//! Energy-based Voice Activity Detection (VAD): a three-state hysteretic
//! detector over RMS energy, with a transient `SpeechEnd` observation that
//! marks the single frame where an utterance completes.

use crate::codec;

/// VAD state. `SpeechEnd` is observed for exactly one frame — the detector
/// auto-resets to `Silence` on the following call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    Silence,
    Speech,
    SpeechEnd,
}

/// VAD tuning. Defaults match 100ms frames at 8kHz (the G.711 rate this
/// pipeline runs at).
#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    /// RMS energy threshold above which a frame is considered speech.
    pub energy_threshold: f64,
    /// Consecutive above-threshold frames required to declare speech start.
    pub speech_start_frames: usize,
    /// Consecutive below-threshold frames required to declare speech end.
    pub speech_end_frames: usize,
    pub sample_rate: u32,
    pub frame_size: usize,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 500.0,
            speech_start_frames: 3,
            speech_end_frames: 8,
            sample_rate: 8000,
            frame_size: 800,
        }
    }
}

/// Hysteretic energy-based voice activity detector.
pub struct VadDetector {
    config: VadConfig,
    current_state: VadState,
    speech_frames: usize,
    silence_frames: usize,
}

impl VadDetector {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            current_state: VadState::Silence,
            speech_frames: 0,
            silence_frames: 0,
        }
    }

    /// RMS energy of a linear 16-bit PCM frame.
    pub fn calculate_rms(samples: &[i16]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        (sum / samples.len() as f64).sqrt()
    }

    /// RMS energy of interleaved 16-bit LE PCM bytes.
    pub fn calculate_rms_bytes(bytes: &[u8]) -> f64 {
        if bytes.len() < 2 {
            return 0.0;
        }
        let mut sum = 0.0;
        let mut count = 0usize;
        for chunk in bytes.chunks_exact(2) {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
            sum += (sample as f64) * (sample as f64);
            count += 1;
        }
        if count == 0 {
            return 0.0;
        }
        (sum / count as f64).sqrt()
    }

    /// RMS energy of a µ-law frame (decoded sample-by-sample before squaring).
    pub fn calculate_rms_mulaw(mulaw: &[u8]) -> f64 {
        if mulaw.is_empty() {
            return 0.0;
        }
        let sum: f64 = mulaw
            .iter()
            .map(|&b| {
                let s = codec::decode_sample(b) as f64;
                s * s
            })
            .sum();
        (sum / mulaw.len() as f64).sqrt()
    }

    /// Feed one linear PCM frame through the detector.
    pub fn detect(&mut self, samples: &[i16]) -> VadState {
        self.process_energy(Self::calculate_rms(samples))
    }

    /// Feed one interleaved-PCM-bytes frame through the detector.
    pub fn detect_bytes(&mut self, bytes: &[u8]) -> VadState {
        self.process_energy(Self::calculate_rms_bytes(bytes))
    }

    /// Feed one µ-law frame through the detector.
    pub fn detect_mulaw(&mut self, mulaw: &[u8]) -> VadState {
        self.process_energy(Self::calculate_rms_mulaw(mulaw))
    }

    fn process_energy(&mut self, energy: f64) -> VadState {
        let is_speech = energy > self.config.energy_threshold;

        match self.current_state {
            VadState::Silence => {
                if is_speech {
                    self.speech_frames += 1;
                    self.silence_frames = 0;
                    if self.speech_frames >= self.config.speech_start_frames {
                        self.current_state = VadState::Speech;
                        return VadState::Speech;
                    }
                } else {
                    self.speech_frames = 0;
                }
                VadState::Silence
            }
            VadState::Speech => {
                if is_speech {
                    self.silence_frames = 0;
                    self.speech_frames += 1;
                    VadState::Speech
                } else {
                    self.silence_frames += 1;
                    self.speech_frames = 0;
                    if self.silence_frames >= self.config.speech_end_frames {
                        self.current_state = VadState::SpeechEnd;
                        VadState::SpeechEnd
                    } else {
                        // Still speaking — this may just be a pause.
                        VadState::Speech
                    }
                }
            }
            VadState::SpeechEnd => {
                // Transient: the frame after SpeechEnd always starts fresh.
                self.current_state = VadState::Silence;
                self.speech_frames = 0;
                self.silence_frames = 0;
                self.process_energy(energy)
            }
        }
    }

    /// Reset to `Silence` with cleared hysteresis counters.
    pub fn reset(&mut self) {
        self.current_state = VadState::Silence;
        self.speech_frames = 0;
        self.silence_frames = 0;
    }

    pub fn state(&self) -> VadState {
        self.current_state
    }

    pub fn energy_threshold(&self) -> f64 {
        self.config.energy_threshold
    }

    pub fn set_energy_threshold(&mut self, threshold: f64) {
        self.config.energy_threshold = threshold;
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    /// Calibrate the energy threshold to 3x the RMS of an ambient noise sample.
    pub fn calibrate(&mut self, noise_sample: &[i16]) {
        let noise_rms = Self::calculate_rms(noise_sample);
        self.config.energy_threshold = noise_rms * 3.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_calculation() {
        let silence = vec![0i16; 800];
        assert_eq!(VadDetector::calculate_rms(&silence), 0.0);

        let signal = vec![100i16; 800];
        let rms = VadDetector::calculate_rms(&signal);
        assert!((rms - 100.0).abs() < 0.01);

        assert_eq!(VadDetector::calculate_rms(&[]), 0.0);
    }

    #[test]
    fn vad_state_machine_full_cycle() {
        let mut vad = VadDetector::new(VadConfig::default());
        let silence = vec![0i16; 800];
        let loud = vec![2000i16; 800];

        for _ in 0..10 {
            assert_eq!(vad.detect(&silence), VadState::Silence);
        }

        // Hysteresis: the first (speech_start_frames - 1) loud frames don't
        // flip the state yet.
        for _ in 0..(vad.config().speech_start_frames - 1) {
            assert_eq!(vad.detect(&loud), VadState::Silence);
        }
        assert_eq!(vad.detect(&loud), VadState::Speech);

        for _ in 0..5 {
            assert_eq!(vad.detect(&loud), VadState::Speech);
        }

        // A short pause during speech doesn't end the utterance.
        for _ in 0..(vad.config().speech_end_frames - 1) {
            assert_eq!(vad.detect(&silence), VadState::Speech);
        }
        assert_eq!(vad.detect(&silence), VadState::SpeechEnd);

        // SpeechEnd is transient: the next frame is fresh Silence.
        assert_eq!(vad.detect(&silence), VadState::Silence);
        assert!(!matches!(vad.state(), VadState::Speech));
    }

    #[test]
    fn calibrate_sets_threshold_to_three_times_noise_rms() {
        let mut vad = VadDetector::new(VadConfig::default());
        let noise = vec![100i16; 800];
        vad.calibrate(&noise);
        assert!((vad.energy_threshold() - 300.0).abs() < 0.01);
    }

    #[test]
    fn reset_clears_state_and_counters() {
        let mut vad = VadDetector::new(VadConfig::default());
        let loud = vec![2000i16; 800];
        vad.detect(&loud);
        vad.detect(&loud);
        vad.detect(&loud);
        assert_eq!(vad.state(), VadState::Speech);
        vad.reset();
        assert_eq!(vad.state(), VadState::Silence);
        // Hysteresis counters were cleared too, so it takes the full
        // speech_start_frames again to re-enter Speech.
        for _ in 0..2 {
            assert_eq!(vad.detect(&loud), VadState::Silence);
        }
        assert_eq!(vad.detect(&loud), VadState::Speech);
    }

    #[test]
    fn detect_mulaw_agrees_with_detect_on_decoded_samples() {
        let mut vad_pcm = VadDetector::new(VadConfig::default());
        let mut vad_mulaw = VadDetector::new(VadConfig::default());

        let pcm = vec![3000i16; 800];
        let mulaw = codec::encode_frame(&pcm);
        let decoded: Vec<i16> = codec::decode_frame(&mulaw);

        assert_eq!(vad_pcm.detect(&decoded), vad_mulaw.detect_mulaw(&mulaw));
    }
}
