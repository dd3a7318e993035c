//! Voice-activity segmentation: frames in, complete utterances out.
//!
//! Speech onset is reported as its own event so the session can interrupt
//! in-flight work immediately instead of waiting for end-of-utterance.

use std::collections::VecDeque;

use tracing::{debug, info};

use crate::audio::{AudioFrame, Utterance};

/// Per-frame speech/silence verdict. The decision threshold is a property
/// of the detector, not re-applied by the segmenter.
pub trait VoiceActivityDetector: Send {
    fn is_speech(&mut self, frame: &AudioFrame) -> bool;
}

/// RMS-energy detector, the engine-free default.
pub struct EnergyVad {
    threshold: f32,
}

impl EnergyVad {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self { threshold: 0.01 }
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn is_speech(&mut self, frame: &AudioFrame) -> bool {
        if frame.samples.is_empty() {
            return false;
        }
        let sum_sq: f32 = frame.samples.iter().map(|s| s * s).sum();
        let rms = (sum_sq / frame.samples.len() as f32).sqrt();
        rms > self.threshold
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmenterConfig {
    pub frame_ms: u32,
    pub pre_roll_ms: u32,
    pub min_silence_ms: u32,
    /// Utterances whose voiced span is shorter than this are discarded
    /// before ASR ever sees them.
    pub min_speech_ms: u32,
    pub max_utterance_ms: u32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            frame_ms: 20,
            pre_roll_ms: 300,
            min_silence_ms: 600,
            min_speech_ms: 250,
            max_utterance_ms: 15000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SegmenterEvent {
    /// User started speaking. Fired on the silence-to-speech edge, before
    /// any utterance completes; the primary interruption trigger.
    SpeechStart,
    Utterance(Utterance),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Active,
    Hang,
}

pub struct UtteranceSegmenter {
    cfg: SegmenterConfig,
    vad: Box<dyn VoiceActivityDetector>,
    state: State,
    pre_roll: VecDeque<AudioFrame>,
    pre_roll_capacity: usize,
    samples: Vec<f32>,
    sample_rate: u32,
    started_at: f64,
    captured_pre_roll_ms: u32,
    utterance_ms: u32,
    voiced_ms: u32,
    silence_ms: u32,
}

impl UtteranceSegmenter {
    pub fn new(cfg: SegmenterConfig, vad: Box<dyn VoiceActivityDetector>) -> Self {
        let pre_roll_capacity = (cfg.pre_roll_ms / cfg.frame_ms.max(1)) as usize;
        Self {
            cfg,
            vad,
            state: State::Idle,
            pre_roll: VecDeque::with_capacity(pre_roll_capacity + 1),
            pre_roll_capacity,
            samples: Vec::new(),
            sample_rate: 0,
            started_at: 0.0,
            captured_pre_roll_ms: 0,
            utterance_ms: 0,
            voiced_ms: 0,
            silence_ms: 0,
        }
    }

    /// Feed one frame; returns zero or more events in occurrence order.
    pub fn push_frame(&mut self, frame: AudioFrame) -> Vec<SegmenterEvent> {
        let mut events = Vec::new();
        let speech = self.vad.is_speech(&frame);
        let frame_ms = self.cfg.frame_ms;

        match self.state {
            State::Idle => {
                if speech {
                    events.push(SegmenterEvent::SpeechStart);
                    self.open(&frame);
                    self.append(&frame, true);
                    self.state = State::Active;
                } else {
                    self.pre_roll.push_back(frame);
                    while self.pre_roll.len() > self.pre_roll_capacity {
                        self.pre_roll.pop_front();
                    }
                }
            }
            State::Active => {
                self.append(&frame, speech);
                if speech {
                    if self.utterance_ms >= self.cfg.max_utterance_ms {
                        if let Some(utterance) = self.close(&frame) {
                            events.push(SegmenterEvent::Utterance(utterance));
                        }
                        self.state = State::Idle;
                    }
                } else {
                    self.silence_ms = frame_ms;
                    self.state = State::Hang;
                }
            }
            State::Hang => {
                self.append(&frame, speech);
                if speech {
                    self.silence_ms = 0;
                    self.state = State::Active;
                } else {
                    self.silence_ms += frame_ms;
                    if self.silence_ms >= self.cfg.min_silence_ms {
                        if let Some(utterance) = self.close(&frame) {
                            events.push(SegmenterEvent::Utterance(utterance));
                        }
                        self.state = State::Idle;
                    }
                }
            }
        }

        events
    }

    fn open(&mut self, frame: &AudioFrame) {
        self.sample_rate = frame.sample_rate;
        self.captured_pre_roll_ms = (self.pre_roll.len() as u32) * self.cfg.frame_ms;
        self.started_at = self
            .pre_roll
            .front()
            .map(|f| f.t_start)
            .unwrap_or(frame.t_start);
        self.samples.clear();
        for buffered in self.pre_roll.drain(..) {
            self.samples.extend_from_slice(&buffered.samples);
        }
        self.utterance_ms = 0;
        self.voiced_ms = 0;
        self.silence_ms = 0;
        info!(t = frame.t_start, "speech onset");
    }

    fn append(&mut self, frame: &AudioFrame, voiced: bool) {
        self.samples.extend_from_slice(&frame.samples);
        self.utterance_ms += self.cfg.frame_ms;
        if voiced {
            self.voiced_ms += self.cfg.frame_ms;
        }
    }

    fn close(&mut self, last_frame: &AudioFrame) -> Option<Utterance> {
        let t_end = last_frame.t_start
            + last_frame.samples.len() as f64 / last_frame.sample_rate as f64;
        let samples = std::mem::take(&mut self.samples);
        let voiced_ms = self.voiced_ms;
        let pre_roll_ms = self.captured_pre_roll_ms;
        self.utterance_ms = 0;
        self.voiced_ms = 0;
        self.silence_ms = 0;

        if voiced_ms < self.cfg.min_speech_ms {
            debug!(voiced_ms, "discarding utterance below minimum voiced span");
            return None;
        }

        info!(
            t_start = self.started_at,
            t_end,
            duration_ms = samples.len() as f64 * 1000.0 / self.sample_rate as f64,
            "utterance complete"
        );
        Some(Utterance {
            samples,
            sample_rate: self.sample_rate,
            t_start: self.started_at,
            t_end,
            pre_roll_ms,
        })
    }
}
