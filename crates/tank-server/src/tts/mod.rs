//! Speech synthesis pipeline: single-consumer FIFO worker between the Brain
//! and AudioEgress.
//!
//! Adapters yield encoded audio segments; MP3 is decoded to 24 kHz mono i16
//! through an external `ffmpeg` process, raw PCM passes straight through.
//! A signalled cancellation stops pulling from the adapter and stops
//! emitting within one decode quantum.

pub mod edge;

use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use tank_core::audio::{
    apply_fade_in, apply_fade_out, pcm_i16le_bytes_to_samples, samples_for_ms,
};
use tank_core::{AssistantConfig, AudioChunk};
use tank_agent::TtsRequest;

use crate::egress::AudioEgress;

/// Fade length applied at chunk starts and on interruption.
pub const FADE_MS: u32 = 10;
const DECODE_QUANTUM_BYTES: usize = 4096;

#[derive(Debug, Error)]
pub enum TtsError {
    #[error("TTS engine failure: {0}")]
    Engine(String),
    #[error("TTS decode failure: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioEncoding {
    Mp3,
    PcmI16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioSegment {
    pub data: Vec<u8>,
    pub encoding: AudioEncoding,
}

pub type SegmentStream = Pin<Box<dyn Stream<Item = Result<AudioSegment, TtsError>> + Send>>;

/// Streaming synthesis adapter. Dropping the stream terminates synthesis.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<SegmentStream, TtsError>;
}

#[derive(Debug)]
pub enum TtsCommand {
    Speak {
        request: TtsRequest,
        /// Token of the turn that enqueued this request; a cancelled token
        /// makes the worker skip it, which is how the queue drains.
        cancel: CancellationToken,
    },
    /// Acknowledged once every previously queued request has been handed to
    /// AudioEgress.
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Clone)]
pub struct TtsWorkerConfig {
    pub sample_rate_out: u32,
    pub chunk_timeout: Duration,
}

impl TtsWorkerConfig {
    pub fn from_assistant(cfg: &AssistantConfig) -> Self {
        Self {
            sample_rate_out: cfg.sample_rate_out,
            chunk_timeout: Duration::from_secs(cfg.tts_chunk_timeout_s),
        }
    }
}

pub fn spawn_tts_worker(
    synthesizer: Arc<dyn SpeechSynthesizer>,
    egress: AudioEgress,
    mut rx: mpsc::Receiver<TtsCommand>,
    cfg: TtsWorkerConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            match command {
                TtsCommand::Speak { request, cancel } => {
                    if cancel.is_cancelled() {
                        debug!(msg_id = %request.msg_id, "skipping queued TTS request after interrupt");
                        continue;
                    }
                    if let Err(e) = speak(&*synthesizer, &egress, &cfg, &request, &cancel).await {
                        error!(error = %e, msg_id = %request.msg_id, "TTS request failed, skipping");
                    }
                }
                TtsCommand::Flush(ack) => {
                    let _ = ack.send(());
                }
            }
        }
        info!("TTS worker stopped");
    })
}

enum Pulled {
    Segment(AudioSegment),
    End,
    Cancelled,
}

async fn next_segment(
    segments: &mut SegmentStream,
    cfg: &TtsWorkerConfig,
    cancel: &CancellationToken,
) -> Result<Pulled, TtsError> {
    tokio::select! {
        _ = cancel.cancelled() => Ok(Pulled::Cancelled),
        item = timeout(cfg.chunk_timeout, segments.next()) => match item {
            Err(_) => Err(TtsError::Engine(format!(
                "no audio segment within {}s",
                cfg.chunk_timeout.as_secs()
            ))),
            Ok(None) => Ok(Pulled::End),
            Ok(Some(Err(e))) => Err(e),
            Ok(Some(Ok(segment))) => Ok(Pulled::Segment(segment)),
        },
    }
}

async fn speak(
    synthesizer: &dyn SpeechSynthesizer,
    egress: &AudioEgress,
    cfg: &TtsWorkerConfig,
    request: &TtsRequest,
    cancel: &CancellationToken,
) -> Result<(), TtsError> {
    let voice = request.voice_hint.as_deref().unwrap_or("");
    debug!(msg_id = %request.msg_id, voice, chars = request.text.chars().count(), "synthesizing chunk");

    let mut segments = match timeout(cfg.chunk_timeout, synthesizer.synthesize(&request.text, voice))
        .await
    {
        Err(_) => {
            return Err(TtsError::Engine(format!(
                "synthesis did not start within {}s",
                cfg.chunk_timeout.as_secs()
            )))
        }
        Ok(result) => result?,
    };

    match next_segment(&mut segments, cfg, cancel).await? {
        Pulled::End | Pulled::Cancelled => Ok(()),
        Pulled::Segment(first) => match first.encoding {
            AudioEncoding::PcmI16 => speak_pcm(first, segments, egress, cfg, cancel).await,
            AudioEncoding::Mp3 => speak_mp3(first, segments, egress, cfg, cancel).await,
        },
    }
}

/// Raw PCM passthrough: each segment is already Int16LE at the output rate.
async fn speak_pcm(
    first: AudioSegment,
    mut segments: SegmentStream,
    egress: &AudioEgress,
    cfg: &TtsWorkerConfig,
    cancel: &CancellationToken,
) -> Result<(), TtsError> {
    let fade = samples_for_ms(cfg.sample_rate_out, FADE_MS);
    let mut first_write = true;
    let mut current = Some(first);

    while let Some(segment) = current.take() {
        let mut pcm = pcm_i16le_bytes_to_samples(&segment.data);
        if pcm.is_empty() {
            // zero-length segment; move on to the next one
        } else {
            if first_write {
                apply_fade_in(&mut pcm, fade);
                first_write = false;
            }
            let interrupted = cancel.is_cancelled();
            if interrupted {
                apply_fade_out(&mut pcm, fade);
            }
            if !egress
                .write(AudioChunk {
                    pcm,
                    sample_rate: cfg.sample_rate_out,
                })
                .await
            {
                return Ok(());
            }
            if interrupted {
                return Ok(());
            }
        }

        match next_segment(&mut segments, cfg, cancel).await? {
            Pulled::Segment(segment) => current = Some(segment),
            Pulled::End | Pulled::Cancelled => break,
        }
    }
    Ok(())
}

/// MP3 segments are piped through `ffmpeg -f mp3 -i pipe:0 -f s16le pipe:1`;
/// a writer task feeds the encoder stream while this task reads decoded PCM
/// one quantum at a time.
async fn speak_mp3(
    first: AudioSegment,
    mut segments: SegmentStream,
    egress: &AudioEgress,
    cfg: &TtsWorkerConfig,
    cancel: &CancellationToken,
) -> Result<(), TtsError> {
    let mut child = spawn_decoder(cfg.sample_rate_out)
        .map_err(|e| TtsError::Decode(format!("failed to start ffmpeg: {e}")))?;
    let mut stdin = child.stdin.take().expect("decoder stdin is piped");
    let mut stdout = child.stdout.take().expect("decoder stdout is piped");

    let writer_cancel = cancel.clone();
    let writer_timeout = cfg.chunk_timeout;
    let writer = tokio::spawn(async move {
        if stdin.write_all(&first.data).await.is_err() {
            return;
        }
        loop {
            let segment = tokio::select! {
                _ = writer_cancel.cancelled() => break,
                item = timeout(writer_timeout, segments.next()) => match item {
                    Ok(Some(Ok(segment))) => segment,
                    Ok(Some(Err(_))) | Ok(None) | Err(_) => break,
                },
            };
            if stdin.write_all(&segment.data).await.is_err() {
                break;
            }
        }
        // stdin drops here, closing the pipe so the decoder can flush
    });

    let fade = samples_for_ms(cfg.sample_rate_out, FADE_MS);
    let mut first_write = true;
    let mut buf = vec![0u8; DECODE_QUANTUM_BYTES];
    let mut carry: Vec<u8> = Vec::new();

    let result = loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            n = timeout(cfg.chunk_timeout, stdout.read(&mut buf)) => match n {
                Err(_) => break Err(TtsError::Decode("decoder produced no output in time".to_string())),
                Ok(Err(e)) => break Err(TtsError::Decode(e.to_string())),
                Ok(Ok(0)) => break Ok(()),
                Ok(Ok(n)) => n,
            },
        };

        carry.extend_from_slice(&buf[..read]);
        let usable = carry.len() - carry.len() % 2;
        let mut pcm = pcm_i16le_bytes_to_samples(&carry[..usable]);
        carry.drain(..usable);
        if pcm.is_empty() {
            continue;
        }

        if first_write {
            apply_fade_in(&mut pcm, fade);
            first_write = false;
        }
        let interrupted = cancel.is_cancelled();
        if interrupted {
            apply_fade_out(&mut pcm, fade);
        }
        if !egress
            .write(AudioChunk {
                pcm,
                sample_rate: cfg.sample_rate_out,
            })
            .await
        {
            break Ok(());
        }
        if interrupted {
            break Ok(());
        }
    };

    writer.abort();
    let _ = child.start_kill();
    result
}

fn spawn_decoder(sample_rate: u32) -> std::io::Result<Child> {
    let rate = sample_rate.to_string();
    Command::new("ffmpeg")
        .args([
            "-hide_banner",
            "-loglevel",
            "error",
            "-f",
            "mp3",
            "-i",
            "pipe:0",
            "-f",
            "s16le",
            "-ar",
            rate.as_str(),
            "-ac",
            "1",
            "pipe:1",
        ])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
}
