//! Per-connection orchestrator.
//!
//! A session owns the audio pipeline (ingest → segmenter → ASR), the Brain
//! task, and the TTS worker, glued by channels onto one serialized outbound
//! frame stream. Interruption cancels the current turn's token; the token is
//! re-armed when the next turn starts.

use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, oneshot, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tank_agent::{
    split_speakable_chunks, AgentError, Brain, BrainConfig, ChatBackend, ToolRegistry, TtsRequest,
    TTS_MIN_CHUNK_CHARS,
};
use tank_core::{
    AssistantConfig, AudioIngest, FrameQueue, Language, SegmenterEvent, SpeechRecognizer,
    UtteranceSegmenter, VoiceActivityDetector,
};

use crate::api::protocol::{OutboundFrame, ServerFrame};
use crate::egress::AudioEgress;
use crate::tts::{spawn_tts_worker, SpeechSynthesizer, TtsCommand, TtsWorkerConfig};

/// Process-wide collaborators injected into each session.
pub struct SessionDeps {
    pub config: Arc<AssistantConfig>,
    pub asr: Arc<dyn SpeechRecognizer>,
    pub llm: Arc<dyn ChatBackend>,
    pub tts: Arc<dyn SpeechSynthesizer>,
    pub tools: Arc<ToolRegistry>,
    pub vad: Box<dyn VoiceActivityDetector>,
}

struct BrainInput {
    text: String,
    language: Language,
}

struct Shared {
    session_id: String,
    out_tx: mpsc::Sender<OutboundFrame>,
    cancel: StdMutex<CancellationToken>,
}

impl Shared {
    async fn send(&self, frame: ServerFrame) -> bool {
        self.out_tx.send(OutboundFrame::Text(frame)).await.is_ok()
    }

    /// Cancel the current turn. Idempotent; a fresh token is armed at the
    /// start of the next turn.
    fn interrupt(&self, reason: &str) {
        let token = self.cancel.lock().expect("cancel lock").clone();
        if !token.is_cancelled() {
            info!(session_id = %self.session_id, reason, "interrupting current turn");
            token.cancel();
        }
    }

    fn arm(&self) -> CancellationToken {
        let fresh = CancellationToken::new();
        *self.cancel.lock().expect("cancel lock") = fresh.clone();
        fresh
    }
}

pub struct Session {
    shared: Arc<Shared>,
    ingest: TokioMutex<AudioIngest>,
    brain_tx: mpsc::Sender<BrainInput>,
    egress: AudioEgress,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Wire up and start all session tasks, then announce `signal:ready`.
    pub async fn spawn(
        deps: SessionDeps,
        session_id: String,
        out_tx: mpsc::Sender<OutboundFrame>,
    ) -> Self {
        let SessionDeps {
            config,
            asr,
            llm,
            tts,
            tools,
            vad,
        } = deps;

        let shared = Arc::new(Shared {
            session_id: session_id.clone(),
            out_tx: out_tx.clone(),
            cancel: StdMutex::new(CancellationToken::new()),
        });

        let ingest = AudioIngest::new(
            config.sample_rate_in,
            config.frame_ms,
            config.max_frames_queue,
        );
        let frames = ingest.queue();

        let (brain_tx, brain_rx) = mpsc::channel::<BrainInput>(16);
        let (tts_tx, tts_rx) = mpsc::channel::<TtsCommand>(64);

        let egress = AudioEgress::new(out_tx);
        let tts_task = spawn_tts_worker(
            tts,
            egress.clone(),
            tts_rx,
            TtsWorkerConfig::from_assistant(&config),
        );
        let pipeline_task = tokio::spawn(run_audio_pipeline(
            Arc::clone(&shared),
            Arc::clone(&config),
            asr,
            vad,
            frames,
            brain_tx.clone(),
        ));
        let brain_task = tokio::spawn(run_brain(
            Arc::clone(&shared),
            Arc::clone(&config),
            llm,
            tools,
            brain_rx,
            tts_tx,
        ));

        shared.send(ServerFrame::signal("ready")).await;
        info!(session_id = %session_id, "session ready");

        Self {
            shared,
            ingest: TokioMutex::new(ingest),
            brain_tx,
            egress,
            tasks: StdMutex::new(vec![tts_task, pipeline_task, brain_task]),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    /// Inbound binary frame: Int16LE mono PCM.
    pub async fn push_audio(&self, bytes: &[u8]) {
        self.ingest.lock().await.push_bytes(bytes);
    }

    /// Direct text turn (typed input). Queued FIFO behind any active turn.
    pub async fn submit_text(&self, content: &str) {
        let text = content.trim();
        if text.is_empty() {
            return;
        }
        let input = BrainInput {
            text: text.to_string(),
            language: Language::Unknown,
        };
        if self.brain_tx.send(input).await.is_err() {
            warn!(session_id = %self.shared.session_id, "brain task is gone; dropping text input");
        }
    }

    pub fn interrupt(&self, reason: &str) {
        self.shared.interrupt(reason);
    }

    /// True while reply audio was written within the egress busy window.
    pub fn is_speaking(&self) -> bool {
        self.egress.is_busy()
    }

    /// Cancel in-flight work and release every task. History is dropped
    /// with the session; nothing survives the connection.
    pub async fn close(&self) {
        self.shared.interrupt("session closed");
        self.ingest.lock().await.close();
        for task in self.tasks.lock().expect("tasks lock").drain(..) {
            task.abort();
        }
        info!(session_id = %self.shared.session_id, "session closed");
    }
}

async fn run_audio_pipeline(
    shared: Arc<Shared>,
    config: Arc<AssistantConfig>,
    asr: Arc<dyn SpeechRecognizer>,
    vad: Box<dyn VoiceActivityDetector>,
    frames: Arc<FrameQueue>,
    brain_tx: mpsc::Sender<BrainInput>,
) {
    let mut segmenter = UtteranceSegmenter::new(config.segmenter(), vad);

    while let Some(frame) = frames.pop().await {
        for event in segmenter.push_frame(frame) {
            match event {
                SegmenterEvent::SpeechStart => {
                    // Barge-in: stop the assistant as soon as the user
                    // starts talking, not when the utterance completes.
                    shared.interrupt("speech onset");
                }
                SegmenterEvent::Utterance(utterance) => {
                    let recognizer = Arc::clone(&asr);
                    let transcribed =
                        tokio::task::spawn_blocking(move || recognizer.transcribe(&utterance))
                            .await;
                    match transcribed {
                        Ok(Ok(transcript)) => {
                            if !shared.send(ServerFrame::transcript(&transcript)).await {
                                return;
                            }
                            let text = transcript.text.trim().to_string();
                            if text.is_empty() {
                                debug!(session_id = %shared.session_id, "empty transcript, skipping turn");
                                continue;
                            }
                            let input = BrainInput {
                                text,
                                language: transcript.language,
                            };
                            if brain_tx.send(input).await.is_err() {
                                return;
                            }
                        }
                        Ok(Err(e)) => {
                            warn!(session_id = %shared.session_id, error = %e, "transcription failed");
                            if !shared.send(ServerFrame::transcript_error(&e)).await {
                                return;
                            }
                        }
                        Err(e) => {
                            warn!(session_id = %shared.session_id, error = %e, "transcription task failed");
                        }
                    }
                }
            }
        }
    }
}

async fn run_brain(
    shared: Arc<Shared>,
    config: Arc<AssistantConfig>,
    llm: Arc<dyn ChatBackend>,
    tools: Arc<ToolRegistry>,
    mut brain_rx: mpsc::Receiver<BrainInput>,
    tts_tx: mpsc::Sender<TtsCommand>,
) {
    let mut brain = Brain::new(llm, tools, BrainConfig::from_assistant(&config));

    while let Some(input) = brain_rx.recv().await {
        if input.text.trim().is_empty() {
            continue;
        }
        let cancel = shared.arm();
        if !shared.send(ServerFrame::signal("processing_started")).await {
            return;
        }

        let (upd_tx, mut upd_rx) = mpsc::channel(64);
        let turn = async {
            let outcome = brain
                .run_turn(&input.text, input.language, &upd_tx, &cancel)
                .await;
            drop(upd_tx);
            outcome
        };
        let forward = async {
            while let Some(update) = upd_rx.recv().await {
                if !shared.send(ServerFrame::from_update(update)).await {
                    break;
                }
            }
        };
        let (outcome, ()) = tokio::join!(turn, forward);

        match outcome {
            Ok(outcome) if !outcome.reply_text.is_empty() => {
                let voice = config.voice_for_language(outcome.language).to_string();
                for text in split_speakable_chunks(&outcome.reply_text, TTS_MIN_CHUNK_CHARS) {
                    let request = TtsRequest {
                        text,
                        language: outcome.language,
                        voice_hint: Some(voice.clone()),
                        msg_id: outcome.msg_id.clone(),
                    };
                    let command = TtsCommand::Speak {
                        request,
                        cancel: cancel.clone(),
                    };
                    if tts_tx.send(command).await.is_err() {
                        break;
                    }
                }
                // processing_ended fires once the last chunk reached the
                // egress, or immediately on cancel.
                let (ack_tx, ack_rx) = oneshot::channel();
                if tts_tx.send(TtsCommand::Flush(ack_tx)).await.is_ok() {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            debug!(session_id = %shared.session_id, "synthesis cancelled");
                        }
                        _ = ack_rx => {}
                    }
                }
            }
            Ok(_) => {}
            Err(AgentError::Interrupted) => {
                debug!(session_id = %shared.session_id, "turn interrupted");
            }
            Err(e) => {
                warn!(session_id = %shared.session_id, error = %e, "brain turn failed");
            }
        }

        if !shared.send(ServerFrame::signal("processing_ended")).await {
            return;
        }
    }
}
