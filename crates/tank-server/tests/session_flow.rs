//! End-to-end session scenarios over mock adapters.
//!
//! A `Session` is constructed directly against an outbound frame channel, so
//! every assertion runs against exactly what a client would receive.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;

use tank_agent::{
    AgentError, ChatBackend, ChatRequest, EventStream, LlmEvent, Tool, ToolRegistry,
};
use tank_core::{
    audio::pcm_i16_to_le_bytes, AssistantConfig, EnergyVad, Language, SpeechRecognizer,
    Transcript, TranscriptError, Utterance,
};
use tank_server::api::protocol::{OutboundFrame, ServerFrame, ServerFrameKind};
use tank_server::api::voice_ws::handle_control_frame;
use tank_server::session::{Session, SessionDeps};
use tank_server::tts::{
    AudioEncoding, AudioSegment, SegmentStream, SpeechSynthesizer, TtsError,
};

// ---------------------------------------------------------------- adapters

enum Script {
    Events(Vec<LlmEvent>),
}

struct ScriptedChat {
    scripts: Mutex<VecDeque<Script>>,
}

impl ScriptedChat {
    fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
        })
    }
}

#[async_trait]
impl ChatBackend for ScriptedChat {
    async fn stream_chat(&self, _request: ChatRequest) -> Result<EventStream, AgentError> {
        let Script::Events(events) = self
            .scripts
            .lock()
            .expect("scripts lock")
            .pop_front()
            .unwrap_or(Script::Events(vec![LlmEvent::Done]));
        Ok(Box::pin(futures::stream::iter(
            events.into_iter().map(Ok::<LlmEvent, AgentError>),
        )) as EventStream)
    }
}

struct QueuedRecognizer {
    transcripts: Mutex<VecDeque<Result<Transcript, String>>>,
}

impl QueuedRecognizer {
    fn with(transcripts: Vec<Result<Transcript, String>>) -> Arc<Self> {
        Arc::new(Self {
            transcripts: Mutex::new(transcripts.into()),
        })
    }
}

impl SpeechRecognizer for QueuedRecognizer {
    fn transcribe(&self, _utterance: &Utterance) -> Result<Transcript, TranscriptError> {
        match self
            .transcripts
            .lock()
            .expect("transcripts lock")
            .pop_front()
        {
            Some(Ok(transcript)) => Ok(transcript),
            Some(Err(message)) => Err(TranscriptError::Engine(message)),
            None => Ok(Transcript::final_text("", Language::Unknown, 0.0)),
        }
    }
}

/// PCM synthesizer pacing segments over wall-clock time, for interruption
/// scenarios.
struct PacedPcmSynth {
    segments: usize,
    segment_gap: Duration,
}

#[async_trait]
impl SpeechSynthesizer for PacedPcmSynth {
    async fn synthesize(&self, _text: &str, _voice: &str) -> Result<SegmentStream, TtsError> {
        let count = self.segments;
        let gap = self.segment_gap;
        let stream = futures::stream::unfold(0usize, move |produced| async move {
            if produced >= count {
                return None;
            }
            if produced > 0 {
                tokio::time::sleep(gap).await;
            }
            let segment = AudioSegment {
                data: pcm_i16_to_le_bytes(&vec![8000i16; 2400]),
                encoding: AudioEncoding::PcmI16,
            };
            Some((Ok(segment), produced + 1))
        });
        Ok(Box::pin(stream) as SegmentStream)
    }
}

fn quick_synth() -> Arc<PacedPcmSynth> {
    Arc::new(PacedPcmSynth {
        segments: 2,
        segment_gap: Duration::from_millis(1),
    })
}

struct FixedClockTool;

#[async_trait]
impl Tool for FixedClockTool {
    fn name(&self) -> &'static str {
        "get_time"
    }
    fn description(&self) -> &'static str {
        "Get current time and date"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}, "required": []})
    }
    async fn invoke(&self, _args: serde_json::Value) -> Result<String, AgentError> {
        Ok("2024-01-15 14:30:25".to_string())
    }
}

// ----------------------------------------------------------------- helpers

fn test_config() -> AssistantConfig {
    AssistantConfig {
        llm_api_key: "sk-test".to_string(),
        ..AssistantConfig::default()
    }
}

fn deps(
    llm: Arc<dyn ChatBackend>,
    tts: Arc<dyn SpeechSynthesizer>,
    asr: Arc<dyn SpeechRecognizer>,
    tools: ToolRegistry,
) -> SessionDeps {
    SessionDeps {
        config: Arc::new(test_config()),
        asr,
        llm,
        tts,
        tools: Arc::new(tools),
        vad: Box::new(EnergyVad::default()),
    }
}

fn clock_tools() -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register(FixedClockTool);
    tools
}

fn speech_bytes(ms: u32) -> Vec<u8> {
    pcm_i16_to_le_bytes(&vec![6000i16; (16 * ms) as usize])
}

fn silence_bytes(ms: u32) -> Vec<u8> {
    pcm_i16_to_le_bytes(&vec![0i16; (16 * ms) as usize])
}

fn is_signal(frame: &OutboundFrame, content: &str) -> bool {
    matches!(
        frame,
        OutboundFrame::Text(f) if f.kind == ServerFrameKind::Signal && f.content == content
    )
}

fn is_binary(frame: &OutboundFrame) -> bool {
    matches!(frame, OutboundFrame::Binary(_))
}

fn text_frame(frame: &OutboundFrame) -> Option<&ServerFrame> {
    match frame {
        OutboundFrame::Text(f) if f.kind == ServerFrameKind::Text => Some(f),
        _ => None,
    }
}

fn update_frame(frame: &OutboundFrame) -> Option<&ServerFrame> {
    match frame {
        OutboundFrame::Text(f) if f.kind == ServerFrameKind::Update => Some(f),
        _ => None,
    }
}

/// Receive frames until `processing_ended` has been seen `ends` times.
async fn collect_until_ended(
    rx: &mut mpsc::Receiver<OutboundFrame>,
    ends: usize,
    budget: Duration,
) -> Vec<OutboundFrame> {
    let mut frames = Vec::new();
    let mut seen = 0;
    let deadline = tokio::time::Instant::now() + budget;
    while seen < ends {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(frame)) => {
                if is_signal(&frame, "processing_ended") {
                    seen += 1;
                }
                frames.push(frame);
            }
            _ => break,
        }
    }
    frames
}

// --------------------------------------------------------------- scenarios

#[tokio::test]
async fn typed_hello_produces_text_then_audio_then_ended() {
    let llm = ScriptedChat::new(vec![Script::Events(vec![
        LlmEvent::TextDelta("Hi".to_string()),
        LlmEvent::TextDelta("!".to_string()),
        LlmEvent::Done,
    ])]);
    let (out_tx, mut out_rx) = mpsc::channel(256);
    let session = Session::spawn(
        deps(llm, quick_synth(), QueuedRecognizer::with(vec![]), clock_tools()),
        "s1".to_string(),
        out_tx,
    )
    .await;

    let ready = timeout(Duration::from_secs(1), out_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(is_signal(&ready, "ready"));

    session.submit_text("hello").await;
    let frames = collect_until_ended(&mut out_rx, 1, Duration::from_secs(5)).await;

    let started = frames
        .iter()
        .position(|f| is_signal(f, "processing_started"))
        .expect("processing_started");
    let reply: String = frames
        .iter()
        .filter_map(text_frame)
        .map(|f| f.content.as_str())
        .collect();
    assert_eq!(reply, "Hi!");

    let final_text = frames
        .iter()
        .rposition(|f| matches!(text_frame(f), Some(f) if f.is_final == Some(true)))
        .expect("final text frame");
    let first_binary = frames.iter().position(is_binary).expect("reply audio");
    let ended = frames
        .iter()
        .position(|f| is_signal(f, "processing_ended"))
        .expect("processing_ended");

    // started -> text (final) -> audio -> ended
    assert!(started < final_text);
    assert!(final_text < first_binary);
    assert!(first_binary < ended);
    assert_eq!(ended, frames.len() - 1);

    session.close().await;
}

#[tokio::test]
async fn voice_query_with_tool_call_runs_the_full_pipeline() {
    let llm = ScriptedChat::new(vec![
        Script::Events(vec![
            LlmEvent::ToolCallDelta {
                index: 0,
                id: Some("call_1".to_string()),
                name: Some("get_time".to_string()),
                arguments: "{}".to_string(),
            },
            LlmEvent::Done,
        ]),
        Script::Events(vec![
            LlmEvent::TextDelta("现在是下午两点半，2024年1月15日。".to_string()),
            LlmEvent::Done,
        ]),
    ]);
    let asr = QueuedRecognizer::with(vec![Ok(Transcript::final_text(
        "现在几点",
        Language::Zh,
        0.95,
    ))]);
    let (out_tx, mut out_rx) = mpsc::channel(256);
    let session = Session::spawn(
        deps(llm, quick_synth(), asr, clock_tools()),
        "s2".to_string(),
        out_tx,
    )
    .await;

    // leading silence fills the pre-roll, speech opens the utterance,
    // trailing silence closes it
    session.push_audio(&silence_bytes(400)).await;
    session.push_audio(&speech_bytes(800)).await;
    session.push_audio(&silence_bytes(700)).await;

    let frames = collect_until_ended(&mut out_rx, 1, Duration::from_secs(5)).await;

    let transcript = frames
        .iter()
        .position(|f| {
            matches!(
                f,
                OutboundFrame::Text(sf)
                    if sf.kind == ServerFrameKind::Transcript && sf.content == "现在几点"
            )
        })
        .expect("transcript frame");
    if let OutboundFrame::Text(sf) = &frames[transcript] {
        assert_eq!(sf.metadata.language.as_deref(), Some("zh"));
        assert_eq!(sf.metadata.confidence, Some(0.95));
    }

    let started = frames
        .iter()
        .position(|f| is_signal(f, "processing_started"))
        .expect("processing_started");
    let tool_call = frames
        .iter()
        .position(|f| {
            matches!(
                update_frame(f),
                Some(sf) if sf.metadata.update_type.as_deref() == Some("TOOL_CALL")
                    && sf.metadata.name.as_deref() == Some("get_time")
                    && sf.metadata.turn == Some(0)
                    && sf.metadata.index == Some(0)
            )
        })
        .expect("tool call update");
    let tool_result = frames
        .iter()
        .position(|f| {
            matches!(
                update_frame(f),
                Some(sf) if sf.metadata.update_type.as_deref() == Some("TOOL_RESULT")
                    && sf.content.contains("14:30:25")
            )
        })
        .expect("tool result update");
    let first_text = frames
        .iter()
        .position(|f| text_frame(f).is_some())
        .expect("reply text");
    let first_binary = frames.iter().position(is_binary).expect("reply audio");

    assert!(transcript < started);
    assert!(started < tool_call);
    assert!(tool_call < tool_result);
    assert!(tool_result < first_text);
    // audio for a reply never precedes its first text frame
    assert!(first_text < first_binary);

    session.close().await;
}

#[tokio::test]
async fn speech_onset_interrupts_playback_within_the_deadline() {
    let llm = ScriptedChat::new(vec![
        Script::Events(vec![
            LlmEvent::TextDelta(
                "这是一段很长的回答，它会被切成语音块并持续播放很长时间。".to_string(),
            ),
            LlmEvent::Done,
        ]),
        // the barge-in turn has nothing to say, so no new audio muddies the
        // post-interrupt window
        Script::Events(vec![LlmEvent::Done]),
    ]);
    let asr = QueuedRecognizer::with(vec![Ok(Transcript::final_text(
        "第二个问题",
        Language::Zh,
        0.9,
    ))]);
    let slow_synth = Arc::new(PacedPcmSynth {
        segments: 25,
        segment_gap: Duration::from_millis(150),
    });
    let (out_tx, mut out_rx) = mpsc::channel(1024);
    let session = Session::spawn(
        deps(llm, slow_synth, asr, clock_tools()),
        "s3".to_string(),
        out_tx,
    )
    .await;

    session.submit_text("你好").await;

    // wait until reply audio is actually flowing
    let onset_at;
    loop {
        let frame = timeout(Duration::from_secs(5), out_rx.recv())
            .await
            .expect("frame before onset")
            .expect("channel open");
        if is_binary(&frame) {
            onset_at = Instant::now();
            break;
        }
    }
    assert!(session.is_speaking());

    // the user starts talking: onset cancels, the utterance starts turn 2
    session.push_audio(&speech_bytes(600)).await;
    session.push_audio(&silence_bytes(700)).await;

    let mut stamped = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let mut ends = 0;
    while ends < 2 {
        match tokio::time::timeout_at(deadline, out_rx.recv()).await {
            Ok(Some(frame)) => {
                if is_signal(&frame, "processing_ended") {
                    ends += 1;
                }
                stamped.push((Instant::now(), frame));
            }
            _ => break,
        }
    }
    assert_eq!(ends, 2, "both the cancelled and the new turn must end");

    // cancelled turn's audio stops within the 200 ms budget
    let late_binaries = stamped
        .iter()
        .filter(|(at, frame)| {
            is_binary(frame) && at.duration_since(onset_at) > Duration::from_millis(200)
        })
        .count();
    assert_eq!(late_binaries, 0, "audio kept flowing after the interrupt");

    // the barge-in produced a fresh turn
    let started = stamped
        .iter()
        .filter(|(_, f)| is_signal(f, "processing_started"))
        .count();
    assert_eq!(started, 1, "the new utterance starts exactly one new turn");

    session.close().await;
}

#[tokio::test]
async fn malformed_tool_arguments_surface_as_error_result() {
    let llm = ScriptedChat::new(vec![
        Script::Events(vec![
            LlmEvent::ToolCallDelta {
                index: 0,
                id: Some("call_1".to_string()),
                name: Some("get_time".to_string()),
                arguments: "{not json".to_string(),
            },
            LlmEvent::Done,
        ]),
        Script::Events(vec![
            LlmEvent::TextDelta("抱歉，请再试一次。".to_string()),
            LlmEvent::Done,
        ]),
    ]);
    let (out_tx, mut out_rx) = mpsc::channel(256);
    let session = Session::spawn(
        deps(llm, quick_synth(), QueuedRecognizer::with(vec![]), clock_tools()),
        "s4".to_string(),
        out_tx,
    )
    .await;

    session.submit_text("time?").await;
    let frames = collect_until_ended(&mut out_rx, 1, Duration::from_secs(5)).await;

    let error_result = frames.iter().find_map(update_frame).filter(|sf| {
        sf.metadata.update_type.as_deref() == Some("TOOL_RESULT")
            && sf.metadata.status.as_deref() == Some("error")
    });
    assert!(error_result.is_some(), "expected an error tool result");
    assert!(
        frames.iter().any(|f| is_signal(f, "processing_ended")),
        "the turn still ends cleanly"
    );

    session.close().await;
}

#[tokio::test]
async fn asr_failure_reports_error_transcript_without_starting_a_turn() {
    let llm = ScriptedChat::new(vec![]);
    let asr = QueuedRecognizer::with(vec![Err("model crashed".to_string())]);
    let (out_tx, mut out_rx) = mpsc::channel(256);
    let session = Session::spawn(
        deps(llm, quick_synth(), asr, clock_tools()),
        "s5".to_string(),
        out_tx,
    )
    .await;

    session.push_audio(&speech_bytes(600)).await;
    session.push_audio(&silence_bytes(700)).await;

    let mut saw_error_transcript = false;
    let deadline = tokio::time::Instant::now() + Duration::from_millis(800);
    while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, out_rx.recv()).await {
        if let OutboundFrame::Text(sf) = &frame {
            assert_ne!(
                sf.content, "processing_started",
                "ASR errors must not reach the brain"
            );
            if sf.kind == ServerFrameKind::Transcript
                && sf.content.is_empty()
                && sf.metadata.status.as_deref() == Some("error")
            {
                saw_error_transcript = true;
            }
        }
    }
    assert!(saw_error_transcript);

    session.close().await;
}

#[tokio::test]
async fn unknown_control_frames_are_dropped_and_session_stays_responsive() {
    let llm = ScriptedChat::new(vec![Script::Events(vec![
        LlmEvent::TextDelta("ok".to_string()),
        LlmEvent::Done,
    ])]);
    let (out_tx, mut out_rx) = mpsc::channel(256);
    let session = Session::spawn(
        deps(llm, quick_synth(), QueuedRecognizer::with(vec![]), clock_tools()),
        "s6".to_string(),
        out_tx,
    )
    .await;

    let ready = timeout(Duration::from_secs(1), out_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(is_signal(&ready, "ready"));

    handle_control_frame(&session, r#"{"type":"debug","foo":1}"#).await;
    handle_control_frame(&session, "{broken json").await;

    // nothing was emitted for the bad frames
    assert!(out_rx.try_recv().is_err());

    handle_control_frame(&session, r#"{"type":"input","content":"hello"}"#).await;
    let frames = collect_until_ended(&mut out_rx, 1, Duration::from_secs(5)).await;
    let reply: String = frames
        .iter()
        .filter_map(text_frame)
        .map(|f| f.content.as_str())
        .collect();
    assert_eq!(reply, "ok");

    session.close().await;
}

#[tokio::test]
async fn double_interrupt_is_idempotent() {
    let llm = ScriptedChat::new(vec![
        Script::Events(vec![
            LlmEvent::TextDelta("慢慢说的一句话。".to_string()),
            LlmEvent::Done,
        ]),
        Script::Events(vec![
            LlmEvent::TextDelta("again".to_string()),
            LlmEvent::Done,
        ]),
    ]);
    let slow_synth = Arc::new(PacedPcmSynth {
        segments: 25,
        segment_gap: Duration::from_millis(150),
    });
    let (out_tx, mut out_rx) = mpsc::channel(1024);
    let session = Session::spawn(
        deps(llm, slow_synth, QueuedRecognizer::with(vec![]), clock_tools()),
        "s7".to_string(),
        out_tx,
    )
    .await;

    session.submit_text("hi").await;
    loop {
        let frame = timeout(Duration::from_secs(5), out_rx.recv())
            .await
            .expect("frame")
            .expect("channel open");
        if is_binary(&frame) {
            break;
        }
    }

    // two interrupts in rapid succession behave like one
    session.interrupt("first");
    session.interrupt("second");

    let frames = collect_until_ended(&mut out_rx, 1, Duration::from_secs(5)).await;
    let ends = frames
        .iter()
        .filter(|f| is_signal(f, "processing_ended"))
        .count();
    assert_eq!(ends, 1);

    // and the session keeps working afterwards
    session.submit_text("next").await;
    let frames = collect_until_ended(&mut out_rx, 1, Duration::from_secs(5)).await;
    let reply: String = frames
        .iter()
        .filter_map(text_frame)
        .map(|f| f.content.as_str())
        .collect();
    assert_eq!(reply, "again");

    session.close().await;
}

#[tokio::test]
async fn identical_inputs_produce_equivalently_shaped_streams() {
    let hello = || {
        Script::Events(vec![
            LlmEvent::TextDelta("Hello!".to_string()),
            LlmEvent::Done,
        ])
    };
    let llm = ScriptedChat::new(vec![hello(), hello()]);
    let (out_tx, mut out_rx) = mpsc::channel(256);
    let session = Session::spawn(
        deps(llm, quick_synth(), QueuedRecognizer::with(vec![]), clock_tools()),
        "s8".to_string(),
        out_tx,
    )
    .await;

    let shape_of = |frames: &[OutboundFrame]| -> Vec<String> {
        frames
            .iter()
            .map(|f| match f {
                OutboundFrame::Binary(_) => "binary".to_string(),
                OutboundFrame::Pong(_) => "pong".to_string(),
                OutboundFrame::Text(sf) => format!("{:?}:{:?}", sf.kind, sf.is_final),
            })
            .collect()
    };

    session.submit_text("hello").await;
    let first = collect_until_ended(&mut out_rx, 1, Duration::from_secs(5)).await;
    session.submit_text("hello").await;
    let second = collect_until_ended(&mut out_rx, 1, Duration::from_secs(5)).await;

    // drop the leading ready signal from the first stream
    let first = &first[1..];
    assert_eq!(shape_of(first), shape_of(&second));

    session.close().await;
}
