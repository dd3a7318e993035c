//! Microsoft Edge speech synthesis over its public WebSocket endpoint.
//!
//! One connection per request: a `speech.config` message selects the MP3
//! output format, an SSML message carries the text, and binary frames with a
//! `Path:audio` header carry the encoded segments until `Path:turn.end`.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use chrono::Utc;
use futures::{SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{AudioEncoding, AudioSegment, SegmentStream, SpeechSynthesizer, TtsError};

const WSS_ENDPOINT: &str =
    "wss://speech.platform.bing.com/consumer/speech/synthesize/readaloud/edge/v1";
const TRUSTED_CLIENT_TOKEN: &str = "6A5AA1D4EAFF4E9FB37E23D68491D6F4";
const OUTPUT_FORMAT: &str = "audio-24khz-48kbitrate-mono-mp3";

#[derive(Debug, Clone, Copy, Default)]
pub struct EdgeSpeech;

#[async_trait]
impl SpeechSynthesizer for EdgeSpeech {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<SegmentStream, TtsError> {
        if voice.is_empty() {
            return Err(TtsError::Engine("no voice selected".to_string()));
        }
        let request_id = Uuid::new_v4().simple().to_string();
        let url = format!(
            "{WSS_ENDPOINT}?TrustedClientToken={TRUSTED_CLIENT_TOKEN}&ConnectionId={request_id}"
        );

        let (socket, _) = connect_async(&url)
            .await
            .map_err(|e| TtsError::Engine(format!("websocket connect failed: {e}")))?;
        let (mut sink, mut source) = socket.split();

        let timestamp = Utc::now().to_rfc2822();
        let config_message = format!(
            "X-Timestamp:{timestamp}\r\n\
             Content-Type:application/json; charset=utf-8\r\n\
             Path:speech.config\r\n\r\n\
             {{\"context\":{{\"synthesis\":{{\"audio\":{{\"metadataoptions\":{{\
             \"sentenceBoundaryEnabled\":\"false\",\"wordBoundaryEnabled\":\"false\"}},\
             \"outputFormat\":\"{OUTPUT_FORMAT}\"}}}}}}}}"
        );
        let ssml_message = format!(
            "X-RequestId:{request_id}\r\n\
             Content-Type:application/ssml+xml\r\n\
             X-Timestamp:{timestamp}\r\n\
             Path:ssml\r\n\r\n{}",
            build_ssml(text, voice)
        );
        sink.send(Message::Text(config_message.into()))
            .await
            .map_err(|e| TtsError::Engine(format!("failed to send speech config: {e}")))?;
        sink.send(Message::Text(ssml_message.into()))
            .await
            .map_err(|e| TtsError::Engine(format!("failed to send ssml: {e}")))?;

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            while let Some(message) = source.next().await {
                match message {
                    Ok(Message::Binary(data)) => {
                        if let Some(audio) = split_audio_payload(&data) {
                            if audio.is_empty() {
                                continue;
                            }
                            let segment = AudioSegment {
                                data: audio.to_vec(),
                                encoding: AudioEncoding::Mp3,
                            };
                            if tx.send(Ok(segment)).await.is_err() {
                                // consumer cancelled; stop pulling
                                return;
                            }
                        }
                    }
                    Ok(Message::Text(text)) => {
                        if text.contains("Path:turn.end") {
                            debug!("edge synthesis turn complete");
                            return;
                        }
                    }
                    Ok(Message::Close(_)) => return,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("edge synthesis stream error: {e}");
                        let _ = tx
                            .send(Err(TtsError::Engine(format!("stream error: {e}"))))
                            .await;
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(ChannelStream(rx)) as SegmentStream)
    }
}

struct ChannelStream(mpsc::Receiver<Result<AudioSegment, TtsError>>);

impl Stream for ChannelStream {
    type Item = Result<AudioSegment, TtsError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.0.poll_recv(cx)
    }
}

fn build_ssml(text: &str, voice: &str) -> String {
    format!(
        "<speak version='1.0' xmlns='http://www.w3.org/2001/10/synthesis' xml:lang='en-US'>\
         <voice name='{voice}'>{}</voice></speak>",
        escape_xml(text)
    )
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\'', "&apos;")
        .replace('"', "&quot;")
}

/// Binary frames carry a big-endian u16 header length, the header itself,
/// then the payload. Only `Path:audio` frames carry synthesized audio.
fn split_audio_payload(data: &[u8]) -> Option<&[u8]> {
    if data.len() < 2 {
        return None;
    }
    let header_len = u16::from_be_bytes([data[0], data[1]]) as usize;
    let payload_start = 2 + header_len;
    if data.len() < payload_start {
        return None;
    }
    let header = String::from_utf8_lossy(&data[2..payload_start]);
    if !header.contains("Path:audio") {
        return None;
    }
    Some(&data[payload_start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssml_escapes_reserved_characters() {
        let ssml = build_ssml("a < b & c", "en-US-JennyNeural");
        assert!(ssml.contains("a &lt; b &amp; c"));
        assert!(ssml.contains("name='en-US-JennyNeural'"));
    }

    #[test]
    fn audio_payload_extraction_requires_audio_path() {
        let header = b"X-RequestId:abc\r\nPath:audio\r\n";
        let mut frame = Vec::new();
        frame.extend_from_slice(&(header.len() as u16).to_be_bytes());
        frame.extend_from_slice(header);
        frame.extend_from_slice(&[1, 2, 3, 4]);
        assert_eq!(split_audio_payload(&frame), Some(&[1u8, 2, 3, 4][..]));

        let header = b"Path:turn.start\r\n";
        let mut frame = Vec::new();
        frame.extend_from_slice(&(header.len() as u16).to_be_bytes());
        frame.extend_from_slice(header);
        assert_eq!(split_audio_payload(&frame), None);

        // truncated frames are ignored rather than panicking
        assert_eq!(split_audio_payload(&[0]), None);
        assert_eq!(split_audio_payload(&[0, 200, 1]), None);
    }
}
