//! Line-delimited data stream encoding.
//!
//! ```text
//! 0:"Hel"
//! 0:"lo"
//! e:{"finishReason":"stop","usage":{"promptTokens":9,"completionTokens":2},"isContinued":false}
//! ```

use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::driver::{CompletionResult, GenerationEvent, GenerationStream};
use crate::error::{AiError, Result};

pub const TOKEN_TAG: char = '0';
pub const FINISH_TAG: char = 'e';

pub const STREAM_PROTOCOL_HEADER: &str = "x-stream-protocol";
pub const DATA_STREAM_HEADER: &str = "x-vercel-ai-data-stream";
pub const PROTOCOL_VERSION: &str = "v1";

pub type EncodedStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Response body encoding selected by the `protocol` query parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamProtocol {
    /// Tagged JSON lines with a terminal record.
    #[default]
    Data,
    /// Raw token text, no framing and no terminal record.
    Text,
}

impl StreamProtocol {
    /// Absent or empty selects `Data`.
    pub fn parse(value: Option<&str>) -> Result<Self> {
        match value.map(str::trim) {
            None | Some("") => Ok(StreamProtocol::Data),
            Some(v) if v.eq_ignore_ascii_case("data") => Ok(StreamProtocol::Data),
            Some(v) if v.eq_ignore_ascii_case("text") => Ok(StreamProtocol::Text),
            Some(other) => Err(AiError::Validation(format!(
                "Unsupported stream protocol: {other}"
            ))),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            StreamProtocol::Data => "text/event-stream; charset=utf-8",
            StreamProtocol::Text => "text/plain; charset=utf-8",
        }
    }

    /// Extra response headers announcing the protocol version.
    pub fn headers(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            StreamProtocol::Data => &[
                (STREAM_PROTOCOL_HEADER, PROTOCOL_VERSION),
                (DATA_STREAM_HEADER, PROTOCOL_VERSION),
            ],
            StreamProtocol::Text => &[(STREAM_PROTOCOL_HEADER, PROTOCOL_VERSION)],
        }
    }
}

fn encoding_error(err: serde_json::Error) -> AiError {
    AiError::StreamEncoding(err.to_string())
}

/// `0:<json string>\n`
pub fn encode_token(text: &str) -> Result<String> {
    let payload = serde_json::to_string(text).map_err(encoding_error)?;
    Ok(format!("{TOKEN_TAG}:{payload}\n"))
}

/// `e:<json object>\n`
pub fn encode_finish(result: &CompletionResult) -> Result<String> {
    let payload = serde_json::to_string(result).map_err(encoding_error)?;
    Ok(format!("{FINISH_TAG}:{payload}\n"))
}

/// Encode generation events into body chunks, one chunk per event.
///
/// A token after the finish record, a second finish record, or a stream that
/// ends without one is a `StreamEncoding` error. Any error ends the stream;
/// chunks already yielded stay sent.
pub fn encode_stream(mut events: GenerationStream, protocol: StreamProtocol) -> EncodedStream {
    Box::pin(async_stream::stream! {
        let mut finished = false;

        while let Some(event) = events.next().await {
            let encoded = match event {
                Ok(GenerationEvent::Token(_)) | Ok(GenerationEvent::Finish(_)) if finished => {
                    Err(AiError::StreamEncoding(
                        "event received after the finish record".to_string(),
                    ))
                }
                Ok(GenerationEvent::Token(text)) if text.is_empty() => continue,
                Ok(GenerationEvent::Token(text)) => match protocol {
                    StreamProtocol::Data => encode_token(&text),
                    StreamProtocol::Text => Ok(text),
                },
                Ok(GenerationEvent::Finish(result)) => {
                    finished = true;
                    match protocol {
                        StreamProtocol::Data => encode_finish(&result),
                        StreamProtocol::Text => continue,
                    }
                }
                Err(err) => Err(err),
            };

            match encoded {
                Ok(line) => yield Ok(Bytes::from(line)),
                Err(err) => {
                    tracing::warn!(error = %err, "Aborting response stream");
                    yield Err(err);
                    return;
                }
            }
        }

        if !finished {
            tracing::warn!("Generation ended without a finish record");
            yield Err(AiError::StreamEncoding(
                "generation ended without a finish record".to_string(),
            ));
        }
    })
}
