//! Decoding of streamed reasoning-service bodies
//!
//! OpenAI and Anthropic stream server-sent events, Ollama streams one JSON
//! object per line. Both are line oriented, so bytes are first cut into
//! lines and each line is then interpreted per provider.

use serde_json::Value;

use crate::config::Provider;
use crate::error::Result;

/// Splits a byte stream into lines, carrying partial lines across chunks
#[derive(Debug, Default)]
pub(crate) struct LineDecoder {
    pending: Vec<u8>,
}

impl LineDecoder {
    /// Feed bytes, returning every line completed by them
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        // '\n' never occurs inside a multi-byte UTF-8 sequence
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(to_line(&line[..line.len() - 1]));
        }
        lines
    }

    /// Flush a trailing line without terminator
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(to_line(&rest))
    }
}

fn to_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Meaning of one decoded line
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Frame {
    Text(String),
    Done,
    Failed(String),
    Skip,
}

/// Interpret one line of a provider's streaming body
pub(crate) fn parse_line(provider: Provider, line: &str) -> Result<Frame> {
    match provider {
        Provider::OpenAI => parse_openai(line),
        Provider::Claude => parse_claude(line),
        Provider::Ollama => parse_ollama(line),
    }
}

/// Payload of an SSE `data:` line
fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}

fn error_message(value: &Value) -> Option<String> {
    let error = value.get("error")?;
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string());
    Some(message)
}

fn text_frame(text: Option<&str>) -> Frame {
    match text {
        Some(t) if !t.is_empty() => Frame::Text(t.to_string()),
        _ => Frame::Skip,
    }
}

fn parse_openai(line: &str) -> Result<Frame> {
    let Some(data) = sse_data(line) else {
        return Ok(Frame::Skip);
    };
    if data == "[DONE]" {
        return Ok(Frame::Done);
    }
    if data.is_empty() {
        return Ok(Frame::Skip);
    }

    let value: Value = serde_json::from_str(data)?;
    if let Some(message) = error_message(&value) {
        return Ok(Frame::Failed(message));
    }

    Ok(text_frame(
        value
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|arr| arr.first())
            .and_then(|v| v.get("delta"))
            .and_then(|v| v.get("content"))
            .and_then(Value::as_str),
    ))
}

fn parse_claude(line: &str) -> Result<Frame> {
    let Some(data) = sse_data(line) else {
        return Ok(Frame::Skip);
    };
    if data.is_empty() {
        return Ok(Frame::Skip);
    }

    let value: Value = serde_json::from_str(data)?;
    match value.get("type").and_then(Value::as_str) {
        Some("content_block_delta") => Ok(text_frame(
            value
                .get("delta")
                .and_then(|d| d.get("text"))
                .and_then(Value::as_str),
        )),
        Some("message_stop") => Ok(Frame::Done),
        Some("error") => Ok(Frame::Failed(
            error_message(&value).unwrap_or_else(|| "unknown error".to_string()),
        )),
        _ => Ok(Frame::Skip),
    }
}

fn parse_ollama(line: &str) -> Result<Frame> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Frame::Skip);
    }

    let value: Value = serde_json::from_str(line)?;
    if let Some(message) = value.get("error").and_then(Value::as_str) {
        return Ok(Frame::Failed(message.to_string()));
    }

    match text_frame(value.get("response").and_then(Value::as_str)) {
        Frame::Skip if value.get("done").and_then(Value::as_bool) == Some(true) => Ok(Frame::Done),
        frame => Ok(frame),
    }
}
