//! Deciding when buffered lines are worth an analysis call.
//!
//! Policy: a counter of lines since the last *fired* trigger proposes an
//! analysis every `line_threshold` lines. A proposal is suppressed while the
//! previous trigger is younger than the cooldown, or while fewer than
//! `min_new_chars` of new text have arrived. Suppression keeps the counter
//! and the accumulated text, so the first line after the cooldown fires.
//! Firing resets both and stamps the cooldown at the moment of firing.

use tokio::time::Instant;

use kubesight_types::{AnalysisMeta, AnalysisRequest, TriggerConfig};

use crate::buffer::LineBuffer;

/// Outcome of recording one line
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TriggerDecision {
    /// Threshold not reached yet
    Pending,
    /// Proposal dropped: the previous trigger is inside the cooldown window
    Cooldown,
    /// Proposal dropped: not enough new text since the last trigger
    TooLittle,
    /// Hand this request to the analysis bridge
    Fire(AnalysisRequest),
}

/// Line buffer plus debounced scheduler for one session
#[derive(Debug)]
pub struct AnalysisTrigger {
    config: TriggerConfig,
    meta: AnalysisMeta,
    buffer: LineBuffer,
    lines_since: usize,
    chars_since: usize,
    last_fired: Option<Instant>,
}

impl AnalysisTrigger {
    pub fn new(config: TriggerConfig, meta: AnalysisMeta) -> Self {
        Self {
            buffer: LineBuffer::new(config.buffer_capacity),
            config,
            meta,
            lines_since: 0,
            chars_since: 0,
            last_fired: None,
        }
    }

    /// Buffer one (already redacted) line and decide whether to fire
    pub fn record(&mut self, line: &str, now: Instant) -> TriggerDecision {
        self.buffer.push(line);
        self.lines_since += 1;
        self.chars_since += line.chars().count();

        if self.lines_since < self.config.line_threshold.max(1) {
            return TriggerDecision::Pending;
        }
        if self.chars_since < self.config.min_new_chars {
            return TriggerDecision::TooLittle;
        }
        if let Some(last) = self.last_fired {
            if now.saturating_duration_since(last) < self.config.cooldown() {
                return TriggerDecision::Cooldown;
            }
        }

        let request = self.build_request(None);
        self.mark_fired(now);
        TriggerDecision::Fire(request)
    }

    /// Request an analysis now, bypassing threshold and cooldown
    ///
    /// Returns `None` while nothing is buffered.
    pub fn request_now(&mut self, question: Option<String>, now: Instant) -> Option<AnalysisRequest> {
        if self.buffer.is_empty() {
            return None;
        }
        let request = self.build_request(question);
        self.mark_fired(now);
        Some(request)
    }

    /// Drop buffered lines and reset the scheduler
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.lines_since = 0;
        self.chars_since = 0;
        self.last_fired = None;
    }

    pub fn buffer(&self) -> &LineBuffer {
        &self.buffer
    }

    /// Lines recorded since the last fired trigger
    pub fn pending_lines(&self) -> usize {
        self.lines_since
    }

    fn mark_fired(&mut self, now: Instant) {
        self.lines_since = 0;
        self.chars_since = 0;
        self.last_fired = Some(now);
    }

    fn build_request(&self, question: Option<String>) -> AnalysisRequest {
        let excerpt = self.buffer.tail_text(self.config.tail_window.max(1));
        AnalysisRequest {
            meta: self.meta.clone(),
            recent_log_chunk: bound_excerpt(&excerpt, self.config.max_excerpt_chars),
            question,
        }
    }
}

/// Keep at most `max_chars` of the most recent text
///
/// The cut lands on a line boundary when the kept part has one, so the
/// excerpt does not start mid-line.
pub fn bound_excerpt(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }

    let start = text
        .char_indices()
        .nth(total - max_chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let kept = &text[start..];
    if text[..start].ends_with('\n') {
        return kept.to_string();
    }

    match kept.find('\n') {
        Some(i) if i + 1 < kept.len() => kept[i + 1..].to_string(),
        _ => kept.to_string(),
    }
}
