//! Log sessions for kubesight
//!
//! This crate owns live log sessions: it opens upstream sources, redacts and
//! filters every chunk, forwards survivors to the viewer and decides when the
//! buffered lines are worth an analysis call.

mod buffer;
mod demo;
mod filter;
mod redact;
mod registry;
mod session;
mod source;
mod trigger;

pub use buffer::LineBuffer;
pub use demo::{DemoSource, script};
pub use filter::{LineFilter, matches};
pub use redact::{REDACTED, Redactor, redact};
pub use registry::SessionRegistry;
pub use session::{EventSink, Session, SessionCommand, SessionId, SessionSpec};
pub use source::{ChunkStream, KubeSource, SourceError, SourceProvider};
pub use trigger::{AnalysisTrigger, TriggerDecision, bound_excerpt};

// Re-export types used in our public API
pub use kubesight_types::{SessionKey, SessionState, StreamEvent, StreamParams, TriggerConfig};
