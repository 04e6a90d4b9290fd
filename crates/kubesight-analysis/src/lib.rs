//! Log analysis for kubesight
//!
//! This crate turns a redacted log excerpt into a streamed diagnostic
//! explanation from an external reasoning service. [`AnalysisBridge`] keeps at
//! most one call in flight and lets a newer request supersede an older one.

mod bridge;
mod client;
mod config;
mod decode;
mod error;
mod prompt;

pub use bridge::{AnalysisBridge, AnalysisStream, Fragment};
pub use client::{HttpReasoningClient, ReasoningClient};
pub use config::{AnalysisConfig, Provider};
pub use error::{AnalysisError, Result};
pub use prompt::{Prompt, build_prompt};

// Re-export types used in our public API
pub use kubesight_types::{AnalysisMeta, AnalysisOutcome, AnalysisRequest};
