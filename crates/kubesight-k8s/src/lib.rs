//! Kubernetes client for kubesight
//!
//! This crate resolves a kubeconfig context into a client and opens
//! follow-mode container log streams.

mod client;

pub use client::{KubeClient, LogLines, LogRequest, lossy_lines};

// Re-export types that are used in our public API
pub use kubesight_types::SessionKey;
