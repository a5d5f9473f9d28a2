//! Talkie - streaming text-to-speech playback for conversational agents
//!
//! This crate provides:
//! - Clause segmentation of streamed chat text with pronunciation fixes
//! - An utterance queue with low-water-mark backpressure
//! - A playback coordinator with pause/resume/stop/barge-in semantics
//! - Audio session interruption handling and remote-control commands
//! - Push and pull producers for chat completion streams

pub mod config;
pub mod speech;
pub mod utils;

pub use config::Config;
