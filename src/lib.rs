//! Event-driven automation that turns finished multi-track voice-meeting
//! recordings into structured minutes and publishes them to a chat channel.
//!
//! Two triggers feed one pipeline: the recording bot's in-channel status
//! panel flipping to "recording ended", and new archives appearing in a
//! watched cloud folder. Each trigger runs a bounded, linear pipeline:
//! acquire the archive, transcribe each speaker track on the local
//! accelerator, interleave the segments chronologically, ask an LLM for
//! structured minutes, and post an embed plus the full markdown file.

pub mod chat;
pub mod config;
pub mod detector;
pub mod drive;
pub mod generate;
pub mod logging;
pub mod merge;
pub mod pipeline;
pub mod publish;
pub mod recording;
pub mod retry;
pub mod service;
pub mod source;
pub mod transcribe;

#[cfg(test)]
mod tests;
