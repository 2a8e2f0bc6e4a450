//! Cross-module scenario tests, driven through mock collaborators.


use crate::chat::{ChatClient, ChatError, OutgoingMessage};
use crate::config::{MergerConfig, PublisherConfig};
use crate::generate::{GenerateError, Generator, LlmProvider, TRANSCRIPT_PLACEHOLDER};
use crate::pipeline::{Pipeline, SourceFactory};
use crate::publish::Publisher;
use crate::recording::{AudioTrack, RecordingHandle, SpeakerInfo, TriggerKind};
use crate::source::{AudioSource, SourceError};
use crate::transcribe::{SpeakerTranscript, Transcriber, TranscribeError, TranscriptSegment};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub fn panel_handle(recording_id: &str) -> RecordingHandle {
    RecordingHandle {
        recording_id: recording_id.to_string(),
        access_key: "test-access-key".to_string(),
        origin_channel_id: 500,
        trigger_kind: TriggerKind::PanelEdit,
        drive_file_id: None,
    }
}

pub fn speaker(track_index: u32, name: &str) -> SpeakerInfo {
    SpeakerInfo {
        track_index,
        display_name: name.to_string(),
        user_id: 1000 + track_index as u64,
    }
}

/// Audio source producing placeholder track files for its speakers.
pub struct MockSource {
    pub speakers: Vec<SpeakerInfo>,
    pub fail_fetch: Option<String>,
    /// The temp root the pipeline handed to `fetch`, for lifecycle asserts.
    pub observed_root: Mutex<Option<PathBuf>>,
}

impl MockSource {
    pub fn with_speakers(speakers: Vec<SpeakerInfo>) -> Arc<Self> {
        Arc::new(Self {
            speakers,
            fail_fetch: None,
            observed_root: Mutex::new(None),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            speakers: vec![speaker(1, "alice")],
            fail_fetch: Some(message.to_string()),
            observed_root: Mutex::new(None),
        })
    }
}

#[async_trait]
impl AudioSource for MockSource {
    async fn list_speakers(&self) -> Result<Vec<SpeakerInfo>, SourceError> {
        Ok(self.speakers.clone())
    }

    async fn fetch(&self, into: &Path) -> Result<Vec<AudioTrack>, SourceError> {
        assert!(into.exists(), "temp root must exist during acquisition");
        *self.observed_root.lock().unwrap() = Some(into.to_path_buf());

        if let Some(message) = &self.fail_fetch {
            return Err(SourceError::Archive(message.clone()));
        }

        let mut tracks = Vec::new();
        for speaker in &self.speakers {
            let path = into.join(format!(
                "{}-{}.m4a",
                speaker.track_index, speaker.display_name
            ));
            std::fs::write(&path, b"audio").unwrap();
            tracks.push(AudioTrack {
                speaker: speaker.clone(),
                file_path: path,
            });
        }
        Ok(tracks)
    }
}

pub struct FixedSourceFactory(pub Arc<MockSource>);

impl SourceFactory for FixedSourceFactory {
    fn source_for(&self, _handle: &RecordingHandle) -> Arc<dyn AudioSource> {
        self.0.clone()
    }
}

/// Scripted recognizer with an internal accelerator mutex, mirroring the
/// real engine's concurrency contract.
pub struct MockTranscriber {
    segments: HashMap<u32, Vec<(f64, f64, &'static str)>>,
    oom_on_track: Option<u32>,
    hold: Duration,
    accelerator: tokio::sync::Mutex<()>,
    in_model: AtomicUsize,
    pub max_in_model: AtomicUsize,
}

impl MockTranscriber {
    pub fn new(segments: HashMap<u32, Vec<(f64, f64, &'static str)>>) -> Arc<Self> {
        Arc::new(Self {
            segments,
            oom_on_track: None,
            hold: Duration::from_millis(0),
            accelerator: tokio::sync::Mutex::new(()),
            in_model: AtomicUsize::new(0),
            max_in_model: AtomicUsize::new(0),
        })
    }

    pub fn oom_on(track: u32) -> Arc<Self> {
        Arc::new(Self {
            segments: HashMap::new(),
            oom_on_track: Some(track),
            hold: Duration::from_millis(0),
            accelerator: tokio::sync::Mutex::new(()),
            in_model: AtomicUsize::new(0),
            max_in_model: AtomicUsize::new(0),
        })
    }

    pub fn slow(segments: HashMap<u32, Vec<(f64, f64, &'static str)>>, hold: Duration) -> Arc<Self> {
        Arc::new(Self {
            segments,
            oom_on_track: None,
            hold,
            accelerator: tokio::sync::Mutex::new(()),
            in_model: AtomicUsize::new(0),
            max_in_model: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, track: &AudioTrack) -> Result<SpeakerTranscript, TranscribeError> {
        let _accelerator = self.accelerator.lock().await;

        let now = self.in_model.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_model.fetch_max(now, Ordering::SeqCst);
        if !self.hold.is_zero() {
            tokio::time::sleep(self.hold).await;
        }
        self.in_model.fetch_sub(1, Ordering::SeqCst);

        if self.oom_on_track == Some(track.speaker.track_index) {
            return Err(TranscribeError::AcceleratorOom(
                "failed to allocate buffers".to_string(),
            ));
        }

        let segments = self
            .segments
            .get(&track.speaker.track_index)
            .map(|segments| {
                segments
                    .iter()
                    .map(|(start, end, text)| TranscriptSegment {
                        start_sec: *start,
                        end_sec: *end,
                        text: text.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(SpeakerTranscript {
            speaker: track.speaker.clone(),
            segments,
        })
    }
}

/// Chat double recording every send and edit.
#[derive(Default)]
pub struct MockChat {
    pub sent: Mutex<Vec<(u64, OutgoingMessage)>>,
    pub edits: Mutex<Vec<String>>,
}

impl MockChat {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn final_posts(&self) -> Vec<OutgoingMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, message)| !message.embeds.is_empty())
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn status_creations(&self) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, message)| message.embeds.is_empty())
            .count()
    }
}

#[async_trait]
impl ChatClient for MockChat {
    async fn send_message(
        &self,
        channel_id: u64,
        message: OutgoingMessage,
    ) -> Result<u64, ChatError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((channel_id, message));
        Ok(sent.len() as u64)
    }

    async fn edit_message(
        &self,
        _channel_id: u64,
        _message_id: u64,
        content: String,
    ) -> Result<(), ChatError> {
        self.edits.lock().unwrap().push(content);
        Ok(())
    }
}

/// LLM double that pops scripted responses and records prompts.
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<Result<String, GenerateError>>>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn returning(minutes: &str) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::from([Ok(minutes.to_string())])),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn scripted(responses: Vec<Result<String, GenerateError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn complete(&self, prompt: &str) -> Result<String, GenerateError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let mut responses = self.responses.lock().unwrap();
        match responses.pop_front() {
            Some(response) => response,
            None => Ok("## Summary\n(default)".to_string()),
        }
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

pub struct Harness {
    pub pipeline: Arc<Pipeline>,
    pub chat: Arc<MockChat>,
    pub source: Arc<MockSource>,
    pub llm: Arc<ScriptedLlm>,
    pub shutdown: CancellationToken,
}

pub fn harness(
    source: Arc<MockSource>,
    transcriber: Arc<dyn Transcriber>,
    llm: Arc<ScriptedLlm>,
) -> Harness {
    let chat = MockChat::new();
    let publisher = Arc::new(Publisher::new(
        chat.clone(),
        900,
        None,
        PublisherConfig::default(),
    ));
    let generator = Arc::new(
        Generator::with_template(
            llm.clone(),
            format!("Write minutes for:\n{}\n", TRANSCRIPT_PLACEHOLDER),
            2,
        )
        .unwrap(),
    );
    let shutdown = CancellationToken::new();

    let pipeline = Arc::new(Pipeline::new(
        Arc::new(FixedSourceFactory(source.clone())),
        transcriber,
        generator,
        publisher,
        MergerConfig::default(),
        shutdown.clone(),
    ));

    Harness {
        pipeline,
        chat,
        source,
        llm,
        shutdown,
    }
}
