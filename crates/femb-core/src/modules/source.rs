//! Waveform sources: an in-memory event x channel store and the JSON scan file
//! that carries one.

use super::WaveformSource;
use crate::domain::{FembError, ScanDescriptor};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("event {event} is out of range for {count} events")]
    EventOutOfRange { event: usize, count: usize },
    #[error("channel {channel} is out of range for {count} channels")]
    ChannelOutOfRange { channel: usize, count: usize },
    #[error("event {event} holds {found} channels, expected {expected}")]
    Shape {
        event: usize,
        expected: usize,
        found: usize,
    },
    #[error("failed to read scan file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse scan file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl From<SourceError> for FembError {
    fn from(error: SourceError) -> Self {
        match error {
            SourceError::EventOutOfRange { .. } | SourceError::ChannelOutOfRange { .. } => {
                FembError::missing_upstream("INPUT.WAVEFORM_UNAVAILABLE", error.to_string())
            }
            SourceError::Shape { .. } | SourceError::Parse { .. } => {
                FembError::input_validation("INPUT.SCAN_FILE", error.to_string())
            }
            SourceError::Read { .. } => FembError::io_system("IO.SCAN_READ", error.to_string()),
        }
    }
}

/// Raw codes indexed `[event][channel][tick]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InMemoryWaveformSource {
    waveforms: Vec<Vec<Vec<u16>>>,
    channel_count: usize,
}

impl InMemoryWaveformSource {
    /// Every event must hold the same number of channels.
    pub fn new(waveforms: Vec<Vec<Vec<u16>>>) -> Result<Self, SourceError> {
        let channel_count = waveforms.first().map_or(0, Vec::len);
        if let Some((event, channels)) = waveforms
            .iter()
            .enumerate()
            .find(|(_, channels)| channels.len() != channel_count)
        {
            return Err(SourceError::Shape {
                event,
                expected: channel_count,
                found: channels.len(),
            });
        }
        Ok(Self {
            waveforms,
            channel_count,
        })
    }
}

impl WaveformSource for InMemoryWaveformSource {
    fn event_count(&self) -> usize {
        self.waveforms.len()
    }

    fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn read(&self, event: usize, channel: usize) -> Result<Vec<u16>, SourceError> {
        let channels = self
            .waveforms
            .get(event)
            .ok_or(SourceError::EventOutOfRange {
                event,
                count: self.waveforms.len(),
            })?;
        channels
            .get(channel)
            .cloned()
            .ok_or(SourceError::ChannelOutOfRange {
                channel,
                count: self.channel_count,
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanFile {
    pub scan: ScanDescriptor,
    pub waveforms: Vec<Vec<Vec<u16>>>,
}

impl ScanFile {
    pub fn into_parts(self) -> Result<(ScanDescriptor, InMemoryWaveformSource), SourceError> {
        let source = InMemoryWaveformSource::new(self.waveforms)?;
        Ok((self.scan, source))
    }
}

pub fn load_scan_file(path: impl AsRef<Path>) -> Result<ScanFile, SourceError> {
    let path = path.as_ref();
    let source = fs::read_to_string(path).map_err(|source| SourceError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&source).map_err(|source| SourceError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
