//! The pluggable transcription engine contract.
//!
//! `nola-engine` defines the `Engine` trait the worker drives; it ships no production
//! transcriber (that is out of scope here) but does ship `SilenceEngine`, a reference
//! implementation used to exercise the worker without a real model.

mod error;
mod options;

use serde::{Deserialize, Serialize};

pub use error::EngineError;
pub use options::{ClipTimestamps, Temperature, TranscribeOptions};

/// One transcribed span of audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// A pluggable transcription backend.
///
/// `transcribe` returns a finite, lazily-evaluated sequence of segments in
/// increasing `start` order. Implementations may call `on_progress` as each segment
/// becomes available to report a monotone completion percentage in `[0, 100)`;
/// callers are not guaranteed any particular number of progress reports, only that
/// the final one (if any) precedes the iterator's exhaustion.
pub trait Engine: Send + Sync {
    fn transcribe<'a>(
        &'a self,
        file_path: &'a str,
        options: &'a TranscribeOptions,
        on_progress: &'a mut (dyn FnMut(f32) + Send),
    ) -> Result<Box<dyn Iterator<Item = Result<Segment, EngineError>> + Send + 'a>, EngineError>;
}

/// A reference `Engine` that transcribes nothing. Used to wire the worker binary and
/// its tests without depending on a real transcription model.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilenceEngine;

impl Engine for SilenceEngine {
    fn transcribe<'a>(
        &'a self,
        file_path: &'a str,
        _options: &'a TranscribeOptions,
        on_progress: &'a mut (dyn FnMut(f32) + Send),
    ) -> Result<Box<dyn Iterator<Item = Result<Segment, EngineError>> + Send + 'a>, EngineError> {
        if file_path.is_empty() {
            return Err(EngineError::FileNotFound(file_path.to_string()));
        }
        on_progress(100.0);
        Ok(Box::new(std::iter::empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_engine_yields_no_segments_and_reports_completion() {
        let engine = SilenceEngine;
        let options = TranscribeOptions::default();
        let mut progress = Vec::new();
        let mut on_progress = |p: f32| progress.push(p);

        let segments: Vec<_> = engine
            .transcribe("clip.wav", &options, &mut on_progress)
            .unwrap()
            .collect();

        assert!(segments.is_empty());
        assert_eq!(progress, vec![100.0]);
    }

    #[test]
    fn silence_engine_rejects_an_empty_path() {
        let engine = SilenceEngine;
        let options = TranscribeOptions::default();
        let mut on_progress = |_: f32| {};

        let err = engine.transcribe("", &options, &mut on_progress).unwrap_err();
        assert!(matches!(err, EngineError::FileNotFound(_)));
    }
}
