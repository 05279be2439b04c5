use serde::{Deserialize, Serialize};

/// `temperature` accepts either a single value or a fallback schedule tried in order
/// when a segment is rejected by `compression_ratio_threshold` or
/// `log_prob_threshold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Temperature {
    Single(f64),
    Schedule(Vec<f64>),
}

impl Default for Temperature {
    fn default() -> Self {
        Temperature::Schedule(vec![0.0, 0.2, 0.4, 0.6, 0.8, 1.0])
    }
}

/// `clip_timestamps` accepts either the literal `"0"` (process the whole file) or an
/// explicit list of `start,end` boundaries in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClipTimestamps {
    Whole(String),
    Boundaries(Vec<f64>),
}

impl Default for ClipTimestamps {
    fn default() -> Self {
        ClipTimestamps::Whole("0".to_string())
    }
}

fn default_task() -> String {
    "transcribe".to_string()
}

fn default_beam_size() -> u32 {
    5
}

fn default_best_of() -> u32 {
    5
}

fn default_patience() -> f64 {
    1.0
}

fn default_length_penalty() -> f64 {
    1.0
}

fn default_repetition_penalty() -> f64 {
    1.0
}

fn default_compression_ratio_threshold() -> f64 {
    2.4
}

fn default_log_prob_threshold() -> f64 {
    -1.0
}

fn default_no_speech_threshold() -> f64 {
    0.6
}

fn default_prompt_reset_on_temperature() -> f64 {
    0.5
}

fn default_suppress_tokens() -> Vec<i32> {
    vec![-1]
}

fn default_max_initial_timestamp() -> f64 {
    1.0
}

fn default_prepend_punctuations() -> String {
    "\"'\"¿([{-".to_string()
}

fn default_append_punctuations() -> String {
    "\"'.。,，!！?？:：\")]}、".to_string()
}

fn default_language_detection_threshold() -> f64 {
    0.5
}

fn default_language_detection_segments() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

/// Every decoding, thresholding, and preprocessing knob the transcription engine
/// accepts. Every field has an engine-appropriate default, matching the behavior of
/// calling `transcribe` with no options at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscribeOptions {
    #[serde(default)]
    pub language: Option<String>,

    #[serde(default = "default_task")]
    pub task: String,

    #[serde(default = "default_beam_size")]
    pub beam_size: u32,

    #[serde(default = "default_best_of")]
    pub best_of: u32,

    #[serde(default = "default_patience")]
    pub patience: f64,

    #[serde(default = "default_length_penalty")]
    pub length_penalty: f64,

    #[serde(default = "default_repetition_penalty")]
    pub repetition_penalty: f64,

    #[serde(default)]
    pub no_repeat_ngram_size: u32,

    #[serde(default)]
    pub temperature: Temperature,

    #[serde(default = "default_compression_ratio_threshold")]
    pub compression_ratio_threshold: f64,

    #[serde(default = "default_log_prob_threshold")]
    pub log_prob_threshold: f64,

    #[serde(default = "default_no_speech_threshold")]
    pub no_speech_threshold: f64,

    #[serde(default = "default_true")]
    pub condition_on_previous_text: bool,

    #[serde(default = "default_prompt_reset_on_temperature")]
    pub prompt_reset_on_temperature: f64,

    #[serde(default)]
    pub initial_prompt: Option<String>,

    #[serde(default)]
    pub prefix: Option<String>,

    #[serde(default)]
    pub hotwords: Option<String>,

    #[serde(default = "default_true")]
    pub suppress_blank: bool,

    #[serde(default = "default_suppress_tokens")]
    pub suppress_tokens: Vec<i32>,

    #[serde(default)]
    pub max_new_tokens: Option<u32>,

    #[serde(default)]
    pub without_timestamps: bool,

    #[serde(default = "default_max_initial_timestamp")]
    pub max_initial_timestamp: f64,

    #[serde(default)]
    pub word_timestamps: bool,

    #[serde(default = "default_prepend_punctuations")]
    pub prepend_punctuations: String,

    #[serde(default = "default_append_punctuations")]
    pub append_punctuations: String,

    #[serde(default)]
    pub vad_filter: bool,

    #[serde(default)]
    pub vad_parameters: Option<serde_json::Value>,

    #[serde(default)]
    pub multilingual: bool,

    #[serde(default)]
    pub clip_timestamps: ClipTimestamps,

    #[serde(default)]
    pub hallucination_silence_threshold: Option<f64>,

    #[serde(default = "default_language_detection_threshold")]
    pub language_detection_threshold: f64,

    #[serde(default = "default_language_detection_segments")]
    pub language_detection_segments: u32,
}

impl Default for TranscribeOptions {
    fn default() -> Self {
        Self {
            language: None,
            task: default_task(),
            beam_size: default_beam_size(),
            best_of: default_best_of(),
            patience: default_patience(),
            length_penalty: default_length_penalty(),
            repetition_penalty: default_repetition_penalty(),
            no_repeat_ngram_size: 0,
            temperature: Temperature::default(),
            compression_ratio_threshold: default_compression_ratio_threshold(),
            log_prob_threshold: default_log_prob_threshold(),
            no_speech_threshold: default_no_speech_threshold(),
            condition_on_previous_text: true,
            prompt_reset_on_temperature: default_prompt_reset_on_temperature(),
            initial_prompt: None,
            prefix: None,
            hotwords: None,
            suppress_blank: true,
            suppress_tokens: default_suppress_tokens(),
            max_new_tokens: None,
            without_timestamps: false,
            max_initial_timestamp: default_max_initial_timestamp(),
            word_timestamps: false,
            prepend_punctuations: default_prepend_punctuations(),
            append_punctuations: default_append_punctuations(),
            vad_filter: false,
            vad_parameters: None,
            multilingual: false,
            clip_timestamps: ClipTimestamps::default(),
            hallucination_silence_threshold: None,
            language_detection_threshold: default_language_detection_threshold(),
            language_detection_segments: default_language_detection_segments(),
        }
    }
}
