//! Configuration types for the normalization pipeline.
//!
//! All policy is controlled through [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. Mode, language and thresholds are passed into
//! every stage explicitly; the engine keeps no process-wide flags, so two
//! runs with different configs can execute side by side.

use crate::error::Notes2TexError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Configuration for one pipeline run (or one batch of independent runs).
///
/// # Example
/// ```rust
/// use notes2tex::{Mode, ModeSelection, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .mode(ModeSelection::Fixed(Mode::Faithful))
///     .sentence_floor(0.9)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// How the normalization policy is chosen. Default: [`ModeSelection::Auto`].
    pub mode: ModeSelection,

    /// Force a language for the trigger lexicons. Default: None.
    ///
    /// When unset, the language comes from the collaborator metadata, then
    /// from the model output's own metadata, then from script detection on
    /// the baseline transcript.
    pub language: Option<Language>,

    /// Thresholds applied to `Faithful` runs. Default: sentence 0.95, character 0.98.
    pub faithful_thresholds: FidelityThresholds,

    /// Thresholds applied to `Readable` runs. Default: sentence 0.80, character 0.85.
    ///
    /// Connective phrases added in readable mode count against the
    /// character metric; tune these per corpus.
    pub readable_thresholds: FidelityThresholds,

    /// Per-sentence similarity needed to count a baseline sentence as matched. Default: 0.90.
    pub sentence_floor: f64,

    /// Scores this close above a threshold downgrade `Accept` to
    /// `AcceptWithWarnings`. Default: 0.01.
    pub warn_margin: f64,

    /// Maximum number of suggestions in the decision record. Default: 8.
    pub max_suggestions: usize,

    /// Number of jobs processed at once by the batch driver. Default: 4.
    pub concurrency: usize,

    /// Timeout for each collaborator (model) pass in seconds. Default: 120.
    pub upstream_timeout_secs: u64,

    /// Optional per-job progress events for the batch driver.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: ModeSelection::default(),
            language: None,
            faithful_thresholds: FidelityThresholds::FAITHFUL,
            readable_thresholds: FidelityThresholds::READABLE,
            sentence_floor: 0.90,
            warn_margin: 0.01,
            max_suggestions: 8,
            concurrency: 4,
            upstream_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("mode", &self.mode)
            .field("language", &self.language)
            .field("faithful_thresholds", &self.faithful_thresholds)
            .field("readable_thresholds", &self.readable_thresholds)
            .field("sentence_floor", &self.sentence_floor)
            .field("warn_margin", &self.warn_margin)
            .field("max_suggestions", &self.max_suggestions)
            .field("concurrency", &self.concurrency)
            .field("upstream_timeout_secs", &self.upstream_timeout_secs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Thresholds that apply to a run in `mode`.
    pub fn thresholds_for(&self, mode: Mode) -> FidelityThresholds {
        match mode {
            Mode::Faithful => self.faithful_thresholds,
            Mode::Readable => self.readable_thresholds,
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn mode(mut self, mode: ModeSelection) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn language(mut self, language: Language) -> Self {
        self.config.language = Some(language);
        self
    }

    pub fn faithful_thresholds(mut self, t: FidelityThresholds) -> Self {
        self.config.faithful_thresholds = t.clamped();
        self
    }

    pub fn readable_thresholds(mut self, t: FidelityThresholds) -> Self {
        self.config.readable_thresholds = t.clamped();
        self
    }

    pub fn sentence_floor(mut self, floor: f64) -> Self {
        self.config.sentence_floor = floor.clamp(0.0, 1.0);
        self
    }

    pub fn warn_margin(mut self, margin: f64) -> Self {
        self.config.warn_margin = margin.clamp(0.0, 1.0);
        self
    }

    pub fn max_suggestions(mut self, n: usize) -> Self {
        self.config.max_suggestions = n;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn upstream_timeout_secs(mut self, secs: u64) -> Self {
        self.config.upstream_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, Notes2TexError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(Notes2TexError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.upstream_timeout_secs == 0 {
            return Err(Notes2TexError::InvalidConfig(
                "Upstream timeout must be ≥ 1 second".into(),
            ));
        }
        if c.readable_thresholds.character > c.faithful_thresholds.character
            || c.readable_thresholds.sentence > c.faithful_thresholds.sentence
        {
            return Err(Notes2TexError::InvalidConfig(format!(
                "Readable thresholds {:?} must not be stricter than faithful thresholds {:?}",
                c.readable_thresholds, c.faithful_thresholds
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Normalization policy.
///
/// | Mode | Allowed changes |
/// |------|-----------------|
/// | `Faithful` | structural rewrites and whitelisted noise removal only |
/// | `Readable` | the same, plus short connective phrases between nodes |
///
/// Paraphrase, translation, shortening and deletion of substantive content
/// are forbidden in both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Maximal verbatim preservation (a.k.a. "strict").
    #[serde(alias = "strict")]
    Faithful,
    /// Bounded readability smoothing (a.k.a. "book").
    #[serde(alias = "book")]
    Readable,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Faithful => "faithful",
            Mode::Readable => "readable",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the [`Mode`] of a run is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ModeSelection {
    /// Classify the baseline transcript (see [`crate::classify`]). (default)
    #[default]
    Auto,
    /// Always use the given mode.
    Fixed(Mode),
}

/// Language of the document; selects the trigger lexicons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// English. (default)
    #[default]
    En,
    /// Russian.
    Ru,
}

impl Language {
    /// Parse a language tag such as `"en"`, `"ru-RU"` or `"russian"`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.trim().to_lowercase();
        let primary = tag.split(['-', '_']).next().unwrap_or("");
        match primary {
            "en" | "eng" | "english" => Some(Language::En),
            "ru" | "rus" | "russian" => Some(Language::Ru),
            _ => None,
        }
    }

    /// Guess the language from the script of `text`.
    ///
    /// Cyrillic letters outnumbering Latin letters means Russian.
    pub fn detect(text: &str) -> Self {
        let (mut cyrillic, mut latin) = (0usize, 0usize);
        for c in text.chars() {
            if ('\u{0400}'..='\u{04FF}').contains(&c) {
                cyrillic += 1;
            } else if c.is_ascii_alphabetic() {
                latin += 1;
            }
        }
        if cyrillic > latin {
            Language::Ru
        } else {
            Language::En
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Ru => "ru",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimum similarity scores for a candidate to be accepted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FidelityThresholds {
    /// Fraction of baseline sentences that must have a match.
    pub sentence: f64,
    /// `1 - edit_distance / baseline_len` floor.
    pub character: f64,
}

impl FidelityThresholds {
    /// Reference policy for `Faithful` mode.
    pub const FAITHFUL: Self = Self {
        sentence: 0.95,
        character: 0.98,
    };

    /// Default policy for `Readable` mode.
    pub const READABLE: Self = Self {
        sentence: 0.80,
        character: 0.85,
    };

    pub fn new(sentence: f64, character: f64) -> Self {
        Self {
            sentence,
            character,
        }
        .clamped()
    }

    fn clamped(self) -> Self {
        Self {
            sentence: self.sentence.clamp(0.0, 1.0),
            character: self.character.clamp(0.0, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_thresholds_follow_mode() {
        let config = PipelineConfig::default();
        assert_eq!(config.thresholds_for(Mode::Faithful).character, 0.98);
        assert_eq!(config.thresholds_for(Mode::Faithful).sentence, 0.95);
        assert!(config.thresholds_for(Mode::Readable).character < 0.98);
    }

    #[test]
    fn builder_clamps_values() {
        let config = PipelineConfig::builder()
            .sentence_floor(1.7)
            .concurrency(0)
            .build()
            .unwrap();
        assert_eq!(config.sentence_floor, 1.0);
        assert_eq!(config.concurrency, 1);
    }

    #[test]
    fn builder_rejects_inverted_thresholds() {
        let result = PipelineConfig::builder()
            .readable_thresholds(FidelityThresholds::new(0.99, 0.99))
            .build();
        assert!(matches!(result, Err(Notes2TexError::InvalidConfig(_))));
    }

    #[test]
    fn language_tags() {
        assert_eq!(Language::from_tag("ru-RU"), Some(Language::Ru));
        assert_eq!(Language::from_tag("English"), Some(Language::En));
        assert_eq!(Language::from_tag("de"), None);
    }

    #[test]
    fn language_detection_by_script() {
        assert_eq!(Language::detect("Теорема: для всех x"), Language::Ru);
        assert_eq!(Language::detect("Theorem: for all x"), Language::En);
    }

    #[test]
    fn mode_accepts_legacy_names() {
        let m: Mode = serde_json::from_str("\"strict\"").unwrap();
        assert_eq!(m, Mode::Faithful);
        let m: Mode = serde_json::from_str("\"book\"").unwrap();
        assert_eq!(m, Mode::Readable);
        assert_eq!(serde_json::to_string(&Mode::Readable).unwrap(), "\"readable\"");
    }
}
