//! Decision aggregator: scores + structural report → verdict.
//!
//! A pure function of its inputs. Business outcomes (a failed check, a
//! score under its threshold) become [`Verdict::Reject`], never an error.

use crate::classify::ModeRecommendation;
use crate::config::{FidelityThresholds, Language, Mode, PipelineConfig};
use crate::output::{Decision, Severity, SimilarityReport, ValidationReport, Verdict};
use tracing::{info, warn};

/// Issue name recorded when a fidelity score misses its threshold.
pub const FIDELITY_BELOW_THRESHOLD: &str = "fidelity_below_threshold";

/// Verdict policy for one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Policy {
    pub thresholds: FidelityThresholds,
    /// Scores at most this far above a threshold only earn a warning.
    pub warn_margin: f64,
    pub max_suggestions: usize,
}

impl Policy {
    pub fn from_config(config: &PipelineConfig, mode: Mode) -> Self {
        Self {
            thresholds: config.thresholds_for(mode),
            warn_margin: config.warn_margin,
            max_suggestions: config.max_suggestions,
        }
    }
}

struct Gauge {
    name: &'static str,
    score: f64,
    threshold: f64,
}

impl Gauge {
    fn below(&self) -> bool {
        self.score < self.threshold
    }

    fn marginal(&self, margin: f64) -> bool {
        !self.below() && self.score < self.threshold + margin
    }
}

/// Combine both reports into the terminal decision.
pub fn decide(
    language: Language,
    mode: Mode,
    similarity: SimilarityReport,
    validation: ValidationReport,
    policy: &Policy,
    mode_recommendation: Option<ModeRecommendation>,
) -> Decision {
    let gauges = [
        Gauge {
            name: "sentence",
            score: similarity.sentence_score,
            threshold: policy.thresholds.sentence,
        },
        Gauge {
            name: "character",
            score: similarity.char_score,
            threshold: policy.thresholds.character,
        },
    ];
    let short = gauges.iter().any(Gauge::below);
    let marginal = gauges.iter().any(|g| g.marginal(policy.warn_margin));
    let has_warnings = validation.warnings().next().is_some();

    let verdict = if !validation.pass || short {
        Verdict::Reject
    } else if has_warnings || marginal {
        Verdict::AcceptWithWarnings
    } else {
        Verdict::Accept
    };

    let mut issues: Vec<String> = validation
        .fatal()
        .map(|i| i.kind.as_str().to_string())
        .collect();
    if short {
        issues.push(FIDELITY_BELOW_THRESHOLD.to_string());
    }
    issues.extend(validation.warnings().map(|i| i.kind.as_str().to_string()));

    let suggestions = suggestions(&similarity, &validation, &gauges, policy);
    let verbatim_score = similarity.sentence_score.min(similarity.char_score);

    match verdict {
        Verdict::Reject => warn!(
            "Rejected {} document: {} (sentence {:.3}, character {:.3})",
            mode,
            issues.join(", "),
            similarity.sentence_score,
            similarity.char_score
        ),
        _ => info!(
            "{} {} document (sentence {:.3}, character {:.3})",
            verdict, mode, similarity.sentence_score, similarity.char_score
        ),
    }

    Decision {
        language,
        mode,
        verdict,
        issues,
        suggestions,
        verbatim_score,
        similarity,
        validation,
        mode_recommendation,
    }
}

/// Fatal issues, then threshold shortfalls, then weakest blocks, then warnings.
fn suggestions(
    similarity: &SimilarityReport,
    validation: &ValidationReport,
    gauges: &[Gauge],
    policy: &Policy,
) -> Vec<String> {
    let mut out: Vec<String> = validation
        .issues
        .iter()
        .filter(|i| i.severity == Severity::Fatal)
        .map(|i| format!("Fix {}: {}", i.kind, i.detail))
        .collect();

    out.extend(gauges.iter().filter(|g| g.below()).map(|g| {
        format!(
            "Raise {} fidelity: {:.3} is below the {:.3} threshold",
            g.name, g.score, g.threshold
        )
    }));

    let mut weakest: Vec<_> = similarity.per_block_deltas.iter().collect();
    weakest.sort_by(|a, b| a.local_score.total_cmp(&b.local_score));
    out.extend(weakest.into_iter().map(|d| {
        format!(
            "Review block {} (similarity {:.2}): \"{}\"",
            d.block_index, d.local_score, d.excerpt
        )
    }));

    out.extend(
        validation
            .warnings()
            .map(|i| format!("Check {}: {}", i.kind, i.detail)),
    );

    out.truncate(policy.max_suggestions);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{BlockDelta, Issue, IssueKind};

    fn similarity(sentence: f64, character: f64) -> SimilarityReport {
        SimilarityReport {
            sentence_score: sentence,
            char_score: character,
            ..Default::default()
        }
    }

    fn policy() -> Policy {
        Policy {
            thresholds: FidelityThresholds::FAITHFUL,
            warn_margin: 0.01,
            max_suggestions: 8,
        }
    }

    fn run(sim: SimilarityReport, validation: ValidationReport) -> Decision {
        decide(Language::En, Mode::Faithful, sim, validation, &policy(), None)
    }

    #[test]
    fn clean_run_is_accepted() {
        let d = run(similarity(1.0, 1.0), ValidationReport::from_issues(vec![]));
        assert_eq!(d.verdict, Verdict::Accept);
        assert!(d.issues.is_empty());
        assert!(d.suggestions.is_empty());
        assert_eq!(d.verbatim_score, 1.0);
    }

    #[test]
    fn low_character_score_rejects() {
        let d = run(similarity(1.0, 0.72), ValidationReport::from_issues(vec![]));
        assert_eq!(d.verdict, Verdict::Reject);
        assert_eq!(d.issues, vec![FIDELITY_BELOW_THRESHOLD]);
        assert!(d.suggestions[0].starts_with("Raise character fidelity"));
        assert_eq!(d.verbatim_score, 0.72);
    }

    #[test]
    fn fatal_issue_rejects_despite_scores() {
        let report = ValidationReport::from_issues(vec![Issue::new(
            IssueKind::MalformedBox,
            "theorembox is not closed",
        )]);
        let d = run(similarity(1.0, 1.0), report);
        assert_eq!(d.verdict, Verdict::Reject);
        assert_eq!(d.issues, vec!["malformed_box"]);
    }

    #[test]
    fn warnings_and_margins() {
        let report = ValidationReport::from_issues(vec![Issue::new(
            IssueKind::FigureCaptionMissing,
            "figures/a.png",
        )]);
        assert_eq!(run(similarity(1.0, 1.0), report).verdict, Verdict::AcceptWithWarnings);

        let marginal = run(similarity(0.955, 1.0), ValidationReport::from_issues(vec![]));
        assert_eq!(marginal.verdict, Verdict::AcceptWithWarnings);
        assert!(marginal.issues.is_empty());
    }

    #[test]
    fn suggestions_are_ranked_and_capped() {
        let report = ValidationReport::from_issues(vec![
            Issue::new(IssueKind::SummaryNarrative, "In summary"),
            Issue::new(IssueKind::EquationDropped, "1 equations in candidate, 2 in raw output"),
        ]);
        let mut sim = similarity(0.5, 0.5);
        sim.per_block_deltas = vec![
            BlockDelta { block_index: 3, local_score: 0.7, excerpt: "b".into() },
            BlockDelta { block_index: 1, local_score: 0.2, excerpt: "a".into() },
        ];
        let d = run(sim.clone(), report.clone());
        assert!(d.suggestions[0].starts_with("Fix equation_dropped"));
        assert!(d.suggestions[1].starts_with("Raise sentence"));
        assert!(d.suggestions[2].starts_with("Raise character"));
        assert!(d.suggestions[3].starts_with("Review block 1"));
        assert!(d.suggestions[4].starts_with("Review block 3"));
        assert!(d.suggestions[5].starts_with("Check summary_narrative"));
        assert_eq!(d.issues, vec!["equation_dropped", FIDELITY_BELOW_THRESHOLD, "summary_narrative"]);

        let capped = decide(
            Language::En,
            Mode::Faithful,
            sim,
            report,
            &Policy { max_suggestions: 2, ..policy() },
            None,
        );
        assert_eq!(capped.suggestions.len(), 2);
    }
}
