use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EngineError;

/// A reviewer's judgement of one candidate. `feedback` is structured
/// advice the next refinement pass receives verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewVerdict {
    pub satisfied: bool,
    pub feedback: String,
}

/// Checkable constraint a generated candidate must satisfy. Pure
/// computation: reviewers never call the model.
pub trait Reviewer: Send + Sync {
    fn review(&self, candidate: &str) -> ReviewVerdict;
}

/// Accepts candidates whose word count lands within a tolerance band
/// around a target, and tells the refiner how far off it was.
pub struct WordCountReviewer {
    target: usize,
    tolerance: f64,
}

impl WordCountReviewer {
    pub fn new(target: usize) -> Self {
        Self {
            target,
            tolerance: 0.2,
        }
    }

    pub fn with_tolerance(target: usize, tolerance: f64) -> Self {
        Self { target, tolerance }
    }

    fn bounds(&self) -> (usize, usize) {
        let min = (self.target as f64 * (1.0 - self.tolerance)).round() as usize;
        let max = (self.target as f64 * (1.0 + self.tolerance)).round() as usize;
        (min, max)
    }
}

impl Reviewer for WordCountReviewer {
    fn review(&self, candidate: &str) -> ReviewVerdict {
        let count = candidate.split_whitespace().count();
        let (min, max) = self.bounds();
        if count < min {
            ReviewVerdict {
                satisfied: false,
                feedback: format!(
                    "The text has {count} words but needs at least {min}. Add approximately {} more words.",
                    min - count
                ),
            }
        } else if count > max {
            ReviewVerdict {
                satisfied: false,
                feedback: format!(
                    "The text has {count} words but must not exceed {max}. Remove approximately {} words.",
                    count - max
                ),
            }
        } else {
            ReviewVerdict {
                satisfied: true,
                feedback: format!("Word count {count} is within {min}-{max}."),
            }
        }
    }
}

/// Produces candidates for the loop: a first draft, then revisions driven
/// by reviewer feedback.
#[async_trait]
pub trait Drafter: Send {
    async fn draft(&mut self) -> Result<String, EngineError>;
    async fn revise(&mut self, prior: &str, feedback: &str) -> Result<String, EngineError>;
}

/// One reviewed candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementAttempt {
    pub iteration: u32,
    pub candidate: String,
    pub accepted: bool,
    pub reason: String,
}

/// Outcome of a whole loop run. `accepted == false` means the loop
/// capped out and `text` is the best effort so far: a degraded result,
/// not a failure.
#[derive(Debug, Clone)]
pub struct RefinementReport {
    pub text: String,
    pub accepted: bool,
    pub iterations: u32,
    pub attempts: Vec<RefinementAttempt>,
}

/// Bounded generate → review → refine cycle.
///
/// The iteration ceiling is enforced here, in code. However the model
/// behaves, the loop reviews at most `max_iterations` candidates and
/// performs strictly fewer refine passes than that.
pub struct RefinementLoop {
    max_iterations: u32,
}

impl RefinementLoop {
    pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

    pub fn new(max_iterations: u32) -> Self {
        Self {
            max_iterations: max_iterations.max(1),
        }
    }

    pub async fn run(
        &self,
        drafter: &mut dyn Drafter,
        reviewer: &dyn Reviewer,
    ) -> Result<RefinementReport, EngineError> {
        let mut attempts = Vec::new();
        let mut candidate = drafter.draft().await?;

        for iteration in 0..self.max_iterations {
            let verdict = reviewer.review(&candidate);
            debug!(
                iteration,
                satisfied = verdict.satisfied,
                "refinement review"
            );
            attempts.push(RefinementAttempt {
                iteration,
                candidate: candidate.clone(),
                accepted: verdict.satisfied,
                reason: verdict.feedback.clone(),
            });

            if verdict.satisfied {
                return Ok(RefinementReport {
                    text: candidate,
                    accepted: true,
                    iterations: iteration + 1,
                    attempts,
                });
            }
            if iteration + 1 == self.max_iterations {
                break;
            }
            candidate = drafter.revise(&candidate, &verdict.feedback).await?;
        }

        debug!(max_iterations = self.max_iterations, "refinement capped");
        Ok(RefinementReport {
            text: candidate,
            accepted: false,
            iterations: self.max_iterations,
            attempts,
        })
    }
}

impl Default for RefinementLoop {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ITERATIONS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedDrafter {
        drafts: Vec<String>,
        served: usize,
        revisions: u32,
    }

    impl ScriptedDrafter {
        fn new(drafts: Vec<&str>) -> Self {
            Self {
                drafts: drafts.into_iter().map(str::to_string).collect(),
                served: 0,
                revisions: 0,
            }
        }

        fn next(&mut self) -> String {
            let text = self
                .drafts
                .get(self.served)
                .cloned()
                .unwrap_or_else(|| self.drafts.last().cloned().unwrap_or_default());
            self.served += 1;
            text
        }
    }

    #[async_trait]
    impl Drafter for ScriptedDrafter {
        async fn draft(&mut self) -> Result<String, EngineError> {
            Ok(self.next())
        }

        async fn revise(&mut self, _prior: &str, _feedback: &str) -> Result<String, EngineError> {
            self.revisions += 1;
            Ok(self.next())
        }
    }

    struct AlwaysReject;

    impl Reviewer for AlwaysReject {
        fn review(&self, _candidate: &str) -> ReviewVerdict {
            ReviewVerdict {
                satisfied: false,
                feedback: "not good enough".into(),
            }
        }
    }

    fn words(n: usize) -> String {
        vec!["word"; n].join(" ")
    }

    #[test]
    fn word_count_reviewer_band_edges() {
        let reviewer = WordCountReviewer::new(300);

        // 240 and 360 are the inclusive edges of the 20% band.
        assert!(reviewer.review(&words(240)).satisfied);
        assert!(reviewer.review(&words(360)).satisfied);
        assert!(reviewer.review(&words(300)).satisfied);

        let short = reviewer.review(&words(239));
        assert!(!short.satisfied);
        assert!(short.feedback.contains("Add approximately 1 more words"));

        let long = reviewer.review(&words(361));
        assert!(!long.satisfied);
        assert!(long.feedback.contains("Remove approximately 1 words"));
    }

    #[tokio::test]
    async fn accepts_first_satisfying_candidate() {
        let mut drafter = ScriptedDrafter::new(vec!["good text"]);
        let reviewer = WordCountReviewer::with_tolerance(2, 0.5);

        let report = RefinementLoop::default()
            .run(&mut drafter, &reviewer)
            .await
            .unwrap();
        assert!(report.accepted);
        assert_eq!(report.text, "good text");
        assert_eq!(report.iterations, 1);
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(drafter.revisions, 0);
    }

    #[tokio::test]
    async fn refines_until_the_constraint_holds() {
        // Target 4 words ±50%: needs 2..=6 words.
        let mut drafter = ScriptedDrafter::new(vec!["one", "one two three four"]);
        let reviewer = WordCountReviewer::with_tolerance(4, 0.5);

        let report = RefinementLoop::default()
            .run(&mut drafter, &reviewer)
            .await
            .unwrap();
        assert!(report.accepted);
        assert_eq!(report.text, "one two three four");
        assert_eq!(report.iterations, 2);
        assert_eq!(drafter.revisions, 1);
        assert!(!report.attempts[0].accepted);
        assert!(report.attempts[1].accepted);
    }

    #[tokio::test]
    async fn always_rejecting_reviewer_caps_at_exactly_max_iterations() {
        let mut drafter = ScriptedDrafter::new(vec!["never right"]);

        let report = RefinementLoop::new(5)
            .run(&mut drafter, &AlwaysReject)
            .await
            .unwrap();
        assert!(!report.accepted);
        assert_eq!(report.iterations, 5);
        assert_eq!(report.attempts.len(), 5);
        // Refine transitions stay strictly below the cap.
        assert_eq!(drafter.revisions, 4);
        assert_eq!(report.text, "never right");
        assert!(report.attempts.iter().all(|a| a.iteration < 5));
    }

    #[tokio::test]
    async fn capped_report_returns_the_last_candidate() {
        let mut drafter = ScriptedDrafter::new(vec!["a", "b", "c"]);
        let report = RefinementLoop::new(3)
            .run(&mut drafter, &AlwaysReject)
            .await
            .unwrap();
        assert!(!report.accepted);
        assert_eq!(report.text, "c");
        assert_eq!(report.attempts.len(), 3);
    }

    #[tokio::test]
    async fn zero_cap_is_raised_to_one() {
        let mut drafter = ScriptedDrafter::new(vec!["anything"]);
        let report = RefinementLoop::new(0)
            .run(&mut drafter, &AlwaysReject)
            .await
            .unwrap();
        assert_eq!(report.iterations, 1);
        assert_eq!(report.attempts.len(), 1);
    }

    #[tokio::test]
    async fn drafter_errors_propagate() {
        struct FailingDrafter;

        #[async_trait]
        impl Drafter for FailingDrafter {
            async fn draft(&mut self) -> Result<String, EngineError> {
                Err(EngineError::ModelUnavailable("down".into()))
            }

            async fn revise(&mut self, _: &str, _: &str) -> Result<String, EngineError> {
                Err(EngineError::ModelUnavailable("down".into()))
            }
        }

        let err = RefinementLoop::default()
            .run(&mut FailingDrafter, &AlwaysReject)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ModelUnavailable(_)));
    }
}
