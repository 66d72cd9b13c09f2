//! Template matcher: scores free text against registered patterns.
//!
//! Scoring is CPU-bound, so it runs on blocking worker threads, bounded by
//! a semaphore. Callers await their own result without holding up other
//! matches or the async runtime.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, warn};
use voxline_domain::template::similarity::{combined_score, edit_ratio};
use voxline_domain::template::{Template, TemplateMatch};

use crate::nlp::{BagOfWordsScorer, RuleBasedExtractor};
use crate::ports::{EntityExtractor, SemanticScorer};
use crate::registry::TemplateRegistry;

/// Default number of concurrent scoring workers.
pub const DEFAULT_WORKERS: usize = 2;

/// Best-match search over a [`TemplateRegistry`].
pub struct TemplateMatcher {
    registry: Arc<TemplateRegistry>,
    scorer: Arc<dyn SemanticScorer>,
    extractor: Arc<dyn EntityExtractor>,
    workers: Arc<Semaphore>,
}

impl TemplateMatcher {
    /// Create a matcher with explicit NLP collaborators.
    pub fn new(
        registry: Arc<TemplateRegistry>,
        scorer: Arc<dyn SemanticScorer>,
        extractor: Arc<dyn EntityExtractor>,
        workers: usize,
    ) -> Self {
        Self {
            registry,
            scorer,
            extractor,
            workers: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Create a matcher using the built-in scorer and extractor.
    ///
    /// # Errors
    ///
    /// Returns [`regex::Error`] if the built-in extraction rules fail to compile.
    pub fn with_defaults(
        registry: Arc<TemplateRegistry>,
        workers: usize,
    ) -> Result<Self, regex::Error> {
        Ok(Self::new(
            registry,
            Arc::new(BagOfWordsScorer),
            Arc::new(RuleBasedExtractor::new()?),
            workers,
        ))
    }

    #[must_use]
    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    /// Find the best template for `text`, if it clears its threshold.
    ///
    /// A scoring task that panics is logged and treated as no match.
    #[tracing::instrument(skip(self))]
    pub async fn match_text(&self, text: &str) -> Option<TemplateMatch> {
        let templates = self.registry.snapshot();
        if templates.is_empty() {
            return None;
        }
        let Ok(permit) = Arc::clone(&self.workers).acquire_owned().await else {
            warn!("template worker pool closed");
            return None;
        };

        let scorer = Arc::clone(&self.scorer);
        let extractor = Arc::clone(&self.extractor);
        let text = text.to_string();
        let scored = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            best_match(&templates, &text, scorer.as_ref(), extractor.as_ref())
        })
        .await;

        match scored {
            Ok(found) => {
                if let Some(found) = &found {
                    debug!(
                        template = %found.template.name,
                        confidence = found.confidence,
                        "template matched"
                    );
                }
                found
            }
            Err(err) => {
                warn!(%err, "template scoring task failed");
                None
            }
        }
    }
}

/// Score every pattern of every template and keep the global best.
///
/// A candidate whose entity extraction fails is skipped. Ties keep the
/// earlier candidate, so the first registered template wins. The winner is
/// returned only if its score reaches its template's `min_confidence`.
#[must_use]
pub fn best_match(
    templates: &[Template],
    text: &str,
    scorer: &dyn SemanticScorer,
    extractor: &dyn EntityExtractor,
) -> Option<TemplateMatch> {
    let mut best: Option<TemplateMatch> = None;
    for template in templates {
        for pattern in &template.patterns {
            let variables = match extractor.extract(text, pattern) {
                Ok(variables) => variables,
                Err(err) => {
                    debug!(template = %template.name, %pattern, %err, "candidate skipped");
                    continue;
                }
            };
            let score = combined_score(scorer.similarity(text, pattern), edit_ratio(text, pattern));
            if best.as_ref().is_none_or(|b| score > b.confidence) {
                best = Some(TemplateMatch {
                    template: template.clone(),
                    pattern: pattern.clone(),
                    variables,
                    confidence: score,
                });
            }
        }
    }
    best.filter(|found| found.confidence >= found.template.min_confidence)
}
