//! Per-article classification loop.
//!
//! LOAD → (normalize → hint → embed → classify → extract → combine → persist → pause)*.
//! Restart safety comes entirely from LOAD: an article is reprocessed iff it has no rows.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use super::confidence;
use super::embedding::Embedder;
use super::extract::{Extraction, RepresentativeExtractor};
use super::resolver::EntityResolver;
use super::types::{Category, ClassificationRow};
use crate::classifier::CategoryClassifier;
use crate::observability::metrics::Metrics;
use crate::store::ClassificationStore;
use crate::store::models::NewsArticle;
use crate::util::error::{ErrorKind, PipelineError, classify_error};
use crate::util::rate_limit::TokenBucket;
use crate::util::text::normalize;

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub threshold: f64,
    pub batch_limit: Option<i64>,
    pub article_delay: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            threshold: 0.3,
            batch_limit: None,
            article_delay: Duration::from_secs(4),
        }
    }
}

/// Totals reported at the end of a run.
///
/// `rows_written` counts rows the store actually inserted. The per-category
/// breakdown counts rows the pipeline produced for committed articles, which
/// can exceed it when the store ignores a duplicate single-valued row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub loaded: usize,
    pub processed: usize,
    /// Articles with no row at all; they stay unclassified for the next run.
    pub skipped: usize,
    pub failed: usize,
    pub rows_written: u64,
    pub rows_produced_by_category: BTreeMap<Category, u64>,
    pub duration: Duration,
}

impl RunSummary {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            loaded: 0,
            processed: 0,
            skipped: 0,
            failed: 0,
            rows_written: 0,
            rows_produced_by_category: BTreeMap::new(),
            duration: Duration::ZERO,
        }
    }
}

pub struct PipelineOrchestrator {
    embedder: Arc<dyn Embedder>,
    classifier: Arc<CategoryClassifier>,
    resolver: Arc<EntityResolver>,
    extractor: RepresentativeExtractor,
    limiter: TokenBucket,
    metrics: Arc<Metrics>,
    settings: OrchestratorSettings,
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("extractor", &self.extractor)
            .field("limiter", &self.limiter)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl PipelineOrchestrator {
    #[must_use]
    pub fn new(
        embedder: Arc<dyn Embedder>,
        classifier: Arc<CategoryClassifier>,
        resolver: Arc<EntityResolver>,
        extractor: RepresentativeExtractor,
        limiter: TokenBucket,
        metrics: Arc<Metrics>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            embedder,
            classifier,
            resolver,
            extractor,
            limiter,
            metrics,
            settings,
        }
    }

    /// Classify every article that has no rows yet, one at a time.
    ///
    /// # Errors
    /// Returns [`PipelineError::Infrastructure`] when the store, the encoder or
    /// the classifier fails in a way that makes continuing pointless. Failed
    /// external calls and unparseable replies never abort the run.
    pub async fn run<S>(&mut self, store: &mut S) -> Result<RunSummary, PipelineError>
    where
        S: ClassificationStore + ?Sized,
    {
        let run_id = Uuid::now_v7();
        let span = info_span!("classification_run", run_id = %run_id);
        self.run_inner(run_id, store).instrument(span).await
    }

    async fn run_inner<S>(&mut self, run_id: Uuid, store: &mut S) -> Result<RunSummary, PipelineError>
    where
        S: ClassificationStore + ?Sized,
    {
        let started = Instant::now();
        let mut summary = RunSummary::new(run_id);

        let articles = store
            .load_unclassified(self.settings.batch_limit)
            .await
            .context("failed to load unclassified articles")
            .map_err(PipelineError::Infrastructure)?;
        summary.loaded = articles.len();
        #[allow(clippy::cast_precision_loss)]
        self.metrics.articles_loaded.inc_by(articles.len() as f64);
        info!(loaded = summary.loaded, protocol = %self.extractor.protocol(), "loaded unclassified articles");

        let total = articles.len();
        for (idx, article) in articles.iter().enumerate() {
            let article_started = Instant::now();
            let rows = self
                .classify_article(article)
                .instrument(info_span!("article", news_id = article.id))
                .await?;

            if rows.is_empty() {
                summary.skipped += 1;
                self.metrics.articles_skipped.inc();
                info!(
                    news_id = article.id,
                    progress = %format!("[{}/{total}]", idx + 1),
                    "no row produced; article left for next run"
                );
            } else {
                self.persist(store, article, &rows, &mut summary).await?;
            }
            self.metrics
                .article_duration
                .observe(article_started.elapsed().as_secs_f64());

            if idx + 1 < total && !self.settings.article_delay.is_zero() {
                tokio::time::sleep(self.settings.article_delay).await;
            }
        }

        summary.duration = started.elapsed();
        info!(
            run_id = %summary.run_id,
            loaded = summary.loaded,
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            rows_written = summary.rows_written,
            rows_produced_by_category = ?summary.rows_produced_by_category,
            duration_ms = u64::try_from(summary.duration.as_millis()).unwrap_or(u64::MAX),
            "classification run finished"
        );
        Ok(summary)
    }

    /// Commit one article's rows. Only a lost connection is returned as an error.
    async fn persist<S>(
        &self,
        store: &mut S,
        article: &NewsArticle,
        rows: &[ClassificationRow],
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError>
    where
        S: ClassificationStore + ?Sized,
    {
        match store.persist_article(article.id, rows).await {
            Ok(inserted) => {
                summary.processed += 1;
                summary.rows_written += inserted;
                self.metrics.articles_processed.inc();
                for (category, count) in count_by_category(rows) {
                    *summary.rows_produced_by_category.entry(category).or_default() += count;
                    self.metrics.record_rows_produced(category, count);
                }
                info!(news_id = article.id, rows = rows.len(), inserted, "article classified");
                Ok(())
            }
            Err(err) => {
                summary.failed += 1;
                self.metrics.articles_failed.inc();
                if classify_error(&err) == ErrorKind::Fatal {
                    error!(news_id = article.id, error = %format!("{err:#}"), "persistence lost; aborting run");
                    return Err(PipelineError::Infrastructure(err));
                }
                warn!(news_id = article.id, error = %format!("{err:#}"), "article rolled back");
                Ok(())
            }
        }
    }

    /// Build every row for one article. Nothing is written here.
    async fn classify_article(
        &mut self,
        article: &NewsArticle,
    ) -> Result<Vec<ClassificationRow>, PipelineError> {
        let title = normalize(article.title.as_deref());
        let body = normalize(article.body.as_deref());
        let text = format!("{title} {body}").trim().to_string();
        let hint = self.resolver.find_hint(&text);

        let embedding = self
            .embedder
            .embed(std::slice::from_ref(&text))
            .await
            .map_err(PipelineError::Infrastructure)?
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::Infrastructure(anyhow::anyhow!("encoder returned no vector")))?;
        let scores = self
            .classifier
            .predict(&embedding)
            .map_err(PipelineError::Infrastructure)?;

        let active = scores.active(self.settings.threshold);
        if active.is_empty() {
            debug!("no category passed threshold");
            return Ok(vec![ClassificationRow::other(article.id)]);
        }

        let mut planned: HashSet<Category> = active.iter().map(|(category, _)| *category).collect();
        let mut queue: VecDeque<(Category, f64)> = active.into_iter().collect();
        let mut rows = Vec::new();

        while let Some((category, probability)) = queue.pop_front() {
            let extraction = self
                .extractor
                .extract(&title, &body, category, hint.as_ref(), &mut self.limiter)
                .await;
            match extraction {
                Ok(Extraction::Found(found)) => {
                    debug!(category = %category, found = found.len(), "representatives extracted");
                    rows.extend(confidence::to_rows(article.id, probability, found));
                }
                Ok(Extraction::Escalate(target)) => {
                    info!(from = %category, to = %target, "re-routing article");
                    if planned.insert(target) {
                        queue.push_back((target, probability));
                    }
                }
                Err(err) => {
                    self.metrics.record_extraction_failure(category, err.kind());
                    warn!(category = %category, error = %err, "category yielded no representative");
                }
            }
        }
        Ok(rows)
    }
}

fn count_by_category(rows: &[ClassificationRow]) -> BTreeMap<Category, u64> {
    let mut per_category: BTreeMap<Category, u64> = BTreeMap::new();
    for row in rows {
        *per_category.entry(row.category()).or_default() += 1;
    }
    per_category
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;

    use anyhow::Result;
    use async_trait::async_trait;

    use super::*;
    use crate::pipeline::extract::ExtractionProtocol;
    use crate::pipeline::extract::testing::ScriptedClient;
    use crate::pipeline::reference::ReferenceData;
    use crate::pipeline::types::Payload;
    use crate::store::memory::MemoryStore;
    use crate::store::models::{MacroCategoryDef, StockRecord};

    /// Each keyword switches on one embedding dimension.
    const KEYWORDS: [&str; 4] = ["주가", "업황", "테마주", "금리"];

    struct KeywordEmbedder;

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|text| {
                    KEYWORDS
                        .iter()
                        .map(|keyword| if text.contains(keyword) { 1.0 } else { 0.0 })
                        .collect()
                })
                .collect())
        }

        fn dimension(&self) -> usize {
            KEYWORDS.len()
        }
    }

    const WEIGHTS: &str = r#"{
        "labels": ["개별주", "산업군", "테마", "전반적", "그 외"],
        "embedding_dim": 4,
        "weights": [
            [4.0, 0.0, 0.0, 0.0],
            [0.0, 4.0, 0.0, 0.0],
            [0.0, 0.0, 4.0, 0.0],
            [0.0, 0.0, 0.0, 4.0],
            [0.0, 0.0, 0.0, 0.0]
        ],
        "bias": [-2.0, -2.0, -2.0, -2.0, 3.0]
    }"#;

    fn active_probability() -> f64 {
        1.0 / (1.0 + (-2.0f64).exp())
    }

    fn orchestrator(
        protocol: ExtractionProtocol,
        client: Arc<ScriptedClient>,
        settings: OrchestratorSettings,
        limiter: TokenBucket,
    ) -> PipelineOrchestrator {
        let stock = |code: &str, name: &str| StockRecord {
            code: code.to_string(),
            name: name.to_string(),
            industry: Some("반도체".to_string()),
            themes: vec!["HBM".to_string()],
        };
        let reference = Arc::new(ReferenceData::new(
            vec![
                stock("005930", "삼성전자"),
                stock("000660", "SK하이닉스"),
                stock("042700", "한미반도체"),
            ],
            vec![MacroCategoryDef {
                code: "A1".to_string(),
                name: "통화정책".to_string(),
                description: None,
                examples: Vec::new(),
            }],
        ));
        let resolver =
            Arc::new(EntityResolver::new(Arc::clone(&reference)).expect("resolver builds"));
        let registry = prometheus::Registry::new();
        let metrics = Arc::new(Metrics::new(&registry).expect("metrics"));
        let extractor = RepresentativeExtractor::new(
            client,
            reference,
            Arc::clone(&resolver),
            protocol,
            Arc::clone(&metrics),
        );
        PipelineOrchestrator::new(
            Arc::new(KeywordEmbedder),
            Arc::new(CategoryClassifier::from_json(WEIGHTS).expect("weights")),
            resolver,
            extractor,
            limiter,
            metrics,
            settings,
        )
    }

    fn fast() -> OrchestratorSettings {
        OrchestratorSettings {
            article_delay: Duration::ZERO,
            ..OrchestratorSettings::default()
        }
    }

    #[tokio::test]
    async fn unmatched_article_gets_single_other_row() {
        let client = Arc::new(ScriptedClient::default());
        let mut orchestrator =
            orchestrator(ExtractionProtocol::Current, Arc::clone(&client), fast(), TokenBucket::unlimited());
        let mut store = MemoryStore::with_articles(vec![NewsArticle::new(1, "날씨 소식", "맑음")]);

        let summary = orchestrator.run(&mut store).await.expect("run succeeds");

        let rows = store.rows_for(1);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].payload, Payload::Other);
        assert!(rows[0].confidence.abs() < f64::EPSILON);
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.rows_produced_by_category.get(&Category::Other), Some(&1));
        assert!(client.prompts().is_empty());
    }

    #[tokio::test]
    async fn active_categories_never_produce_other_row() {
        let client = Arc::new(ScriptedClient::new([
            Ok(r#"{"industry": "반도체"}"#),
            Ok(r#"{"category_code": "A1", "cause": "기준금리 인상", "effect": "성장주 부담", "confidence": 0.5}"#),
        ]));
        let mut orchestrator =
            orchestrator(ExtractionProtocol::Current, client, fast(), TokenBucket::unlimited());
        let mut store =
            MemoryStore::with_articles(vec![NewsArticle::new(7, "반도체 업황 개선", "금리 동결")]);

        orchestrator.run(&mut store).await.expect("run succeeds");

        let categories: Vec<Category> = store.rows_for(7).iter().map(|row| row.category()).collect();
        assert_eq!(categories, vec![Category::Industry, Category::Macro]);
        let macro_row = store.rows_for(7)[1].clone();
        assert!((macro_row.confidence - active_probability() * 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let client = Arc::new(ScriptedClient::new([Ok(r#"{"stocks": ["삼성전자"]}"#)]));
        let mut orchestrator =
            orchestrator(ExtractionProtocol::Current, client, fast(), TokenBucket::unlimited());
        let mut store = MemoryStore::with_articles(vec![
            NewsArticle::new(1, "삼성전자 주가 상승", "외국인 순매수"),
            NewsArticle::new(2, "주말 날씨", "비"),
        ]);

        let first = orchestrator.run(&mut store).await.expect("first run");
        assert_eq!(first.loaded, 2);
        assert_eq!(first.rows_written, 2);

        let second = orchestrator.run(&mut store).await.expect("second run");
        assert_eq!(second.loaded, 0);
        assert_eq!(second.rows_written, 0);
        assert_eq!(store.rows().len(), 2);
        assert_ne!(first.run_id, second.run_id);
    }

    #[tokio::test]
    async fn legacy_stock_overflow_escalates_to_industry() {
        let client = Arc::new(ScriptedClient::new([
            Ok(r#"{"stocks": ["삼성전자", "SK하이닉스", "한미반도체", "LG전자"]}"#),
            Ok(r#"{"industry": "반도체"}"#),
        ]));
        let mut orchestrator =
            orchestrator(ExtractionProtocol::Legacy, Arc::clone(&client), fast(), TokenBucket::unlimited());
        let mut store =
            MemoryStore::with_articles(vec![NewsArticle::new(3, "반도체주 주가 급등", "대형주 동반 강세")]);

        orchestrator.run(&mut store).await.expect("run succeeds");

        let rows = store.rows_for(3);
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].payload,
            Payload::Industry {
                name: "반도체".to_string()
            }
        );
        assert!((rows[0].confidence - active_probability()).abs() < 1e-9);
        assert!(rows.iter().all(|row| row.category() != Category::IndividualStock));
        assert_eq!(client.prompts().len(), 2);
        assert!(client.prompts()[1].contains("업종 목록: 반도체"));
    }

    #[tokio::test]
    async fn failed_write_rolls_back_whole_article() {
        let client = Arc::new(ScriptedClient::new([Ok(
            r#"{"stocks": ["삼성전자", "SK하이닉스", "한미반도체"]}"#,
        )]));
        let mut orchestrator =
            orchestrator(ExtractionProtocol::Current, client, fast(), TokenBucket::unlimited());
        let mut store =
            MemoryStore::with_articles(vec![NewsArticle::new(5, "반도체 3사 주가", "강세")])
                .fail_on_write(2);

        let summary = orchestrator.run(&mut store).await.expect("run continues");

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.processed, 0);
        assert_eq!(summary.rows_written, 0);
        assert!(summary.rows_produced_by_category.is_empty());
        assert!(store.rows_for(5).is_empty());
        let pending = store.load_unclassified(None).await.expect("load");
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn lost_connection_aborts_run() {
        let client = Arc::new(ScriptedClient::default());
        let mut orchestrator =
            orchestrator(ExtractionProtocol::Current, client, fast(), TokenBucket::unlimited());
        let mut store = MemoryStore::with_articles(vec![
            NewsArticle::new(1, "날씨", "맑음"),
            NewsArticle::new(2, "날씨", "흐림"),
        ])
        .fail_on_write(1)
        .fail_with_io();

        let error = orchestrator.run(&mut store).await.expect_err("aborts");
        assert!(matches!(error, PipelineError::Infrastructure(_)));
        assert!(store.rows().is_empty());
    }

    #[tokio::test]
    async fn failed_extraction_leaves_article_for_next_run() {
        let client = Arc::new(ScriptedClient::new([Err("deadline exceeded")]));
        let mut orchestrator =
            orchestrator(ExtractionProtocol::Current, client, fast(), TokenBucket::unlimited());
        let mut store = MemoryStore::with_articles(vec![NewsArticle::new(9, "업황 전망", "")]);

        let summary = orchestrator.run(&mut store).await.expect("run continues");

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.processed, 0);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.rows_written, 0);
        assert!(store.rows().is_empty());
        assert_eq!(store.load_unclassified(None).await.expect("load").len(), 1);
    }

    #[tokio::test]
    async fn persisted_confidences_stay_in_unit_interval() {
        let client = Arc::new(ScriptedClient::new([
            Ok(r#"{"stocks": [{"name": "삼성전자", "confidence": 3.0}, {"name": "SK하이", "confidence": 1.0}]}"#),
            Ok(r#"{"category_code": "A1", "cause": "c", "effect": "e", "confidence": -1}"#),
        ]));
        let mut orchestrator =
            orchestrator(ExtractionProtocol::Current, client, fast(), TokenBucket::unlimited());
        let mut store = MemoryStore::with_articles(vec![
            NewsArticle::new(11, "삼성전자 주가", "금리 변수"),
            NewsArticle::new(12, "날씨", "맑음"),
        ]);

        orchestrator.run(&mut store).await.expect("run succeeds");

        assert!(store.rows().len() >= 3);
        assert!(
            store
                .rows()
                .iter()
                .all(|row| (0.0..=1.0).contains(&row.confidence))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn calls_and_articles_are_paced() {
        let client = Arc::new(ScriptedClient::new([
            Ok(r#"{"industry": "반도체"}"#),
            Ok(r#"{"industry": "반도체"}"#),
        ]));
        let limiter = TokenBucket::new(
            NonZeroU32::new(1).expect("non-zero"),
            Duration::from_secs(4),
        );
        let settings = OrchestratorSettings {
            article_delay: Duration::from_secs(4),
            ..OrchestratorSettings::default()
        };
        let mut orchestrator =
            orchestrator(ExtractionProtocol::Current, client, settings, limiter);
        let mut store = MemoryStore::with_articles(vec![
            NewsArticle::new(1, "업황 개선", ""),
            NewsArticle::new(2, "업황 악화", ""),
        ]);

        let start = tokio::time::Instant::now();
        let summary = orchestrator.run(&mut store).await.expect("run succeeds");

        // 4s before call 1, 4s article pause, then the bucket has refilled during the pause
        assert_eq!(summary.processed, 2);
        assert!(start.elapsed() >= Duration::from_secs(8));
        assert!(start.elapsed() < Duration::from_secs(9));
    }

    #[tokio::test]
    async fn batch_limit_caps_loaded_articles() {
        let client = Arc::new(ScriptedClient::default());
        let settings = OrchestratorSettings {
            batch_limit: Some(1),
            ..fast()
        };
        let mut orchestrator =
            orchestrator(ExtractionProtocol::Current, client, settings, TokenBucket::unlimited());
        let mut store = MemoryStore::with_articles(vec![
            NewsArticle::new(2, "날씨", "비"),
            NewsArticle::new(1, "날씨", "눈"),
        ]);

        let summary = orchestrator.run(&mut store).await.expect("run succeeds");

        assert_eq!(summary.loaded, 1);
        assert_eq!(store.rows_for(1).len(), 1);
        assert!(store.rows_for(2).is_empty());
        store.add_article(NewsArticle::new(3, "날씨", "안개"));
        assert_eq!(store.load_unclassified(None).await.expect("load").len(), 2);
    }
}
