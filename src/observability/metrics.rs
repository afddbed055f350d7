//! Prometheusメトリクス定義。
use prometheus::{
    Counter, CounterVec, Histogram, Opts, Registry, register_counter_vec_with_registry,
    register_counter_with_registry, register_histogram_with_registry,
};

use crate::pipeline::Category;

/// メトリクスコレクター。
#[derive(Debug, Clone)]
pub struct Metrics {
    // カウンター
    pub articles_loaded: Counter,
    pub articles_processed: Counter,
    pub articles_failed: Counter,
    pub articles_skipped: Counter,
    pub rows_produced: CounterVec,
    pub external_calls: Counter,
    pub extraction_failures: CounterVec,
    pub parse_tier_hits: CounterVec,
    pub escalations: Counter,
    pub entities_dropped: Counter,

    // ヒストグラム
    pub article_duration: Histogram,
    pub external_call_duration: Histogram,
}

impl Metrics {
    /// 渡されたレジストリにメトリクスを登録する。
    ///
    /// # Errors
    /// 同じ名前が既に登録されている場合はエラーを返す。
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            articles_loaded: register_counter_with_registry!(
                "news_classifier_articles_loaded_total",
                "Total number of unclassified articles loaded",
                registry
            )?,
            articles_processed: register_counter_with_registry!(
                "news_classifier_articles_processed_total",
                "Total number of articles classified and committed",
                registry
            )?,
            articles_failed: register_counter_with_registry!(
                "news_classifier_articles_failed_total",
                "Total number of articles rolled back",
                registry
            )?,
            articles_skipped: register_counter_with_registry!(
                "news_classifier_articles_skipped_total",
                "Articles left unclassified because no row was produced",
                registry
            )?,
            rows_produced: register_counter_vec_with_registry!(
                Opts::new(
                    "news_classifier_rows_produced_total",
                    "Classification rows handed to the store in committed articles, by category"
                ),
                &["category"],
                registry
            )?,
            external_calls: register_counter_with_registry!(
                "news_classifier_external_calls_total",
                "Calls issued to the generative service",
                registry
            )?,
            extraction_failures: register_counter_vec_with_registry!(
                Opts::new(
                    "news_classifier_extraction_failures_total",
                    "Categories that produced no representative, by category and kind"
                ),
                &["category", "kind"],
                registry
            )?,
            parse_tier_hits: register_counter_vec_with_registry!(
                Opts::new(
                    "news_classifier_parse_tier_hits_total",
                    "Reply parses by the fallback tier that succeeded"
                ),
                &["tier"],
                registry
            )?,
            escalations: register_counter_with_registry!(
                "news_classifier_escalations_total",
                "Stock lists re-routed to the industry category",
                registry
            )?,
            entities_dropped: register_counter_with_registry!(
                "news_classifier_entities_dropped_total",
                "Extracted values missing from reference data",
                registry
            )?,
            article_duration: register_histogram_with_registry!(
                "news_classifier_article_duration_seconds",
                "Time spent classifying one article",
                vec![0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 40.0, 80.0],
                registry
            )?,
            external_call_duration: register_histogram_with_registry!(
                "news_classifier_external_call_duration_seconds",
                "Latency of generative service calls",
                vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
                registry
            )?,
        })
    }

    pub fn record_rows_produced(&self, category: Category, count: u64) {
        if count > 0 {
            #[allow(clippy::cast_precision_loss)]
            self.rows_produced
                .with_label_values(&[category.label()])
                .inc_by(count as f64);
        }
    }

    pub fn record_extraction_failure(&self, category: Category, kind: &str) {
        self.extraction_failures
            .with_label_values(&[category.label(), kind])
            .inc();
    }

    pub fn record_parse_tier(&self, tier: &str) {
        self.parse_tier_hits.with_label_values(&[tier]).inc();
    }
}
