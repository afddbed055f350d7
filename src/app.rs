use std::sync::Arc;

use anyhow::{Context, Result};

use crate::{
    classifier::CategoryClassifier,
    clients::{GeminiClient, GenerativeClient},
    config::Config,
    observability::Telemetry,
    pipeline::{
        Embedder as _, EncoderEmbedder, EntityResolver, PipelineOrchestrator, RepresentativeExtractor,
        RunSummary, orchestrator::OrchestratorSettings,
    },
    store::PgClassificationStore,
    util::{error::PipelineError, rate_limit::TokenBucket},
};

/// 1回の実行に必要な依存をまとめたもの。
pub struct ComponentRegistry {
    config: Arc<Config>,
    telemetry: Telemetry,
    store: PgClassificationStore,
    orchestrator: PipelineOrchestrator,
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

impl ComponentRegistry {
    /// 構成情報から依存をまとめて初期化する。
    ///
    /// DB 接続、スキーマ適用、参照スナップショットの読み込み、エンコーダと分類器のロードを行う。
    /// どれか1つでも失敗すれば実行は始めない。
    ///
    /// # Errors
    /// いずれかのコンポーネントの初期化に失敗した場合はエラーを返す。
    pub async fn build(config: Config, telemetry: Telemetry) -> Result<Self> {
        let config = Arc::new(config);

        let mut store = PgClassificationStore::connect(config.database_url()).await?;
        store.ensure_schema().await?;
        let reference = Arc::new(store.load_reference().await?);

        let embedder = Arc::new(
            EncoderEmbedder::load(
                config.embedding_model_dir(),
                config.embedding_batch_size().get(),
            )
            .context("failed to load embedding model")?,
        );
        let classifier = Arc::new(
            CategoryClassifier::from_path(config.classifier_weights_path())
                .context("failed to load category classifier")?,
        );
        anyhow::ensure!(
            classifier.embedding_dim() == embedder.dimension(),
            "classifier expects {}-dim embeddings but the encoder produces {}",
            classifier.embedding_dim(),
            embedder.dimension()
        );

        let resolver = Arc::new(EntityResolver::new(Arc::clone(&reference))?);
        let client: Arc<dyn GenerativeClient> = Arc::new(GeminiClient::new(
            config.gemini_base_url(),
            config.gemini_model(),
            config.gemini_api_key(),
            config.gemini_timeout(),
        )?);

        let metrics = telemetry.metrics();
        let extractor = RepresentativeExtractor::new(
            client,
            reference,
            Arc::clone(&resolver),
            config.extraction_protocol(),
            Arc::clone(&metrics),
        );
        let limiter = TokenBucket::new(config.llm_call_burst(), config.llm_call_interval());
        let settings = OrchestratorSettings {
            threshold: config.classifier_threshold(),
            batch_limit: config.batch_limit(),
            article_delay: config.article_delay(),
        };
        let orchestrator = PipelineOrchestrator::new(
            embedder,
            classifier,
            resolver,
            extractor,
            limiter,
            metrics,
            settings,
        );

        Ok(Self {
            config,
            telemetry,
            store,
            orchestrator,
        })
    }

    /// 未分類記事を1巡処理し、設定があればメトリクスを書き出す。
    ///
    /// # Errors
    /// インフラ障害で実行が中断された場合は [`PipelineError::Infrastructure`] を返す。
    pub async fn run_once(&mut self) -> Result<RunSummary, PipelineError> {
        let outcome = self.orchestrator.run(&mut self.store).await;

        // 中断時もそこまでのカウンタは残す
        if let Some(path) = self.config.metrics_textfile() {
            if let Err(error) = self.telemetry.write_textfile(path) {
                tracing::warn!(error = %format!("{error:#}"), path = %path.display(), "failed to write metrics textfile");
            }
        }
        outcome
    }
}
