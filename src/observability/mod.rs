pub mod metrics;
pub mod tracing;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use prometheus::{Encoder, Registry, TextEncoder};

use self::metrics::Metrics;

/// Telemetry（メトリクスとトレーシング）を管理する構造体。
#[derive(Debug, Clone)]
pub struct Telemetry {
    registry: Registry,
    metrics: Arc<Metrics>,
}

impl Telemetry {
    /// トレーシングを初期化し、専用レジストリにメトリクスを登録する。
    ///
    /// # Errors
    /// サブスクライバまたはメトリクスの初期化に失敗した場合はエラーを返す。
    pub fn new() -> Result<Self> {
        tracing::init()?;
        Self::without_tracing()
    }

    /// メトリクスだけを用意する（テストや埋め込み用途）。
    ///
    /// # Errors
    /// メトリクスの登録に失敗した場合はエラーを返す。
    pub fn without_tracing() -> Result<Self> {
        let registry = Registry::new();
        let metrics = Arc::new(Metrics::new(&registry).context("failed to register metrics")?);
        Ok(Self { registry, metrics })
    }

    #[must_use]
    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Prometheus テキスト形式でレンダリングする。
    ///
    /// # Errors
    /// エンコードに失敗した場合はエラーを返す。
    pub fn render_prometheus(&self) -> Result<String> {
        render(&self.registry)
    }

    /// node-exporter の textfile collector 向けに書き出す。
    ///
    /// 読み手が書きかけのファイルを見ないよう、一時ファイルに書いてから rename する。
    ///
    /// # Errors
    /// 書き込みまたは rename に失敗した場合はエラーを返す。
    pub fn write_textfile(&self, path: &Path) -> Result<()> {
        let rendered = self.render_prometheus()?;
        let tmp = path.with_extension("prom.tmp");
        std::fs::write(&tmp, rendered)
            .with_context(|| format!("failed to write metrics to {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("failed to move metrics into {}", path.display()))?;
        Ok(())
    }
}

pub(crate) fn render(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&registry.gather(), &mut buffer)
        .context("failed to encode metrics")?;
    String::from_utf8(buffer).context("metrics output is not utf-8")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Category;

    #[test]
    fn textfile_contains_recorded_counters() {
        let telemetry = Telemetry::without_tracing().expect("telemetry");
        telemetry.metrics().articles_processed.inc();
        telemetry.metrics().record_rows_produced(Category::IndividualStock, 3);

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("news_classifier.prom");
        telemetry.write_textfile(&path).expect("write textfile");

        let contents = std::fs::read_to_string(&path).expect("read textfile");
        assert!(contents.contains("news_classifier_articles_processed_total 1"));
        assert!(contents.contains("category=\"개별주\""));
        assert!(!dir.path().join("news_classifier.prom.tmp").exists());
    }
}
