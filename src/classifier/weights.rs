// 事前学習済み one-vs-rest ロジスティック回帰の重み。
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct ClassifierWeights {
    pub(crate) labels: Vec<String>,
    pub(crate) embedding_dim: usize,
    pub(crate) weights: Vec<Vec<f32>>,
    pub(crate) bias: Vec<f32>,
}

impl ClassifierWeights {
    pub(crate) fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read classifier weights from {}", path.display()))?;
        Self::from_json(&raw)
    }

    pub(crate) fn from_json(raw: &str) -> Result<Self> {
        let weights: Self =
            serde_json::from_str(raw).context("failed to parse classifier weights json")?;
        weights.validate()?;
        Ok(weights)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.labels.is_empty(), "classifier has no labels");
        anyhow::ensure!(self.embedding_dim > 0, "embedding_dim must be positive");
        anyhow::ensure!(
            self.weights.len() == self.labels.len(),
            "weight matrix row count mismatch: {} rows for {} labels",
            self.weights.len(),
            self.labels.len()
        );
        for row in &self.weights {
            anyhow::ensure!(
                row.len() == self.embedding_dim,
                "weight row length mismatch: expected {}, got {}",
                self.embedding_dim,
                row.len()
            );
        }
        anyhow::ensure!(self.bias.len() == self.labels.len(), "bias length mismatch");
        Ok(())
    }
}
