//! 埋め込みベクトルからカテゴリごとの独立確率を出すマルチラベル分類器。

mod weights;

use std::path::Path;

use anyhow::{Context, Result};

use crate::pipeline::Category;
use weights::ClassifierWeights;

/// 1記事分のカテゴリ確率。ラベルは互いに排他ではない。
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryScores {
    scores: Vec<(Category, f64)>,
}

impl CategoryScores {
    #[must_use]
    pub fn new(mut scores: Vec<(Category, f64)>) -> Self {
        scores.sort_by_key(|(category, _)| *category);
        Self { scores }
    }

    #[cfg(test)]
    pub(crate) fn probability(&self, category: Category) -> Option<f64> {
        self.scores
            .iter()
            .find(|(candidate, _)| *candidate == category)
            .map(|(_, probability)| *probability)
    }

    /// 閾値以上のカテゴリをカテゴリ順で返す。
    ///
    /// 「그 외」は合成行でのみ表現するため、モデルが高い確率を出しても含めない。
    #[must_use]
    pub fn active(&self, threshold: f64) -> Vec<(Category, f64)> {
        self.scores
            .iter()
            .filter(|(category, _)| *category != Category::Other)
            .filter(|(_, probability)| *probability >= threshold)
            .copied()
            .collect()
    }
}

/// 学習済み重みを読み込むだけのスコアラー。ここでは再学習しない。
#[derive(Debug)]
pub struct CategoryClassifier {
    labels: Vec<Category>,
    embedding_dim: usize,
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
}

impl CategoryClassifier {
    /// 重みファイルを読み込む。
    ///
    /// # Errors
    /// ファイルが読めない、形が合わない、未知のラベルを含む場合はエラーを返す。
    pub fn from_path(path: &Path) -> Result<Self> {
        Self::from_weights(ClassifierWeights::from_path(path)?)
    }

    /// JSON 文字列から重みを読み込む。
    ///
    /// # Errors
    /// `from_path` と同じ条件でエラーを返す。
    pub fn from_json(raw: &str) -> Result<Self> {
        Self::from_weights(ClassifierWeights::from_json(raw)?)
    }

    fn from_weights(weights: ClassifierWeights) -> Result<Self> {
        let labels = weights
            .labels
            .iter()
            .map(|label| {
                Category::from_label(label)
                    .with_context(|| format!("unknown classifier label {label:?}"))
            })
            .collect::<Result<Vec<_>>>()?;
        let mut seen = std::collections::HashSet::new();
        for label in &labels {
            anyhow::ensure!(seen.insert(*label), "duplicate classifier label {label}");
        }

        tracing::info!(
            labels = labels.len(),
            embedding_dim = weights.embedding_dim,
            "category classifier loaded"
        );

        Ok(Self {
            labels,
            embedding_dim: weights.embedding_dim,
            weights: weights.weights,
            bias: weights.bias,
        })
    }

    #[must_use]
    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    /// ラベルごとに sigmoid(w·x + b) を計算する。
    ///
    /// # Errors
    /// 埋め込み次元が重みと一致しない場合はエラーを返す。
    pub fn predict(&self, embedding: &[f32]) -> Result<CategoryScores> {
        anyhow::ensure!(
            embedding.len() == self.embedding_dim,
            "embedding dimension mismatch: expected {}, got {}",
            self.embedding_dim,
            embedding.len()
        );

        let scores = self
            .labels
            .iter()
            .zip(self.weights.iter().zip(&self.bias))
            .map(|(category, (row, bias))| {
                let logit = row
                    .iter()
                    .zip(embedding)
                    .map(|(w, x)| f64::from(*w) * f64::from(*x))
                    .sum::<f64>()
                    + f64::from(*bias);
                (*category, sigmoid(logit))
            })
            .collect();
        Ok(CategoryScores::new(scores))
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
