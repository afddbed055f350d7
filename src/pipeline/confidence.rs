//! 分類確率と抽出信頼度の合成。
use super::extract::Extracted;
use super::types::ClassificationRow;

/// `classifier_probability × extractor_confidence` を [0, 1] に収める。
///
/// 抽出側が信頼度を持たないカテゴリ（産業群・テーマ）は 1.0 が渡ってくる。
#[must_use]
pub fn combine(classifier_probability: f64, extractor_confidence: f64) -> f64 {
    let combined = classifier_probability * extractor_confidence;
    if combined.is_nan() {
        0.0
    } else {
        combined.clamp(0.0, 1.0)
    }
}

/// 抽出結果を保存行へ変換する。
#[must_use]
pub fn to_rows(news_id: i64, probability: f64, extracted: Vec<Extracted>) -> Vec<ClassificationRow> {
    extracted
        .into_iter()
        .map(|item| ClassificationRow::new(news_id, item.payload, combine(probability, item.confidence)))
        .collect()
}
