//! 実行中に不変な参照スナップショット（銘柄ディレクトリとマクロ分類体系）。
use std::collections::{BTreeSet, HashSet};

use crate::store::models::{MacroCategoryDef, StockRecord};

/// 起動時に一度だけ読み込み、各コンポーネントへ参照で渡す。
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    stocks: Vec<StockRecord>,
    macro_categories: Vec<MacroCategoryDef>,
    industries: Vec<String>,
    themes: Vec<String>,
}

impl ReferenceData {
    #[must_use]
    pub fn new(stocks: Vec<StockRecord>, macro_categories: Vec<MacroCategoryDef>) -> Self {
        // 業種はディレクトリ順の重複なし、テーマは辞書順
        let mut seen = HashSet::new();
        let industries = stocks
            .iter()
            .filter_map(|stock| stock.industry.as_deref())
            .map(str::trim)
            .filter(|industry| !industry.is_empty())
            .filter(|industry| seen.insert(*industry))
            .map(ToString::to_string)
            .collect();
        let themes = stocks
            .iter()
            .flat_map(|stock| stock.themes.iter())
            .map(|theme| theme.trim())
            .filter(|theme| !theme.is_empty())
            .map(ToString::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        Self {
            stocks,
            macro_categories,
            industries,
            themes,
        }
    }

    #[must_use]
    pub fn stocks(&self) -> &[StockRecord] {
        &self.stocks
    }

    #[must_use]
    pub fn macro_categories(&self) -> &[MacroCategoryDef] {
        &self.macro_categories
    }

    /// プロンプトに列挙する業種の許可リスト。
    #[must_use]
    pub fn industries(&self) -> &[String] {
        &self.industries
    }

    /// プロンプトに列挙するテーマの許可リスト。
    #[must_use]
    pub fn themes(&self) -> &[String] {
        &self.themes
    }

    #[must_use]
    pub fn is_known_macro_code(&self, code: &str) -> bool {
        self.macro_categories
            .iter()
            .any(|category| category.code == code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stock(code: &str, name: &str, industry: Option<&str>, themes: &[&str]) -> StockRecord {
        StockRecord {
            code: code.to_string(),
            name: name.to_string(),
            industry: industry.map(ToString::to_string),
            themes: themes.iter().map(ToString::to_string).collect(),
        }
    }

    #[test]
    fn derives_vocabularies_from_directory() {
        let data = ReferenceData::new(
            vec![
                stock("005930", "삼성전자", Some("반도체"), &["HBM(고대역폭메모리)", "시스템반도체"]),
                stock("000660", "SK하이닉스", Some("반도체"), &["HBM(고대역폭메모리)"]),
                stock("373220", "LG에너지솔루션", Some("에너지"), &["2차전지"]),
                stock("035720", "카카오", None, &[]),
            ],
            Vec::new(),
        );

        assert_eq!(data.industries(), &["반도체", "에너지"]);
        assert_eq!(
            data.themes(),
            &["2차전지", "HBM(고대역폭메모리)", "시스템반도체"]
        );
    }

    #[test]
    fn macro_codes_are_checked_against_taxonomy() {
        let data = ReferenceData::new(
            Vec::new(),
            vec![MacroCategoryDef {
                code: "A1".to_string(),
                name: "통화정책".to_string(),
                description: None,
                examples: vec!["기준금리 인상".to_string()],
            }],
        );
        assert!(data.is_known_macro_code("A1"));
        assert!(!data.is_known_macro_code("A99"));
    }
}
