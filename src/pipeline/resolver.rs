//! 記事テキストや抽出名を既知の銘柄レコードへ対応付ける。
use std::collections::HashMap;
use std::sync::Arc;

use aho_corasick::AhoCorasick;
use anyhow::{Context, Result};

use super::reference::ReferenceData;
use crate::store::models::StockRecord;

/// 前方一致で拾った場合の信頼度ペナルティ。
pub const FUZZY_PENALTY: f64 = 0.7;
/// 前方一致に使う名前の先頭文字数。
pub const FUZZY_PREFIX_CHARS: usize = 3;

/// 抽出プロンプトに添えるヒント。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockHint {
    pub name: String,
    pub code: String,
    pub industry: Option<String>,
    pub themes: Vec<String>,
}

/// どの段階で一致したか。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Prefix,
}

/// 銘柄コードへ解決された抽出名。
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedStock {
    pub code: String,
    pub name: String,
    pub confidence: f64,
    pub match_kind: MatchKind,
}

#[derive(Debug)]
pub struct EntityResolver {
    reference: Arc<ReferenceData>,
    by_name: HashMap<String, usize>,
    automaton: Option<AhoCorasick>,
    // automaton のパターン番号 → ディレクトリ上の位置
    pattern_to_stock: Vec<usize>,
}

impl EntityResolver {
    /// 銘柄ディレクトリから完全一致表と部分文字列オートマトンを構築する。
    ///
    /// # Errors
    /// オートマトンの構築に失敗した場合はエラーを返す。
    pub fn new(reference: Arc<ReferenceData>) -> Result<Self> {
        let mut by_name = HashMap::new();
        let mut patterns = Vec::new();
        let mut pattern_to_stock = Vec::new();

        for (idx, stock) in reference.stocks().iter().enumerate() {
            let name = stock.name.trim();
            if name.is_empty() {
                continue;
            }
            by_name.entry(name.to_string()).or_insert(idx);
            patterns.push(name.to_string());
            pattern_to_stock.push(idx);
        }

        let automaton = if patterns.is_empty() {
            None
        } else {
            Some(AhoCorasick::new(&patterns).context("failed to build stock name automaton")?)
        };

        Ok(Self {
            reference,
            by_name,
            automaton,
            pattern_to_stock,
        })
    }

    fn stock(&self, idx: usize) -> &StockRecord {
        &self.reference.stocks()[idx]
    }

    /// 本文中に名前がそのまま現れる銘柄のうち、ディレクトリ順で最初のものを返す。
    ///
    /// 候補同士の順位付けはしない。
    #[must_use]
    pub fn find_hint(&self, text: &str) -> Option<StockHint> {
        let automaton = self.automaton.as_ref()?;
        let idx = automaton
            .find_overlapping_iter(text)
            .map(|found| self.pattern_to_stock[found.pattern().as_usize()])
            .min()?;
        let stock = self.stock(idx);
        Some(StockHint {
            name: stock.name.clone(),
            code: stock.code.clone(),
            industry: stock.industry.clone(),
            themes: stock.themes.clone(),
        })
    }

    /// 抽出された社名を銘柄コードへ解決する。
    ///
    /// 完全一致を優先し、外れた場合は先頭3文字を含む最初の銘柄を採用して
    /// 信頼度に [`FUZZY_PENALTY`] を掛ける。どちらにも当たらなければ `None`。
    #[must_use]
    pub fn resolve(&self, name: &str, reported_confidence: f64) -> Option<ResolvedStock> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        if let Some(&idx) = self.by_name.get(name) {
            let stock = self.stock(idx);
            return Some(ResolvedStock {
                code: stock.code.clone(),
                name: stock.name.clone(),
                confidence: reported_confidence,
                match_kind: MatchKind::Exact,
            });
        }

        let prefix: String = name.chars().take(FUZZY_PREFIX_CHARS).collect();
        self.reference
            .stocks()
            .iter()
            .find(|stock| !stock.name.is_empty() && stock.name.contains(prefix.as_str()))
            .map(|stock| ResolvedStock {
                code: stock.code.clone(),
                name: stock.name.clone(),
                confidence: reported_confidence * FUZZY_PENALTY,
                match_kind: MatchKind::Prefix,
            })
    }
}
