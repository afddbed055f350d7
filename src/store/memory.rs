// テスト用のインメモリ分類ストア。
// 記事単位のトランザクションと部分一意インデックスを模倣し、書き込み失敗を注入できる。
use std::collections::HashSet;

use anyhow::{Result, bail};
use async_trait::async_trait;

use super::ClassificationStore;
use super::models::NewsArticle;
use crate::pipeline::ClassificationRow;

#[derive(Debug, Default)]
pub(crate) struct MemoryStore {
    articles: Vec<NewsArticle>,
    committed: Vec<ClassificationRow>,
    // 何回目の行書き込み（1始まり、全記事通算）で失敗させるか
    fail_on_write: Option<usize>,
    writes: usize,
    fail_with_io: bool,
}

impl MemoryStore {
    pub(crate) fn with_articles(articles: Vec<NewsArticle>) -> Self {
        Self {
            articles,
            ..Self::default()
        }
    }

    pub(crate) fn fail_on_write(mut self, nth: usize) -> Self {
        self.fail_on_write = Some(nth);
        self
    }

    /// 注入する失敗を接続断（致命的）にする。
    pub(crate) fn fail_with_io(mut self) -> Self {
        self.fail_with_io = true;
        self
    }

    pub(crate) fn add_article(&mut self, article: NewsArticle) {
        self.articles.push(article);
    }

    pub(crate) fn rows(&self) -> &[ClassificationRow] {
        &self.committed
    }

    pub(crate) fn rows_for(&self, news_id: i64) -> Vec<&ClassificationRow> {
        self.committed
            .iter()
            .filter(|row| row.news_id == news_id)
            .collect()
    }

    fn conflicts(&self, staged: &[ClassificationRow], row: &ClassificationRow) -> bool {
        let category = row.category();
        if !category.is_single_valued() {
            return false;
        }
        self.committed
            .iter()
            .chain(staged)
            .any(|existing| existing.news_id == row.news_id && existing.category() == category)
    }
}

#[async_trait]
impl ClassificationStore for MemoryStore {
    async fn load_unclassified(&mut self, limit: Option<i64>) -> Result<Vec<NewsArticle>> {
        let classified: HashSet<i64> = self.committed.iter().map(|row| row.news_id).collect();
        let mut pending: Vec<NewsArticle> = self
            .articles
            .iter()
            .filter(|article| !classified.contains(&article.id))
            .cloned()
            .collect();
        pending.sort_by_key(|article| article.id);
        if let Some(limit) = limit {
            pending.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        Ok(pending)
    }

    async fn persist_article(&mut self, news_id: i64, rows: &[ClassificationRow]) -> Result<u64> {
        // コミットまでは staged にだけ積む
        let mut staged: Vec<ClassificationRow> = Vec::new();
        for row in rows {
            self.writes += 1;
            if self.fail_on_write == Some(self.writes) {
                if self.fail_with_io {
                    return Err(anyhow::Error::new(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        "connection reset by peer",
                    ))
                    .context("failed to insert news_classification row"));
                }
                bail!("injected write failure for news_id={news_id}");
            }
            if !self.conflicts(&staged, row) {
                staged.push(row.clone());
            }
        }
        let inserted = staged.len() as u64;
        self.committed.extend(staged);
        Ok(inserted)
    }
}
