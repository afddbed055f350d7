pub mod dao;
#[cfg(test)]
pub(crate) mod memory;
pub mod models;

use anyhow::Result;
use async_trait::async_trait;

use crate::pipeline::ClassificationRow;
use models::NewsArticle;

pub use dao::PgClassificationStore;

/// 分類結果の読み書き。実行中は1つのセッションを使い回す。
#[async_trait]
pub trait ClassificationStore: Send {
    /// 分類行が1件も無い記事を id 昇順で返す。
    async fn load_unclassified(&mut self, limit: Option<i64>) -> Result<Vec<NewsArticle>>;

    /// 1記事分の行を1トランザクションで書き込み、実際に挿入された件数を返す。
    ///
    /// 途中で失敗した場合はその記事の行は1件も残らない。
    async fn persist_article(&mut self, news_id: i64, rows: &[ClassificationRow]) -> Result<u64>;
}
