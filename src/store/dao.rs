use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Connection, PgConnection, Row};

use super::ClassificationStore;
use super::models::{MacroCategoryDef, NewsArticle, StockRecord};
use crate::pipeline::{ClassificationRow, MacroPayload, Payload, ReferenceData};

const SCHEMA_SQL: &str = include_str!("../../migrations/0001_news_classification.sql");

/// Postgres 上の分類ストア。接続プールは使わず、1本のセッションを実行中ずっと保持する。
#[derive(Debug)]
pub struct PgClassificationStore {
    conn: PgConnection,
}

impl PgClassificationStore {
    /// # Errors
    /// 接続できない場合はエラーを返す。
    pub async fn connect(database_url: &str) -> Result<Self> {
        let conn = PgConnection::connect(database_url)
            .await
            .context("failed to connect to database")?;
        Ok(Self { conn })
    }

    /// 分類結果テーブルとインデックスを作成する（既にあれば何もしない）。
    ///
    /// # Errors
    /// DDL の実行に失敗した場合はエラーを返す。
    pub async fn ensure_schema(&mut self) -> Result<()> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&mut self.conn)
            .await
            .context("failed to apply news_classification schema")?;
        Ok(())
    }

    /// 銘柄ディレクトリとマクロ分類体系を読み込む。実行中は再取得しない。
    ///
    /// # Errors
    /// 参照テーブルが読めない場合はエラーを返す。
    pub async fn load_reference(&mut self) -> Result<ReferenceData> {
        let stock_rows = sqlx::query(
            r"
            SELECT stock_code, stock_name, themes, industry_group
            FROM tmp_stock
            ORDER BY stock_code
            ",
        )
        .fetch_all(&mut self.conn)
        .await
        .context("failed to load stock directory")?;

        let mut stocks = Vec::with_capacity(stock_rows.len());
        for row in stock_rows {
            stocks.push(StockRecord {
                code: row.try_get("stock_code").context("failed to get stock_code")?,
                name: row
                    .try_get::<Option<String>, _>("stock_name")
                    .context("failed to get stock_name")?
                    .unwrap_or_default(),
                industry: row
                    .try_get("industry_group")
                    .context("failed to get industry_group")?,
                themes: row
                    .try_get::<Option<Vec<String>>, _>("themes")
                    .context("failed to get themes")?
                    .unwrap_or_default(),
            });
        }

        let macro_rows = sqlx::query(
            r"
            SELECT category_code, category_name, description, examples
            FROM macro_category_master
            ORDER BY length(category_code), category_code
            ",
        )
        .fetch_all(&mut self.conn)
        .await
        .context("failed to load macro taxonomy")?;

        let mut macro_categories = Vec::with_capacity(macro_rows.len());
        for row in macro_rows {
            macro_categories.push(MacroCategoryDef {
                code: row
                    .try_get("category_code")
                    .context("failed to get category_code")?,
                name: row
                    .try_get("category_name")
                    .context("failed to get category_name")?,
                description: row
                    .try_get("description")
                    .context("failed to get description")?,
                examples: row
                    .try_get::<Option<Vec<String>>, _>("examples")
                    .context("failed to get examples")?
                    .unwrap_or_default(),
            });
        }

        tracing::info!(
            stocks = stocks.len(),
            macro_categories = macro_categories.len(),
            "reference snapshot loaded"
        );
        Ok(ReferenceData::new(stocks, macro_categories))
    }
}

/// ペイロードを保存カラムへ展開したもの。
#[derive(Debug, Default, PartialEq)]
struct RowColumns {
    stock_code: Option<String>,
    industry_name: Option<String>,
    theme_name: Option<String>,
    macro_category_code: Option<String>,
    macro_cause: Option<String>,
    macro_effect: Option<String>,
    representative: Option<String>,
}

impl RowColumns {
    fn from_payload(payload: &Payload) -> Self {
        let representative = payload.representative();
        match payload {
            Payload::IndividualStock { code, .. } => Self {
                stock_code: Some(code.clone()),
                representative,
                ..Self::default()
            },
            Payload::Industry { name } => Self {
                industry_name: Some(name.clone()),
                representative,
                ..Self::default()
            },
            Payload::Theme { name } => Self {
                theme_name: Some(name.clone()),
                representative,
                ..Self::default()
            },
            Payload::Macro(MacroPayload::Coded {
                code,
                cause,
                effect,
            }) => Self {
                macro_category_code: Some(code.clone()),
                macro_cause: Some(cause.clone()),
                macro_effect: Some(effect.clone()),
                representative,
                ..Self::default()
            },
            Payload::Macro(MacroPayload::Summary { .. }) | Payload::Other => Self {
                representative,
                ..Self::default()
            },
        }
    }
}

#[async_trait]
impl ClassificationStore for PgClassificationStore {
    async fn load_unclassified(&mut self, limit: Option<i64>) -> Result<Vec<NewsArticle>> {
        // LIMIT NULL は無制限
        let rows = sqlx::query(
            r"
            SELECT n.id::BIGINT AS id, n.title, n.content
            FROM news_raw n
            WHERE NOT EXISTS (
                SELECT 1 FROM news_classification c WHERE c.news_id = n.id
            )
            ORDER BY n.id
            LIMIT $1
            ",
        )
        .bind(limit)
        .fetch_all(&mut self.conn)
        .await
        .context("failed to load unclassified articles")?;

        rows.into_iter()
            .map(|row| {
                Ok(NewsArticle {
                    id: row.try_get("id").context("failed to get id")?,
                    title: row.try_get("title").context("failed to get title")?,
                    body: row.try_get("content").context("failed to get content")?,
                })
            })
            .collect()
    }

    async fn persist_article(&mut self, news_id: i64, rows: &[ClassificationRow]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        // エラーで早期 return すると tx が drop され、ロールバックされる
        let mut tx = self
            .conn
            .begin()
            .await
            .context("failed to begin transaction")?;

        let mut inserted = 0;
        for row in rows {
            let columns = RowColumns::from_payload(&row.payload);
            let result = sqlx::query(
                r"
                INSERT INTO news_classification
                    (news_id, category, stock_code, industry_name, theme_name,
                     macro_category_code, macro_cause, macro_effect, representative,
                     confidence_score, classified_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ON CONFLICT (news_id, category) WHERE category <> '개별주' DO NOTHING
                ",
            )
            .bind(news_id)
            .bind(row.category().label())
            .bind(columns.stock_code)
            .bind(columns.industry_name)
            .bind(columns.theme_name)
            .bind(columns.macro_category_code)
            .bind(columns.macro_cause)
            .bind(columns.macro_effect)
            .bind(columns.representative)
            .bind(row.confidence)
            .bind(row.created_at)
            .execute(&mut *tx)
            .await
            .with_context(|| {
                format!(
                    "failed to insert news_classification row (news_id={news_id}, category={})",
                    row.category()
                )
            })?;
            inserted += result.rows_affected();
        }

        tx.commit().await.context("failed to commit transaction")?;
        Ok(inserted)
    }
}
