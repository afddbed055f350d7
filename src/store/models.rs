use serde::{Deserialize, Serialize};

/// 外部で収集された記事。分類処理からは読み取り専用。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewsArticle {
    pub id: i64,
    pub title: Option<String>,
    pub body: Option<String>,
}

impl NewsArticle {
    #[must_use]
    pub fn new(id: i64, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id,
            title: Some(title.into()),
            body: Some(body.into()),
        }
    }
}

/// 銘柄ディレクトリの1行。実行開始時に一度だけ読み込む。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    pub code: String,
    pub name: String,
    pub industry: Option<String>,
    #[serde(default)]
    pub themes: Vec<String>,
}

/// マクロ経済分類体系の1項目（A1〜A18 など）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroCategoryDef {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub examples: Vec<String>,
}
