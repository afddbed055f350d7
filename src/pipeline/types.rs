//! 分類カテゴリと保存ペイロードの型。
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 固定の分類体系。文字列表現は下流の利用者と共有している保存ラベル。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    IndividualStock,
    Industry,
    Theme,
    Macro,
    Other,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::IndividualStock,
        Category::Industry,
        Category::Theme,
        Category::Macro,
        Category::Other,
    ];

    /// DB とモデルラベルで使う文字列。
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Category::IndividualStock => "개별주",
            Category::Industry => "산업군",
            Category::Theme => "테마",
            Category::Macro => "전반적",
            Category::Other => "그 외",
        }
    }

    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL.into_iter().find(|category| category.label() == label)
    }

    /// `(news_id, category)` で一意になるカテゴリかどうか。
    #[must_use]
    pub fn is_single_valued(self) -> bool {
        !matches!(self, Category::IndividualStock)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// マクロ分類の代表値。旧プロトコルは要約文、新プロトコルはコード＋因果。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MacroPayload {
    Summary {
        text: String,
    },
    Coded {
        code: String,
        cause: String,
        effect: String,
    },
}

/// カテゴリごとに形の異なる保存内容。タグがそのままカテゴリになる。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    IndividualStock { code: String, name: String },
    Industry { name: String },
    Theme { name: String },
    Macro(MacroPayload),
    Other,
}

impl Payload {
    #[must_use]
    pub fn category(&self) -> Category {
        match self {
            Payload::IndividualStock { .. } => Category::IndividualStock,
            Payload::Industry { .. } => Category::Industry,
            Payload::Theme { .. } => Category::Theme,
            Payload::Macro(_) => Category::Macro,
            Payload::Other => Category::Other,
        }
    }

    /// 旧来の単一カラム `representative` 向けの表示文字列。
    #[must_use]
    pub fn representative(&self) -> Option<String> {
        match self {
            Payload::IndividualStock { name, .. }
            | Payload::Industry { name }
            | Payload::Theme { name } => Some(name.clone()),
            Payload::Macro(MacroPayload::Summary { text }) => Some(text.clone()),
            Payload::Macro(MacroPayload::Coded {
                code,
                cause,
                effect,
            }) => Some(format!("{code}: {cause} → {effect}")),
            Payload::Other => None,
        }
    }
}

/// 1記事から生成される分類行。生成後は更新・削除しない。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationRow {
    pub news_id: i64,
    pub payload: Payload,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

impl ClassificationRow {
    #[must_use]
    pub fn new(news_id: i64, payload: Payload, confidence: f64) -> Self {
        Self {
            news_id,
            payload,
            confidence,
            created_at: Utc::now(),
        }
    }

    /// 閾値を超えたカテゴリがない記事に付ける合成行。
    #[must_use]
    pub fn other(news_id: i64) -> Self {
        Self::new(news_id, Payload::Other, 0.0)
    }

    #[must_use]
    pub fn category(&self) -> Category {
        self.payload.category()
    }
}
