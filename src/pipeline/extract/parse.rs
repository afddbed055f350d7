//! 生成サービス応答の段階的パース。
//!
//! 各段は純粋関数で、最初に成功した段の結果を採用する。
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::util::text::truncate_chars;

/// 旧プロトコルのマクロ要約で最後に使う切り詰め長。
pub(crate) const TRUNCATE_CHARS: usize = 40;
/// 名前だけの銘柄リスト（信頼度欄の無い形式）に与える信頼度。
const BARE_NAME_CONFIDENCE: f64 = 1.0;
/// 信頼度欄のある形式で値が欠けているときの信頼度。
const MISSING_CONFIDENCE: f64 = 0.0;

/// 応答に期待する形。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReplyShape {
    Stocks,
    Industry,
    Theme,
    MacroSummary,
    MacroCoded,
}

impl ReplyShape {
    fn key(self) -> &'static str {
        match self {
            ReplyShape::Stocks => "stocks",
            ReplyShape::Industry => "industry",
            ReplyShape::Theme => "theme",
            ReplyShape::MacroSummary => "summary",
            ReplyShape::MacroCoded => "category_code",
        }
    }
}

/// どの段で解釈できたか。メトリクスとログに使う。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseTier {
    Structured,
    BraceScan,
    Pattern,
    Truncated,
}

impl ParseTier {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ParseTier::Structured => "structured",
            ParseTier::BraceScan => "brace_scan",
            ParseTier::Pattern => "pattern",
            ParseTier::Truncated => "truncated",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StockMention {
    pub(crate) name: String,
    pub(crate) confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Reply {
    Stocks(Vec<StockMention>),
    Value(String),
    Summary(String),
    Coded {
        code: String,
        cause: String,
        effect: String,
        confidence: f64,
    },
}

type Tier = fn(&str, ReplyShape) -> Option<Reply>;

const TIERS: [(ParseTier, Tier); 4] = [
    (ParseTier::Structured, structured),
    (ParseTier::BraceScan, brace_scan),
    (ParseTier::Pattern, pattern),
    (ParseTier::Truncated, truncated),
];

/// 応答テキストを期待形に沿って解釈する。どの段でも失敗すれば `None`。
pub(crate) fn parse_reply(raw: &str, shape: ReplyShape) -> Option<(Reply, ParseTier)> {
    let text = strip_code_fence(raw);
    TIERS
        .iter()
        .find_map(|(tier, parse)| parse(text, shape).map(|reply| (reply, *tier)))
}

/// ```json … ``` で囲まれた応答から中身を取り出す。
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // 言語タグ行を飛ばす
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn structured(text: &str, shape: ReplyShape) -> Option<Reply> {
    let value: Value = serde_json::from_str(text).ok()?;
    interpret(&value, shape)
}

/// 最初の `{` から最後の `}` までを JSON として読む。
fn brace_scan(text: &str, shape: ReplyShape) -> Option<Reply> {
    let end = text.rfind('}')?;
    text.match_indices('{')
        .map(|(start, _)| start)
        .filter(|start| *start < end)
        .find_map(|start| {
            let value: Value = serde_json::from_str(&text[start..=end]).ok()?;
            interpret(&value, shape)
        })
}

static SUMMARY_FIELD: Lazy<Regex> = Lazy::new(|| field_regex("summary"));
static INDUSTRY_FIELD: Lazy<Regex> = Lazy::new(|| field_regex("industry"));
static THEME_FIELD: Lazy<Regex> = Lazy::new(|| field_regex("theme"));
static CODE_FIELD: Lazy<Regex> = Lazy::new(|| field_regex("category_code"));
static CAUSE_FIELD: Lazy<Regex> = Lazy::new(|| field_regex("cause"));
static EFFECT_FIELD: Lazy<Regex> = Lazy::new(|| field_regex("effect"));
static CONFIDENCE_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""confidence"\s*:\s*"?([0-9]*\.?[0-9]+)"#).expect("confidence regex is valid")
});
static QUOTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["“](.+?)["”]"#).expect("quoted regex is valid"));
static STOCK_ARRAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)"stocks"\s*:\s*\[(.*?)\]"#).expect("stock array regex is valid")
});
static NAME_FIELD: Lazy<Regex> = Lazy::new(|| field_regex("name"));
static PLAIN_STRING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""([^"]+)""#).expect("string regex is valid"));
static STOCK_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([^{}]*)\}").expect("object regex is valid"));

fn field_regex(key: &str) -> Regex {
    Regex::new(&format!(r#""{key}"\s*:\s*"(.+?)""#)).expect("field regex is valid")
}

fn capture(regex: &Regex, text: &str) -> Option<String> {
    regex
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|value| !value.is_empty())
}

fn pattern_confidence(text: &str) -> f64 {
    capture(&CONFIDENCE_FIELD, text)
        .and_then(|raw| raw.parse::<f64>().ok())
        .map_or(MISSING_CONFIDENCE, clamp_unit)
}

/// 壊れた JSON からカテゴリ固有のフィールドを正規表現で拾う。
fn pattern(text: &str, shape: ReplyShape) -> Option<Reply> {
    match shape {
        ReplyShape::MacroSummary => capture(&SUMMARY_FIELD, text)
            .or_else(|| capture(&QUOTED, text))
            .map(Reply::Summary),
        ReplyShape::Industry => capture(&INDUSTRY_FIELD, text).map(Reply::Value),
        ReplyShape::Theme => capture(&THEME_FIELD, text).map(Reply::Value),
        ReplyShape::MacroCoded => {
            let code = capture(&CODE_FIELD, text)?;
            Some(Reply::Coded {
                code,
                cause: capture(&CAUSE_FIELD, text).unwrap_or_default(),
                effect: capture(&EFFECT_FIELD, text).unwrap_or_default(),
                confidence: pattern_confidence(text),
            })
        }
        ReplyShape::Stocks => {
            let inner = STOCK_ARRAY.captures(text)?.get(1)?.as_str();
            let objects: Vec<&str> = STOCK_OBJECT
                .captures_iter(inner)
                .filter_map(|caps| caps.get(1))
                .map(|m| m.as_str())
                .collect();
            let mentions = if objects.is_empty() {
                PLAIN_STRING
                    .captures_iter(inner)
                    .filter_map(|caps| caps.get(1))
                    .filter_map(|m| non_empty(m.as_str()))
                    .map(|name| StockMention {
                        name,
                        confidence: BARE_NAME_CONFIDENCE,
                    })
                    .collect()
            } else {
                objects
                    .into_iter()
                    .filter_map(|object| {
                        Some(StockMention {
                            name: capture(&NAME_FIELD, object)?,
                            confidence: pattern_confidence(object),
                        })
                    })
                    .collect()
            };
            Some(Reply::Stocks(mentions))
        }
    }
}

/// 自由記述のマクロ要約だけは先頭を切り出して代表値にする。閉じた語彙は諦める。
fn truncated(text: &str, shape: ReplyShape) -> Option<Reply> {
    if shape != ReplyShape::MacroSummary {
        return None;
    }
    let head = truncate_chars(text.trim_matches(|c: char| c == '`' || c.is_whitespace()), TRUNCATE_CHARS);
    let head = head.trim();
    (!head.is_empty()).then(|| Reply::Summary(head.to_string()))
}

fn interpret(value: &Value, shape: ReplyShape) -> Option<Reply> {
    match shape {
        ReplyShape::Stocks => {
            let items = match value {
                Value::Array(items) => items,
                Value::Object(map) => map.get("stocks")?.as_array()?,
                _ => return None,
            };
            Some(Reply::Stocks(items.iter().filter_map(stock_mention).collect()))
        }
        ReplyShape::Industry | ReplyShape::Theme => {
            string_field(value.as_object()?, shape.key()).map(Reply::Value)
        }
        ReplyShape::MacroSummary => {
            string_field(value.as_object()?, shape.key()).map(Reply::Summary)
        }
        ReplyShape::MacroCoded => {
            let map = value.as_object()?;
            let code = non_empty(map.get("category_code")?.as_str()?)?;
            Some(Reply::Coded {
                code,
                cause: map
                    .get("cause")
                    .and_then(Value::as_str)
                    .map(|s| s.trim().to_string())
                    .unwrap_or_default(),
                effect: map
                    .get("effect")
                    .and_then(Value::as_str)
                    .map(|s| s.trim().to_string())
                    .unwrap_or_default(),
                confidence: reported_confidence(map),
            })
        }
    }
}

/// 期待キーが無ければ、値が1つだけのオブジェクトをその値として扱う（`{"업종": "반도체"}` など）。
fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    if let Some(value) = map.get(key) {
        return non_empty(value.as_str()?);
    }
    if map.len() == 1 {
        return map.values().next().and_then(Value::as_str).and_then(non_empty);
    }
    None
}

fn stock_mention(item: &Value) -> Option<StockMention> {
    match item {
        Value::String(name) => Some(StockMention {
            name: non_empty(name)?,
            confidence: BARE_NAME_CONFIDENCE,
        }),
        Value::Object(map) => Some(StockMention {
            name: non_empty(map.get("name")?.as_str()?)?,
            confidence: reported_confidence(map),
        }),
        _ => None,
    }
}

/// 信頼度欄を持つ形式で欄が無い・読めない場合は 0 とみなす。
fn reported_confidence(map: &Map<String, Value>) -> f64 {
    map.get("confidence")
        .and_then(number)
        .map_or(MISSING_CONFIDENCE, clamp_unit)
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}
