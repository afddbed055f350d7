//! 有効カテゴリごとの代表値抽出。
//!
//! プロンプトを組み立てて生成サービスを1回呼び、応答を段階的にパースして
//! カテゴリ固有のペイロードへ変換する。呼び出し失敗は再試行しない。
pub(crate) mod parse;
pub(crate) mod prompt;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use self::parse::{ParseTier, Reply, ReplyShape, StockMention, parse_reply};
use self::prompt::{ArticleText, CURRENT_MAX_STOCKS, LEGACY_MAX_STOCKS, Vocabulary};
use super::reference::ReferenceData;
use super::resolver::{EntityResolver, MatchKind, StockHint};
use super::types::{Category, MacroPayload, Payload};
use crate::clients::GenerativeClient;
use crate::observability::metrics::Metrics;
use crate::util::error::PipelineError;
use crate::util::rate_limit::TokenBucket;

/// 抽出プロンプトと応答形式の世代。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtractionProtocol {
    /// 銘柄は最大3件、マクロは要約文。4件以上の銘柄は産業群へ回す。
    Legacy,
    /// 銘柄は信頼度付きで最大5件、マクロは分類コード＋因果。
    #[default]
    Current,
}

impl FromStr for ExtractionProtocol {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "legacy" => Ok(Self::Legacy),
            "current" => Ok(Self::Current),
            other => Err(format!("unknown extraction protocol {other:?} (expected legacy or current)")),
        }
    }
}

impl fmt::Display for ExtractionProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Legacy => "legacy",
            Self::Current => "current",
        })
    }
}

/// 抽出された代表値と、抽出側の信頼度。
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub payload: Payload,
    pub confidence: f64,
}

impl Extracted {
    fn verbatim(payload: Payload) -> Self {
        Self {
            payload,
            confidence: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// 0件以上の代表値。参照データに無い値は落とされている。
    Found(Vec<Extracted>),
    /// このカテゴリの結果を捨て、記事を別カテゴリで抽出し直す。
    Escalate(Category),
}

pub struct RepresentativeExtractor {
    client: Arc<dyn GenerativeClient>,
    reference: Arc<ReferenceData>,
    resolver: Arc<EntityResolver>,
    protocol: ExtractionProtocol,
    metrics: Arc<Metrics>,
}

impl fmt::Debug for RepresentativeExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepresentativeExtractor")
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

impl RepresentativeExtractor {
    #[must_use]
    pub fn new(
        client: Arc<dyn GenerativeClient>,
        reference: Arc<ReferenceData>,
        resolver: Arc<EntityResolver>,
        protocol: ExtractionProtocol,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            client,
            reference,
            resolver,
            protocol,
            metrics,
        }
    }

    #[must_use]
    pub fn protocol(&self) -> ExtractionProtocol {
        self.protocol
    }

    /// 1カテゴリ分の代表値を抽出する。呼び出し前にバケットからトークンを取る。
    ///
    /// # Errors
    /// 生成サービスの呼び出し失敗は [`PipelineError::ExternalService`]、
    /// どの段でも応答を解釈できなければ [`PipelineError::Parse`]、
    /// マクロコードが分類体系に無ければ [`PipelineError::DataIntegrity`]。
    /// いずれも呼び出し側でそのカテゴリを空として扱う。
    pub async fn extract(
        &self,
        title: &str,
        body: &str,
        category: Category,
        hint: Option<&StockHint>,
        limiter: &mut TokenBucket,
    ) -> Result<Extraction, PipelineError> {
        let article = ArticleText { title, body };
        let (prompt, shape) = match category {
            Category::IndividualStock => (
                prompt::stock_prompt(self.protocol, article, hint),
                ReplyShape::Stocks,
            ),
            Category::Industry => (
                prompt::vocabulary_prompt(
                    self.protocol,
                    Vocabulary::Industry,
                    self.reference.industries(),
                    article,
                    hint,
                ),
                ReplyShape::Industry,
            ),
            Category::Theme => (
                prompt::vocabulary_prompt(
                    self.protocol,
                    Vocabulary::Theme,
                    self.reference.themes(),
                    article,
                    hint,
                ),
                ReplyShape::Theme,
            ),
            Category::Macro => (
                prompt::macro_prompt(self.protocol, self.reference.macro_categories(), article),
                match self.protocol {
                    ExtractionProtocol::Legacy => ReplyShape::MacroSummary,
                    ExtractionProtocol::Current => ReplyShape::MacroCoded,
                },
            ),
            // 合成行なので呼び出しは不要
            Category::Other => return Ok(Extraction::Found(Vec::new())),
        };

        limiter.acquire().await;
        self.metrics.external_calls.inc();
        let started = Instant::now();
        let response = self.client.generate(&prompt).await;
        self.metrics
            .external_call_duration
            .observe(started.elapsed().as_secs_f64());
        let response =
            response.map_err(|source| PipelineError::ExternalService { category, source })?;

        let (reply, tier) =
            parse_reply(&response, shape).ok_or(PipelineError::Parse { category })?;
        self.metrics.record_parse_tier(tier.as_str());
        debug!(category = %category, parse_tier = tier.as_str(), "reply parsed");

        self.interpret(category, reply, tier)
    }

    fn interpret(
        &self,
        category: Category,
        reply: Reply,
        tier: ParseTier,
    ) -> Result<Extraction, PipelineError> {
        match reply {
            Reply::Stocks(mentions) => Ok(self.resolve_stocks(mentions)),
            Reply::Value(value) => {
                let payload = match category {
                    Category::Theme => Payload::Theme { name: value },
                    _ => Payload::Industry { name: value },
                };
                Ok(Extraction::Found(vec![Extracted::verbatim(payload)]))
            }
            Reply::Summary(text) => {
                if tier == ParseTier::Truncated {
                    debug!(category = %category, "macro summary taken from truncated reply");
                }
                Ok(Extraction::Found(vec![Extracted::verbatim(Payload::Macro(
                    MacroPayload::Summary { text },
                ))]))
            }
            Reply::Coded {
                code,
                cause,
                effect,
                confidence,
            } => {
                if !self.reference.is_known_macro_code(&code) {
                    self.metrics.entities_dropped.inc();
                    return Err(PipelineError::DataIntegrity {
                        category,
                        value: code,
                    });
                }
                Ok(Extraction::Found(vec![Extracted {
                    payload: Payload::Macro(MacroPayload::Coded {
                        code,
                        cause,
                        effect,
                    }),
                    confidence,
                }]))
            }
        }
    }

    fn resolve_stocks(&self, mut mentions: Vec<StockMention>) -> Extraction {
        match self.protocol {
            ExtractionProtocol::Legacy if mentions.len() > LEGACY_MAX_STOCKS => {
                self.metrics.escalations.inc();
                debug!(
                    mentions = mentions.len(),
                    "stock list exceeds legacy cap; escalating to industry"
                );
                return Extraction::Escalate(Category::Industry);
            }
            ExtractionProtocol::Legacy => {}
            ExtractionProtocol::Current => mentions.truncate(CURRENT_MAX_STOCKS),
        }

        let mut found = Vec::with_capacity(mentions.len());
        for mention in mentions {
            match self.resolver.resolve(&mention.name, mention.confidence) {
                Some(resolved) => {
                    if resolved.match_kind == MatchKind::Prefix {
                        debug!(
                            extracted = %mention.name,
                            resolved = %resolved.name,
                            stock_code = %resolved.code,
                            "stock resolved by prefix"
                        );
                    }
                    found.push(Extracted {
                        payload: Payload::IndividualStock {
                            code: resolved.code,
                            name: resolved.name,
                        },
                        confidence: resolved.confidence,
                    });
                }
                None => {
                    self.metrics.entities_dropped.inc();
                    let error = PipelineError::DataIntegrity {
                        category: Category::IndividualStock,
                        value: mention.name,
                    };
                    debug!(error = %error, "dropping unresolved stock");
                }
            }
        }
        Extraction::Found(found)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use anyhow::{Result, anyhow};
    use async_trait::async_trait;

    use crate::clients::GenerativeClient;

    /// 台本どおりに応答を返す生成クライアント。`Err` は呼び出し失敗として返す。
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedClient {
        replies: Mutex<VecDeque<Result<String, String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        pub(crate) fn new<I, S>(replies: I) -> Self
        where
            I: IntoIterator<Item = Result<S, S>>,
            S: Into<String>,
        {
            Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .map(|reply| reply.map(Into::into).map_err(Into::into))
                        .collect(),
                ),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn prompts(&self) -> Vec<String> {
            self.prompts.lock().expect("prompts lock").clone()
        }
    }

    #[async_trait]
    impl GenerativeClient for ScriptedClient {
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.prompts
                .lock()
                .expect("prompts lock")
                .push(prompt.to_string());
            let reply = self
                .replies
                .lock()
                .expect("replies lock")
                .pop_front()
                .ok_or_else(|| anyhow!("script exhausted"))?;
            reply.map_err(|message| anyhow!(message))
        }
    }
}
