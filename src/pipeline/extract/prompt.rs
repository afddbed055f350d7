// カテゴリ別の抽出プロンプト。応答は小さな JSON を要求する。
use std::fmt::Write as _;

use super::ExtractionProtocol;
use crate::pipeline::resolver::StockHint;
use crate::store::models::MacroCategoryDef;
use crate::util::text::truncate_chars;

const LEGACY_BODY_CHARS: usize = 500;
const VOCABULARY_BODY_CHARS: usize = 500;
const CURRENT_STOCK_BODY_CHARS: usize = 800;
const CURRENT_MACRO_BODY_CHARS: usize = 1000;
const MACRO_EXAMPLES_PER_CODE: usize = 3;

/// 旧プロトコルで要求する銘柄数の上限。これを超えたら産業群へ回す。
pub(crate) const LEGACY_MAX_STOCKS: usize = 3;
/// 新プロトコルで採用する銘柄数の上限。
pub(crate) const CURRENT_MAX_STOCKS: usize = 5;

/// 記事タイトルと正規化済み本文。
#[derive(Debug, Clone, Copy)]
pub(crate) struct ArticleText<'a> {
    pub(crate) title: &'a str,
    pub(crate) body: &'a str,
}

/// 語彙が閉じたカテゴリ。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Vocabulary {
    Industry,
    Theme,
}

impl Vocabulary {
    fn noun(self) -> &'static str {
        match self {
            Vocabulary::Industry => "업종",
            Vocabulary::Theme => "테마",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Vocabulary::Industry => "industry",
            Vocabulary::Theme => "theme",
        }
    }
}

fn hint_block(protocol: ExtractionProtocol, hint: Option<&StockHint>) -> String {
    let Some(hint) = hint else {
        return String::new();
    };
    let industry = hint.industry.as_deref().unwrap_or("");
    match protocol {
        ExtractionProtocol::Legacy => {
            let theme = hint.themes.first().map_or("", String::as_str);
            format!(
                "힌트:\n- 이 뉴스에 언급된 종목은 \"{}\"입니다.\n- 이 종목의 업종은 \"{industry}\"이며, 주요 테마는 \"{theme}\"입니다.\n",
                hint.name
            )
        }
        ExtractionProtocol::Current => {
            let themes = if hint.themes.is_empty() {
                "없음".to_string()
            } else {
                hint.themes.join(", ")
            };
            format!(
                "힌트:\n- 이 뉴스에 언급된 종목: \"{}\" (코드: {})\n- 업종: \"{industry}\", 테마: \"{themes}\"\n",
                hint.name, hint.code
            )
        }
    }
}

pub(crate) fn stock_prompt(
    protocol: ExtractionProtocol,
    article: ArticleText<'_>,
    hint: Option<&StockHint>,
) -> String {
    let hint = hint_block(protocol, hint);
    match protocol {
        ExtractionProtocol::Legacy => format!(
            "다음 뉴스 기사에서 언급된 주식 종목명을 최대 {LEGACY_MAX_STOCKS}개까지만 추출해주세요.\n\
             {hint}\n\
             제목: {title}\n\
             본문: {body}\n\
             JSON:\n\
             {{ \"stocks\": [\"종목1\", \"종목2\"] }}\n",
            title = article.title,
            body = truncate_chars(article.body, LEGACY_BODY_CHARS),
        ),
        ExtractionProtocol::Current => format!(
            "다음 뉴스 기사에서 언급된 주식 종목들을 추출해주세요. 각 종목에 대해 정확한 종목명을 제공해주세요.\n\
             {hint}\n\
             제목: {title}\n\
             본문: {body}\n\n\
             추출 조건:\n\
             1. 구체적인 기업명만 추출 (예: 삼성전자, LG화학)\n\
             2. 최대 {CURRENT_MAX_STOCKS}개까지만 추출\n\
             3. 정확한 종목명 사용\n\n\
             JSON 형식으로 답변:\n\
             {{\"stocks\": [{{\"name\": \"삼성전자\", \"confidence\": 0.95}}, {{\"name\": \"LG화학\", \"confidence\": 0.80}}]}}\n",
            title = article.title,
            body = truncate_chars(article.body, CURRENT_STOCK_BODY_CHARS),
        ),
    }
}

pub(crate) fn vocabulary_prompt(
    protocol: ExtractionProtocol,
    vocabulary: Vocabulary,
    allowed: &[String],
    article: ArticleText<'_>,
    hint: Option<&StockHint>,
) -> String {
    let noun = vocabulary.noun();
    let key = vocabulary.key();
    format!(
        "다음 뉴스 기사에서 관련성이 가장 높은 {noun}명을 아래 {noun} 목록 중 하나만 선택해서 반환해주세요. 반드시 목록에 있는 이름만 출력하세요.\n\
         {hint}\n\
         {noun} 목록: {allowed}\n\
         제목: {title}\n\
         본문: {body}\n\
         JSON:\n\
         {{ \"{key}\": \"{noun}명\" }}\n",
        hint = hint_block(protocol, hint),
        allowed = allowed.join(", "),
        title = article.title,
        body = truncate_chars(article.body, VOCABULARY_BODY_CHARS),
    )
}

pub(crate) fn macro_prompt(
    protocol: ExtractionProtocol,
    taxonomy: &[MacroCategoryDef],
    article: ArticleText<'_>,
) -> String {
    match protocol {
        ExtractionProtocol::Legacy => format!(
            "다음 뉴스 기사의 내용을 원인->결과 형태로 요약하거나, 핵심 키워드를 20자 이내로 작성해주세요.\n\
             제목: {title}\n\
             본문: {body}\n\
             JSON:\n\
             {{ \"summary\": \"요약문 또는 핵심 키워드\" }}\n",
            title = article.title,
            body = truncate_chars(article.body, LEGACY_BODY_CHARS),
        ),
        ExtractionProtocol::Current => {
            let mut categories = String::new();
            for category in taxonomy {
                let examples = category
                    .examples
                    .iter()
                    .take(MACRO_EXAMPLES_PER_CODE)
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                let _ = writeln!(
                    categories,
                    "- {}: {} (예: {examples})",
                    category.code, category.name
                );
            }
            let codes = match (taxonomy.first(), taxonomy.last()) {
                (Some(first), Some(last)) => format!("{}~{}", first.code, last.code),
                _ => String::new(),
            };
            format!(
                "다음 뉴스를 거시경제 분류 체계에 따라 분석해주세요.\n\n\
                 분류 체계:\n\
                 {categories}\n\
                 제목: {title}\n\
                 본문: {body}\n\n\
                 분석 요청:\n\
                 1. 가장 적합한 분류 코드 선택 ({codes})\n\
                 2. 구체적인 원인(세부분류) 기술\n\
                 3. 예상되는 결과/영향 분석\n\n\
                 JSON 형식으로 답변:\n\
                 {{\"category_code\": \"A1\", \"cause\": \"미 연준의 기준금리 0.25%p 인상 결정\", \"effect\": \"국내 금리 상승 압력 증가, 성장주 밸류에이션 부담 확대\", \"confidence\": 0.90}}\n",
                title = article.title,
                body = truncate_chars(article.body, CURRENT_MACRO_BODY_CHARS),
            )
        }
    }
}
