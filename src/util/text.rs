//! テキスト正規化ユーティリティ。
//!
//! 記事本文からノイズ記号を取り除き、分類器とプロンプトに渡す単一の文字列を作る。
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// 許可集合（ハングル音節、ASCII英数字、空白、ピリオド、カンマ）以外の文字。
static DISALLOWED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[^가-힣a-zA-Z0-9 .,]").expect("static pattern compiles")
});

static WHITESPACE_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("static pattern compiles"));

/// 生テキストを正規化する。`None`（非テキスト）は空文字列になる。
///
/// NFC 合成を先に行うため、分解済みのハングル字母も音節として残る。
/// 改行やタブは除去前に空白へ変換されるので、単語が連結されることはない。
#[must_use]
pub fn normalize(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return String::new();
    };
    let composed: String = raw.nfc().collect();
    let spaced = WHITESPACE_RUN.replace_all(&composed, " ");
    let filtered = DISALLOWED.replace_all(&spaced, "");
    WHITESPACE_RUN.replace_all(&filtered, " ").trim().to_string()
}

/// 文字数（バイト数ではない）で先頭を切り出す。
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(None, "")]
    #[case(Some(""), "")]
    #[case(Some("  삼성전자,   실적\n\n발표.  "), "삼성전자, 실적 발표.")]
    #[case(Some("[속보] 코스피 2%↑ 마감!"), "속보 코스피 2 마감")]
    #[case(Some("금리\t인상 ▲ 우려"), "금리 인상 우려")]
    #[case(Some("USD/KRW 1,350.5원"), "USDKRW 1,350.5원")]
    fn normalize_cases(#[case] raw: Option<&str>, #[case] expected: &str) {
        assert_eq!(normalize(raw), expected);
    }

    #[test]
    fn normalize_composes_decomposed_hangul() {
        // "한" を字母に分解した形
        let decomposed = "\u{1112}\u{1161}\u{11AB}국";
        assert_eq!(normalize(Some(decomposed)), "한국");
    }

    #[test]
    fn normalize_never_leaves_double_spaces() {
        let out = normalize(Some("a ! ! b ~~ c"));
        assert_eq!(out, "a b c");
        assert!(!out.contains("  "));
    }

    #[test]
    fn truncate_counts_characters() {
        assert_eq!(truncate_chars("금리 인상 우려", 2), "금리");
        assert_eq!(truncate_chars("short", 40), "short");
        assert_eq!(truncate_chars("", 3), "");
    }
}
