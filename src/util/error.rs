//! パイプラインのエラー分類。
use anyhow::Error;
use sqlx::Error as SqlxError;
use thiserror::Error as ThisError;

use crate::pipeline::Category;

/// 実行全体から見たエラー種別。
///
/// `Infrastructure` だけが実行を中断させる。それ以外は記事・カテゴリ単位で吸収される。
#[derive(Debug, ThisError)]
pub enum PipelineError {
    /// モデルやデータベースに到達できない。
    #[error("infrastructure failure: {0:#}")]
    Infrastructure(#[source] Error),
    /// 生成サービス呼び出しの失敗・タイムアウト。
    #[error("external service call failed for {category}: {source:#}")]
    ExternalService {
        category: Category,
        #[source]
        source: Error,
    },
    /// 応答をどの段でも解釈できなかった。
    #[error("no parse tier matched the {category} reply")]
    Parse { category: Category },
    /// 抽出値が参照データに存在しない。
    #[error("{value} is not present in reference data for {category}")]
    DataIntegrity { category: Category, value: String },
}

impl PipelineError {
    /// メトリクスのラベルに使う短い名前。
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Infrastructure(_) => "infrastructure",
            PipelineError::ExternalService { .. } => "external_service",
            PipelineError::Parse { .. } => "parse",
            PipelineError::DataIntegrity { .. } => "data_integrity",
        }
    }
}

/// エラーの重大度。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 記事単位で処理を諦めれば続行できる。
    Recoverable,
    /// 接続喪失や設定不備。実行を中断する。
    Fatal,
}

/// エラーチェーンを辿り、データベース接続の喪失やクライアント構成の誤りを致命的と判定する。
#[must_use]
pub fn classify_error(error: &Error) -> ErrorKind {
    for cause in error.chain() {
        if let Some(sqlx_err) = cause.downcast_ref::<SqlxError>() {
            return match sqlx_err {
                SqlxError::Io(_)
                | SqlxError::Tls(_)
                | SqlxError::PoolTimedOut
                | SqlxError::PoolClosed
                | SqlxError::WorkerCrashed
                | SqlxError::Configuration(_)
                | SqlxError::Protocol(_) => ErrorKind::Fatal,
                _ => ErrorKind::Recoverable,
            };
        }
        if let Some(http_err) = cause.downcast_ref::<reqwest::Error>() {
            // 個々の呼び出しの失敗は記事単位で吸収する。クライアント構成の誤りだけは致命的
            return if http_err.is_builder() {
                ErrorKind::Fatal
            } else {
                ErrorKind::Recoverable
            };
        }
        if cause.downcast_ref::<std::io::Error>().is_some() {
            return ErrorKind::Fatal;
        }
    }
    ErrorKind::Recoverable
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, anyhow};

    #[test]
    fn plain_errors_are_recoverable() {
        let error = anyhow!("validation failed");
        assert_eq!(classify_error(&error), ErrorKind::Recoverable);
    }

    #[test]
    fn closed_pool_is_fatal_even_when_wrapped() {
        let error = Err::<(), _>(SqlxError::PoolClosed)
            .context("failed to begin transaction")
            .expect_err("wrapped error");
        assert_eq!(classify_error(&error), ErrorKind::Fatal);
    }

    #[test]
    fn row_not_found_is_recoverable() {
        let error = Error::new(SqlxError::RowNotFound);
        assert_eq!(classify_error(&error), ErrorKind::Recoverable);
    }

    #[test]
    fn io_errors_are_fatal() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let error = Error::new(io).context("failed to insert classification row");
        assert_eq!(classify_error(&error), ErrorKind::Fatal);
    }

    #[test]
    fn http_errors_are_fatal_only_when_misconfigured() {
        let builder_error = reqwest::Client::new()
            .get("not a url")
            .build()
            .expect_err("relative URL cannot be built");
        assert_eq!(classify_error(&Error::new(builder_error)), ErrorKind::Fatal);
    }

    #[test]
    fn display_includes_category_label() {
        let error = PipelineError::DataIntegrity {
            category: Category::IndividualStock,
            value: "없는회사".to_string(),
        };
        assert!(error.to_string().contains("개별주"));
    }
}
