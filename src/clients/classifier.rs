//! 生成AI分類器との境界。
//!
//! 分類器はプロンプトと任意の画像を受け取り、JSONを含む自由記述テキストを返す。
use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

/// Inline image passed alongside a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFrame {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl MediaFrame {
    #[must_use]
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifierError {
    #[error("classifier rejected credentials: {0}")]
    Auth(String),
    #[error("classifier quota exhausted: {0}")]
    Quota(String),
    #[error("transient classifier failure: {0}")]
    Transient(String),
    #[error("classifier rejected the request: {0}")]
    Rejected(String),
}

impl ClassifierError {
    /// HTTPステータスからエラー種別を決める。
    #[must_use]
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let detail = format!("status {status}: {}", body.trim());
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Auth(detail),
            StatusCode::TOO_MANY_REQUESTS => Self::Quota(detail),
            status if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT => {
                Self::Transient(detail)
            }
            _ => Self::Rejected(detail),
        }
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::Quota(_) => "quota",
            Self::Transient(_) => "transient",
            Self::Rejected(_) => "rejected",
        }
    }
}

/// 分類器の抽象。呼び出しごとのタイムアウトは実装側が持つ。
#[async_trait]
pub trait Classifier: Send + Sync {
    /// # Errors
    /// 認証・クォータ・一時的障害・拒否のいずれかを [`ClassifierError`] で返す。
    async fn invoke(&self, prompt: &str, media: &[MediaFrame]) -> Result<String, ClassifierError>;
}
