//! 领域模型错误定义
//!
//! 定义了聊天核心所有可能的错误类型，提供清晰的错误上下文。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 参数缺失或格式错误
    #[error("invalid argument: {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    /// 非对话参与者尝试操作对话
    #[error("access denied: {action}")]
    AccessDenied { action: String },

    #[error("dialog not found")]
    DialogNotFound,

    #[error("message not found")]
    MessageNotFound,

    /// 附件引用的文件在存储中不存在
    #[error("attachment not found: {url}")]
    AttachmentNotFound { url: String },
}

impl DomainError {
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn access_denied(action: impl Into<String>) -> Self {
        Self::AccessDenied {
            action: action.into(),
        }
    }

    pub fn attachment_not_found(url: impl Into<String>) -> Self {
        Self::AttachmentNotFound { url: url.into() }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

/// 持久化层错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,

    #[error("record already exists")]
    Conflict,

    #[error("storage failure: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;
