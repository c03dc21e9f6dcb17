//! 领域模型错误定义
//!
//! 定义了聊天领域内所有可能的错误类型，提供清晰的错误上下文。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 参数校验失败
    #[error("invalid argument {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    /// 聊天不存在
    #[error("chat not found")]
    ChatNotFound,

    /// 用户不是聊天成员
    #[error("user is not a member of the chat")]
    NotChatMember,

    /// 用户已经是聊天成员
    #[error("user already in chat")]
    AlreadyChatMember,

    /// 认证服务中不存在的用户名
    #[error("users not found: {}", .0.join(","))]
    UsersNotFound(Vec<String>),

    /// 业务规则不允许该操作
    #[error("operation not allowed: {reason}")]
    OperationNotAllowed { reason: String },
}

impl DomainError {
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn not_allowed(reason: impl Into<String>) -> Self {
        Self::OperationNotAllowed {
            reason: reason.into(),
        }
    }
}

/// 仓储层错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,
    #[error("record already exists")]
    Conflict,
    #[error("storage error: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn users_not_found_lists_every_name() {
        let err = DomainError::UsersNotFound(vec!["bob".into(), "carol".into()]);
        assert_eq!(err.to_string(), "users not found: bob,carol");
    }
}
