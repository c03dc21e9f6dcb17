use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::directory::DirectoryError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(RepositoryError),
    #[error("user directory error: {0}")]
    Directory(#[from] DirectoryError),
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl ApplicationError {
    /// 创建基础设施错误
    pub fn infrastructure(message: impl Into<String>) -> Self {
        ApplicationError::Infrastructure(message.into())
    }

    /// 是否属于"记录不存在"一类错误
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ApplicationError::Domain(DomainError::ChatNotFound)
                | ApplicationError::Repository(RepositoryError::NotFound)
        )
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        ApplicationError::Repository(value)
    }
}
