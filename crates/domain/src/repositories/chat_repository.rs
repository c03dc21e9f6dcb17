//! 聊天Repository接口定义

use async_trait::async_trait;

use crate::chat::{Chat, NewChat, PublicChat};
use crate::errors::RepositoryError;
use crate::message::{Message, NewMessage};
use crate::value_objects::{ChatId, UserId};

/// 聊天、成员与消息的持久化接口
///
/// 实时广播引擎只依赖其中的 `chat_exists`、`is_user_in_chat`、
/// `recent_messages` 与 `send_message`，其余方法服务于聊天管理用例。
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait ChatRepository: Send + Sync {
    /// 创建聊天及其初始成员
    async fn create(&self, chat: NewChat) -> Result<ChatId, RepositoryError>;

    /// 删除聊天（成员与消息级联删除）
    async fn delete(&self, chat_id: ChatId) -> Result<(), RepositoryError>;

    async fn chat_exists(&self, chat_id: ChatId) -> Result<bool, RepositoryError>;

    async fn is_user_in_chat(&self, chat_id: ChatId, user_id: UserId)
        -> Result<bool, RepositoryError>;

    /// 获取聊天详情，包含成员列表
    async fn chat_info(&self, chat_id: ChatId) -> Result<Option<Chat>, RepositoryError>;

    async fn add_member(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        username: String,
    ) -> Result<(), RepositoryError>;

    async fn remove_member(&self, chat_id: ChatId, user_id: UserId) -> Result<(), RepositoryError>;

    /// 用户所在的全部聊天，按创建时间倒序
    async fn user_chats(&self, user_id: UserId) -> Result<Vec<Chat>, RepositoryError>;

    /// 按名称模糊搜索公开聊天，空字符串表示不过滤
    async fn public_chats(&self, search: String) -> Result<Vec<PublicChat>, RepositoryError>;

    /// 查找两人之间已有的私聊
    async fn find_direct_chat(
        &self,
        first: UserId,
        second: UserId,
    ) -> Result<Option<ChatId>, RepositoryError>;

    async fn create_direct_chat(
        &self,
        first: UserId,
        first_username: String,
        second: UserId,
        second_username: String,
    ) -> Result<ChatId, RepositoryError>;

    /// 保存消息，返回带有 id 与写入时间的记录
    async fn send_message(&self, message: NewMessage) -> Result<Message, RepositoryError>;

    /// 最近 `limit` 条消息，按时间正序（最旧的在前）
    async fn recent_messages(
        &self,
        chat_id: ChatId,
        limit: i64,
    ) -> Result<Vec<Message>, RepositoryError>;
}
