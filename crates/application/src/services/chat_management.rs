//! 聊天管理用例：建群、删除、成员管理、私聊与列表查询

use std::collections::BTreeMap;

use domain::{
    Chat, ChatId, DomainError, MemberRole, NewChat, NewChatMember, RepositoryError, UserId,
};

use crate::{
    directory::UserLookup,
    dto::{ChatInfoDto, PublicChatDto},
    error::ApplicationError,
    room::CloseReason,
    services::chat_service::ChatService,
};

#[derive(Debug, Clone)]
pub struct CreateChatRequest {
    pub creator_id: UserId,
    pub creator_username: String,
    pub name: String,
    pub usernames: Vec<String>,
    pub is_public: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectChat {
    pub chat_id: ChatId,
    pub created: bool,
}

impl ChatService {
    async fn load_chat(&self, chat_id: ChatId) -> Result<Chat, ApplicationError> {
        self.deps
            .chat_repository
            .chat_info(chat_id)
            .await
            .map_err(|err| {
                tracing::error!(chat_id = %chat_id, error = %err, "failed to get chat info");
                err
            })?
            .ok_or_else(|| DomainError::ChatNotFound.into())
    }

    async fn resolve_users(&self, usernames: &[String]) -> Result<UserLookup, ApplicationError> {
        let lookup = self
            .deps
            .user_directory
            .check_users_exist(usernames)
            .await
            .map_err(|err| {
                tracing::error!(usernames = ?usernames, error = %err, "failed to check users exist");
                err
            })?;

        if !lookup.not_found.is_empty() {
            tracing::warn!(usernames = ?lookup.not_found, "users not found");
            return Err(DomainError::UsersNotFound(lookup.not_found).into());
        }
        Ok(lookup)
    }

    /// 创建群聊，创建者成为 Owner，其余用户为 Member
    pub async fn create_chat(&self, request: CreateChatRequest) -> Result<ChatId, ApplicationError> {
        let CreateChatRequest {
            creator_id,
            creator_username,
            name,
            usernames,
            is_public,
        } = request;

        if usernames.is_empty() {
            return Err(DomainError::invalid_argument("usernames", "must not be empty").into());
        }
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(DomainError::invalid_argument("name", "must not be empty").into());
        }

        let invited: Vec<String> = usernames
            .into_iter()
            .map(|username| username.trim().to_string())
            .filter(|username| !username.is_empty() && *username != creator_username)
            .collect();
        let lookup = if invited.is_empty() {
            UserLookup::default()
        } else {
            self.resolve_users(&invited).await?
        };

        let mut members: BTreeMap<UserId, NewChatMember> = BTreeMap::new();
        for user in lookup.found {
            members.entry(user.id).or_insert(NewChatMember {
                user_id: user.id,
                username: user.username,
                role: MemberRole::Member,
            });
        }
        members.insert(
            creator_id,
            NewChatMember {
                user_id: creator_id,
                username: creator_username,
                role: MemberRole::Owner,
            },
        );

        let chat_id = self
            .deps
            .chat_repository
            .create(NewChat {
                name,
                is_direct: false,
                is_public,
                creator_id,
                members: members.into_values().collect(),
            })
            .await
            .map_err(|err| {
                tracing::error!(creator_id = %creator_id, error = %err, "failed to create chat");
                err
            })?;

        tracing::info!(chat_id = %chat_id, creator_id = %creator_id, "chat created");
        Ok(chat_id)
    }

    /// 删除聊天，仅创建者可操作；随后拆除该聊天的实时房间
    pub async fn delete_chat(&self, chat_id: ChatId, operator: UserId) -> Result<(), ApplicationError> {
        let chat = self.load_chat(chat_id).await?;
        if !chat.is_creator(operator) {
            tracing::warn!(chat_id = %chat_id, user_id = %operator, "only owner can delete chat");
            return Err(DomainError::not_allowed("only owner can delete chat").into());
        }

        self.deps.chat_repository.delete(chat_id).await.map_err(|err| {
            tracing::error!(chat_id = %chat_id, error = %err, "failed to delete chat");
            err
        })?;
        self.close_room(chat_id, CloseReason::ChatDeleted).await;

        tracing::info!(chat_id = %chat_id, "chat deleted");
        Ok(())
    }

    /// 按用户名添加成员
    pub async fn add_member(
        &self,
        chat_id: ChatId,
        operator: UserId,
        username: &str,
    ) -> Result<UserId, ApplicationError> {
        let chat = self.load_chat(chat_id).await?;
        if chat.is_direct {
            tracing::warn!(chat_id = %chat_id, "cannot add members to direct chat");
            return Err(DomainError::not_allowed("cannot add members to direct chat").into());
        }
        if !chat.is_public && !chat.is_creator(operator) {
            tracing::warn!(chat_id = %chat_id, user_id = %operator, "only owner can add members to private chat");
            return Err(
                DomainError::not_allowed("only owner can add members to private chat").into(),
            );
        }

        let username = username.trim().to_string();
        let lookup = self.resolve_users(std::slice::from_ref(&username)).await?;
        let user = lookup
            .find(&username)
            .cloned()
            .ok_or_else(|| DomainError::UsersNotFound(vec![username.clone()]))?;

        if chat.is_member(user.id) {
            return Err(DomainError::AlreadyChatMember.into());
        }

        self.deps
            .chat_repository
            .add_member(chat_id, user.id, user.username)
            .await
            .map_err(|err| match err {
                RepositoryError::Conflict => ApplicationError::from(DomainError::AlreadyChatMember),
                other => {
                    tracing::error!(chat_id = %chat_id, user_id = %user.id, error = %other, "failed to add member");
                    other.into()
                }
            })?;

        tracing::info!(chat_id = %chat_id, user_id = %user.id, "member added to chat");
        Ok(user.id)
    }

    /// 移除成员，仅创建者可操作；被移除者的实时连接随之关闭
    pub async fn remove_member(
        &self,
        chat_id: ChatId,
        operator: UserId,
        target: UserId,
    ) -> Result<(), ApplicationError> {
        let chat = self.load_chat(chat_id).await?;
        if chat.is_direct {
            tracing::warn!(chat_id = %chat_id, "cannot remove members from direct chat");
            return Err(DomainError::not_allowed("cannot remove members from direct chat").into());
        }
        if !chat.is_creator(operator) {
            tracing::warn!(chat_id = %chat_id, user_id = %operator, "only owner can remove members");
            return Err(DomainError::not_allowed("only owner can remove members from chat").into());
        }
        if operator == target {
            return Err(DomainError::not_allowed("cannot remove yourself from chat").into());
        }

        self.deps
            .chat_repository
            .remove_member(chat_id, target)
            .await
            .map_err(|err| {
                tracing::error!(chat_id = %chat_id, user_id = %target, error = %err, "failed to remove member");
                err
            })?;
        self.evict(chat_id, target, CloseReason::Removed).await;

        tracing::info!(chat_id = %chat_id, user_id = %target, "member removed from chat");
        Ok(())
    }

    /// 加入公开群聊
    pub async fn join_chat(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        username: &str,
    ) -> Result<(), ApplicationError> {
        let chat = self.load_chat(chat_id).await?;
        if !chat.is_public {
            tracing::warn!(chat_id = %chat_id, "cannot join private chat");
            return Err(DomainError::not_allowed("cannot join private chat").into());
        }
        if chat.is_direct {
            tracing::warn!(chat_id = %chat_id, "cannot join direct chat");
            return Err(DomainError::not_allowed("cannot join direct chat").into());
        }
        if chat.is_member(user_id) {
            tracing::warn!(chat_id = %chat_id, user_id = %user_id, "user already in chat");
            return Err(DomainError::AlreadyChatMember.into());
        }

        self.deps
            .chat_repository
            .add_member(chat_id, user_id, username.to_string())
            .await
            .map_err(|err| match err {
                RepositoryError::Conflict => ApplicationError::from(DomainError::AlreadyChatMember),
                other => other.into(),
            })?;

        tracing::info!(chat_id = %chat_id, user_id = %user_id, "user joined chat");
        Ok(())
    }

    pub async fn my_chats(&self, user_id: UserId) -> Result<Vec<ChatInfoDto>, ApplicationError> {
        let chats = self
            .deps
            .chat_repository
            .user_chats(user_id)
            .await
            .map_err(|err| {
                tracing::error!(user_id = %user_id, error = %err, "failed to get user chats");
                err
            })?;
        Ok(chats.iter().map(ChatInfoDto::from).collect())
    }

    pub async fn public_chats(&self, search: &str) -> Result<Vec<PublicChatDto>, ApplicationError> {
        let chats = self
            .deps
            .chat_repository
            .public_chats(search.trim().to_string())
            .await?;
        Ok(chats.into_iter().map(PublicChatDto::from).collect())
    }

    /// 查找或创建两人之间的私聊
    pub async fn get_or_create_direct_chat(
        &self,
        me: UserId,
        my_username: &str,
        target: UserId,
        target_username: &str,
    ) -> Result<DirectChat, ApplicationError> {
        if me == target {
            tracing::warn!(user_id = %me, "cannot create chat with yourself");
            return Err(DomainError::not_allowed("cannot create chat with yourself").into());
        }

        if let Some(chat_id) = self.deps.chat_repository.find_direct_chat(me, target).await? {
            tracing::debug!(chat_id = %chat_id, user1 = %me, user2 = %target, "direct chat found");
            return Ok(DirectChat {
                chat_id,
                created: false,
            });
        }

        let chat_id = self
            .deps
            .chat_repository
            .create_direct_chat(me, my_username.to_string(), target, target_username.to_string())
            .await
            .map_err(|err| {
                tracing::error!(user1 = %me, user2 = %target, error = %err, "failed to create direct chat");
                err
            })?;

        tracing::info!(chat_id = %chat_id, user1 = %me, user2 = %target, "direct chat created");
        Ok(DirectChat {
            chat_id,
            created: true,
        })
    }
}
