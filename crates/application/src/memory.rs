//! 内存实现的仓储与用户目录
//!
//! 用于测试以及未配置数据库/Redis 时的本地运行，不具备持久性。

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use domain::{
    Chat, ChatId, ChatMember, ChatRepository, MemberRole, Message, MessageId, NewChat,
    NewMessage, PresenceRepository, PublicChat, RepositoryError, Timestamp, UserId, UserPresence,
};
use tokio::sync::RwLock;

use crate::directory::{DirectoryError, DirectoryUser, UserDirectory, UserLookup};

#[derive(Default)]
struct ChatStore {
    next_chat_id: i64,
    next_message_id: i64,
    chats: BTreeMap<ChatId, Chat>,
    messages: Vec<Message>,
}

impl ChatStore {
    fn insert_chat(
        &mut self,
        name: String,
        is_direct: bool,
        is_public: bool,
        creator_id: UserId,
        members: Vec<(UserId, String, MemberRole)>,
    ) -> ChatId {
        self.next_chat_id += 1;
        let chat_id = ChatId::new(self.next_chat_id);
        let now = Utc::now();
        let members = members
            .into_iter()
            .map(|(user_id, username, role)| ChatMember {
                chat_id,
                user_id,
                username,
                role,
            })
            .collect();
        self.chats.insert(
            chat_id,
            Chat {
                id: chat_id,
                name,
                is_direct,
                is_public,
                creator_id,
                members,
                created_at: now,
                updated_at: now,
            },
        );
        chat_id
    }

    fn chat_mut(&mut self, chat_id: ChatId) -> Result<&mut Chat, RepositoryError> {
        self.chats.get_mut(&chat_id).ok_or(RepositoryError::NotFound)
    }
}

#[derive(Default)]
pub struct InMemoryChatRepository {
    store: RwLock<ChatStore>,
}

impl InMemoryChatRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatRepository for InMemoryChatRepository {
    async fn create(&self, chat: NewChat) -> Result<ChatId, RepositoryError> {
        let mut store = self.store.write().await;
        let members = chat
            .members
            .into_iter()
            .map(|m| (m.user_id, m.username, m.role))
            .collect();
        Ok(store.insert_chat(chat.name, chat.is_direct, chat.is_public, chat.creator_id, members))
    }

    async fn delete(&self, chat_id: ChatId) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        store.chats.remove(&chat_id).ok_or(RepositoryError::NotFound)?;
        store.messages.retain(|m| m.chat_id != chat_id);
        Ok(())
    }

    async fn chat_exists(&self, chat_id: ChatId) -> Result<bool, RepositoryError> {
        Ok(self.store.read().await.chats.contains_key(&chat_id))
    }

    async fn is_user_in_chat(
        &self,
        chat_id: ChatId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError> {
        let store = self.store.read().await;
        Ok(store
            .chats
            .get(&chat_id)
            .is_some_and(|chat| chat.is_member(user_id)))
    }

    async fn chat_info(&self, chat_id: ChatId) -> Result<Option<Chat>, RepositoryError> {
        Ok(self.store.read().await.chats.get(&chat_id).cloned())
    }

    async fn add_member(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        username: String,
    ) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        let chat = store.chat_mut(chat_id)?;
        if chat.is_member(user_id) {
            return Err(RepositoryError::Conflict);
        }
        chat.members.push(ChatMember {
            chat_id,
            user_id,
            username,
            role: MemberRole::Member,
        });
        chat.updated_at = Utc::now();
        Ok(())
    }

    async fn remove_member(&self, chat_id: ChatId, user_id: UserId) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        let chat = store.chat_mut(chat_id)?;
        let before = chat.members.len();
        chat.members.retain(|m| m.user_id != user_id);
        if chat.members.len() == before {
            return Err(RepositoryError::NotFound);
        }
        chat.updated_at = Utc::now();
        Ok(())
    }

    async fn user_chats(&self, user_id: UserId) -> Result<Vec<Chat>, RepositoryError> {
        let store = self.store.read().await;
        let mut chats: Vec<Chat> = store
            .chats
            .values()
            .filter(|chat| chat.is_member(user_id))
            .cloned()
            .collect();
        chats.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(chats)
    }

    async fn public_chats(&self, search: String) -> Result<Vec<PublicChat>, RepositoryError> {
        let store = self.store.read().await;
        let needle = search.to_lowercase();
        Ok(store
            .chats
            .values()
            .filter(|chat| chat.is_public && !chat.is_direct)
            .filter(|chat| needle.is_empty() || chat.name.to_lowercase().contains(&needle))
            .map(|chat| PublicChat {
                id: chat.id,
                name: chat.name.clone(),
                member_count: chat.members.len() as i64,
                creator_name: chat
                    .members
                    .iter()
                    .find(|m| m.user_id == chat.creator_id)
                    .map(|m| m.username.clone())
                    .unwrap_or_default(),
                created_at: chat.created_at,
            })
            .collect())
    }

    async fn find_direct_chat(
        &self,
        first: UserId,
        second: UserId,
    ) -> Result<Option<ChatId>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store
            .chats
            .values()
            .find(|chat| {
                chat.is_direct
                    && chat.members.len() == 2
                    && chat.is_member(first)
                    && chat.is_member(second)
            })
            .map(|chat| chat.id))
    }

    async fn create_direct_chat(
        &self,
        first: UserId,
        first_username: String,
        second: UserId,
        second_username: String,
    ) -> Result<ChatId, RepositoryError> {
        let mut store = self.store.write().await;
        let name = format!("{first_username} & {second_username}");
        Ok(store.insert_chat(
            name,
            true,
            false,
            first,
            vec![
                (first, first_username, MemberRole::Member),
                (second, second_username, MemberRole::Member),
            ],
        ))
    }

    async fn send_message(&self, message: NewMessage) -> Result<Message, RepositoryError> {
        let mut store = self.store.write().await;
        if !store.chats.contains_key(&message.chat_id) {
            return Err(RepositoryError::NotFound);
        }
        store.next_message_id += 1;
        let stored = Message {
            id: MessageId::new(store.next_message_id),
            chat_id: message.chat_id,
            user_id: message.user_id,
            from_username: message.from_username,
            text: message.text,
            created_at: message.created_at,
        };
        store.messages.push(stored.clone());
        Ok(stored)
    }

    async fn recent_messages(
        &self,
        chat_id: ChatId,
        limit: i64,
    ) -> Result<Vec<Message>, RepositoryError> {
        let store = self.store.read().await;
        let limit = usize::try_from(limit).unwrap_or(0);
        let in_chat: Vec<&Message> = store
            .messages
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .collect();
        let skip = in_chat.len().saturating_sub(limit);
        Ok(in_chat.into_iter().skip(skip).cloned().collect())
    }
}

/// 心跳在线状态，在线标记在 `ttl` 后过期
pub struct InMemoryPresenceRepository {
    ttl: Duration,
    heartbeats: RwLock<HashMap<UserId, Timestamp>>,
}

impl InMemoryPresenceRepository {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            heartbeats: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryPresenceRepository {
    fn default() -> Self {
        Self::new(Duration::seconds(60))
    }
}

#[async_trait]
impl PresenceRepository for InMemoryPresenceRepository {
    async fn set_online(&self, user_id: UserId) -> Result<(), RepositoryError> {
        self.heartbeats.write().await.insert(user_id, Utc::now());
        Ok(())
    }

    async fn get_presence(
        &self,
        user_ids: Vec<UserId>,
    ) -> Result<Vec<UserPresence>, RepositoryError> {
        let heartbeats = self.heartbeats.read().await;
        let now = Utc::now();
        Ok(user_ids
            .into_iter()
            .map(|user_id| {
                let last_seen_at = heartbeats.get(&user_id).copied();
                UserPresence {
                    user_id,
                    is_online: last_seen_at.is_some_and(|seen| now - seen < self.ttl),
                    last_seen_at,
                }
            })
            .collect())
    }
}

/// 固定用户列表的用户目录
#[derive(Debug, Clone, Default)]
pub struct StaticUserDirectory {
    users: Vec<DirectoryUser>,
}

impl StaticUserDirectory {
    pub fn new(users: Vec<DirectoryUser>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl UserDirectory for StaticUserDirectory {
    async fn check_users_exist(&self, usernames: &[String]) -> Result<UserLookup, DirectoryError> {
        let mut lookup = UserLookup::default();
        for username in usernames {
            match self.users.iter().find(|user| &user.username == username) {
                Some(user) => lookup.found.push(user.clone()),
                None => lookup.not_found.push(username.clone()),
            }
        }
        Ok(lookup)
    }
}
