//! In-memory store.
//!
//! Implements every repository trait over plain maps with the same
//! semantics as the PostgreSQL repositories. Used by pipeline tests and dry
//! runs; all data is lost on process exit.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use inbox_core::{
    display_name, Error, ExtractedMessages, Mail, MailRepository, NewMail, OverviewEntry,
    ReplyNotice, Result, Room, RoomRepository, Thread, ThreadNotice, ThreadRepository,
};

#[derive(Debug, Default)]
struct State {
    mails: BTreeMap<i64, Mail>,
    threads: BTreeMap<i64, Thread>,
    rooms: BTreeMap<String, Room>,
    next_mail_id: i64,
    next_thread_id: i64,
}

impl State {
    fn mail_mut(&mut self, id: i64) -> Result<&mut Mail> {
        self.mails.get_mut(&id).ok_or(Error::MailNotFound(id))
    }

    fn thread_mut(&mut self, id: i64) -> Result<&mut Thread> {
        self.threads.get_mut(&id).ok_or(Error::ThreadNotFound(id))
    }

    /// Mails matching `filter`, oldest first.
    fn sorted_mails(&self, filter: impl Fn(&Mail) -> bool) -> Vec<Mail> {
        let mut mails: Vec<Mail> = self.mails.values().filter(|m| filter(m)).cloned().collect();
        mails.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        mails
    }
}

/// Shared in-memory implementation of the mail, thread and room repositories.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored mail, by id.
    pub async fn all_mails(&self) -> Vec<Mail> {
        self.state.read().await.mails.values().cloned().collect()
    }

    /// Snapshot of every stored thread, by id.
    pub async fn all_threads(&self) -> Vec<Thread> {
        self.state.read().await.threads.values().cloned().collect()
    }

    /// Stored mail with the given message-id.
    pub async fn mail_by_message_id(&self, message_id: &str) -> Option<Mail> {
        self.state
            .read()
            .await
            .mails
            .values()
            .find(|m| m.message_id == message_id)
            .cloned()
    }
}

#[async_trait]
impl MailRepository for MemoryStore {
    async fn insert_mails(&self, mails: &[NewMail]) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut known: HashSet<String> =
            state.mails.values().map(|m| m.message_id.clone()).collect();
        let mut inserted = 0;
        for new in mails {
            if !known.insert(new.message_id.clone()) {
                continue;
            }
            state.next_mail_id += 1;
            let id = state.next_mail_id;
            state.mails.insert(
                id,
                Mail {
                    id,
                    message_id: new.message_id.clone(),
                    in_reply_to: new.in_reply_to.clone(),
                    references: new.references.clone(),
                    subject: new.subject.clone(),
                    name_from: new.name_from.clone(),
                    addr_from: new.addr_from.clone(),
                    addr_to: new.addr_to.clone(),
                    timestamp: new.timestamp,
                    body: new.body.clone(),
                    fetcher: new.fetcher.clone(),
                    attachments: new.attachments.clone(),
                    messages: None,
                    reply_to: None,
                    thread: None,
                    sorted: false,
                    chat_message_id: None,
                },
            );
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn mails_needing_extraction(&self) -> Result<Vec<Mail>> {
        Ok(self
            .state
            .read()
            .await
            .sorted_mails(|m| m.messages.is_none()))
    }

    async fn mails_needing_sorting(&self) -> Result<Vec<Mail>> {
        Ok(self
            .state
            .read()
            .await
            .sorted_mails(|m| !m.sorted && m.messages.is_some()))
    }

    async fn thread_history(&self, thread_id: i64) -> Result<Vec<Mail>> {
        Ok(self
            .state
            .read()
            .await
            .sorted_mails(|m| m.thread == Some(thread_id)))
    }

    async fn mails_by_message_ids(&self, message_ids: &[String]) -> Result<Vec<Mail>> {
        Ok(self
            .state
            .read()
            .await
            .sorted_mails(|m| message_ids.contains(&m.message_id)))
    }

    async fn mail_by_id(&self, id: i64) -> Result<Option<Mail>> {
        Ok(self.state.read().await.mails.get(&id).cloned())
    }

    async fn mail_by_chat_id(&self, chat_message_id: &str) -> Result<Option<Mail>> {
        Ok(self
            .state
            .read()
            .await
            .mails
            .values()
            .find(|m| m.chat_message_id.as_deref() == Some(chat_message_id))
            .cloned())
    }

    async fn threaded_mails_by_reference_ids(&self, message_ids: &[String]) -> Result<Vec<Mail>> {
        let mut mails = self
            .state
            .read()
            .await
            .sorted_mails(|m| m.thread.is_some() && message_ids.contains(&m.message_id));
        mails.reverse();
        Ok(mails)
    }

    async fn link_reply_targets(&self) -> Result<u64> {
        let mut state = self.state.write().await;
        let ids: BTreeMap<String, i64> = state
            .mails
            .values()
            .map(|m| (m.message_id.clone(), m.id))
            .collect();
        let mut linked = 0;
        for mail in state.mails.values_mut() {
            if mail.thread.is_some() {
                continue;
            }
            let parent = mail.in_reply_to.as_ref().and_then(|id| ids.get(id)).copied();
            if parent.is_some() && mail.reply_to != parent {
                mail.reply_to = parent;
                linked += 1;
            }
        }
        Ok(linked)
    }

    async fn save_extracted_messages(
        &self,
        mail_id: i64,
        messages: &ExtractedMessages,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.mail_mut(mail_id)?.messages = Some(messages.clone());
        Ok(())
    }

    async fn assign_thread(&self, mail_id: i64, thread_id: i64) -> Result<()> {
        let mut state = self.state.write().await;
        let mail = state.mail_mut(mail_id)?;
        if mail.thread.is_none() {
            mail.thread = Some(thread_id);
        }
        mail.sorted = true;
        Ok(())
    }

    async fn mark_sorted_without_thread(&self, mail_id: i64) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(mail) = state.mails.get_mut(&mail_id) {
            mail.sorted = true;
        }
        Ok(())
    }

    async fn mails_ready_for_notification(&self) -> Result<Vec<ReplyNotice>> {
        let state = self.state.read().await;
        let pending = state.sorted_mails(|m| {
            m.chat_message_id.is_none() && m.messages.is_some() && m.thread.is_some()
        });
        Ok(pending
            .into_iter()
            .filter_map(|mail| {
                let thread = state.threads.get(&mail.thread?)?;
                let room_id = thread.chat_room_id.clone()?;
                let root_message_id = thread.chat_message_id.clone()?;
                Some(ReplyNotice {
                    mail_id: mail.id,
                    room_id,
                    root_message_id,
                    name_from: display_name(&mail.name_from, &mail.addr_from),
                    subject: mail.subject,
                    timestamp: mail.timestamp,
                    attachments: mail.attachments,
                    messages: mail.messages.unwrap_or_default(),
                    is_first: thread.first_mail == mail.id,
                })
            })
            .collect())
    }

    async fn set_mail_chat_id(&self, mail_id: i64, chat_message_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(mail) = state.mails.get_mut(&mail_id) {
            mail.chat_message_id = Some(chat_message_id.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl ThreadRepository for MemoryStore {
    async fn create_thread(&self, head: &Mail) -> Result<i64> {
        let mut state = self.state.write().await;
        match state.mails.get(&head.id) {
            Some(mail) if mail.thread.is_none() => {}
            _ => {
                return Err(Error::InvalidInput(format!(
                    "mail {} cannot head a new thread",
                    head.id
                )))
            }
        }
        state.next_thread_id += 1;
        let id = state.next_thread_id;
        state.threads.insert(
            id,
            Thread {
                id,
                enabled: true,
                force_close: false,
                first_mail: head.id,
                last_mail: head.id,
                last_activity: head.timestamp,
                chat_room_id: None,
                chat_message_id: None,
            },
        );
        let mail = state.mail_mut(head.id)?;
        mail.thread = Some(id);
        mail.sorted = true;
        Ok(id)
    }

    async fn thread_by_id(&self, id: i64) -> Result<Option<Thread>> {
        Ok(self.state.read().await.threads.get(&id).cloned())
    }

    async fn thread_by_chat_id(
        &self,
        room_id: &str,
        chat_message_id: &str,
    ) -> Result<Option<Thread>> {
        Ok(self
            .state
            .read()
            .await
            .threads
            .values()
            .find(|t| {
                t.chat_room_id.as_deref() == Some(room_id)
                    && t.chat_message_id.as_deref() == Some(chat_message_id)
            })
            .cloned())
    }

    async fn update_last_mail(
        &self,
        thread_id: i64,
        mail_id: i64,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let thread = state.thread_mut(thread_id)?;
        thread.enabled = true;
        if timestamp >= thread.last_activity {
            thread.last_mail = mail_id;
            thread.last_activity = timestamp;
        }
        Ok(())
    }

    async fn threads_ready_for_notification(&self) -> Result<Vec<ThreadNotice>> {
        let state = self.state.read().await;
        let mut ready: Vec<(DateTime<Utc>, ThreadNotice)> = state
            .threads
            .values()
            .filter(|t| t.chat_message_id.is_none())
            .filter_map(|t| {
                let head = state.mails.get(&t.first_mail)?;
                Some((
                    head.timestamp,
                    ThreadNotice {
                        thread_id: t.id,
                        room_id: t.chat_room_id.clone(),
                        fetcher: head.fetcher.clone(),
                        name_from: head.name_from.clone(),
                        addr_from: head.addr_from.clone(),
                        addr_to: head.addr_to.clone(),
                        subject: head.subject.clone(),
                    },
                ))
            })
            .collect();
        ready.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.thread_id.cmp(&b.1.thread_id)));
        Ok(ready.into_iter().map(|(_, notice)| notice).collect())
    }

    async fn set_thread_chat_ids(
        &self,
        thread_id: i64,
        room_id: &str,
        chat_message_id: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let thread = state.thread_mut(thread_id)?;
        thread.chat_room_id = Some(room_id.to_string());
        thread.chat_message_id = chat_message_id.map(str::to_string);
        Ok(())
    }

    async fn clear_thread_chat_ids(&self, thread_id: i64) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.threads.get_mut(&thread_id) {
            Some(thread) => thread.chat_message_id = None,
            None => return Ok(false),
        }
        for mail in state.mails.values_mut() {
            if mail.thread == Some(thread_id) {
                mail.chat_message_id = None;
            }
        }
        Ok(true)
    }

    async fn set_thread_enabled(
        &self,
        room_id: &str,
        chat_message_id: &str,
        enabled: bool,
        force_close: bool,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let mut matched: Vec<&mut Thread> = state
            .threads
            .values_mut()
            .filter(|t| {
                t.chat_room_id.as_deref() == Some(room_id)
                    && t.chat_message_id.as_deref() == Some(chat_message_id)
            })
            .collect();
        for thread in matched.iter_mut() {
            thread.enabled = enabled;
            if enabled {
                thread.force_close = false;
            } else if force_close {
                thread.force_close = true;
            }
        }
        Ok(matched.len() == 1)
    }

    async fn overview_threads(&self, rooms: &[String]) -> Result<Vec<OverviewEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<OverviewEntry> = state
            .threads
            .values()
            .filter(|t| t.enabled)
            .filter_map(|t| {
                let room_id = t.chat_room_id.clone()?;
                if !rooms.contains(&room_id) {
                    return None;
                }
                let chat_message_id = t.chat_message_id.clone()?;
                let head = state.mails.get(&t.first_mail)?;
                Some(OverviewEntry {
                    thread_id: t.id,
                    author: display_name(&head.name_from, &head.addr_from),
                    subject: head.subject.clone(),
                    room_id,
                    chat_message_id,
                    last_activity: t.last_activity,
                })
            })
            .collect();
        entries.sort_by(|a, b| {
            b.last_activity
                .cmp(&a.last_activity)
                .then(b.thread_id.cmp(&a.thread_id))
        });
        Ok(entries)
    }
}

#[async_trait]
impl RoomRepository for MemoryStore {
    async fn ensure_rooms(&self, room_ids: &[String]) -> Result<()> {
        let mut state = self.state.write().await;
        for id in room_ids {
            state.rooms.entry(id.clone()).or_insert_with(|| Room {
                id: id.clone(),
                name: None,
                overview_message_id: None,
            });
        }
        Ok(())
    }

    async fn rooms(&self, room_ids: &[String]) -> Result<Vec<Room>> {
        let state = self.state.read().await;
        Ok(state
            .rooms
            .values()
            .filter(|r| room_ids.contains(&r.id))
            .cloned()
            .collect())
    }

    async fn set_room_name(&self, room_id: &str, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(room) = state.rooms.get_mut(room_id) {
            room.name = Some(name.to_string());
        }
        Ok(())
    }

    async fn overview_message_id(&self, room_id: &str) -> Result<Option<String>> {
        Ok(self
            .state
            .read()
            .await
            .rooms
            .get(room_id)
            .and_then(|r| r.overview_message_id.clone()))
    }

    async fn set_overview_message_id(
        &self,
        room_id: &str,
        message_id: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let room = state
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Room {
                id: room_id.to_string(),
                name: None,
                overview_message_id: None,
            });
        room.overview_message_id = message_id.map(str::to_string);
        Ok(())
    }
}
