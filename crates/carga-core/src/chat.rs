//! Shipment chat

use carga_api::{ChatMessage, ChatMessageView, Profile};
use carga_store::{NewChatMessage, TrackingStore};
use carga_util::{CargaError, ShipmentId, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Name shown for senders without a profile
pub const UNKNOWN_SENDER_NAME: &str = "Usuario";

pub struct ChatService {
    store: Arc<dyn TrackingStore>,
    max_message_length: usize,
}

impl ChatService {
    pub fn new(store: Arc<dyn TrackingStore>, max_message_length: usize) -> Self {
        Self {
            store,
            max_message_length,
        }
    }

    /// Validate and store a message, returning it as the sender will see it
    pub async fn send(
        &self,
        shipment_id: &ShipmentId,
        sender_id: &UserId,
        content: &str,
    ) -> carga_util::Result<ChatMessageView> {
        let content = content.trim();
        if content.is_empty() {
            return Err(CargaError::validation("Message is empty"));
        }

        let length = content.chars().count();
        if length > self.max_message_length {
            return Err(CargaError::validation(format!(
                "Message is {} characters, limit is {}",
                length, self.max_message_length
            )));
        }

        let message = self
            .store
            .insert_message(NewChatMessage {
                shipment_id: shipment_id.clone(),
                sender_id: sender_id.clone(),
                content: content.to_string(),
            })
            .await?;

        debug!(shipment_id = %shipment_id, message_id = message.id, "Message stored");

        let profile = self.store.get_profile(sender_id).await?;
        Ok(view(message, profile.as_ref()))
    }

    /// All messages of a shipment, oldest first, with sender names
    pub async fn history(&self, shipment_id: &ShipmentId) -> carga_util::Result<Vec<ChatMessageView>> {
        let messages = self.store.list_messages(shipment_id).await?;

        let mut profiles: HashMap<UserId, Option<Profile>> = HashMap::new();
        for message in &messages {
            if !profiles.contains_key(&message.sender_id) {
                let profile = self.store.get_profile(&message.sender_id).await?;
                profiles.insert(message.sender_id.clone(), profile);
            }
        }

        Ok(messages
            .into_iter()
            .map(|message| {
                let profile = profiles.get(&message.sender_id).and_then(Option::as_ref);
                view(message, profile)
            })
            .collect())
    }
}

fn view(message: ChatMessage, profile: Option<&Profile>) -> ChatMessageView {
    match profile {
        Some(profile) => ChatMessageView {
            message,
            sender_name: profile.full_name.clone(),
            sender_role: Some(profile.role.tag()),
        },
        None => ChatMessageView {
            message,
            sender_name: UNKNOWN_SENDER_NAME.to_string(),
            sender_role: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carga_api::{Channel, RoleTag, UserRole};
    use carga_store::{ChangeEvent, SqliteStore};
    use std::time::Duration;

    fn service() -> (ChatService, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        (ChatService::new(store.clone(), 20), store)
    }

    fn transporter(id: &str, name: &str) -> Profile {
        Profile {
            user_id: UserId::new(id),
            full_name: name.into(),
            phone: None,
            role: UserRole::Transporter {
                vehicle_type: "camion".into(),
                plate_number: Some("C-123ABC".into()),
                capacity_kg: Some(5000.0),
            },
        }
    }

    #[tokio::test]
    async fn send_trims_and_stores() {
        let (chat, store) = service();
        let id = ShipmentId::new("S1");

        let sent = chat.send(&id, &UserId::new("u-1"), "  hola  ").await.unwrap();
        assert_eq!(sent.message.content, "hola");

        let stored = store.list_messages(&id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "hola");
    }

    #[tokio::test]
    async fn send_rejects_blank_content() {
        let (chat, store) = service();
        let id = ShipmentId::new("S1");

        let err = chat.send(&id, &UserId::new("u-1"), " \n\t ").await.unwrap_err();
        assert!(matches!(err, CargaError::ValidationError(_)));
        assert!(store.list_messages(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_limits_characters_not_bytes() {
        let (chat, _store) = service();
        let id = ShipmentId::new("S1");
        let sender = UserId::new("u-1");

        // 20 two-byte characters fit the limit
        assert!(chat.send(&id, &sender, &"ñ".repeat(20)).await.is_ok());

        let err = chat.send(&id, &sender, &"a".repeat(21)).await.unwrap_err();
        assert!(matches!(err, CargaError::ValidationError(_)));
    }

    #[tokio::test]
    async fn history_names_senders() {
        let (chat, store) = service();
        let id = ShipmentId::new("S1");
        store.upsert_profile(&transporter("t-1", "Ana López")).await.unwrap();

        chat.send(&id, &UserId::new("t-1"), "Voy en camino").await.unwrap();
        chat.send(&id, &UserId::new("ghost"), "¿Cuándo llega?").await.unwrap();

        let history = chat.history(&id).await.unwrap();
        assert_eq!(history.len(), 2);

        assert_eq!(history[0].sender_name, "Ana López");
        assert_eq!(history[0].sender_role, Some(RoleTag::Transporter));
        assert_eq!(history[1].sender_name, UNKNOWN_SENDER_NAME);
        assert_eq!(history[1].sender_role, None);
    }

    #[tokio::test]
    async fn sent_message_is_published_on_its_chat_channel() {
        let (chat, store) = service();
        let mine = ShipmentId::new("S1");
        let mut changes = store.subscribe();

        chat.send(&mine, &UserId::new("u-1"), "este envío").await.unwrap();

        let change = tokio::time::timeout(Duration::from_secs(1), changes.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.channels(), vec![Channel::Chat(mine)]);
        let ChangeEvent::MessageInserted(message) = change else {
            panic!("expected a message insert");
        };
        assert_eq!(message.content, "este envío");
    }
}
