//! Delivery routing: decide, per outgoing message, whether to push live or
//! rely on persisted history alone.
//!
//! The router is state-free orchestration over the store and the presence
//! registry. Direct messages are pushed to the recipient's live handles and
//! acknowledged with a delivered flag; group messages fan out over the
//! broadcast channel to whoever is currently subscribed, with no per-member
//! accounting. Typing indicators are never persisted.

use std::sync::Arc;

use cove_core::conversation::{self, Target};
use cove_core::error::CoreError;
use cove_core::{contacts, groups, messages, users};
use cove_store::Store;
use cove_types::api::{DeliveryReceipt, SendDirectMessage, SendGroupMessage};
use cove_types::events::GatewayEvent;
use cove_types::models::User;
use tokio::sync::broadcast;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::presence::PresenceRegistry;

const BROADCAST_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct DeliveryRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    store: Arc<Store>,
    presence: Arc<PresenceRegistry>,
    /// Group-scoped events for all connections; each connection filters by
    /// its own subscription set.
    broadcast_tx: broadcast::Sender<GatewayEvent>,
}

impl DeliveryRouter {
    pub fn new(store: Arc<Store>, presence: Arc<PresenceRegistry>) -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(RouterInner {
                store,
                presence,
                broadcast_tx,
            }),
        }
    }

    /// Subscribe to the group event stream. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Publish a group-scoped side-channel event (join/leave announcements).
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Route a direct message. The conversation id is recomputed from the
    /// participant pair; whatever the client thinks the conversation is
    /// called never enters the store.
    pub async fn send_direct(
        &self,
        sender: &User,
        req: SendDirectMessage,
    ) -> Result<DeliveryReceipt, CoreError> {
        let store = &self.inner.store;
        let message = messages::build_direct(sender, &req)?;

        users::get_user(store, req.recipient_id)?;
        if !contacts::is_contact(store, sender.id, req.recipient_id)? {
            return Err(CoreError::authorization(
                "recipient is not one of your contacts",
            ));
        }

        messages::store_message(store, &message)?;

        let handles = self.inner.presence.handles_for(req.recipient_id).await;
        let mut delivered = false;
        for handle in &handles {
            delivered |= handle.push(GatewayEvent::PrivateMessage {
                message: message.clone(),
            });
        }

        debug!(message_id = %message.id, delivered, "direct message routed");
        Ok(DeliveryReceipt {
            message_id: message.id,
            conversation_id: message.conversation_id,
            delivered,
        })
    }

    /// Route a group message: persist, then fire-and-forget to every live
    /// handle subscribed to the group's channel. Offline members catch up
    /// through history.
    pub async fn send_group(
        &self,
        sender: &User,
        req: SendGroupMessage,
    ) -> Result<DeliveryReceipt, CoreError> {
        let store = &self.inner.store;
        let message = messages::build_group(sender, &req)?;

        groups::get_group(store, req.group_id)?;
        if !groups::is_member(store, req.group_id, sender.id)? {
            return Err(CoreError::authorization(
                "only group members may send to the group",
            ));
        }

        messages::store_message(store, &message)?;

        let pushed = self
            .inner
            .broadcast_tx
            .send(GatewayEvent::GroupMessage {
                message: message.clone(),
            })
            .is_ok();

        debug!(message_id = %message.id, group = %req.group_id, "group message routed");
        Ok(DeliveryReceipt {
            message_id: message.id,
            conversation_id: message.conversation_id,
            delivered: pushed,
        })
    }

    /// Live-only typing indicator. Dropped silently when the target is
    /// offline; never persisted.
    pub async fn typing(&self, sender_id: Uuid, conversation_id: &str) -> Result<(), CoreError> {
        let target = conversation::parse(conversation_id)?;
        match target {
            Target::Direct(a, b) => {
                if !conversation::is_direct_participant(&target, sender_id) {
                    return Err(CoreError::authorization(
                        "not a participant of this conversation",
                    ));
                }
                let other = if a == sender_id { b } else { a };
                let event = GatewayEvent::Typing {
                    conversation_id: conversation_id.to_string(),
                    user_id: sender_id,
                };
                for handle in self.inner.presence.handles_for(other).await {
                    handle.push(event.clone());
                }
            }
            Target::Group(group_id) => {
                if !groups::is_member(&self.inner.store, group_id, sender_id)? {
                    return Err(CoreError::authorization(
                        "not a member of this group",
                    ));
                }
                let _ = self.inner.broadcast_tx.send(GatewayEvent::Typing {
                    conversation_id: conversation_id.to_string(),
                    user_id: sender_id,
                });
            }
        }
        trace!(user = %sender_id, conversation = conversation_id, "typing routed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::ConnectionHandle;
    use cove_core::users::create_user;
    use tokio::sync::mpsc;

    fn router() -> (DeliveryRouter, Arc<Store>, Arc<PresenceRegistry>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let presence = Arc::new(PresenceRegistry::new());
        let router = DeliveryRouter::new(store.clone(), presence.clone());
        (router, store, presence)
    }

    fn make_contacts(store: &Store, a: &User, b: &User) {
        let req = contacts::send_contact_request(store, a, &b.username).unwrap();
        contacts::respond_to_request(store, req.id, b.id, true).unwrap();
    }

    fn direct_req(recipient_id: Uuid) -> SendDirectMessage {
        SendDirectMessage {
            recipient_id,
            ciphertext: "ct".into(),
            key_envelope: "env".into(),
        }
    }

    #[tokio::test]
    async fn online_recipient_gets_push_and_delivered_true() {
        let (router, store, presence) = router();
        let alice = create_user(&store, "alice", "h", None).unwrap();
        let bob = create_user(&store, "bob", "h", None).unwrap();
        make_contacts(&store, &alice, &bob);

        let (tx, mut rx) = mpsc::unbounded_channel();
        presence
            .register(bob.id, ConnectionHandle::new(Uuid::new_v4(), tx))
            .await;

        let receipt = router.send_direct(&alice, direct_req(bob.id)).await.unwrap();
        assert!(receipt.delivered);

        match rx.try_recv().unwrap() {
            GatewayEvent::PrivateMessage { message } => {
                assert_eq!(message.id, receipt.message_id);
                assert_eq!(message.sender_id, alice.id);
                assert_eq!(
                    message.conversation_id,
                    conversation::direct(alice.id, bob.id)
                );
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn offline_recipient_waits_in_history() {
        let (router, store, _presence) = router();
        let alice = create_user(&store, "alice", "h", None).unwrap();
        let bob = create_user(&store, "bob", "h", None).unwrap();
        make_contacts(&store, &alice, &bob);

        let receipt = router.send_direct(&alice, direct_req(bob.id)).await.unwrap();
        assert!(!receipt.delivered);

        // Still retrievable through history, most recent first
        let page =
            messages::history(&store, &conversation::direct(alice.id, bob.id), 0, 50).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, receipt.message_id);
    }

    #[tokio::test]
    async fn direct_send_requires_contact_edge() {
        let (router, store, _presence) = router();
        let alice = create_user(&store, "alice", "h", None).unwrap();
        let bob = create_user(&store, "bob", "h", None).unwrap();

        let err = router
            .send_direct(&alice, direct_req(bob.id))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Authorization(_)));

        let err = router
            .send_direct(&alice, direct_req(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound));
    }

    #[tokio::test]
    async fn group_message_fans_out_to_subscribers() {
        let (router, store, _presence) = router();
        let alice = create_user(&store, "alice", "h", None).unwrap();
        let bob = create_user(&store, "bob", "h", None).unwrap();
        let (group, _) = groups::create_group(&store, &alice, "team", &[bob.id]).unwrap();

        let mut rx = router.subscribe();

        let req = SendGroupMessage {
            group_id: group.id,
            ciphertext: "ct".into(),
            key_envelopes: [(bob.id, "env".to_string())].into(),
        };
        let receipt = router.send_group(&alice, req).await.unwrap();
        assert_eq!(receipt.conversation_id, conversation::group(group.id));

        let event = rx.try_recv().unwrap();
        // The event scopes to the same conversation id the core derives
        assert_eq!(event.conversation_id(), Some(conversation::group(group.id)));
        match event {
            GatewayEvent::GroupMessage { message } => {
                assert_eq!(message.id, receipt.message_id);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_members_cannot_send_to_group() {
        let (router, store, _presence) = router();
        let alice = create_user(&store, "alice", "h", None).unwrap();
        let mallory = create_user(&store, "mallory", "h", None).unwrap();
        let (group, _) = groups::create_group(&store, &alice, "team", &[]).unwrap();

        let req = SendGroupMessage {
            group_id: group.id,
            ciphertext: "ct".into(),
            key_envelopes: [(alice.id, "env".to_string())].into(),
        };
        let err = router.send_group(&mallory, req).await.unwrap_err();
        assert!(matches!(err, CoreError::Authorization(_)));
    }

    #[tokio::test]
    async fn typing_to_offline_target_is_dropped_silently() {
        let (router, store, _presence) = router();
        let alice = create_user(&store, "alice", "h", None).unwrap();
        let bob = create_user(&store, "bob", "h", None).unwrap();

        let conversation_id = conversation::direct(alice.id, bob.id);
        router.typing(alice.id, &conversation_id).await.unwrap();

        // Never persisted
        let page = messages::history(&store, &conversation_id, 0, 50).unwrap();
        assert!(page.is_empty());
    }

    #[tokio::test]
    async fn typing_rejects_outsiders_and_bad_ids() {
        let (router, store, _presence) = router();
        let alice = create_user(&store, "alice", "h", None).unwrap();
        let bob = create_user(&store, "bob", "h", None).unwrap();
        let mallory = create_user(&store, "mallory", "h", None).unwrap();

        let conversation_id = conversation::direct(alice.id, bob.id);
        assert!(matches!(
            router.typing(mallory.id, &conversation_id).await,
            Err(CoreError::Authorization(_))
        ));

        // A bare UUID is malformed, not authorized
        assert!(matches!(
            router.typing(alice.id, &Uuid::new_v4().to_string()).await,
            Err(CoreError::Validation(_))
        ));
    }
}
