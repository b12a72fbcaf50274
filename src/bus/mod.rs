//! Authenticated priority message bus
//!
//! Routes typed messages between agents, the fusion engine and the
//! orchestrator. Each recipient owns one bounded mailbox; producers never
//! block, consumers suspend on a `Notify` until a message arrives or the
//! mission is cancelled.

pub mod auth;
mod mailbox;
pub mod message;

pub use auth::{AuthToken, Challenge, Credentials, SecurityEvent};
pub use message::{
    Alert, AlertKind, Envelope, Message, Payload, Recipient, Sitrep, SitrepStage, BROADCAST_KEY,
    FUSION_ID, ORCHESTRATOR_ID,
};

use crate::config::BusConfig;
use crate::error::BusError;
use crate::types::Priority;
use auth::Authenticator;
use chrono::Utc;
use mailbox::Mailbox;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Outcome of a broadcast
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReceipt {
    /// Sequence number shared by every copy; `None` if nothing was delivered
    pub sequence: Option<u64>,
    pub delivered: Vec<String>,
    pub saturated: Vec<String>,
}

#[derive(Default)]
struct BusState {
    auth: Authenticator,
    mailboxes: HashMap<String, Mailbox>,
    next_sequence: HashMap<String, u64>,
    security_events: Vec<SecurityEvent>,
}

impl BusState {
    fn authenticate(&mut self, envelope: &Envelope) -> Result<(), BusError> {
        if !self.auth.is_enrolled(&envelope.sender) {
            return Err(BusError::UnknownSender(envelope.sender.clone()));
        }
        let recipient = envelope.recipient.key();
        match self.auth.verify(&envelope.sender, recipient, &envelope.token) {
            Ok(()) => Ok(()),
            Err(reason) => {
                warn!(
                    sender = %envelope.sender,
                    recipient = %recipient,
                    kind = envelope.payload.kind(),
                    "Security event: dropped unauthenticated message ({})",
                    reason
                );
                self.security_events.push(SecurityEvent {
                    at: Utc::now(),
                    sender: envelope.sender.clone(),
                    recipient: recipient.to_string(),
                    reason: reason.clone(),
                });
                Err(BusError::Authentication {
                    sender: envelope.sender.clone(),
                    recipient: recipient.to_string(),
                    reason,
                })
            }
        }
    }

    fn take_sequence(&mut self, sender: &str) -> u64 {
        let next = self.next_sequence.entry(sender.to_string()).or_insert(1);
        let sequence = *next;
        *next += 1;
        sequence
    }
}

/// Message bus shared by every endpoint of one mission
pub struct MessageBus {
    config: BusConfig,
    state: Mutex<BusState>,
}

impl MessageBus {
    pub fn new(config: BusConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(BusState::default()),
        })
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Register an endpoint and hand out its credentials. Registering an
    /// existing id rotates its key and keeps its mailbox.
    pub async fn register(&self, endpoint_id: &str) -> Credentials {
        let mut state = self.state.lock().await;
        let credentials = state.auth.enroll(endpoint_id);
        state
            .mailboxes
            .entry(endpoint_id.to_string())
            .or_insert_with(|| Mailbox::new(self.config.queue_capacity));
        debug!(endpoint = endpoint_id, "Registered bus endpoint");
        credentials
    }

    /// Register and wrap the credentials in a ready-to-use endpoint
    pub async fn endpoint(self: &Arc<Self>, endpoint_id: &str) -> BusEndpoint {
        let credentials = self.register(endpoint_id).await;
        BusEndpoint::new(Arc::clone(self), credentials)
    }

    /// Remove an endpoint's mailbox and revoke its credentials
    pub async fn retire(&self, endpoint_id: &str) {
        let mut state = self.state.lock().await;
        state.auth.revoke(endpoint_id);
        if let Some(mailbox) = state.mailboxes.remove(endpoint_id) {
            mailbox.wake();
        }
        debug!(endpoint = endpoint_id, "Retired bus endpoint");
    }

    pub async fn is_registered(&self, endpoint_id: &str) -> bool {
        self.state.lock().await.mailboxes.contains_key(endpoint_id)
    }

    /// Registered endpoint ids, sorted
    pub async fn endpoints(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut ids: Vec<String> = state.mailboxes.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Issue a fresh challenge for the pair. The previous one becomes stale.
    pub async fn issue_challenge(&self, sender: &str, recipient: &Recipient) -> Result<Challenge, BusError> {
        self.state.lock().await.auth.issue(sender, recipient.key())
    }

    /// Authenticate and enqueue a message for a single recipient.
    /// Never blocks on the recipient; returns the assigned sequence number.
    pub async fn send(&self, envelope: Envelope) -> Result<u64, BusError> {
        let recipient = match &envelope.recipient {
            Recipient::Endpoint(id) => id.clone(),
            Recipient::Broadcast => return self.broadcast(envelope).await.map(|r| r.sequence.unwrap_or(0)),
        };

        let mut state = self.state.lock().await;
        state.authenticate(&envelope)?;

        let mailbox = state
            .mailboxes
            .get(&recipient)
            .ok_or_else(|| BusError::UnknownRecipient(recipient.clone()))?;
        if mailbox.is_full() {
            return Err(BusError::QueueSaturated {
                capacity: mailbox.capacity(),
                recipient,
            });
        }

        let sequence = state.take_sequence(&envelope.sender);
        let message = Message::stamp(envelope, sequence);
        debug!(
            sender = message.sender(),
            recipient = %recipient,
            priority = %message.priority(),
            sequence,
            kind = message.payload().kind(),
            "Delivered message"
        );
        if let Some(mailbox) = state.mailboxes.get_mut(&recipient) {
            mailbox.push(message);
        }
        Ok(sequence)
    }

    /// Fan a message out to every registered endpoint except the sender.
    /// Saturated recipients are skipped and listed in the receipt.
    pub async fn broadcast(&self, mut envelope: Envelope) -> Result<BroadcastReceipt, BusError> {
        envelope.recipient = Recipient::Broadcast;
        let mut state = self.state.lock().await;
        state.authenticate(&envelope)?;

        let mut recipients: Vec<String> = state
            .mailboxes
            .keys()
            .filter(|id| **id != envelope.sender)
            .cloned()
            .collect();
        recipients.sort();

        let mut receipt = BroadcastReceipt::default();
        for id in recipients {
            let full = state.mailboxes.get(&id).map(Mailbox::is_full).unwrap_or(true);
            if full {
                receipt.saturated.push(id);
            } else {
                receipt.delivered.push(id);
            }
        }
        if receipt.delivered.is_empty() {
            return Ok(receipt);
        }

        let sequence = state.take_sequence(&envelope.sender);
        let message = Message::stamp(envelope, sequence);
        for id in &receipt.delivered {
            if let Some(mailbox) = state.mailboxes.get_mut(id) {
                mailbox.push(message.clone());
            }
        }
        if !receipt.saturated.is_empty() {
            warn!(
                sender = message.sender(),
                saturated = ?receipt.saturated,
                "Broadcast skipped saturated mailboxes"
            );
        }
        receipt.sequence = Some(sequence);
        Ok(receipt)
    }

    /// Suspend until a message is available for `endpoint_id` or `cancel` fires
    pub async fn receive(&self, endpoint_id: &str, cancel: &CancellationToken) -> Result<Message, BusError> {
        loop {
            let notify = {
                let mut state = self.state.lock().await;
                let mailbox = state
                    .mailboxes
                    .get_mut(endpoint_id)
                    .ok_or_else(|| BusError::UnknownRecipient(endpoint_id.to_string()))?;
                if let Some(message) = mailbox.pop() {
                    return Ok(message);
                }
                mailbox.notify_handle()
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(BusError::Cancelled),
                _ = notify.notified() => {}
            }
        }
    }

    /// Dequeue without waiting
    pub async fn try_receive(&self, endpoint_id: &str) -> Result<Option<Message>, BusError> {
        let mut state = self.state.lock().await;
        let mailbox = state
            .mailboxes
            .get_mut(endpoint_id)
            .ok_or_else(|| BusError::UnknownRecipient(endpoint_id.to_string()))?;
        Ok(mailbox.pop())
    }

    pub async fn pending(&self, endpoint_id: &str) -> usize {
        let state = self.state.lock().await;
        state.mailboxes.get(endpoint_id).map(Mailbox::len).unwrap_or(0)
    }

    pub async fn security_events(&self) -> Vec<SecurityEvent> {
        self.state.lock().await.security_events.clone()
    }

    /// Security events recorded after the first `seen`
    pub async fn security_events_since(&self, seen: usize) -> Vec<SecurityEvent> {
        let state = self.state.lock().await;
        state.security_events.iter().skip(seen).cloned().collect()
    }

    /// Log a delivered message whose content claims another endpoint's identity
    pub async fn record_security_event(&self, sender: &str, recipient: &str, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(sender = %sender, recipient = %recipient, "Security event: {}", reason);
        self.state.lock().await.security_events.push(SecurityEvent {
            at: Utc::now(),
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            reason,
        });
    }

    pub async fn security_event_count(&self) -> usize {
        self.state.lock().await.security_events.len()
    }
}

/// An endpoint's handle on the bus: credentials plus cached tokens
pub struct BusEndpoint {
    bus: Arc<MessageBus>,
    credentials: Credentials,
    tokens: Mutex<HashMap<String, AuthToken>>,
}

impl BusEndpoint {
    pub fn new(bus: Arc<MessageBus>, credentials: Credentials) -> Self {
        Self {
            bus,
            credentials,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> &str {
        self.credentials.endpoint_id()
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    async fn token_for(&self, recipient: &Recipient) -> Result<AuthToken, BusError> {
        let mut tokens = self.tokens.lock().await;
        if let Some(token) = tokens.get(recipient.key()) {
            return Ok(token.clone());
        }
        let challenge = self.bus.issue_challenge(self.id(), recipient).await?;
        let token = self.credentials.respond(recipient.key(), &challenge)?;
        tokens.insert(recipient.key().to_string(), token.clone());
        Ok(token)
    }

    async fn envelope(&self, recipient: Recipient, priority: Priority, payload: Payload) -> Result<Envelope, BusError> {
        let token = self.token_for(&recipient).await?;
        Ok(Envelope {
            sender: self.id().to_string(),
            recipient,
            priority,
            payload,
            token,
        })
    }

    /// Send once. A rejected token is forgotten so the next send re-challenges.
    pub async fn send(&self, to: &str, priority: Priority, payload: Payload) -> Result<u64, BusError> {
        let recipient = Recipient::endpoint(to);
        let envelope = self.envelope(recipient, priority, payload).await?;
        let result = self.bus.send(envelope).await;
        if let Err(BusError::Authentication { .. }) = &result {
            self.tokens.lock().await.remove(to);
        }
        result
    }

    /// Send, retrying `QueueSaturated` with exponential backoff. Any other
    /// error, or saturation after the last retry, is returned to the caller.
    pub async fn send_with_backoff(&self, to: &str, priority: Priority, payload: Payload) -> Result<u64, BusError> {
        let retries = self.bus.config.send_retries;
        let base = self.bus.config.send_backoff_ms;
        let mut attempt = 0;
        loop {
            match self.send(to, priority, payload.clone()).await {
                Err(BusError::QueueSaturated { .. }) if attempt < retries => {
                    let delay = Duration::from_millis(base.saturating_mul(2u64.saturating_pow(attempt)));
                    attempt += 1;
                    debug!(sender = self.id(), recipient = to, attempt, "Mailbox saturated, backing off");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    pub async fn broadcast(&self, priority: Priority, payload: Payload) -> Result<BroadcastReceipt, BusError> {
        let envelope = self.envelope(Recipient::Broadcast, priority, payload).await?;
        let result = self.bus.broadcast(envelope).await;
        if let Err(BusError::Authentication { .. }) = &result {
            self.tokens.lock().await.remove(BROADCAST_KEY);
        }
        result
    }

    pub async fn receive(&self, cancel: &CancellationToken) -> Result<Message, BusError> {
        self.bus.receive(self.id(), cancel).await
    }

    pub async fn try_receive(&self) -> Result<Option<Message>, BusError> {
        self.bus.try_receive(self.id()).await
    }
}
