//! Best-effort alert dispatch to trusted contacts at session start.
//!
//! Fire-and-forget by design: the relay requires out-of-band opt-in per
//! recipient, delivery is never guaranteed, and per-contact failures are
//! swallowed. The user sees only an aggregate summary.

use crate::config::{AuthorizedPhone, TrackerConfig};
use crate::contacts::{ContactId, ContactKind, TrustedContact};
use crate::share::percent_encode;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Best-effort message egress. Implementations must not retry internally;
/// at-most-once is the contract.
#[async_trait]
pub trait AlertRelay: Send + Sync {
    /// Dispatch to a messenger handle (leading `@` already stripped).
    async fn send_to_handle(&self, handle: &str, message: &str) -> Result<()>;

    /// Dispatch to a pre-authorized phone number with its relay API key.
    async fn send_to_phone(&self, phone: &str, api_key: &str, message: &str) -> Result<()>;
}

/// Query-parameter HTTP relay (CallMeBot-style endpoints).
pub struct CallMeBotRelay {
    base_url: String,
}

impl CallMeBotRelay {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Relay pointed at the configured endpoint.
    pub fn from_config(config: &TrackerConfig) -> Self {
        Self::new(config.relay_base_url.clone())
    }

    /// Endpoint base requests are built against (no trailing slash).
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The relay answers 200 with a human-readable body either way, so the
    /// body text is the only success signal available.
    async fn get_text(url: String) -> Result<String> {
        tokio::task::spawn_blocking(move || -> Result<String> {
            let mut response = ureq::get(&url)
                .call()
                .context("relay request failed")?;
            let body = response
                .body_mut()
                .read_to_string()
                .context("relay response unreadable")?;
            Ok(body)
        })
        .await
        .map_err(|e| anyhow!("relay task failed: {}", e))?
    }
}

#[async_trait]
impl AlertRelay for CallMeBotRelay {
    async fn send_to_handle(&self, handle: &str, message: &str) -> Result<()> {
        let url = format!(
            "{}/text.php?user={}&text={}",
            self.base_url,
            percent_encode(handle),
            percent_encode(message)
        );
        let body = Self::get_text(url).await?;
        if body.to_lowercase().contains("sent to") {
            Ok(())
        } else {
            bail!("unexpected relay response for handle: {}", body)
        }
    }

    async fn send_to_phone(&self, phone: &str, api_key: &str, message: &str) -> Result<()> {
        let url = format!(
            "{}/whatsapp.php?phone={}&text={}&apikey={}",
            self.base_url,
            percent_encode(phone),
            percent_encode(message),
            percent_encode(api_key)
        );
        let body = Self::get_text(url).await?;
        if body.to_lowercase().contains("error") {
            bail!("relay reported an error for phone: {}", body)
        }
        Ok(())
    }
}

/// Aggregate outcome of one notification round. This is what the user sees;
/// per-contact errors stay in the logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifySummary {
    /// Contacts a dispatch was attempted for.
    pub attempted: usize,
    /// Attempts the relay accepted (no delivery guarantee).
    pub delivered: usize,
    /// Contacts skipped for lack of a usable route.
    pub skipped: usize,
}

impl NotifySummary {
    pub fn describe(&self) -> String {
        if self.attempted == 0 {
            "No contact could be notified automatically. Share the link manually.".to_string()
        } else {
            format!(
                "Notification attempted for {} contact(s); {} accepted by the relay.",
                self.attempted, self.delivered
            )
        }
    }
}

/// Routes trusted contacts to the relay at session start.
pub struct Notifier {
    relay: Arc<dyn AlertRelay>,
    authorized_phone: Option<AuthorizedPhone>,
}

impl Notifier {
    pub fn new(relay: Arc<dyn AlertRelay>, authorized_phone: Option<AuthorizedPhone>) -> Self {
        Self {
            relay,
            authorized_phone,
        }
    }

    /// Attempts one dispatch per routable contact, concurrently, swallowing
    /// individual failures. Routing: handles go to the handle relay; a phone
    /// goes to the phone relay only when it matches the pre-authorized
    /// number; everything else (plain phones, emails) is skipped with a
    /// logged reason.
    pub async fn notify_contacts(
        &self,
        contacts: &[(ContactId, TrustedContact)],
        message: &str,
    ) -> NotifySummary {
        let mut summary = NotifySummary::default();
        let mut attempts: Vec<BoxFuture<'_, bool>> = Vec::new();

        for (_, contact) in contacts {
            match contact.kind() {
                Some(ContactKind::Handle(handle)) => {
                    summary.attempted += 1;
                    attempts.push(Box::pin(self.attempt_handle(
                        contact.name.clone(),
                        handle,
                        message.to_string(),
                    )));
                }
                Some(ContactKind::Phone(digits)) => {
                    let authorized = self
                        .authorized_phone
                        .as_ref()
                        .filter(|auth| auth.local_digits == digits);
                    match authorized {
                        Some(auth) => {
                            summary.attempted += 1;
                            attempts.push(Box::pin(self.attempt_phone(
                                contact.name.clone(),
                                auth.international.clone(),
                                auth.api_key.clone(),
                                message.to_string(),
                            )));
                        }
                        None => {
                            summary.skipped += 1;
                            tracing::debug!(
                                contact = %contact.name,
                                "skipping phone contact without relay authorization"
                            );
                        }
                    }
                }
                Some(ContactKind::Email(_)) => {
                    summary.skipped += 1;
                    tracing::debug!(
                        contact = %contact.name,
                        "skipping email contact: relay has no email route"
                    );
                }
                None => {
                    summary.skipped += 1;
                    tracing::debug!(contact = %contact.name, "skipping unclassifiable contact");
                }
            }
        }

        let results = futures::future::join_all(attempts).await;
        summary.delivered = results.into_iter().filter(|ok| *ok).count();
        summary
    }

    async fn attempt_handle(&self, name: String, handle: String, message: String) -> bool {
        match self.relay.send_to_handle(&handle, &message).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(contact = %name, "handle dispatch failed: {:#}", e);
                false
            }
        }
    }

    async fn attempt_phone(
        &self,
        name: String,
        phone: String,
        api_key: String,
        message: String,
    ) -> bool {
        match self.relay.send_to_phone(&phone, &api_key, &message).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(contact = %name, "phone dispatch failed: {:#}", e);
                false
            }
        }
    }
}
