//! HTTP delivery for chat and webhook channels, and the client custom
//! actions use to call operator webhooks.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{DeliveryAdapter, Message, Recipient};
use crate::error::{HealError, Result};
use crate::types::Channel;

const USER_AGENT: &str = concat!("selfheal/", env!("CARGO_PKG_VERSION"));

/// Thin wrapper over a shared `reqwest::Client` with a request timeout.
///
/// Redirects are never followed: only the configured URL passed the host
/// screening, so a 3xx is returned to the caller as the answer.
#[derive(Debug, Clone)]
pub struct WebhookClient {
    client: reqwest::Client,
}

impl WebhookClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| HealError::Adapter(format!("http client: {e}")))?;
        Ok(Self { client })
    }

    /// POST `body` as JSON. Returns the response status code.
    ///
    /// Connection failures and 5xx responses are transport errors; 4xx are
    /// returned to the caller as a definitive answer.
    pub async fn post_json(
        &self,
        channel: Channel,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: &serde_json::Value,
    ) -> Result<u16> {
        let mut req = self.client.post(url).json(body);
        for (k, v) in headers {
            req = req.header(k.as_str(), v.as_str());
        }
        let resp = req.send().await.map_err(|e| HealError::DeliveryFailure {
            channel: channel.to_string(),
            reason: e.to_string(),
        })?;
        let status = resp.status();
        if status.is_server_error() {
            return Err(HealError::DeliveryFailure {
                channel: channel.to_string(),
                reason: format!("{url} returned {status}"),
            });
        }
        Ok(status.as_u16())
    }
}

/// Posts messages to the recipient's address for the channel.
pub struct HttpDelivery {
    channel: Channel,
    client: WebhookClient,
}

impl HttpDelivery {
    pub fn new(channel: Channel, client: WebhookClient) -> Self {
        Self { channel, client }
    }
}

#[async_trait]
impl DeliveryAdapter for HttpDelivery {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn deliver(&self, recipient: &Recipient, message: &Message) -> Result<bool> {
        let Some(url) = recipient.address(self.channel) else {
            return Ok(false);
        };
        let body = json!({
            "organization_id": message.organization_id,
            "recipient_id": recipient.id,
            "recipient_name": recipient.name,
            "subject": message.subject,
            "text": message.body,
            "execution_id": message.execution_id,
        });
        let status = self
            .client
            .post_json(self.channel, url, &BTreeMap::new(), &body)
            .await?;
        Ok((200..300).contains(&status))
    }
}
