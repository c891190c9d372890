//! E-mail alerts through the Resend HTTP API.
//!
//! On the free tier Resend only delivers to the address the account was
//! registered with unless a custom sending domain is verified.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::TicketAlert;
use crate::errors::DispatchError;
use crate::traits::Notifier;

const RESEND_API_URL: &str = "https://api.resend.com/emails";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct EmailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct EmailResponse {
    id: Option<String>,
}

pub struct ResendNotifier {
    client: Client,
    api_key: String,
    sender: String,
    recipient: String,
}

impl ResendNotifier {
    pub fn new(api_key: String, sender: String, recipient: String) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            api_key,
            sender,
            recipient,
        })
    }

    fn request<'a>(&'a self, alert: &'a TicketAlert) -> EmailRequest<'a> {
        EmailRequest {
            from: &self.sender,
            to: [&self.recipient],
            subject: &alert.subject,
            html: alert.html_body(),
            text: alert.text_body(),
        }
    }
}

#[async_trait]
impl Notifier for ResendNotifier {
    fn name(&self) -> &'static str {
        "resend"
    }

    async fn send(&self, alert: &TicketAlert) -> Result<(), DispatchError> {
        let response = self
            .client
            .post(RESEND_API_URL)
            .bearer_auth(&self.api_key)
            .json(&self.request(alert))
            .send()
            .await
            .map_err(|e| {
                error!("Resend send failed: {}", e);
                DispatchError::from(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Resend API error {}: {}", status, body);
            return Err(DispatchError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let id = response
            .json::<EmailResponse>()
            .await
            .ok()
            .and_then(|r| r.id)
            .unwrap_or_else(|| "unknown".to_string());
        info!("Email sent via Resend (id={}) to {}", id, self.recipient);

        Ok(())
    }
}
