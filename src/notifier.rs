use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use teloxide::payloads::SendMessageSetters;
use teloxide::prelude::*;
use teloxide::types::{ParseMode, Recipient};
use teloxide::utils::html;
use thiserror::Error;
use tracing::instrument;

use crate::catalog::Product;
use crate::config::TelegramSettings;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("no telegram credentials configured")]
    Disabled,
    #[error("could not build http client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("telegram request failed: {0}")]
    Telegram(#[from] teloxide::RequestError),
}

/// Best-effort price-drop notification. Callers log failures and move on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, product: &Product, price: u64) -> Result<(), NotifyError>;
}

/// Unconfigured notifications report `Disabled` instead of sending.
#[async_trait]
impl<N: Notifier> Notifier for Option<N> {
    async fn notify(&self, product: &Product, price: u64) -> Result<(), NotifyError> {
        match self {
            Some(notifier) => notifier.notify(product, price).await,
            None => Err(NotifyError::Disabled),
        }
    }
}

pub fn alert_message(product: &Product, price: u64) -> String {
    format!(
        "El <b>{}</b> ha bajado a <b>{}€</b>.\n\nEnlace: <a href=\"{}\">Amazon</a>",
        html::escape(&product.name),
        price,
        html::escape(&product.url)
    )
}

/// Numeric ids (group chats are negative) go out as ids, anything else as
/// a channel username.
fn parse_recipient(chat_id: &str) -> Recipient {
    match chat_id.parse::<i64>() {
        Ok(id) => Recipient::Id(ChatId(id)),
        Err(_) => Recipient::ChannelUsername(chat_id.to_string()),
    }
}

pub struct TelegramNotifier {
    bot: Bot,
    chat: Recipient,
}

impl TelegramNotifier {
    pub fn new(token: &str, chat_id: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            bot: Bot::with_client(token, client),
            chat: parse_recipient(chat_id),
        })
    }

    /// `None` when token or chat id is missing.
    pub fn from_settings(settings: &TelegramSettings) -> Result<Option<Self>, NotifyError> {
        match settings.credentials() {
            Some((token, chat_id)) => {
                let timeout = Duration::from_secs(settings.timeout_secs);
                Self::new(token, chat_id, timeout).map(Some)
            }
            None => {
                tracing::warn!("TELEGRAM_TOKEN or TELEGRAM_CHAT_ID not set, price alerts disabled");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    #[instrument(skip(self, product), fields(product = %product.name))]
    async fn notify(&self, product: &Product, price: u64) -> Result<(), NotifyError> {
        self.bot
            .send_message(self.chat.clone(), alert_message(product, price))
            .parse_mode(ParseMode::Html)
            .await?;
        tracing::info!("Telegram message sent");
        Ok(())
    }
}
