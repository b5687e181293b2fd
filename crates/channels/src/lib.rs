//! Chat channels for Forgehand.
//!
//! - **Telegram** — long-polling bot with streamed, paginated replies
//!
//! The Bot API sits behind [`TelegramApi`] so the channel and renderer can
//! be driven by a fake in tests.

pub mod render;
pub mod telegram;
pub mod telegram_api;

pub use render::{ReplyBoundary, RenderSettings, TelegramRenderer};
pub use telegram::TelegramChannel;
pub use telegram_api::{HttpTelegramApi, TelegramApi};
