pub mod telegram;

pub use telegram::{IngestBot, TelegramChannel};
