//! Human-readable exports of stored conversations.

mod markdown;

pub use markdown::render_markdown;
