//! Client-side controllers driving the chat core and its change feed.

pub mod chat_session;
pub mod message_list;
pub mod unread;

pub use chat_session::{ChatSession, OpenTarget};
pub use message_list::MessageList;
pub use unread::{ConversationSummary, UnreadAggregator, UnreadState};
