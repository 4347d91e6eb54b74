#![allow(unused_imports)]

pub use super::chat_message::Entity as ChatMessage;
pub use super::chat_thread::Entity as ChatThread;
pub use super::user_profile::Entity as UserProfile;
