pub mod chat_message;
pub mod chat_thread;
pub mod prelude;
pub mod user_profile;
