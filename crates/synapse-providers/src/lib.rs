#![doc = include_str!("../README.md")]

pub mod echo;
pub mod gemini;
pub mod http_chat;
pub mod openrouter;

pub use echo::EchoProvider;
pub use http_chat::HttpChatProvider;
