//! inbox-digest — mailbox watcher that summarizes chat-history emails.
//!
//! A fetch loop owns a persistent IMAP session and hands matching unread
//! messages to a dispatch loop over a bounded channel; the dispatcher
//! extracts the embedded payload, asks an LLM backend for a summary, and
//! relays it to a chat webhook and a reply email.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod llm;
pub mod sinks;
