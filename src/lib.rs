//! Mail Triage — prefilter, classify and draft replies for incoming email.

pub mod audit;
pub mod config;
pub mod error;
pub mod llm;
pub mod mailbox;
pub mod pipeline;
