// src/noesis/clients/mod.rs

pub mod messages;

pub use messages::MessagesClient;
