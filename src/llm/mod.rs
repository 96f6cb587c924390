pub mod client;
pub mod gateway;

#[cfg(test)]
pub(crate) mod testing;

pub use client::LLMClient;
pub use gateway::{LlmGateway, TextStream};
