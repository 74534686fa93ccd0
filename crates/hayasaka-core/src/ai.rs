//! Port for the generative-AI backend.

use async_trait::async_trait;

use crate::{domain::Turn, Result};

/// Backend capable of multi-turn chat, image analysis, and image generation.
///
/// Gemini is the first implementation; the router only sees this trait so
/// tests can substitute a fake.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// Submit the full dialogue history (last turn is the new user message)
    /// and return the assistant reply text.
    async fn chat(&self, history: &[Turn]) -> Result<String>;

    /// Single-shot prompt + image analysis, returning text.
    async fn describe_image(&self, prompt: &str, image: &[u8], mime: &str) -> Result<String>;

    /// Single-shot text-to-image, returning PNG bytes.
    async fn generate_image(&self, prompt: &str) -> Result<Vec<u8>>;
}
