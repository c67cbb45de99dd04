pub mod openai;
pub mod provider;
pub mod scripted;

pub use openai::OpenAiCompatProvider;
pub use provider::{ChatMessage, ModelProvider, ModelRequest, ModelResponse, ProviderError};
pub use scripted::ScriptedProvider;
