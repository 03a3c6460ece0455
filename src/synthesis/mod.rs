//! Code synthesis: backend selection, prompting, response validation and fallback
//!
//! - `LlmProvider` — async trait over a chat-completion backend
//! - `HttpLlmProvider` — OpenAI-compatible HTTP implementation (OpenAI, Cerebras)
//! - `MockLlmProvider` — scripted replies for tests
//! - `ProviderSelector` — picks the backend from available credentials
//! - `Synthesizer` — operation + schema -> `GeneratedArtifact`

mod artifact;
pub mod mock;
pub mod prompt;
mod provider;
mod selector;
mod synthesizer;

pub use artifact::{extract_json, parse_artifact, GeneratedArtifact};
pub use mock::{MockLlmProvider, MockReply};
pub use provider::{HttpLlmProvider, LlmProvider, ProviderId};
pub use selector::{ProviderSelection, ProviderSelector, PROVIDER_OVERRIDE_VAR};
pub use synthesizer::{fallback_artifact, probe_connection, ConnectionProbe, Synthesizer};
