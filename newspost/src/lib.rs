// Library interface for newspost modules
// This allows tests and the binary to import modules

pub mod error;
pub mod ingestion;
pub mod source;
pub mod llm;
pub mod post;
pub mod image_prompts;
pub mod imaging;
pub mod sessions;
pub mod server;
