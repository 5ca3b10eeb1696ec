pub mod chat_completion;
mod error;

pub use chat_completion::{ChatCompletionRequest, Message};
pub use error::{ErrorResponse, error_response};
