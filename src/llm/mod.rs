//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::{MockLlmClient, MockReply, MockRequest};
pub use openai::OpenAiClient;
pub use traits::{Completion, FunctionSpec, LlmClient, LlmError, RetryConfig, RetryingLlmClient};
