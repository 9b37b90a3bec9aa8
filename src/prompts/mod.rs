mod store;

pub use store::{validate_prompt_text, PromptStore, RiskPrompt, DEFAULT_PROMPT, MAX_PROMPT_CHARS};
