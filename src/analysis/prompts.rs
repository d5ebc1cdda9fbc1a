// src/analysis/prompts.rs
use super::client::{ChatMessage, CompletionRequest};
use super::QueryMode;

pub const FACTCHECK_SYSTEM_PROMPT: &str = "You are a fact-checker. \
Provide a verdict (True/False/Misleading/Unverified) and a brief explanation (MUST be 200 characters or less). \
Don't include citations in brackets. \
The explanation must be complete and coherent, not cut off mid-sentence. \
Format: {verdict}|{explanation}";

pub const MOREINFO_SYSTEM_PROMPT: &str = "You are an information provider. \
Provide a main summary (MUST be 200 characters or less), then up to three short supporting details. \
Don't include citations in brackets. \
Format: {summary}|{detail}|{detail}";

pub fn system_prompt(mode: QueryMode) -> &'static str {
    match mode {
        QueryMode::FactCheck => FACTCHECK_SYSTEM_PROMPT,
        QueryMode::MoreInfo => MOREINFO_SYSTEM_PROMPT,
    }
}

pub fn build_request(model: &str, mode: QueryMode, text: &str) -> CompletionRequest {
    CompletionRequest {
        model: model.to_string(),
        messages: vec![
            ChatMessage::new("system", system_prompt(mode)),
            ChatMessage::new("user", text),
        ],
    }
}
