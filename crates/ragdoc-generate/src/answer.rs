use ragdoc_core::{Error, Result};

/// Strips the echoed prompt from a generator's raw output.
pub fn extract_answer(prompt: &str, raw: &str) -> Result<String> {
    match raw.strip_prefix(prompt) {
        Some(answer) => Ok(answer.to_string()),
        None => Err(Error::ProtocolMismatch(format!(
            "output of {} bytes does not start with the {}-byte prompt",
            raw.len(),
            prompt.len()
        ))),
    }
}
