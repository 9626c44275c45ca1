//! Prompt construction for generation and healing calls.
//!
//! The prompt text is a collaborator contract, not core logic: the only
//! hard requirement is that replies follow the three-section format the
//! strict parser expects.

use crate::types::GenerationContext;

/// System prompt for fresh generation and iteration.
pub const SYSTEM_PROMPT: &str = r#"You are an expert Python and React developer. Generate functional, working code for dashboard blocks that fetch real data from actual APIs and websites.

Requirements:
- Never use mock data or placeholder URLs; implement real API calls or scraping.
- Backend: Python only, using these pre-installed packages: requests, httpx, beautifulsoup4, pandas, numpy, python-dateutil, jmespath, aiohttp.
- The backend must define a class BlockExecutor with two async methods: fetch_data() returning raw data, and process_data(raw) returning the final JSON-serializable payload.
- Frontend: one React component in TypeScript using Tailwind CSS.
- Handle fetch errors gracefully inside fetch_data.

Respond with exactly these three sections:

## Backend Code
(one fenced python code block)

## Frontend Code
(one fenced typescript code block)

## Explanation
(a brief explanation of what the block does)
"#;

/// System prompt for healing a failed block.
pub const HEALING_SYSTEM_PROMPT: &str = r#"You are debugging a failed dashboard block. Fix the code based on the error message, keeping the same constraints and BlockExecutor structure as the original system prompt.

Respond with exactly these three sections:

## Backend Code
(the fixed code, one fenced python code block)

## Frontend Code
(one fenced typescript code block)

## Explanation
(what was wrong and how you fixed it)
"#;

/// Build the user message for a generation call.
pub fn generation_request(prompt: &str, context: Option<&GenerationContext>) -> String {
    let mut message = format!("Create a dashboard block for: {prompt}");

    if let Some(ctx) = context {
        message.push_str(&format!(
            "\n\nThis is an iteration on an existing block.\nOriginal request: {}\nIteration request: {}",
            ctx.original_prompt, ctx.iteration
        ));
        if let Some(code) = &ctx.previous_code {
            message.push_str(&format!("\n\nPrevious backend code:\n```python\n{code}\n```"));
        }
    }

    message
}

/// Build the user message for a healing call.
pub fn heal_request(original_prompt: &str, error_message: &str, failed_code: &str) -> String {
    format!(
        "Original request: {original_prompt}\n\nFailed code:\n```python\n{failed_code}\n```\n\nError encountered: {error_message}\n\nPlease fix the code and explain what was wrong."
    )
}
