//! Strict parser for oracle replies.
//!
//! A reply must contain three labeled markdown sections — `## Backend Code`
//! and `## Frontend Code`, each holding one fenced code block, followed by
//! `## Explanation` with free text.
//!
//! A missing section or an unfenced/empty backend body is an explicit
//! oracle failure rather than silently degrading to empty code, so
//! generation errors are not masked as execution errors downstream.

use crate::types::GeneratedCode;
use anyhow::{bail, Result};

const BACKEND_HEADING: &str = "## Backend Code";
const FRONTEND_HEADING: &str = "## Frontend Code";
const EXPLANATION_HEADING: &str = "## Explanation";

/// Parse a full oracle reply into its three parts.
pub fn parse_reply(content: &str) -> Result<GeneratedCode> {
    let backend_section = section(content, BACKEND_HEADING)
        .ok_or_else(|| anyhow::anyhow!("oracle reply is missing the '{BACKEND_HEADING}' section"))?;
    let frontend_section = section(content, FRONTEND_HEADING)
        .ok_or_else(|| anyhow::anyhow!("oracle reply is missing the '{FRONTEND_HEADING}' section"))?;
    let explanation_section = section(content, EXPLANATION_HEADING).ok_or_else(|| {
        anyhow::anyhow!("oracle reply is missing the '{EXPLANATION_HEADING}' section")
    })?;

    let backend_code = match fenced_body(&backend_section) {
        Some(code) if !code.trim().is_empty() => code,
        Some(_) => bail!("oracle reply has an empty backend code block"),
        None => bail!("oracle reply has no fenced code block in the backend section"),
    };

    let frontend_code = match fenced_body(&frontend_section) {
        Some(code) => code,
        None => bail!("oracle reply has no fenced code block in the frontend section"),
    };

    Ok(GeneratedCode {
        backend_code,
        frontend_code,
        explanation: explanation_section.trim().to_string(),
    })
}

/// Extract the text of one section: everything between its heading line
/// and the next `## ` heading (or end of input).
fn section(content: &str, heading: &str) -> Option<String> {
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.iter().position(|l| l.trim() == heading)?;

    let mut body = Vec::new();
    for line in &lines[start + 1..] {
        if line.trim_start().starts_with("## ") {
            break;
        }
        body.push(*line);
    }
    Some(body.join("\n"))
}

/// Extract the body of the first fenced code block in a section.
/// Returns None when there is no opening fence or the fence is unclosed.
fn fenced_body(section: &str) -> Option<String> {
    let mut inside = false;
    let mut body = Vec::new();

    for line in section.lines() {
        if line.trim_start().starts_with("```") {
            if inside {
                return Some(body.join("\n"));
            }
            inside = true;
            continue;
        }
        if inside {
            body.push(line);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD_REPLY: &str = r#"Here is your block.

## Backend Code
```python
class BlockExecutor:
    async def fetch_data(self):
        return {"temp": 21}

    async def process_data(self, raw):
        return raw
```

## Frontend Code
```typescript
export function GeneratedBlock() { return <div/>; }
```

## Explanation
Fetches current weather and passes it through.
"#;

    #[test]
    fn parses_all_three_sections() {
        let code = parse_reply(GOOD_REPLY).unwrap();
        assert!(code.backend_code.contains("class BlockExecutor"));
        assert!(code.frontend_code.contains("GeneratedBlock"));
        assert_eq!(
            code.explanation,
            "Fetches current weather and passes it through."
        );
    }

    #[test]
    fn missing_backend_section_is_an_error() {
        let reply = "## Frontend Code\n```\nx\n```\n## Explanation\nok";
        let err = parse_reply(reply).unwrap_err();
        assert!(err.to_string().contains("Backend Code"));
    }

    #[test]
    fn missing_explanation_section_is_an_error() {
        let reply = "## Backend Code\n```\nprint(1)\n```\n## Frontend Code\n```\nx\n```";
        let err = parse_reply(reply).unwrap_err();
        assert!(err.to_string().contains("Explanation"));
    }

    #[test]
    fn empty_backend_block_is_an_error() {
        let reply = "## Backend Code\n```python\n\n```\n## Frontend Code\n```\nx\n```\n## Explanation\nok";
        let err = parse_reply(reply).unwrap_err();
        assert!(err.to_string().contains("empty backend code block"));
    }

    #[test]
    fn unclosed_fence_is_an_error() {
        let reply =
            "## Backend Code\n```python\nprint(1)\n## Frontend Code\n```\nx\n```\n## Explanation\nok";
        assert!(parse_reply(reply).is_err());
    }

    #[test]
    fn tolerates_prose_before_the_first_heading() {
        let code = parse_reply(GOOD_REPLY).unwrap();
        assert!(!code.backend_code.contains("Here is your block"));
    }
}
