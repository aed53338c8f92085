/// System prompt for code summaries.
pub const SUMMARY_SYSTEM_PROMPT: &str = r#"You are a code analyst building a knowledge graph of a codebase for security review.

Summarize the given code in plain prose, 2-5 sentences:
1. What it does and its role in the codebase
2. Inputs it accepts and where they come from (requests, files, environment, arguments)
3. Side effects: database, filesystem, network, process execution, logging

Do not repeat the code. Output the summary text only."#;

/// Builds the user prompt for one item.
pub fn build_summary_prompt(
    name: &str,
    kind: &str,
    language: &str,
    location: &str,
    content: &str,
    context: &str,
) -> String {
    let context = if context.is_empty() {
        "(none yet)"
    } else {
        context
    };
    format!(
        r#"## Previously summarized

{context}

## {kind}: {name}

Language: {language}
Location: {location}

```{language}
{content}
```

Summarize this {kind_lower}."#,
        kind_lower = kind.to_lowercase()
    )
}
