use super::Candidate;

/// System prompt for the LLM analyzer.
pub const CLASSIFY_SYSTEM_PROMPT: &str = r#"You are a security analyst classifying code elements for taint analysis.

A SOURCE introduces data an attacker can influence: HTTP requests, form fields, headers, cookies, command-line arguments, environment variables, files, sockets, deserialized payloads.
A SINK consumes data in a security-sensitive way: SQL or database queries, shell or process execution, eval, file writes, template rendering, redirects, responses, logs.

Classify the element as "source", "sink" or "neither". Only answer "source" or "sink" when the code itself performs that role, not when it merely passes data along.

Respond with JSON only:
{
  "classification": "source" | "sink" | "neither",
  "kind": "short snake_case kind such as user_input or database_write, or null",
  "confidence": 0.0 to 1.0,
  "rationale": "one or two sentences"
}"#;

/// Builds the user prompt describing one candidate.
pub fn build_classify_prompt(candidate: &Candidate) -> String {
    let mut prompt = format!("## {}: {}\n\n", candidate.kind, candidate.name);

    if let Some(path) = &candidate.file_path {
        prompt.push_str(&format!("File: {}\n", path));
    }
    if let Some(signature) = &candidate.signature {
        prompt.push_str(&format!("Signature: `{}`\n", signature));
    }
    if !candidate.reasons.is_empty() {
        prompt.push_str(&format!("Flagged because: {}\n", candidate.reasons.join("; ")));
    }

    prompt.push_str("\n### Summary\n\n");
    match &candidate.summary {
        Some(summary) => prompt.push_str(summary),
        None => prompt.push_str("(no summary available)"),
    }
    prompt.push_str("\n\nClassify this element.");
    prompt
}
