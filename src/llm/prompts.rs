// Prompt template for the generation step

/// The failed attempt carried into a retry prompt when feedback is enabled.
pub struct PreviousAttempt<'a> {
    pub code: &'a str,
    pub error: &'a str,
}

pub fn codegen_prompt(
    instruction: &str,
    previous: Option<PreviousAttempt<'_>>,
    custom_instructions: Option<&str>,
) -> String {
    let mut prompt = format!(
        r#"Write Python code to do the following task:

{}

OUTPUT CONTRACT:
1. Assign the final answer to a top-level variable named `result`
2. `result` should be JSON-friendly (numbers, strings, booleans, None, lists, dicts); anything else is reported via repr()
3. The code runs once, non-interactively, with no network access and a read-only filesystem (only /tmp is writable)
4. Use only the Python standard library unless the task explicitly names another package
5. Do not call input(), exit(), or sys.exit()

Reply with a single fenced block:
```python
[your code here]
```"#,
        instruction
    );

    if let Some(attempt) = previous {
        prompt.push_str(&format!(
            "\n\n## Previous Attempt\n\nThis code failed:\n```python\n{}\n```\n\nError:\n```\n{}\n```\n\nFix the problem; do not repeat the same code.\n",
            attempt.code, attempt.error
        ));
    }

    if let Some(custom) = custom_instructions {
        prompt.push_str(&format!("\n\n## Additional Instructions\n\n{}\n", custom));
    }

    prompt
}
