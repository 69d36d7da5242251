use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Offline client for `--dry-run`: answers every prompt with the same
/// small, deterministic program.
pub struct MockLlmClient;

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        if prompt.contains("Write Python code") {
            Ok(r#"Here is the code:

```python
numbers = list(range(1, 11))
result = {"count": len(numbers), "sum": sum(numbers)}
```
"#
            .to_string())
        } else {
            Ok("result = None".to_string())
        }
    }
}
