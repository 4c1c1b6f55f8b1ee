use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::{require_str, ToolContext, ToolError, ToolHandler};

const DEFAULT_RESULTS: usize = 5;

pub struct WebSearchTool;

#[async_trait]
impl ToolHandler for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for facts, content ideas or references for the site."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "max_results": {"type": "integer", "minimum": 1, "maximum": 20}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let provider = ctx
            .services
            .search
            .as_ref()
            .ok_or_else(|| ToolError::Unavailable("web search is not configured".to_string()))?;
        let query = require_str(&input, "query")?;
        let max_results = input
            .get("max_results")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_RESULTS);

        ctx.progress(format!("Searching the web for \"{}\"", query));
        let hits = provider.search(query, max_results).await?;
        if hits.is_empty() {
            return Ok(format!("No results for \"{}\"", query));
        }

        let mut out = String::new();
        for (i, hit) in hits.iter().enumerate() {
            out.push_str(&format!("{}. {} <{}>\n", i + 1, hit.title, hit.url));
            if let Some(snippet) = &hit.snippet {
                out.push_str(&format!("   {}\n", snippet));
            }
        }
        Ok(out.trim_end().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{SearchError, SearchHit, SearchProvider};
    use crate::tools::builtin::test_support::{context, context_with_search};
    use std::sync::Arc;

    struct Fixed;

    #[async_trait]
    impl SearchProvider for Fixed {
        async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError> {
            Ok((0..max_results.min(2))
                .map(|i| SearchHit {
                    title: format!("{} {}", query, i),
                    url: format!("https://{}.example", i),
                    snippet: (i == 0).then(|| "first".to_string()),
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_formats_hits() {
        let (ctx, _sink) = context_with_search(Arc::new(Fixed)).await;
        let out = WebSearchTool
            .execute(json!({"query": "sourdough", "max_results": 3}), &ctx)
            .await
            .unwrap();
        assert_eq!(
            out,
            "1. sourdough 0 <https://0.example>\n   first\n2. sourdough 1 <https://1.example>"
        );
    }

    #[tokio::test]
    async fn test_unconfigured_search_is_tool_error() {
        let (ctx, _sink) = context().await;
        assert!(matches!(
            WebSearchTool.execute(json!({"query": "x"}), &ctx).await,
            Err(ToolError::Unavailable(_))
        ));
    }
}
