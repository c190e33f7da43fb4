use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::config::GeneratorConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::formatter::FormattedContext;
use crate::models::RecordKind;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub const TRANSACTION_SYSTEM_PROMPT: &str = "You are a blockchain analyst. \
You receive a structured heuristic analysis of a single transaction and explain it in clear prose. \
Only use facts present in the analysis. Treat every classification and score as a best-effort heuristic.";

pub const BLOCK_SYSTEM_PROMPT: &str = "You are a blockchain analyst. \
You receive a structured heuristic analysis of a block and a sample of its transactions and explain it in clear prose. \
Only use facts present in the analysis. Treat every classification and score as a best-effort heuristic.";

pub fn system_prompt(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::Transaction => TRANSACTION_SYSTEM_PROMPT,
        RecordKind::Block => BLOCK_SYSTEM_PROMPT,
    }
}

pub fn build_prompt(context: &FormattedContext) -> String {
    format!("{}\n\n{}", context.text, context.directive)
}

/// Opaque text generation capability.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, system: &str, prompt: &str) -> PipelineResult<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Narrative {
    pub text: String,
    pub diagram: Option<String>,
}

/// Separates the first ```mermaid fenced block from the prose around it.
pub fn split_diagram(response: &str) -> Narrative {
    const OPEN: &str = "```mermaid";
    const CLOSE: &str = "```";

    let Some(start) = response.find(OPEN) else {
        return Narrative {
            text: response.trim().to_string(),
            diagram: None,
        };
    };
    let body_start = start + OPEN.len();
    let Some(len) = response[body_start..].find(CLOSE) else {
        return Narrative {
            text: response.trim().to_string(),
            diagram: None,
        };
    };
    let diagram = response[body_start..body_start + len].trim().to_string();
    let after = &response[body_start + len + CLOSE.len()..];
    let text = format!("{}\n\n{}", response[..start].trim_end(), after.trim_start());

    Narrative {
        text: text.trim().to_string(),
        diagram: (!diagram.is_empty()).then_some(diagram),
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(alias = "content", alias = "output")]
    text: String,
}

/// Posts `{model, system, prompt}` as JSON and reads `{text}` back.
#[derive(Clone, Debug)]
pub struct HttpTextGenerator {
    client: reqwest::Client,
    api_url: Url,
    api_key: Option<String>,
    model: String,
}

impl HttpTextGenerator {
    pub fn new(config: &GeneratorConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build reqwest client")?;
        let api_url = Url::parse(&config.api_url)
            .with_context(|| format!("invalid generator url {}", config.api_url))?;
        Ok(Self {
            client,
            api_url,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate(&self, system: &str, prompt: &str) -> PipelineResult<String> {
        let mut request = self.client.post(self.api_url.clone()).json(&GenerateRequest {
            model: &self.model,
            system,
            prompt,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                PipelineError::Timeout {
                    operation: "text generation",
                    ms: REQUEST_TIMEOUT.as_millis() as u64,
                }
            } else {
                PipelineError::Generation(err.to_string())
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(PipelineError::RateLimited);
        }
        if !status.is_success() {
            return Err(PipelineError::Generation(format!("generator returned {}", status)));
        }
        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|err| PipelineError::Generation(format!("unreadable response: {}", err)))?;
        debug!(chars = body.text.len(), model = %self.model, "narrative generated");
        Ok(body.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};

    #[test]
    fn splits_mermaid_block_out_of_prose() {
        let response = "Summary here.\n\n```mermaid\ngraph LR\n  A-->B\n```\n\nClosing words.";
        let narrative = split_diagram(response);
        assert_eq!(narrative.diagram.as_deref(), Some("graph LR\n  A-->B"));
        assert_eq!(narrative.text, "Summary here.\n\nClosing words.");
    }

    #[test]
    fn prose_without_diagram_or_unclosed_fence() {
        assert_eq!(split_diagram(" just text ").diagram, None);
        let unclosed = split_diagram("text ```mermaid graph");
        assert_eq!(unclosed.diagram, None);
        assert_eq!(unclosed.text, "text ```mermaid graph");
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/generate", addr)
    }

    fn generator(api_url: String) -> HttpTextGenerator {
        HttpTextGenerator::new(&GeneratorConfig {
            api_url,
            api_key: Some("secret".to_string()),
            model: "test-model".to_string(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn posts_model_system_and_prompt() {
        let router = Router::new().route(
            "/generate",
            post(|Json(body): Json<Value>| async move {
                let echoed = format!(
                    "{}|{}|{}",
                    body["model"].as_str().unwrap_or_default(),
                    body["system"].as_str().unwrap_or_default(),
                    body["prompt"].as_str().unwrap_or_default()
                );
                Json(json!({ "text": echoed }))
            }),
        );
        let url = serve(router).await;
        let text = generator(url).generate("sys", "prompt").await.unwrap();
        assert_eq!(text, "test-model|sys|prompt");
    }

    #[tokio::test]
    async fn maps_error_statuses() {
        let router = Router::new()
            .route("/generate", post(|| async { StatusCode::TOO_MANY_REQUESTS }));
        let url = serve(router).await;
        let err = generator(url).generate("s", "p").await.unwrap_err();
        assert!(matches!(err, PipelineError::RateLimited));

        let router = Router::new()
            .route("/generate", post(|| async { StatusCode::BAD_GATEWAY }));
        let url = serve(router).await;
        let err = generator(url).generate("s", "p").await.unwrap_err();
        assert!(matches!(err, PipelineError::Generation(_)));
    }
}
