use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use graphsec_core::config::LLMConfig;
use graphsec_core::llm::{ClaudeClient, LLMError, OpenAIClient, Provider, LLM};

/// Serve one canned HTTP response and hand back the raw request.
async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);
            if request_complete(&raw) {
                break;
            }
        }

        let response = format!(
            "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
        String::from_utf8_lossy(&raw).into_owned()
    });

    (format!("http://{}", addr), handle)
}

fn request_complete(raw: &[u8]) -> bool {
    let text = String::from_utf8_lossy(raw);
    let Some(header_end) = text.find("\r\n\r\n") else {
        return false;
    };
    let length = text[..header_end]
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    raw.len() >= header_end + 4 + length
}

mod openai {
    use super::*;

    #[tokio::test]
    async fn test_completion_with_system_prompt() {
        let (url, server) = serve_once(
            "200 OK",
            r#"{"choices":[{"message":{"role":"assistant","content":"Parses a header."}}]}"#,
        )
        .await;
        let client = OpenAIClient::new(format!("{}/v1/", url), "secret", "gpt-test");

        let text = client
            .complete_with_system("You summarize code.", "def f(): pass", 64)
            .await
            .unwrap();
        assert_eq!(text, "Parses a header.");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /v1/chat/completions"));
        assert!(request.to_lowercase().contains("authorization: bearer secret"));
        assert!(request.contains(r#""model":"gpt-test""#));
        assert!(request.contains(r#""role":"system""#));
        assert!(request.contains(r#""max_tokens":64"#));
    }

    #[tokio::test]
    async fn test_local_provider_sends_no_key() {
        let (url, server) = serve_once(
            "200 OK",
            r#"{"choices":[{"message":{"role":"assistant","content":"ok"}}]}"#,
        )
        .await;
        let client = OpenAIClient::new(url, "", "llama3");

        assert_eq!(client.complete("hi", 8).await.unwrap(), "ok");
        let request = server.await.unwrap();
        assert!(!request.to_lowercase().contains("authorization:"));
        assert!(!request.contains(r#""role":"system""#));
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient() {
        let (url, _server) = serve_once("429 Too Many Requests", "{}").await;
        let client = OpenAIClient::new(url, "k", "m");

        let err = client.complete("hi", 8).await.unwrap_err();
        assert!(matches!(err, LLMError::RateLimited));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let (url, _server) = serve_once("503 Service Unavailable", r#"{"error":"overloaded"}"#).await;
        let client = OpenAIClient::new(url, "k", "m");

        let err = client.complete("hi", 8).await.unwrap_err();
        assert!(matches!(err, LLMError::ApiError { status: 503, ref message } if message.contains("overloaded")));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_client_error_is_permanent() {
        let (url, _server) = serve_once("400 Bad Request", r#"{"error":"bad model"}"#).await;
        let client = OpenAIClient::new(url, "k", "m");

        let err = client.complete("hi", 8).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_empty_choices() {
        let (url, _server) = serve_once("200 OK", r#"{"choices":[]}"#).await;
        let client = OpenAIClient::new(url, "k", "m");

        let err = client.complete("hi", 8).await.unwrap_err();
        assert!(matches!(err, LLMError::ParseError(_)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = OpenAIClient::new(format!("http://{}", addr), "k", "m");

        let err = client.complete("hi", 8).await.unwrap_err();
        assert!(err.is_transient(), "{:?}", err);
    }
}

mod claude {
    use super::*;

    #[tokio::test]
    async fn test_text_blocks_are_joined() {
        let (url, server) = serve_once(
            "200 OK",
            r#"{"content":[{"type":"text","text":"Reads "},{"type":"tool_use","id":"x"},{"type":"text","text":"input."}]}"#,
        )
        .await;
        let client = ClaudeClient::new("key-1")
            .with_api_url(format!("{}/v1/messages", url))
            .with_model("claude-test")
            .with_api_version("2024-01-01");

        let text = client
            .complete_with_system("You classify code.", "fn main() {}", 32)
            .await
            .unwrap();
        assert_eq!(text, "Reads input.");

        let request = server.await.unwrap();
        let lower = request.to_lowercase();
        assert!(lower.contains("x-api-key: key-1"));
        assert!(lower.contains("anthropic-version: 2024-01-01"));
        assert!(request.contains(r#""system":"You classify code.""#));
        assert!(request.contains(r#""model":"claude-test""#));
    }

    #[tokio::test]
    async fn test_rate_limit() {
        let (url, _server) = serve_once("429 Too Many Requests", "{}").await;
        let client = ClaudeClient::new("k").with_api_url(url);

        assert!(matches!(
            client.complete("hi", 8).await,
            Err(LLMError::RateLimited)
        ));
    }
}

mod provider {
    use super::*;

    #[test]
    fn test_openrouter_uses_its_endpoint() {
        let config = LLMConfig {
            provider: "openrouter".to_string(),
            api_key: Some("k".to_string()),
            ..LLMConfig::default()
        };
        match Provider::from_config(&config).unwrap() {
            Provider::OpenAI { base_url, api_key, .. } => {
                assert_eq!(base_url.as_deref(), Some("https://openrouter.ai/api/v1"));
                assert_eq!(api_key.as_deref(), Some("k"));
            }
            other => panic!("unexpected provider {:?}", other),
        }
    }

    #[test]
    fn test_anthropic_with_explicit_key_builds() {
        let config = LLMConfig {
            provider: "claude".to_string(),
            api_key: Some("k".to_string()),
            ..LLMConfig::default()
        };
        let provider = Provider::from_config(&config).unwrap();
        assert!(matches!(provider, Provider::Anthropic { .. }));
        assert!(provider.build().is_ok());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let config = LLMConfig {
            provider: "smoke-signals".to_string(),
            ..LLMConfig::default()
        };
        let err = Provider::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("smoke-signals"));
    }
}
