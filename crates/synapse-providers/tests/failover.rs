use synapse_core::error::Error;
use synapse_core::provider::{KeyPool, Provider};
use synapse_providers::HttpChatProvider;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn generate_retries_the_next_key_after_a_401() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer bad-key"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer good-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{ "message": { "content": "hello from upstream" } }]
        })))
        .mount(&server)
        .await;

    let provider = HttpChatProvider::new(
        "test",
        server.uri(),
        "test-model",
        KeyPool::new(vec!["bad-key".to_string(), "good-key".to_string()]),
    );

    let result = provider
        .generate(CancellationToken::new(), "hi", None, None)
        .await
        .unwrap();

    assert_eq!(result, "hello from upstream");
}

#[tokio::test]
async fn generate_fails_once_every_key_is_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let provider = HttpChatProvider::new(
        "test",
        server.uri(),
        "test-model",
        KeyPool::new(vec!["bad-key-a".to_string(), "bad-key-b".to_string()]),
    );

    let err = provider
        .generate(CancellationToken::new(), "hi", None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Provider { .. }));
}

#[tokio::test]
async fn generate_stream_retries_the_next_key_when_the_first_emits_nothing() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer bad-key"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let sse_body = "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\ndata: [DONE]\n\n";
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer good-key"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body),
        )
        .mount(&server)
        .await;

    let provider = HttpChatProvider::new(
        "test",
        server.uri(),
        "test-model",
        KeyPool::new(vec!["bad-key".to_string(), "good-key".to_string()]),
    );

    let mut stream = provider.generate_stream(CancellationToken::new(), "hi", None, None).await;

    let mut assembled = String::new();
    while let Some(chunk) = stream.chunks.recv().await {
        assembled.push_str(&chunk);
    }
    assert_eq!(assembled, "hi");
    assert!(stream.errors.try_recv().is_err());
}

#[tokio::test]
async fn generate_reports_configuration_error_with_no_keys() {
    let server = MockServer::start().await;
    let provider = HttpChatProvider::new("test", server.uri(), "test-model", KeyPool::new(vec![]));

    let err = provider
        .generate(CancellationToken::new(), "hi", None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Provider { .. }));
}
