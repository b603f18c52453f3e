use super::*;
use crate::config::{CompletionConfig, OllamaConfig};

fn test_config() -> Config {
    Config {
        ollama: OllamaConfig {
            protocol: "http".to_string(),
            host: "test-host".to_string(),
            port: 1234,
            model: "test-model".to_string(),
            batch_size: 128,
            embedding_dimension: 384,
            ..OllamaConfig::default()
        },
        completion: CompletionConfig {
            model: "test-chat".to_string(),
            ..CompletionConfig::default()
        },
        ..Config::default()
    }
}

#[test]
fn client_configuration() {
    let client = OllamaClient::new(&test_config()).expect("Failed to create client");

    assert_eq!(client.space, EmbeddingSpace::new("test-model", 384));
    assert_eq!(client.chat_model, "test-chat");
    assert_eq!(client.batch_size, 128);
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));
    assert_eq!(client.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
    assert_eq!(client.backoff, DEFAULT_BACKOFF);
}

#[test]
fn client_builder_methods() {
    let client = OllamaClient::new(&test_config())
        .expect("Failed to create client")
        .with_timeout(Duration::from_secs(60))
        .with_retry_attempts(5)
        .with_backoff(Duration::from_millis(10));

    assert_eq!(client.retry_attempts, 5);
    assert_eq!(client.backoff, Duration::from_millis(10));

    // At least one attempt is always made
    let client = client.with_retry_attempts(0);
    assert_eq!(client.retry_attempts, 1);
}

#[test]
fn rate_limits_and_server_errors_are_transient() {
    assert!(matches!(
        classify(&ureq::Error::StatusCode(429)),
        RequestFailure::Transient(_)
    ));
    assert!(matches!(
        classify(&ureq::Error::StatusCode(503)),
        RequestFailure::Transient(_)
    ));
    assert!(matches!(
        classify(&ureq::Error::HostNotFound),
        RequestFailure::Transient(_)
    ));
    assert!(matches!(
        classify(&ureq::Error::ConnectionFailed),
        RequestFailure::Transient(_)
    ));
}

#[test]
fn client_errors_are_permanent() {
    assert!(matches!(
        classify(&ureq::Error::StatusCode(400)),
        RequestFailure::Permanent(_)
    ));
    assert!(matches!(
        classify(&ureq::Error::StatusCode(404)),
        RequestFailure::Permanent(_)
    ));
}

#[test]
fn request_failures_map_to_component_errors() {
    let transient = RequestFailure::Transient("down".to_string());
    let permanent = RequestFailure::Permanent("too long".to_string());

    assert_eq!(
        EmbeddingError::from(transient.clone()),
        EmbeddingError::Transient("down".to_string())
    );
    assert!(EmbeddingError::from(permanent.clone()).is_permanent());
    assert_eq!(
        CompletionError::from(transient),
        CompletionError::Transient("down".to_string())
    );
    assert_eq!(
        CompletionError::from(permanent),
        CompletionError::Permanent("too long".to_string())
    );
}

#[tokio::test]
async fn empty_input_makes_no_request() {
    // No server listens on test-host; an empty input must not reach the network
    let client = OllamaClient::new(&test_config()).expect("Failed to create client");
    let results = client.embed(&[]).await;
    assert!(results.is_empty());
}

#[test]
fn cancelled_embedding_sends_nothing() {
    let client = OllamaClient::new(&test_config()).expect("Failed to create client");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let texts = vec!["INSAT".to_string(), "Oceansat".to_string()];
    let results = client.embed_blocking_until(&texts, &cancel);

    assert_eq!(results.len(), 2);
    assert!(
        results
            .iter()
            .all(|result| matches!(result, Err(EmbeddingError::Transient(_))))
    );
}
