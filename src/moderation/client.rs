use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{CheckResult, ModerationError, Scenario};

const TEXT_CHECK_PATH: &str = "/api/v1/text";
const LLM_PROMPT_CHECK_PATH: &str = "/api/v1/llmprompt";
const LLM_RESPONSE_CHECK_PATH: &str = "/api/v1/llmresp";

/// Remote content moderation service.
#[async_trait]
pub trait ModerationService: Send + Sync {
    async fn pass_text_check(
        &self,
        scenario: Scenario,
        text: &str,
    ) -> Result<CheckResult, ModerationError>;

    async fn pass_llm_prompt_check(
        &self,
        content: &str,
        session_id: &str,
    ) -> Result<CheckResult, ModerationError>;

    async fn pass_llm_resp_check(
        &self,
        content: &str,
        session_id: &str,
    ) -> Result<CheckResult, ModerationError>;
}

/// JSON-over-HTTP client for the moderation service.
#[derive(Debug, Clone)]
pub struct ModerationHttpClient {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Serialize)]
struct TextCheckRequest<'a> {
    scenario: &'a str,
    text: &'a str,
}

#[derive(Serialize)]
struct LlmCheckRequest<'a> {
    #[serde(rename = "Service")]
    service: &'a str,
    #[serde(rename = "ServiceParameters")]
    parameters: LlmCheckParameters<'a>,
}

#[derive(Serialize)]
struct LlmCheckParameters<'a> {
    content: &'a str,
    #[serde(rename = "sessionId")]
    session_id: &'a str,
}

#[derive(Deserialize)]
struct CheckEnvelope {
    #[serde(default)]
    data: Option<CheckResult>,
}

impl ModerationHttpClient {
    #[must_use]
    pub fn new(client: reqwest::Client, endpoint: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    async fn post<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<CheckResult, ModerationError> {
        let response = self
            .client
            .post(format!("{}{path}", self.endpoint))
            .json(body)
            .send()
            .await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            return Err(ModerationError::Status {
                status: status.as_u16(),
                message: String::from_utf8_lossy(&bytes).chars().take(256).collect(),
            });
        }

        let envelope: CheckEnvelope = serde_json::from_slice(&bytes)
            .map_err(|err| ModerationError::Decode(err.to_string()))?;
        envelope
            .data
            .ok_or_else(|| ModerationError::Decode("response has no `data` field".to_string()))
    }

    async fn llm_check(
        &self,
        path: &str,
        scenario: Scenario,
        content: &str,
        session_id: &str,
    ) -> Result<CheckResult, ModerationError> {
        let body = LlmCheckRequest {
            service: scenario.as_str(),
            parameters: LlmCheckParameters {
                content,
                session_id,
            },
        };
        self.post(path, &body).await
    }
}

#[async_trait]
impl ModerationService for ModerationHttpClient {
    async fn pass_text_check(
        &self,
        scenario: Scenario,
        text: &str,
    ) -> Result<CheckResult, ModerationError> {
        let body = TextCheckRequest {
            scenario: scenario.as_str(),
            text,
        };
        self.post(TEXT_CHECK_PATH, &body).await
    }

    async fn pass_llm_prompt_check(
        &self,
        content: &str,
        session_id: &str,
    ) -> Result<CheckResult, ModerationError> {
        self.llm_check(
            LLM_PROMPT_CHECK_PATH,
            Scenario::LlmQueryModeration,
            content,
            session_id,
        )
        .await
    }

    async fn pass_llm_resp_check(
        &self,
        content: &str,
        session_id: &str,
    ) -> Result<CheckResult, ModerationError> {
        self.llm_check(
            LLM_RESPONSE_CHECK_PATH,
            Scenario::LlmResponseModeration,
            content,
            session_id,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn test_text_check_request_shape() {
        let router = Router::new().route(
            TEXT_CHECK_PATH,
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["scenario"], "chat_detection");
                let sensitive = body["text"].as_str().unwrap().contains("forbidden");
                Json(json!({"code": 200, "data": {"is_sensitive": sensitive, "reason": "politics"}}))
            }),
        );
        let client = ModerationHttpClient::new(reqwest::Client::new(), &spawn(router).await);

        let flagged = client
            .pass_text_check(Scenario::ChatDetection, "a forbidden topic")
            .await
            .unwrap();
        assert!(flagged.is_sensitive);
        assert_eq!(flagged.reason, "politics");

        let clean = client
            .pass_text_check(Scenario::ChatDetection, "weather")
            .await
            .unwrap();
        assert!(!clean.is_sensitive);
    }

    #[tokio::test]
    async fn test_llm_checks_send_service_and_session() {
        let router = Router::new()
            .route(
                LLM_PROMPT_CHECK_PATH,
                post(|Json(body): Json<Value>| async move {
                    assert_eq!(body["Service"], "llm_query_moderation");
                    assert_eq!(body["ServiceParameters"]["sessionId"], "key-1");
                    assert_eq!(body["ServiceParameters"]["content"], "prompt text");
                    Json(json!({"data": {"is_sensitive": false}}))
                }),
            )
            .route(
                LLM_RESPONSE_CHECK_PATH,
                post(|Json(body): Json<Value>| async move {
                    assert_eq!(body["Service"], "llm_response_moderation");
                    assert_eq!(body["ServiceParameters"]["sessionId"], "stream-9");
                    Json(json!({"data": {"is_sensitive": true, "reason": "abuse"}}))
                }),
            );
        let client = ModerationHttpClient::new(reqwest::Client::new(), &spawn(router).await);

        let prompt = client
            .pass_llm_prompt_check("prompt text", "key-1")
            .await
            .unwrap();
        assert!(!prompt.is_sensitive);
        assert!(prompt.reason.is_empty());

        let resp = client
            .pass_llm_resp_check("delta", "stream-9")
            .await
            .unwrap();
        assert!(resp.is_sensitive);
    }

    #[tokio::test]
    async fn test_error_status_and_bad_body() {
        let router = Router::new()
            .route(
                TEXT_CHECK_PATH,
                post(|| async { (http::StatusCode::INTERNAL_SERVER_ERROR, "overloaded") }),
            )
            .route(LLM_PROMPT_CHECK_PATH, post(|| async { Json(json!({"code": 500})) }));
        let client = ModerationHttpClient::new(reqwest::Client::new(), &spawn(router).await);

        let err = client
            .pass_text_check(Scenario::ChatDetection, "x")
            .await
            .unwrap_err();
        assert!(matches!(err, ModerationError::Status { status: 500, .. }));

        let err = client.pass_llm_prompt_check("x", "s").await.unwrap_err();
        assert!(matches!(err, ModerationError::Decode(_)));
    }
}
