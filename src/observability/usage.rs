use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::token::{Counter, TokenError, Usage};

/// What a finished request is billed against.
#[derive(Debug, Clone)]
pub struct UsageContext {
    pub client_id: String,
    pub model: String,
    pub endpoint: &'static str,
    pub stream: bool,
    pub started: Instant,
}

impl UsageContext {
    #[must_use]
    pub fn new(client_id: &str, model: &str, endpoint: &'static str, stream: bool) -> Self {
        Self {
            client_id: client_id.to_string(),
            model: model.to_string(),
            endpoint,
            stream,
            started: Instant::now(),
        }
    }
}

/// One billable usage record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageEvent {
    pub event_id: String,
    pub client_id: String,
    pub model: String,
    pub endpoint: &'static str,
    pub stream: bool,
    #[serde(flatten)]
    pub usage: Usage,
    pub duration_seconds: f64,
}

impl UsageEvent {
    fn new(context: &UsageContext, usage: Usage, duration: Duration) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            client_id: context.client_id.clone(),
            model: context.model.clone(),
            endpoint: context.endpoint,
            stream: context.stream,
            usage,
            duration_seconds: duration.as_secs_f64(),
        }
    }
}

pub fn log_usage_event(event: &UsageEvent) {
    info!(
        event_id = %event.event_id,
        client_id = %event.client_id,
        model = %event.model,
        endpoint = event.endpoint,
        stream = event.stream,
        prompt_tokens = event.usage.prompt_tokens,
        completion_tokens = event.usage.completion_tokens,
        total_tokens = event.usage.total_tokens,
        duration_seconds = event.duration_seconds,
        "token usage event"
    );
}

/// Resolve the counter's usage once and log it.
///
/// Failures are logged and yield `None`; they never affect the response.
pub async fn record_usage(counter: &dyn Counter, context: &UsageContext) -> Option<UsageEvent> {
    match counter.usage().await {
        Ok(usage) => {
            let event = UsageEvent::new(context, usage, context.started.elapsed());
            log_usage_event(&event);
            Some(event)
        }
        Err(TokenError::UnsupportedTokenizer) => {
            debug!(model = %context.model, "no usage reported and tokenizer unsupported");
            None
        }
        Err(err) => {
            warn!(
                client_id = %context.client_id,
                model = %context.model,
                error = %err,
                "failed to compute token usage"
            );
            None
        }
    }
}
