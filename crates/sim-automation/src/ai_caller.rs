//! AI Caller: a thin adapter around a single external text-generation
//! endpoint, used for strategy synthesis and performance commentary. Both
//! operations share one retry policy — up to two retries on a 5xx status
//! or a request timeout, each call bounded by a 20 second deadline.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use sim_types::{PerformanceRating, SimError, SimResult, StrategyConfig};
use tracing::warn;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Deserialize)]
struct GenerateStrategyResponse {
    strategy: StrategyConfig,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct AnalyzePerformanceResponse {
    rating: PerformanceRating,
    narrative: String,
    #[serde(default)]
    suggested_adjustments: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct GeneratedStrategy {
    pub config: StrategyConfig,
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PerformanceAnalysis {
    pub rating: PerformanceRating,
    pub narrative: String,
    pub suggested_adjustments: Option<Value>,
}

pub struct AiCaller {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl AiCaller {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("default TLS backend is available");
        Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// `GenerateStrategy(prompt, metadata) -> StrategyConfig`, validated
    /// against the schema by `serde` and then by [`StrategyConfig::validate`]
    /// at the call site.
    pub async fn generate_strategy(&self, prompt: &str, metadata: Value) -> SimResult<GeneratedStrategy> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "metadata": metadata,
        });
        let wire: GenerateStrategyResponse = self.call("/strategies/generate", &body).await?;
        Ok(GeneratedStrategy {
            config: wire.strategy,
            name: wire.name,
            description: wire.description,
        })
    }

    /// `AnalyzePerformance(metrics, recentTrades) -> {rating, narrative,
    /// suggestedAdjustments?}`.
    pub async fn analyze_performance(&self, metrics: Value, recent_trades: Value) -> SimResult<PerformanceAnalysis> {
        let body = serde_json::json!({
            "model": self.model,
            "metrics": metrics,
            "recent_trades": recent_trades,
        });
        let wire: AnalyzePerformanceResponse = self.call("/performance/analyze", &body).await?;
        Ok(PerformanceAnalysis {
            rating: wire.rating,
            narrative: wire.narrative,
            suggested_adjustments: wire.suggested_adjustments,
        })
    }

    async fn call<T: for<'de> Deserialize<'de>>(&self, path: &str, body: &Value) -> SimResult<T> {
        let url = format!("{}{}", self.endpoint.trim_end_matches('/'), path);
        let mut last_err = None;

        for attempt in 1..=MAX_ATTEMPTS {
            let sent = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await;

            match sent {
                Ok(response) if response.status().is_success() => {
                    let text = response
                        .text()
                        .await
                        .map_err(|e| SimError::UpstreamUnavailable(e.to_string()))?;
                    return serde_json::from_str(&text)
                        .map_err(|e| SimError::InvalidResponse(format!("{path}: {e}")));
                }
                Ok(response) if response.status().is_server_error() => {
                    last_err = Some(SimError::UpstreamUnavailable(format!(
                        "{path}: {}",
                        response.status()
                    )));
                }
                Ok(response) => {
                    return Err(SimError::InvalidResponse(format!(
                        "{path}: unexpected status {}",
                        response.status()
                    )));
                }
                Err(e) if e.is_timeout() => {
                    last_err = Some(SimError::UpstreamUnavailable(format!("{path}: timed out")));
                }
                Err(e) => return Err(SimError::UpstreamUnavailable(e.to_string())),
            }

            if attempt < MAX_ATTEMPTS {
                warn!(path, attempt, "ai caller retrying after transient failure");
            }
        }

        Err(last_err.unwrap_or_else(|| SimError::UpstreamUnavailable(path.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_config() -> serde_json::Value {
        serde_json::json!({
            "market_cap_threshold": "5000",
            "only_new_tokens": true,
            "min_buys_for_entry": 3,
            "entry_time_window_sec": 60,
            "take_profit_pct": "25",
            "stop_loss_pct": "10",
            "max_hold_time_sec": 600,
            "fixed_position_size_sol": "1.0",
            "initial_balance": "10.0",
        })
    }

    #[tokio::test]
    async fn generate_strategy_parses_successful_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/strategies/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "strategy": sample_config(),
                "name": "momentum-v2",
            })))
            .mount(&server)
            .await;

        let caller = AiCaller::new(server.uri(), "key", "gpt-4o-mini");
        let generated = caller
            .generate_strategy("top performers", serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(generated.name.as_deref(), Some("momentum-v2"));
        assert_eq!(generated.config.take_profit_pct, dec!(25));
    }

    #[tokio::test]
    async fn generate_strategy_retries_on_server_error_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/strategies/generate"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/strategies/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "strategy": sample_config(),
            })))
            .mount(&server)
            .await;

        let caller = AiCaller::new(server.uri(), "key", "gpt-4o-mini");
        let generated = caller
            .generate_strategy("top performers", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(generated.config.min_buys_for_entry, 3);
    }

    #[tokio::test]
    async fn persistent_server_errors_surface_as_upstream_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/strategies/generate"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let caller = AiCaller::new(server.uri(), "key", "gpt-4o-mini");
        let err = caller
            .generate_strategy("prompt", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, SimError::UpstreamUnavailable(_)));
    }

    #[tokio::test]
    async fn malformed_body_surfaces_as_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/performance/analyze"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let caller = AiCaller::new(server.uri(), "key", "gpt-4o-mini");
        let err = caller
            .analyze_performance(serde_json::json!({}), serde_json::json!([]))
            .await
            .unwrap_err();
        assert!(matches!(err, SimError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn analyze_performance_parses_rating_and_adjustments() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/performance/analyze"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "rating": "good",
                "narrative": "steady ROI with low drawdown",
                "suggested_adjustments": {"stop_loss_pct": "8"},
            })))
            .mount(&server)
            .await;

        let caller = AiCaller::new(server.uri(), "key", "gpt-4o-mini");
        let analysis = caller
            .analyze_performance(serde_json::json!({"roi": "0.3"}), serde_json::json!([]))
            .await
            .unwrap();
        assert_eq!(analysis.rating, PerformanceRating::Good);
        assert!(analysis.suggested_adjustments.is_some());
    }
}
