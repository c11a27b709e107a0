use std::sync::Arc;

use poem::Result as PoemResult;
use poem_openapi::{
    OpenApi,
    payload::{Json, PlainText},
};
use tracing::error;

use crate::presentation::http::{
    endpoints::root::{ApiState, EndpointsTags},
    mappers::map_health,
    responses::RelayHealthDto,
};

#[derive(Clone)]
pub struct HealthEndpoints {
    state: Arc<ApiState>,
}

impl HealthEndpoints {
    pub fn new(state: Arc<ApiState>) -> Self {
        Self { state }
    }
}

#[OpenApi]
impl HealthEndpoints {
    #[oai(path = "/health", method = "get", tag = EndpointsTags::Health)]
    pub async fn health(&self) -> PlainText<&'static str> {
        PlainText("OK")
    }

    /// Relay loop liveness, breaker state and backlog per status.
    #[oai(path = "/health/relay", method = "get", tag = EndpointsTags::Health)]
    pub async fn relay_health(&self) -> PoemResult<Json<RelayHealthDto>> {
        let health = self
            .state
            .relay_health_usecase
            .execute()
            .await
            .map_err(|err| {
                error!(error = %err, "failed to read relay health");
                poem::Error::from_string(
                    err.to_string(),
                    poem::http::StatusCode::SERVICE_UNAVAILABLE,
                )
            })?;

        Ok(Json(map_health(&health)))
    }
}
