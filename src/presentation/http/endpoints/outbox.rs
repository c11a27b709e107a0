use std::sync::Arc;

use poem::Result as PoemResult;
use poem_openapi::{
    OpenApi,
    param::{Path, Query},
    payload::Json,
};
use uuid::Uuid;

use crate::{
    application::usecases::list_events::ListEventsRequest,
    domain::errors::PersistenceError,
    presentation::{
        http::{
            endpoints::root::{ApiState, EndpointsTags},
            mappers::map_event,
            responses::{OutboxEventDto, PaginatedEventsDto},
        },
        models::OutboxStatusDto,
    },
};

#[derive(Clone)]
pub struct OutboxEndpoints {
    state: Arc<ApiState>,
}

impl OutboxEndpoints {
    pub fn new(state: Arc<ApiState>) -> Self {
        Self { state }
    }
}

#[OpenApi]
impl OutboxEndpoints {
    #[oai(path = "/outbox/events", method = "get", tag = EndpointsTags::Outbox)]
    pub async fn list_events(
        &self,
        status: Query<Option<OutboxStatusDto>>,
        limit: Query<Option<u32>>,
        offset: Query<Option<u32>>,
    ) -> PoemResult<Json<PaginatedEventsDto>> {
        let result = self
            .state
            .list_events_usecase
            .execute(ListEventsRequest {
                status: status.0.map(Into::into),
                limit: limit.0,
                offset: offset.0,
            })
            .await
            .map_err(store_error)?;

        Ok(Json(PaginatedEventsDto {
            events: result.events.iter().map(map_event).collect(),
            has_more: result.has_more,
            next_offset: result.next_offset,
        }))
    }

    #[oai(path = "/outbox/events/:event_id", method = "get", tag = EndpointsTags::Outbox)]
    pub async fn get_event(&self, event_id: Path<Uuid>) -> PoemResult<Json<OutboxEventDto>> {
        let event = self
            .state
            .get_event_usecase
            .execute(event_id.0)
            .await
            .map_err(store_error)?;

        Ok(Json(map_event(&event)))
    }

    /// Moves a `failed` event back to `pending` so the relay picks it up again.
    #[oai(
        path = "/outbox/events/:event_id/requeue",
        method = "post",
        tag = EndpointsTags::Outbox,
    )]
    pub async fn requeue_event(&self, event_id: Path<Uuid>) -> PoemResult<Json<OutboxEventDto>> {
        let event = self
            .state
            .requeue_event_usecase
            .execute(event_id.0)
            .await
            .map_err(store_error)?;

        Ok(Json(map_event(&event)))
    }
}

fn store_error(err: PersistenceError) -> poem::Error {
    let status = match &err {
        PersistenceError::NotFound(_) => poem::http::StatusCode::NOT_FOUND,
        PersistenceError::InvalidTransition { .. } | PersistenceError::ClaimLost(_) => {
            poem::http::StatusCode::CONFLICT
        }
        PersistenceError::Timeout => poem::http::StatusCode::SERVICE_UNAVAILABLE,
        _ => poem::http::StatusCode::INTERNAL_SERVER_ERROR,
    };
    poem::Error::from_string(err.to_string(), status)
}
