use std::sync::Arc;

use poem_openapi::Tags;

use crate::application::usecases::{
    get_event::GetEventUseCase, list_events::ListEventsUseCase, relay_health::RelayHealthUseCase,
    requeue_event::RequeueEventUseCase,
};

#[derive(Clone)]
pub struct ApiState {
    pub list_events_usecase: Arc<ListEventsUseCase>,
    pub get_event_usecase: Arc<GetEventUseCase>,
    pub requeue_event_usecase: Arc<RequeueEventUseCase>,
    pub relay_health_usecase: Arc<RelayHealthUseCase>,
}

/// Enum of API sections (tags)
#[derive(Tags)]
pub enum EndpointsTags {
    Health,
    Outbox,
}
