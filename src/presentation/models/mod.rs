use poem_openapi::Enum;

use crate::{application::services::circuit_breaker::BreakerState, domain::models::OutboxStatus};

#[derive(Enum, Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutboxStatusDto {
    #[oai(rename = "pending")]
    Pending,
    #[oai(rename = "processing")]
    Processing,
    #[oai(rename = "completed")]
    Completed,
    #[oai(rename = "failed")]
    Failed,
}

impl From<OutboxStatusDto> for OutboxStatus {
    fn from(value: OutboxStatusDto) -> Self {
        match value {
            OutboxStatusDto::Pending => OutboxStatus::Pending,
            OutboxStatusDto::Processing => OutboxStatus::Processing,
            OutboxStatusDto::Completed => OutboxStatus::Completed,
            OutboxStatusDto::Failed => OutboxStatus::Failed,
        }
    }
}

impl From<OutboxStatus> for OutboxStatusDto {
    fn from(value: OutboxStatus) -> Self {
        match value {
            OutboxStatus::Pending => OutboxStatusDto::Pending,
            OutboxStatus::Processing => OutboxStatusDto::Processing,
            OutboxStatus::Completed => OutboxStatusDto::Completed,
            OutboxStatus::Failed => OutboxStatusDto::Failed,
        }
    }
}

#[derive(Enum, Copy, Clone, Debug, Eq, PartialEq)]
pub enum BreakerStateDto {
    #[oai(rename = "closed")]
    Closed,
    #[oai(rename = "open")]
    Open,
    #[oai(rename = "half_open")]
    HalfOpen,
}

impl From<BreakerState> for BreakerStateDto {
    fn from(value: BreakerState) -> Self {
        match value {
            BreakerState::Closed => BreakerStateDto::Closed,
            BreakerState::Open => BreakerStateDto::Open,
            BreakerState::HalfOpen => BreakerStateDto::HalfOpen,
        }
    }
}
