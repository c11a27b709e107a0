use crate::{
    application::usecases::relay_health::RelayHealth,
    domain::models::{CycleReport, OutboxEvent, StatusCounts},
    presentation::http::responses::{BacklogDto, OutboxEventDto, RelayHealthDto, RelayTotalsDto},
};

pub fn map_event(event: &OutboxEvent) -> OutboxEventDto {
    OutboxEventDto {
        id: event.id,
        event_type: event.event_type.clone(),
        version: event.version.clone(),
        aggregate_id: event.aggregate_id.clone(),
        payload: event.payload.clone(),
        metadata: event.metadata.clone(),
        status: event.status.into(),
        attempts: event.attempts,
        error_message: event.error_message.clone(),
        processed_at: event.processed_at.map(|at| at.to_rfc3339()),
        last_attempt_at: event.last_attempt_at.map(|at| at.to_rfc3339()),
        next_attempt_at: event.next_attempt_at.to_rfc3339(),
        claimed_by: event.claimed_by.clone(),
        claimed_at: event.claimed_at.map(|at| at.to_rfc3339()),
        created_at: event.created_at.to_rfc3339(),
        updated_at: event.updated_at.to_rfc3339(),
    }
}

pub fn map_health(health: &RelayHealth) -> RelayHealthDto {
    RelayHealthDto {
        running: health.relay.running,
        cycles: health.relay.cycles,
        last_cycle_at: health.relay.last_cycle_at.map(|at| at.to_rfc3339()),
        last_error: health.relay.last_error.clone(),
        last_error_at: health.relay.last_error_at.map(|at| at.to_rfc3339()),
        breaker_state: health.breaker_state.into(),
        broker_connected: health.broker_connected,
        backlog: map_backlog(&health.backlog),
        totals: map_totals(&health.relay.totals),
    }
}

fn map_backlog(counts: &StatusCounts) -> BacklogDto {
    BacklogDto {
        pending: counts.pending,
        processing: counts.processing,
        completed: counts.completed,
        failed: counts.failed,
    }
}

fn map_totals(report: &CycleReport) -> RelayTotalsDto {
    RelayTotalsDto {
        claimed: report.claimed as u64,
        completed: report.completed as u64,
        retried: report.retried as u64,
        failed: report.failed as u64,
        skipped: report.skipped as u64,
        released: report.released as u64,
        lost: report.lost as u64,
        expired: report.expired as u64,
    }
}
