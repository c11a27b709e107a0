pub mod cycle;
pub mod outbox_event;

pub use cycle::CycleReport;
pub use outbox_event::{
    Claim, FailureDisposition, NewOutboxEvent, OutboxEvent, OutboxStatus, StatusCounts,
};
