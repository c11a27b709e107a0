pub mod get_event;
pub mod list_events;
pub mod relay_health;
pub mod requeue_event;
