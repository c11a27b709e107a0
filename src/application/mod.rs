pub mod handlers;
pub mod scheduler;
pub mod services;
pub mod usecases;
