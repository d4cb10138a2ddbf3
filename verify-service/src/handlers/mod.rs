pub mod app;
pub mod callback;
pub mod interactions;
pub mod metrics;
pub mod verify;
