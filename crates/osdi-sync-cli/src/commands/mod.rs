pub mod batch;
pub mod config;
pub mod lock;
pub mod queue;
pub mod record;
