pub mod bootstrap;
pub mod gateway;
pub mod orchestrator;
pub mod pending_queue;
pub mod token_lease;
pub mod triggers;

#[cfg(test)]
pub(crate) mod fakes;
