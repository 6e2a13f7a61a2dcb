//! Shared setup for the end to end tests
pub mod object_dicts;
pub mod sim_bus;
pub mod test_bus;
