pub mod admission;
pub mod app_state;
pub mod catalog;
pub mod providers;
pub mod vault;
