pub mod filters;
pub mod store;
