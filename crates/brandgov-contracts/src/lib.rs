pub mod brand;
pub mod events;
pub mod jobs;
pub mod models;
pub mod store;
