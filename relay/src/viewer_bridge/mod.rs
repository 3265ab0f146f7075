pub mod bridge;
pub mod hub;
pub mod model;
