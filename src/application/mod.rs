pub mod agent;
pub mod bridge;
pub mod stream;
