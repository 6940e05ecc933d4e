pub mod lending_handlers;

pub use lending_handlers::{create_lending_routes, health_check};
