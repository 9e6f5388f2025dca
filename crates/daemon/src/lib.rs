// Re-export modules for library use
pub mod config;
pub mod observer;
pub mod sensor;
