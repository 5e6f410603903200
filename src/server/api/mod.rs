pub mod health_controller;
pub mod hls_controller;
pub mod streams_controller;
