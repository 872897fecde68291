pub mod config;
pub mod db;
pub mod gemini;
pub mod generator;
pub mod images;
pub mod link;
pub mod model;
pub mod orchestrator;
pub mod server;
pub mod wordpress;
