pub mod config;
pub mod graph;
pub mod policy;
pub mod server;
pub mod web;
