pub mod audit;
pub mod auth;
pub mod config;
pub mod error;
pub mod mail;
pub mod migrations;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
