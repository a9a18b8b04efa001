pub mod agent;
pub mod cache;
pub mod chat;
pub mod config;
pub mod constants;
pub mod database;
pub mod form;
pub mod llm_interaction;
pub mod seed;
pub mod session;
pub mod web_server;
