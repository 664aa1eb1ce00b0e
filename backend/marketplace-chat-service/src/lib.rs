//! Buyer/seller chat for a classified-listings marketplace: conversations
//! scoped to a listing, ordered messages, in-app notifications and a live
//! change feed that keeps open clients in sync.

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod realtime;
pub mod redis_client;
pub mod repository;
pub mod routes;
pub mod services;
pub mod session;
pub mod state;
