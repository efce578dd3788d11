#![forbid(unsafe_code)]

//! Shared building blocks for the vidhub backend: configuration, the libsql
//! entity store, view assembly, sessions and the media asset host.

pub mod api;
pub mod assets;
pub mod auth;
pub mod cascade;
pub mod config;
pub mod id;
pub mod personalization;
pub mod pipeline;
pub mod routes;
pub mod security;
pub mod session;
pub mod store;
pub mod uploads;
pub mod views;
