// src/lib.rs

//! freshtrack - content freshness tracking library

pub mod config;
pub mod detect;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod store;
