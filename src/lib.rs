//! Library crate for voice-ledger, exposing modules for the server binary and tests.

pub mod config;
pub mod dao;
mod dto;
mod error;
pub mod routes;
pub mod services;
pub mod state;
