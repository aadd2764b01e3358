//! SkillHub real-time fan-out server library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod adapter;
pub mod config;
pub mod db;
pub mod error;
pub mod fanout;
pub mod routes;
pub mod state;
pub mod ws;
