//! Scientific image import server library.
//!
//! The import pipeline (staging, conversion, duplicate resolution, chunked
//! upload with verification and progress events) lives in [`services`] and is
//! usable without the HTTP layer in [`api`].

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod entity;
pub mod error;
pub mod middleware;
pub mod migration;
pub mod models;
pub mod services;
