//! Fotobox image processing
//!
//! This library provides the coordinator and worker sides of the fotobox
//! pipeline: clients upload a photo to the coordinator, which stores it and
//! dispatches a task over a Redis queue; a worker fetches the raw photo over
//! HTTP, transforms it, and publishes the result back for the client to
//! download.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
