//! # Crawler Module
//!
//! Implements the engine that runs a crawl.
//!
//! ## Overview
//!
//! The crawler module provides the main `Crawler` struct and the tasks it
//! spawns. Requests flow from the scheduler to the per-request state machine,
//! succeeded responses flow to the parser workers, and records flow to the
//! export dispatcher.
//!
//! ## Key Components
//!
//! - **Crawler**: owns the components and drives startup and shutdown
//! - **RequestHandler**: the per-request state machine (admission, cache,
//!   middleware, retry, redirect)
//! - **Downloader Task**: pulls requests from the scheduler, one task each
//! - **Parser Task**: a fixed pool of workers running `Spider::parse`
//! - **Item Processor**: fans records out to every exporter
//! - **MiddlewareManager**: runs the request and response processor chains
//!
//! ## Architecture
//!
//! Every stage runs in its own Tokio task and stages talk over channels: a
//! `kanal` queue for requests and a bounded `kanal` channel for responses,
//! then unbounded `tokio` channels for records so exporters never apply
//! backpressure to the crawl.

mod core;
mod item_processor;
mod middleware_manager;
mod request_handler;
mod response_parser;

pub use core::Crawler;
pub(crate) use item_processor::spawn_item_processor_task;
pub use middleware_manager::MiddlewareManager;
pub(crate) use request_handler::spawn_downloader_task;
pub use request_handler::{RequestHandler, RequestOutcome, RequestState};
pub(crate) use response_parser::spawn_parser_task;
