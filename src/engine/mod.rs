//! # Engine Module
//!
//! Internal ECS engine implementation.
//!
//! This module contains all core building blocks:
//! - Entity management and the component registry
//! - Component storage (`World`) and queries
//! - Access descriptors, borrow tracking and dependency tracking
//! - Jobs, the per-tick scheduler context and the tick driver
//! - Deferred command buffers
//!
//! Public API exposure is controlled by `lib.rs`.

pub mod types;
pub mod error;
pub mod component;
pub mod storage;
pub mod entity;
pub mod world;
pub mod query;
pub mod borrow;
pub mod access;
pub mod handle;
pub mod dependency;
pub mod commands;
pub mod job;
pub mod context;
pub mod scheduler;
pub mod systems;
pub mod config;
