//! Core types and configuration for cage — a canary-gated gradual
//! rollout tool for ECS-style container services.
//!
//! This crate holds the pieces every other crate depends on: the deploy
//! configuration record, deploy-context loading with environment-variable
//! templating, and the plain-value domain types the rollout engine works
//! with (service/task snapshots, health samples, payload specs).

pub mod config;
pub mod context;
pub mod error;
pub mod types;

pub use config::{DeployConfig, DeployOverrides, TaskDefinitionSource};
pub use error::ConfigError;
