//! Foreman Engine Library
//!
//! Execution substrate for a multi-agent orchestration system: a bounded pool
//! of LLM-backed workers and per-project isolated container environments.
//! It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Health gate: bounded readiness polling
pub mod health;

/// Managed resource registry shared by the pools
pub mod registry;

/// LLM provider directory and transports
pub mod provider;

/// Worker pool
pub mod worker;

/// Per-project container environments
pub mod containers;

/// Message bus for task publication
pub mod message_bus;

/// Control API
pub mod api;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
