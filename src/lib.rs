//! # Chat Relay Library
//!
//! This crate provides a real-time presence and message-delivery server:
//! - WebSocket gateway for live connections and event fan-out
//! - Per-recipient delivery-status lifecycle (sent → delivered → seen)
//! - Presence and typing broadcasting derived from live session state
//! - PostgreSQL for message and receipt persistence
//!
//! ## Architecture
//!
//! The crate follows Clean Architecture principles:
//!
//! - **Domain Layer**: Entities, the receipt state machine, repository traits
//! - **Application Layer**: Delivery pipeline and presence broadcaster
//! - **Infrastructure Layer**: Database repositories and metrics
//! - **Presentation Layer**: HTTP handlers and the WebSocket gateway
//!
//! ## Module Structure
//!
//! ```text
//! chat_relay/
//! +-- config/         Configuration management
//! +-- domain/         Entities, value objects, and pure delivery rules
//! +-- application/    Services, gateway events, and DTOs
//! +-- infrastructure/ Database and metrics implementations
//! +-- presentation/   HTTP routes and WebSocket handlers
//! +-- shared/         Common utilities (errors, snowflake IDs)
//! ```

// Configuration module
pub mod config;

// Domain layer - Core business logic
pub mod domain;

// Application layer - Delivery pipeline and presence
pub mod application;

// Infrastructure layer - External implementations
pub mod infrastructure;

// Presentation layer - HTTP and WebSocket handlers
pub mod presentation;

// Shared utilities
pub mod shared;

// Application startup and state management
pub mod startup;

// Telemetry and observability
pub mod telemetry;
