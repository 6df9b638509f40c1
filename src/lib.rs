//! ACP Bridge - lets clients written against one agent wire protocol drive
//! a backend that speaks the Agent Client Protocol (ACP).
//!
//! ## Architecture
//!
//! ```text
//!  client (stdio NDJSON / HTTP)
//!        │  JSON-RPC
//! ┌──────▼──────────────────────────────────────────────────────────┐
//! │                         Bridge Engine                           │
//! │  codec ─► routing table ─► client adapter (acp|copilot|claude)  │
//! │                                   │                             │
//! │   AdapterContext: sessions · kill switch · approval gate ·      │
//! │                   redactor · recorder (tap) · hub reporter      │
//! │                                   │                             │
//! │   event pump ◄── agent events ◄── Agent Client ──► requests     │
//! │       │  translate + render                                     │
//! └───────┼──────────────────────────────┬──────────────────────────┘
//!         ▼                              │ ACP (NDJSON over stdio)
//!   client notifications          ┌──────▼──────┐
//!                                 │  ACP agent  │
//!                                 └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`rpc`]: JSON-RPC 2.0 envelopes and line codec
//! - [`agent`]: ACP agent process and request correlation
//! - [`translate`]: normalized messages and ACP/Copilot shapes
//! - [`adapters`]: client dialects and the shared context
//! - [`bridge`]: engine, event pump, stdio and HTTP transports
//! - [`session`]: local session registry
//! - [`interceptors`]: kill switch, approval gate, redaction
//! - [`tap`]: per-session frame recorder
//! - [`hub`]: control-plane reporting and commands
//! - [`config`]: configuration management

pub mod adapters;
pub mod agent;
pub mod bridge;
pub mod config;
pub mod error;
pub mod hub;
pub mod interceptors;
pub mod rpc;
pub mod session;
pub mod tap;
pub mod translate;

pub use config::BridgeConfig;
pub use error::{Error, Result};
