//! Bridge core and client transports
//!
//! The engine routes client methods to adapters and pumps agent events back
//! through the configured dialect. `stdio` and `http` carry the client side.

mod engine;
pub mod http;
mod pump;
pub mod stdio;

pub use engine::{BridgeEngine, RoutingTable};
pub use http::{router, serve_http, HttpState};
pub use pump::{
    approval_request_id, parse_approval_id, parse_relay_id, relay_request_id, PumpItem,
    APPROVAL_ID_PREFIX, RELAY_ID_PREFIX,
};
pub use stdio::{run_stdio, serve_lines};
