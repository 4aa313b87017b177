//! Primary/replica content service built on an event-sourced replication core.
//!
//! One node (the primary) accepts every write. Each accepted mutation is
//! recorded as an ordered, durable event and then pushed, best effort, to the
//! configured replicas. Replicas apply events idempotently and can always
//! resynchronize by pulling everything after their last applied event id.
//!
//! - [`event`] defines the closed set of event payloads and their wire shape.
//! - [`store`] owns the SQLite connection and the schema for a single node.
//! - [`log`] is the append-only event log (`append` / `read_since`).
//! - [`apply`] maps one event onto storage mutations; shared by every node.
//! - [`primary`] turns validated writes into applied + logged + published events.
//! - [`publish`] fans new events out to replicas without blocking the caller.
//! - [`receiver`] validates pushed events on a replica and applies them.
//! - [`catchup`] pulls missed events from the primary's `/sync` endpoint.
//! - [`views`] read-side queries served by both roles.
//! - [`http`] axum routers for the primary and replica roles.
//! - [`node`] binds listeners, wires components together and runs a node.
//! - [`cli`] parses the command-line interface for both roles.

pub mod apply;
pub mod catchup;
pub mod cli;
pub mod error;
pub mod event;
pub mod http;
pub mod log;
pub mod node;
pub mod primary;
pub mod publish;
pub mod receiver;
pub mod store;
pub mod views;
