// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Simulation components for a split-transaction crossbar fabric.
//!
//! The fabric connects `N` ingress ports to `M` egress ports:
//!
//! ```text
//!   ingress i -> Demux i -> LinkStage (i, j) -> Mux j -> egress j
//!                   |
//!                   +-> ErrorResponder (unmapped addresses, disabled pairs)
//! ```
//!
//! The [crossbar](crate::crossbar) builds the whole fabric from a
//! [`CrossbarConfig`](crate::config::CrossbarConfig). The
//! [burst converter](crate::burst_converter) is a standalone component that
//! rewrites descending write bursts as incrementing ones.

pub mod arbiter;
pub mod burst_converter;
pub mod bus;
pub mod config;
pub mod connect;
pub mod crossbar;
pub mod decoder;
pub mod demux;
pub mod error_responder;
pub mod link;
pub mod mux;
pub mod test_helpers;
pub mod types;
