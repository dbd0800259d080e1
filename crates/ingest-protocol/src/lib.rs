// SPDX-License-Identifier: MIT OR Apache-2.0
//! Binary WS multiplex protocol (spec.md §4.10): frame codec, request
//! correlation, and the action envelope shared between the WS layer and
//! the internal HTTP surface it proxies to.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod action;
pub mod correlation;
pub mod frame;

pub use action::{decode_binary_result, encode_binary_result, ActionEnvelope, ActionResult, WsErrorPayload, WsResultPayload};
pub use correlation::{sign, verify, CorrelationSecret};
pub use frame::{decode, encode, Compression, Frame, FrameError, PayloadKind, HEADER_LEN, PROTOCOL_VERSION};
