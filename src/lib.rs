//! Host-side command/response driver for serial-attached inertial
//! measurement units.
//!
//! The device answers two-letter opcodes with exactly one asynchronous
//! reply each, delivered out-of-band by an external receive path. This
//! crate turns that into synchronous-looking calls with deadlines, and
//! runs the device's long procedures (magnetic alignment, firmware
//! upgrade) as abortable background workflows.
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌───────────────┐
//! │ dispatch │──▶│ ImuDriver   │──▶│ DeviceLink     │──▶ Transport ──▶ device
//! └──────────┘   │  caches     │   │  correlator    │
//!                └─────┬──────┘   │  mailbox ◀─────│◀── ReplySink ◀── receive path
//!                      │          └───────┬───────┘
//!                      ▼                  │
//!               ┌────────────┐           │ round trips
//!               │ long ops    │───────────┘
//!               │ align · fw  │──▶ EventSink (complete / error / progress)
//!               └────────────┘
//! ```
//!
//! Transport I/O, wire framing, reply parsing, identification-text
//! parsing and properties retrieval are collaborator concerns behind the
//! traits in [`ports`] and [`link::transport`].

#![deny(unused_must_use)]

pub mod config;
pub mod decode;
pub mod driver;
pub mod error;
pub mod events;
pub mod link;
pub mod ops;
pub mod ports;
pub mod protocol;
pub mod sim;
