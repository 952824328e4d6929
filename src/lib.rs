//! # Fire Support Simulator
//!
//! A call-for-fire simulation: a forward observer (FO) asks a fire direction
//! center (FDC) for fire on a target, the FDC computes a firing solution and
//! commands a gun, and the gun's reports flow back to the observer.
//!
//! ## Features
//!
//! - **Two protocols**: the FO-FDC exchange (JSON payloads) and the FDC-Gun
//!   exchange (fixed binary payloads), both as closed message enums
//! - **Framed codec**: length-prefixed frames decoded incrementally from
//!   arbitrarily chunked byte streams
//! - **Pure state machines** for the FDC and the FO, with per-stage timeouts
//! - **Async drivers** that run the machines over any duplex byte stream
//!
//! ## Quick Start
//!
//! ```rust
//! use fire_support_sim::config::FdcConfig;
//! use fire_support_sim::mission::Peer;
//! use fire_support_sim::sim::fdc::{FdcInput, FdcMission, FdcState, FdcStateMachine};
//! use tokio::time::Instant;
//!
//! let mut fdc = FdcStateMachine::new(&FdcConfig::default()).unwrap();
//! fdc.handle(FdcInput::LinkUp(Peer::Observer), Instant::now()).unwrap();
//! assert_eq!(fdc.state(), FdcState::Online(FdcMission::Idle));
//! ```
//!
//! ## Architecture
//!
//! - [`types`] - Callsigns, target numbers and ammunition
//! - [`fo_fdc`] - FO-FDC messages
//! - [`fdc_gun`] - FDC-Gun messages
//! - [`codec`] - Framing shared by both protocols
//! - [`mission`] - Target number allocation, mission log and events
//! - [`ballistics`] - Firing solutions
//! - [`link`] - Stream pumps with optional fault injection
//! - [`sim`] - FDC, FO and gun actors
//! - [`config`] - Simulator configuration

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod ballistics;
pub mod codec;
pub mod config;
pub mod error;
pub mod fdc_gun;
pub mod fo_fdc;
pub mod link;
pub mod mission;
pub mod sim;
pub mod types;

// Re-export main public types for convenience
pub use codec::{FrameCodec, FrameReader, WireMessage};
pub use config::SimConfig;
pub use error::{CodecError, ConfigError, MalformedMessage, ProtocolViolation, SimError};
pub use fdc_gun::FdcGunMessage;
pub use fo_fdc::FoFdcMessage;
pub use mission::{MissionEvent, MissionOutcome};
pub use sim::{FdcSimulator, FoSimulator, GunSimulator};
pub use types::{Ammunition, Callsign, TargetNumber};
