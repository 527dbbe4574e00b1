//! termin-core — domain types for the appointment broker backend.
//!
//! Everything the server stores or transmits is defined here: signed
//! envelopes, appointments and bookings, actor keys, priority tokens,
//! request/response payloads, error kinds and protocol constants.

pub mod actors;
pub mod appointment;
pub mod constants;
pub mod encoding;
pub mod envelope;
pub mod error;
pub mod params;
pub mod provider;
pub mod token;
pub mod types;
