//! Application Layer - Port definitions.
//!
//! Interfaces that connect price producers to the fan-out hub without either
//! side knowing the other's concrete type.

/// Port interfaces for price production and consumption.
pub mod ports;
