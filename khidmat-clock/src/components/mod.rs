//! Contains the building blocks the engines are assembled from.
//!
//! Watchers react to time passing (a new calendar day, a housekeeping interval
//! elapsing); the stage sequence walks a fixed list of timed stages. The
//! engines own these components and drive them from their tick handlers.

pub mod sequence;
pub mod watcher;
