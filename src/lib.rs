//! The Qube Monitor shows a teacher which students need help.
//!
//! Every student has a Qube, a small cube with an orientation sensor. Lying
//! screen down it means "all good", logo up means "I have a question" and
//! screen up means "I need help". The Qubes radio their state to a receiver
//! that prints one line per packet on a serial port, like `L,123456,R`.
//!
//! This crate reads those lines, keeps a status board of the students on the
//! class roster, keeps the serial link healthy and shows everything in a
//! terminal dashboard. A simulated classroom can stand in for the hardware.

#![warn(missing_docs)]
pub mod activity_log;
pub mod args;
pub mod board;
pub mod config;
pub mod crash_report;
pub mod error;
pub mod gui;
pub mod link;
pub mod monitor;
pub mod roster;
pub mod signal;
pub mod simulator;
