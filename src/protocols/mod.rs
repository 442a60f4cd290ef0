//! Protocols implemented outside smithay.

pub mod gamma_control;
