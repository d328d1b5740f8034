//! Per-mission wrapper: supervises one agent process and keeps it current.

pub mod wrapper;
