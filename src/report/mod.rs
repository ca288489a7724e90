// src/report/mod.rs
pub mod record;
pub mod sheet;
pub mod table;
