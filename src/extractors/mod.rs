// src/extractors/mod.rs
pub mod register;
pub mod validate;
