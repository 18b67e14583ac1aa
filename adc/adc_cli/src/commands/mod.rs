//! Command implementations for the ADC CLI

pub mod app;
pub mod boot;
pub mod inspect;
pub mod preset;
