//! Command line application around [`nimbus_core`].

pub mod common;
pub mod config;
pub mod jobfile;
pub mod run;
