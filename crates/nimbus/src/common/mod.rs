pub mod cli;
pub mod setup;
