pub mod data_structures;
pub mod error;
pub mod id_counter;
pub mod macros;
pub mod parser;
pub mod rpc;
pub mod timeutils;
pub mod wrapped;

pub use data_structures::{Map, Set};
pub use id_counter::IdCounter;
pub use wrapped::WrappedRcRefCell;
