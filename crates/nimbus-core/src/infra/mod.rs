pub mod config;
pub mod connectivity;
pub mod order;
pub mod pool;
pub mod process;
pub mod provider;
pub mod service;
pub mod state;
pub mod store;

pub use config::{InfrastructureConfig, InfrastructureConfigDef};
pub use service::{create_infra_manager, InfraManagerService};
pub use state::InfraSnapshot;
