pub mod allocations;
pub mod bootstrap;
pub mod capacity;
pub mod command_dispatcher;
pub mod config_sync;
pub mod eligibility;
pub mod node_locks;
pub mod node_registry;
pub mod server_registry;
pub mod token_manager;

pub use bootstrap::DeployTokens;
pub use command_dispatcher::CommandDispatcher;
pub use config_sync::{ConfigSynchronizer, SyncOutcome};
pub use eligibility::{HostResolver, SystemResolver};
