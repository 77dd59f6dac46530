pub mod config;
pub mod config_loader;
pub mod config_watcher;
pub mod error;
pub mod events;
pub mod traits;

pub use config::{AppConfig, InstanceSettings, LadderSettings, RuntimeSettings, StrategyConfig};
pub use config_loader::ConfigLoader;
pub use config_watcher::ConfigWatcher;
pub use error::{StraddleError, StraddleResult};
pub use events::{AtmInfo, OptionPair, PriceTick};
pub use traits::{OrderCoordinator, StrikeLookup, TickSource};
