pub mod config;
pub mod proxy;

pub use proxy::{
    Backend, Direction, Forward, Listener, ListenerConfig, ProxyContext, RelayOptions,
    RelayState, RelayStats,
};
