mod loader;
mod types;

pub use loader::{CONFIG_FILE, LOADDATA_ARGS_ENV, ROOT_ENV, apply_env, load, resolve_root};
pub use types::{
    Config, DemoConfig, DisplayConfig, ReadinessBudget, RedisConfig, ServiceKind, TorConfig,
    VNC_PORT, VncConfig,
};
