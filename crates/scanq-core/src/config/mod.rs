mod defaults;
mod resolve;
mod types;

// Re-export config schema types
pub use self::resolve::{
    default_config_search_paths, expand_tilde, load_config, minimal_config_template,
    resolve_config_path, state_dir, ConfigSource,
};
pub use self::types::*;
