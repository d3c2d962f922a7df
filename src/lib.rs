//! Max messenger client - main library
//!
//! - **maxwire**: connection core (re-exported from the workspace)
//! - **bin_common**: shared helpers for the binaries (config path, logging,
//!   Ctrl+C handling)
//!
//! ```rust,ignore
//! use max_client::bin_common::{init_logging, load_config_from_env, ShutdownManager};
//! use max_client::maxwire::ClientConfig;
//! ```

pub use maxwire;

pub mod bin_common {
    //! Common utilities for binary executables

    pub mod cli;
    pub mod logging;
    pub mod shutdown;

    pub use cli::{load_config_from_env, parse_args, ConfigSource, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
    pub use logging::init_logging;
    pub use shutdown::ShutdownManager;
}
