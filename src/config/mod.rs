//! 配置层：启动时一次性加载并校验，运行期不可变。
//!
//! # Configuration Layer
//!
//! Vendors, pools, destinations and dispatcher knobs are loaded once from YAML at
//! startup and are immutable afterwards. Validation failures are the only errors
//! that abort the process.
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`types`] | Serde structures and defaults |
//! | [`loader`] | File loading, built-in fallback, environment overrides |
//! | [`validator`] | Startup validation |
//! | [`error`] | Configuration error type |

pub mod error;
pub mod loader;
pub mod types;
pub mod validator;

pub use error::ConfigError;
pub use types::*;
