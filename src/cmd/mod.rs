//! CLI command implementations.
//!
//! | Module   | Commands handled |
//! |----------|------------------|
//! | `serve`  | `Serve`          |
//! | `batch`  | `Batch`          |
//! | `config` | `Config`         |

pub mod batch;
pub mod config;
pub mod serve;

pub use batch::{BatchArgs, cmd_batch};
pub use config::cmd_config;
pub use serve::cmd_serve;
