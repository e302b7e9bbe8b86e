//! CLI command implementations.
//!
//! Each submodule owns one `Commands` variant:
//!
//! | Module   | Commands handled |
//! |----------|------------------|
//! | `serve`  | `Serve`          |
//! | `tasks`  | `Tasks`          |
//! | `docs`   | `Docs`           |
//! | `config` | `Config`         |

pub mod config;
pub mod docs;
pub mod serve;
pub mod tasks;

pub use config::cmd_config;
pub use docs::cmd_docs;
pub use serve::cmd_serve;
pub use tasks::cmd_tasks;
