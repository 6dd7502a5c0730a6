//! Configuration loading and env substitution.
//!
//! Config files: `lembar.toml`, `lembar.yaml`, `lembar.yml` or `lembar.json`
//! Searched in `./` then `~/.config/lembar/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-default}` substitution in the raw
//! file before parsing.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{config_dir, discover_and_load, find_config_file, load_config},
    schema::{BotConfig, DocumentConfig, LembarConfig, MessagesConfig, WhatsAppSection},
};
