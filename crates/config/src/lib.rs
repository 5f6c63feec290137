//! Configuration loading for the beacon gateway.
//!
//! Discovery order: project-local `beacon.{toml,yaml,yml,json}`, then
//! `~/.config/beacon/`. `${ENV_VAR}` placeholders are substituted before
//! parsing so secrets can stay out of the file.

mod env_subst;
mod loader;
mod schema;

pub use {
    env_subst::substitute_env,
    loader::{clear_config_dir, config_dir, discover_and_load, load_config, set_config_dir},
    schema::{AuthConfig, BeaconConfig, ChatConfig, DispatchConfig, GatewayConfig},
};
