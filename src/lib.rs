pub mod builder;
pub mod delivery;
pub mod docs;
pub mod errors;
pub mod nix;
pub mod registry;
pub mod server;
