pub mod archive;
pub mod commands;
pub mod compress;
pub mod config;
pub mod hardlink;
pub mod index;
pub mod passphrase;
pub mod platform;
pub mod repo;
pub mod storage;
pub mod upgrade;

pub use vger_types::error;

#[cfg(test)]
mod tests;
#[cfg(test)]
mod testutil;
