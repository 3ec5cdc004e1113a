//! Property tree: typed leaf values ([`data`]), the recursive ordered map
//! that holds them ([`directory`]), and the named, secured application
//! that owns one such tree ([`application`]).

pub mod application;
pub mod data;
pub mod directory;

pub use application::ApplicationProperties;
pub use data::{PropertyData, Variant};
pub use directory::PropertyDirectory;
