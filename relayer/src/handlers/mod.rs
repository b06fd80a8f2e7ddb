pub mod public;
pub mod relay;
pub mod sessions;
