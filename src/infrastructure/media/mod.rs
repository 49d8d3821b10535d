//! Media provider adapters

pub mod local;

pub use local::LocalMediaProvider;
