pub mod backend;
pub mod cli;
pub mod color;
pub mod completion;
pub mod delegate;
pub mod grab;
pub mod observer;
pub mod snapshot;
pub mod types;

pub use delegate::DisplayDelegate;
