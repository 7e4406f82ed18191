pub mod accumulator;
pub mod channel;
pub mod correlator;
pub mod export;
pub mod recorder;
pub mod service;

pub use tabscope_common::console;
pub use tabscope_common::har;
pub use tabscope_common::protocol;
