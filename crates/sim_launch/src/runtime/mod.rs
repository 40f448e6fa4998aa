//! Runtime components: launching, probing, sequencing and the shutdown gate

pub mod listeners;
pub mod probe;
pub mod process;
pub mod sequencer;
pub mod shutdown;

pub use listeners::*;
pub use probe::*;
pub use process::*;
pub use sequencer::*;
pub use shutdown::*;
