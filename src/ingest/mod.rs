//! Line-to-event ingestion: event types, the classifier and the matrix assembler.

pub mod classifier;
pub mod events;
pub mod matrix;

pub use classifier::classify;
pub use events::{AssemblerMode, ParsedEvent, RawLine, Reading};
pub use matrix::MatrixAssembler;
