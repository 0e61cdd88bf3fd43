//! Child process execution with recorded streams.

mod chunk;
mod engine;
mod error;
mod input;
mod spawn;
mod spec;

pub use chunk::{ChunkChannel, ChunkOptions, ChunkResult};
pub use engine::{ExecState, Execution, StreamFault};
pub use error::{ExecError, ExitStatus};
pub use input::InputWriter;
pub use spec::{CommandSpec, ExecMode};
