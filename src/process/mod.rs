//! Submitted jobs and the table that tracks them.

mod id;
#[allow(clippy::module_inception)]
mod process;
mod table;

pub use id::{new_id, search, LookupError};
pub use process::{Process, ProcessSpec, ProcessState, ProcessView};
pub use table::ProcessTable;
