use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::exec::ExecError;
use crate::process::id::{new_id, search, LookupError};
use crate::process::process::{Process, ProcessSpec};

/// All known processes, keyed by id. Entries leave only through [`Self::remove`].
#[derive(Clone, Default)]
pub struct ProcessTable {
    procs: Arc<RwLock<HashMap<String, Arc<Process>>>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new process under a fresh id.
    pub fn insert(&self, spec: ProcessSpec) -> Result<Arc<Process>, ExecError> {
        let process = Arc::new(Process::new(new_id(), spec)?);
        self.procs
            .write()
            .insert(process.id().to_string(), Arc::clone(&process));
        tracing::debug!(id = process.id(), name = %process.spec().name, "process registered");
        Ok(process)
    }

    /// Looks a process up by id or unique id prefix.
    pub fn find(&self, prefix: &str) -> Result<Arc<Process>, LookupError> {
        let procs = self.procs.read();
        let id = search(procs.keys().map(String::as_str), prefix)?;
        procs
            .get(id)
            .cloned()
            .ok_or_else(|| LookupError::NotFound(prefix.to_string()))
    }

    /// Every process, ordered by id.
    pub fn list(&self) -> Vec<Arc<Process>> {
        let mut procs: Vec<_> = self.procs.read().values().cloned().collect();
        procs.sort_by(|a, b| a.id().cmp(b.id()));
        procs
    }

    /// Removes a process, killing its running command first.
    pub fn remove(&self, prefix: &str) -> Result<Arc<Process>, LookupError> {
        let process = self.find(prefix)?;
        if let Err(err) = process.kill() {
            tracing::warn!(id = process.id(), error = %err, "failed to kill removed process");
        }
        self.procs.write().remove(process.id());
        Ok(process)
    }

    pub fn len(&self) -> usize {
        self.procs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
