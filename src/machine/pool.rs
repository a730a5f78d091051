//! Task pool - a free list of recycled task objects
//!
//! Owned by the loop thread alone. A big tree produces one task per folder
//! plus one per deletion batch; recycling keeps that from being one heap
//! allocation (and one error-buffer allocation) each. Correctness does not
//! depend on it.

use std::sync::Arc;

use crate::machine::task::{Phase, Shared, Task};
use crate::tree::Folder;

pub(crate) struct TaskPool {
    shared: Arc<Shared>,
    cache: Vec<Task>,
    allocated: usize,
}

impl TaskPool {
    pub fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            cache: Vec::new(),
            allocated: 0,
        }
    }

    /// Return a recycled or freshly allocated task, assigned to its slot
    pub fn get(&mut self, folder: Arc<Folder>, phase: Phase) -> Task {
        let mut task = self.cache.pop().unwrap_or_else(|| {
            self.allocated += 1;
            Task::new(Arc::clone(&self.shared))
        });
        task.assign(folder, phase);
        task
    }

    /// Clear a task's transient state and put it back on the free list
    pub fn put(&mut self, mut task: Task) {
        task.reset();
        self.cache.push(task);
    }

    /// True when every task handed out has been returned
    pub fn unused(&self) -> bool {
        self.cache.len() == self.allocated && self.cache.iter().all(Task::is_idle)
    }

    pub fn allocated(&self) -> usize {
        self.allocated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsops::Attrs;
    use std::path::PathBuf;

    fn pool() -> TaskPool {
        TaskPool::new(Arc::new(Shared::new(8 * 1024, false)))
    }

    fn folder() -> Arc<Folder> {
        Folder::root(PathBuf::from("/tmp/x"), Attrs::default())
    }

    #[test]
    fn test_get_allocates_then_recycles() {
        let mut pool = pool();
        let f = folder();

        let a = pool.get(Arc::clone(&f), Phase::Scan);
        assert_eq!(pool.allocated(), 1);
        assert!(!pool.unused());

        pool.put(a);
        assert!(pool.unused());

        // Recycled, not reallocated.
        let b = pool.get(f, Phase::DeleteFolder);
        assert_eq!(pool.allocated(), 1);
        assert_eq!(b.phase(), Phase::DeleteFolder);
        pool.put(b);
    }

    #[test]
    fn test_put_clears_assignment() {
        let mut pool = pool();
        let task = pool.get(folder(), Phase::DeleteFiles { first: 0, count: 3 });
        pool.put(task);

        let task = pool.get(folder(), Phase::Scan);
        assert_eq!(task.phase(), Phase::Scan);
        assert!(task.errors().is_empty());
        pool.put(task);
    }
}
