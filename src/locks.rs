//! Record-granular concurrency control for the trainer file.
//!
//! The manager mediates two regimes. Per-id readers/writer locks let sessions
//! touch independent records in parallel: any number of readers may share one
//! id, a writer owns its id alone, and queued writers are served in FIFO order
//! ahead of readers so a reader convoy cannot starve a pending update. A global
//! gate sits above the per-id layer: every per-id operation holds its shared
//! side for the operation's full duration, and a whole-file scan takes it
//! exclusively, so the scan observes a state consistent with some serial order
//! of the per-id operations it excluded.
//!
//! The gate is writer-preferring by construction: a waiting scan blocks new
//! shared acquisitions, which `std::sync::RwLock` leaves up to the platform.
//!
//! Lock order is always gate (shared) → per-id mutex → condition wait, and a
//! scan holder never touches a per-id mutex, so the two layers cannot deadlock.
//!
//! Entries in the per-id table are created on first use and never collected;
//! the id space tops out at 65535 and each entry is a few dozen bytes.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

/// Locks a mutex, riding over poison from a panicked session. Every critical
/// section in this module leaves its state consistent before it can unwind, so
/// the data under a poisoned guard is still valid.
pub(crate) fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn rewait<'a, T>(cond: &Condvar, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
    cond.wait(guard).unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct RecordState {
    readers: u32,
    writing: bool,
    // tickets of writers waiting for this id, head served first
    write_queue: VecDeque<u64>,
}

#[derive(Default)]
struct RecordLock {
    state: Mutex<RecordState>,
    cond: Condvar,
}

#[derive(Default)]
struct GateState {
    shared: usize,
    exclusive: bool,
    exclusive_waiting: usize,
}

#[derive(Default)]
struct Gate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl Gate {
    fn lock_shared(&self) {
        let mut state = relock(&self.state);
        while state.exclusive || state.exclusive_waiting > 0 {
            state = rewait(&self.cond, state);
        }
        state.shared += 1;
    }

    fn unlock_shared(&self) {
        let mut state = relock(&self.state);
        state.shared -= 1;
        if state.shared == 0 {
            self.cond.notify_all();
        }
    }

    fn lock_exclusive(&self) {
        let mut state = relock(&self.state);
        state.exclusive_waiting += 1;
        while state.exclusive || state.shared > 0 {
            state = rewait(&self.cond, state);
        }
        state.exclusive_waiting -= 1;
        state.exclusive = true;
    }

    fn unlock_exclusive(&self) {
        let mut state = relock(&self.state);
        state.exclusive = false;
        self.cond.notify_all();
    }
}

/// Coordinates per-trainer-id readers/writer locks with a global gate for
/// whole-file scans. Acquisitions return RAII guards, so every lock taken is
/// released on every exit path, panics included.
#[derive(Default)]
pub struct LockManager {
    table: Mutex<HashMap<u16, Arc<RecordLock>>>,
    gate: Gate,
    next_ticket: AtomicU64,
}

impl LockManager {
    /// Creates a manager with an empty lock table.
    pub fn new() -> LockManager {
        LockManager::default()
    }

    fn entry(&self, id: u16) -> Arc<RecordLock> {
        let mut table = relock(&self.table);
        Arc::clone(table.entry(id).or_default())
    }

    /// Acquires shared access to one trainer id. Blocks while a scan holds or
    /// awaits the gate, and while any writer for this id is active or queued.
    pub fn read(&self, id: u16) -> RecordReadGuard<'_> {
        self.gate.lock_shared();
        let entry = self.entry(id);
        {
            let mut state = relock(&entry.state);
            while state.writing || !state.write_queue.is_empty() {
                state = rewait(&entry.cond, state);
            }
            state.readers += 1;
        }
        RecordReadGuard {
            manager: self,
            entry,
        }
    }

    /// Acquires exclusive access to one trainer id. Writers for the same id
    /// are served in the order they arrived.
    pub fn write(&self, id: u16) -> RecordWriteGuard<'_> {
        self.gate.lock_shared();
        let entry = self.entry(id);
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        {
            let mut state = relock(&entry.state);
            state.write_queue.push_back(ticket);
            while state.write_queue.front() != Some(&ticket)
                || state.readers > 0
                || state.writing
            {
                state = rewait(&entry.cond, state);
            }
            state.write_queue.pop_front();
            state.writing = true;
        }
        RecordWriteGuard {
            manager: self,
            entry,
        }
    }

    /// Holds the gate's shared side without naming an id. An append creates a
    /// record no other session can name yet, so the per-id layer has nothing
    /// to serialise; the gate hold keeps it ordered against scans.
    pub fn append(&self) -> AppendGuard<'_> {
        self.gate.lock_shared();
        AppendGuard { manager: self }
    }

    /// Acquires the gate exclusively for a whole-file scan. Blocks until every
    /// in-flight per-id operation drains, and blocks new ones while waiting.
    pub fn scan(&self) -> ScanGuard<'_> {
        self.gate.lock_exclusive();
        ScanGuard { manager: self }
    }
}

/// Shared hold on one trainer id; released on drop.
pub struct RecordReadGuard<'a> {
    manager: &'a LockManager,
    entry: Arc<RecordLock>,
}

impl Drop for RecordReadGuard<'_> {
    fn drop(&mut self) {
        {
            let mut state = relock(&self.entry.state);
            state.readers -= 1;
            if state.readers == 0 {
                self.entry.cond.notify_all();
            }
        }
        self.manager.gate.unlock_shared();
    }
}

/// Exclusive hold on one trainer id; released on drop.
pub struct RecordWriteGuard<'a> {
    manager: &'a LockManager,
    entry: Arc<RecordLock>,
}

impl Drop for RecordWriteGuard<'_> {
    fn drop(&mut self) {
        {
            let mut state = relock(&self.entry.state);
            state.writing = false;
            self.entry.cond.notify_all();
        }
        self.manager.gate.unlock_shared();
    }
}

/// Shared hold on the global gate for an append; released on drop.
pub struct AppendGuard<'a> {
    manager: &'a LockManager,
}

impl Drop for AppendGuard<'_> {
    fn drop(&mut self) {
        self.manager.gate.unlock_shared();
    }
}

/// Exclusive hold on the global gate for a scan; released on drop.
pub struct ScanGuard<'a> {
    manager: &'a LockManager,
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.manager.gate.unlock_exclusive();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    const PATIENCE: Duration = Duration::from_secs(5);
    const SETTLE: Duration = Duration::from_millis(80);

    #[test]
    fn readers_share_one_id() {
        let manager = LockManager::new();
        let first = manager.read(7);
        let second = manager.read(7);
        drop(first);
        drop(second);
    }

    #[test]
    fn disjoint_ids_do_not_block_each_other() {
        let manager = Arc::new(LockManager::new());
        let _writer = manager.write(1);

        let (tx, rx) = mpsc::channel();
        let other = Arc::clone(&manager);
        thread::spawn(move || {
            let _guard = other.write(2);
            let _read = other.read(3);
            tx.send(()).unwrap();
        });

        // id 1 is held for writing the whole time; ids 2 and 3 must not care
        rx.recv_timeout(PATIENCE)
            .expect("operations on other ids should not block");
    }

    #[test]
    fn writer_excludes_readers_of_the_same_id() {
        let manager = Arc::new(LockManager::new());
        let writer = manager.write(4);

        let (tx, rx) = mpsc::channel();
        let other = Arc::clone(&manager);
        thread::spawn(move || {
            let _guard = other.read(4);
            tx.send(()).unwrap();
        });

        assert!(
            rx.recv_timeout(SETTLE).is_err(),
            "reader acquired while a writer held the id"
        );
        drop(writer);
        rx.recv_timeout(PATIENCE)
            .expect("reader should proceed once the writer releases");
    }

    #[test]
    fn queued_writers_go_before_later_readers_in_arrival_order() {
        let manager = Arc::new(LockManager::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let first_writer = manager.write(9);

        let mut handles = Vec::new();
        for tag in ["w2", "w3"] {
            let manager = Arc::clone(&manager);
            let order = Arc::clone(&order);
            handles.push(thread::spawn(move || {
                let _guard = manager.write(9);
                order.lock().unwrap().push(tag);
            }));
            thread::sleep(SETTLE); // fix the queue order before the next contender
        }
        {
            let manager = Arc::clone(&manager);
            let order = Arc::clone(&order);
            handles.push(thread::spawn(move || {
                let _guard = manager.read(9);
                order.lock().unwrap().push("r");
            }));
        }
        thread::sleep(SETTLE);

        drop(first_writer);
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec!["w2", "w3", "r"]);
    }

    #[test]
    fn scan_excludes_per_id_operations() {
        let manager = Arc::new(LockManager::new());
        let scan = manager.scan();

        let (tx, rx) = mpsc::channel();
        let other = Arc::clone(&manager);
        thread::spawn(move || {
            let _guard = other.read(1);
            tx.send(()).unwrap();
        });

        assert!(
            rx.recv_timeout(SETTLE).is_err(),
            "per-id op acquired while the scan held the gate"
        );
        drop(scan);
        rx.recv_timeout(PATIENCE)
            .expect("per-id op should proceed once the scan releases");
    }

    #[test]
    fn waiting_scan_blocks_new_shared_acquisitions() {
        let manager = Arc::new(LockManager::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let reader = manager.read(1);

        let scan_thread = {
            let manager = Arc::clone(&manager);
            let order = Arc::clone(&order);
            thread::spawn(move || {
                let _guard = manager.scan();
                order.lock().unwrap().push("scan");
            })
        };
        thread::sleep(SETTLE);

        let late_reader = {
            let manager = Arc::clone(&manager);
            let order = Arc::clone(&order);
            thread::spawn(move || {
                let _guard = manager.read(2);
                order.lock().unwrap().push("late-reader");
            })
        };
        thread::sleep(SETTLE);
        assert!(order.lock().unwrap().is_empty());

        drop(reader);
        scan_thread.join().unwrap();
        late_reader.join().unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["scan", "late-reader"]);
    }

    #[test]
    fn append_hold_defers_a_scan() {
        let manager = Arc::new(LockManager::new());
        let append = manager.append();

        let (tx, rx) = mpsc::channel();
        let other = Arc::clone(&manager);
        thread::spawn(move || {
            let _guard = other.scan();
            tx.send(()).unwrap();
        });

        assert!(rx.recv_timeout(SETTLE).is_err());
        drop(append);
        rx.recv_timeout(PATIENCE)
            .expect("scan should proceed once the append releases");
    }

    #[test]
    fn guards_release_under_contention_stress() {
        let manager = Arc::new(LockManager::new());
        let mut handles = Vec::new();
        for worker in 0u16..8 {
            let manager = Arc::clone(&manager);
            handles.push(thread::spawn(move || {
                for round in 0u16..50 {
                    let id = (worker + round) % 4 + 1;
                    if round % 3 == 0 {
                        let _guard = manager.write(id);
                    } else {
                        let _guard = manager.read(id);
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        // everything drained: a scan must acquire immediately
        let _scan = manager.scan();
    }
}
