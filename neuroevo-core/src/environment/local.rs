//! In-process cluster: every node is a thread, and synchronization goes
//! through a shared exchange guarded by a mutex and a breakable barrier.

use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use super::{fold_of, Environment, SyncMode};
use crate::error::{Result, SyncError};

// Barrier that a departing node can break, so that peers waiting for it
// fail instead of blocking forever.
struct Gate {
    nodes: usize,
    state: Mutex<GateState>,
    cvar: Condvar,
}

struct GateState {
    arrived: usize,
    round: u64,
    broken: bool,
}

impl Gate {
    fn new(nodes: usize) -> Self {
        Gate {
            nodes: nodes,
            state: Mutex::new(GateState {
                arrived: 0,
                round: 0,
                broken: false,
            }),
            cvar: Condvar::new(),
        }
    }

    fn wait(&self) -> Result<()> {
        let mut state = self.state.lock().map_err(|_| SyncError::Poisoned)?;
        if state.broken {
            return Err(SyncError::Abandoned.into());
        }
        state.arrived += 1;
        if state.arrived == self.nodes {
            state.arrived = 0;
            state.round += 1;
            self.cvar.notify_all();
            return Ok(());
        }
        let round = state.round;
        while state.round == round && !state.broken {
            state = self.cvar.wait(state).map_err(|_| SyncError::Poisoned)?;
        }
        if state.round == round {
            return Err(SyncError::Abandoned.into());
        }
        Ok(())
    }

    fn break_open(&self) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.broken = true;
        self.cvar.notify_all();
    }
}

// One slot per rank.  Writers publish, everybody waits, everybody reads,
// everybody waits again before the slots can be reused.
struct Exchange {
    slots: Mutex<Vec<Vec<f32>>>,
    gate: Gate,
}

/// Builder for a set of `LocalNode`s that synchronize with each other
pub struct LocalCluster {
    nodes: usize,
    exchange: Arc<Exchange>,
}

impl LocalCluster {
    /// Creates a cluster of `nodes` nodes
    pub fn new(nodes: usize) -> Self {
        assert!(nodes > 0, "a cluster needs at least one node");
        LocalCluster {
            nodes: nodes,
            exchange: Arc::new(Exchange {
                slots: Mutex::new(vec![Vec::new(); nodes]),
                gate: Gate::new(nodes),
            }),
        }
    }

    /// One handle per rank, in rank order.  Dropping a handle, by returning
    /// or unwinding, makes every later synchronization on the cluster fail
    /// with `SyncError::Abandoned`.
    pub fn nodes(&self) -> Vec<LocalNode> {
        (0..self.nodes)
            .map(|rank| LocalNode {
                rank: rank,
                nodes: self.nodes,
                exchange: self.exchange.clone(),
            })
            .collect()
    }

    /// Runs `f` once per node, each on its own thread, and returns the results
    /// in rank order.  A node that panics or returns early releases its peers
    /// with `SyncError::Abandoned`; the first panic, in rank order, is re-raised
    /// here once every thread has finished.
    pub fn run<T, F>(nodes: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(LocalNode) -> T + Sync,
    {
        let handles = LocalCluster::new(nodes).nodes();
        let f = &f;
        thread::scope(|s| {
            let joins: Vec<_> = handles
                .into_iter()
                .map(|node| s.spawn(move || f(node)))
                .collect();
            let results: Vec<_> = joins.into_iter().map(|j| j.join()).collect();
            results
                .into_iter()
                .map(|r| match r {
                    Ok(t) => t,
                    Err(e) => std::panic::resume_unwind(e),
                })
                .collect()
        })
    }
}

/// A node of a `LocalCluster`
pub struct LocalNode {
    rank: usize,
    nodes: usize,
    exchange: Arc<Exchange>,
}

impl LocalNode {
    fn publish(&self, values: Vec<f32>) -> Result<()> {
        let mut slots = self.exchange.slots.lock().map_err(|_| SyncError::Poisoned)?;
        slots[self.rank] = values;
        Ok(())
    }

    fn average_into(&self, buffer: &mut [f32]) -> Result<()> {
        let slots = self.exchange.slots.lock().map_err(|_| SyncError::Poisoned)?;
        check_lengths(&slots, buffer.len())?;
        for (i, b) in buffer.iter_mut().enumerate() {
            // Same order on every node, so every node gets the same bits
            let sum: f32 = slots.iter().map(|s| s[i]).sum();
            *b = sum / self.nodes as f32;
        }
        Ok(())
    }

    fn gather_into(&self, buffer: &mut [f32]) -> Result<()> {
        let slots = self.exchange.slots.lock().map_err(|_| SyncError::Poisoned)?;
        let fold = buffer.len() / self.nodes;
        check_lengths(&slots, fold)?;
        for (rank, slot) in slots.iter().enumerate() {
            buffer[rank * fold..(rank + 1) * fold].copy_from_slice(slot);
        }
        Ok(())
    }
}

fn check_lengths(slots: &[Vec<f32>], expected: usize) -> Result<()> {
    for (rank, slot) in slots.iter().enumerate() {
        if slot.len() != expected {
            return Err(SyncError::Mismatch {
                rank: rank,
                expected: expected,
                found: slot.len(),
            }
            .into());
        }
    }
    Ok(())
}

impl Environment for LocalNode {
    fn rank(&self) -> usize {
        self.rank
    }

    fn number_of_nodes(&self) -> usize {
        self.nodes
    }

    fn synchronize(&mut self, buffer: &mut [f32], mode: SyncMode) -> Result<()> {
        // Both waits are reached even when the local contribution is invalid
        let result = match mode {
            SyncMode::None => return Ok(()),
            SyncMode::Average => {
                let published = self.publish(buffer.to_vec());
                self.exchange.gate.wait()?;
                published.and_then(|_| self.average_into(buffer))
            }
            SyncMode::Gather => {
                let own = fold_of(buffer.len(), self.nodes, self.rank);
                let contribution = match &own {
                    Ok(range) => buffer[range.clone()].to_vec(),
                    Err(_) => Vec::new(),
                };
                let published = self.publish(contribution);
                self.exchange.gate.wait()?;
                own.and(published).and_then(|_| self.gather_into(buffer))
            }
        };
        // Nobody may publish the next buffer before everyone has read this one
        self.exchange.gate.wait()?;
        result
    }
}

impl Drop for LocalNode {
    fn drop(&mut self) {
        self.exchange.gate.break_open();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    // Runs `f` on a watchdog thread so that a hung cluster fails the test
    fn within_timeout<T, F>(f: F) -> T
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(f());
        });
        rx.recv_timeout(Duration::from_secs(10)).expect("cluster hung")
    }

    #[test]
    fn test_average() {
        let results = LocalCluster::run(3, |mut node| {
            let r = node.rank() as f32;
            let mut buf = vec![r, 2. * r, 1.];
            node.synchronize(&mut buf, SyncMode::Average).unwrap();
            buf
        });
        for buf in results {
            assert_eq!(buf, vec![1., 2., 1.]);
        }
    }

    #[test]
    fn test_gather() {
        let results = LocalCluster::run(4, |mut node| {
            let mut buf = vec![-1f32; 8];
            let r = node.rank();
            buf[2 * r] = r as f32;
            buf[2 * r + 1] = 10. + r as f32;
            node.synchronize(&mut buf, SyncMode::Gather).unwrap();
            // And again, to check the exchange can be reused
            node.synchronize(&mut buf, SyncMode::Gather).unwrap();
            buf
        });
        for buf in results {
            assert_eq!(buf, vec![0., 10., 1., 11., 2., 12., 3., 13.]);
        }
    }

    #[test]
    fn test_mismatch() {
        let results = LocalCluster::run(2, |mut node| {
            let mut buf = vec![0f32; 2 + node.rank()];
            node.synchronize(&mut buf, SyncMode::Average)
        });
        assert!(results.iter().all(|r| r.is_err()));
    }

    #[test]
    fn test_uneven_gather_fails_everywhere() {
        let results = within_timeout(|| {
            LocalCluster::run(2, |mut node| {
                let mut buf = vec![1f32; 4 - node.rank()];
                node.synchronize(&mut buf, SyncMode::Gather)
            })
        });
        match &results[0] {
            Err(crate::Error::Sync(SyncError::Mismatch {
                rank: 1,
                expected: 2,
                found: 0,
            })) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert!(results[1].is_err());
    }

    #[test]
    fn test_exchange_usable_after_mismatch() {
        let results = within_timeout(|| {
            LocalCluster::run(2, |mut node| {
                let mut bad = vec![0f32; 3 + node.rank()];
                let first = node.synchronize(&mut bad, SyncMode::Gather).is_err();
                let mut buf = vec![node.rank() as f32; 2];
                node.synchronize(&mut buf, SyncMode::Average).unwrap();
                (first, buf)
            })
        });
        for (failed, buf) in results {
            assert!(failed);
            assert_eq!(buf, vec![0.5, 0.5]);
        }
    }

    #[test]
    fn test_departed_peer_releases_waiters() {
        let results = within_timeout(|| {
            LocalCluster::run(3, |mut node| {
                if node.rank() == 2 {
                    return Ok(());
                }
                let mut buf = vec![1f32; 3];
                node.synchronize(&mut buf, SyncMode::Average)
            })
        });
        for r in &results[..2] {
            match r {
                Err(crate::Error::Sync(SyncError::Abandoned)) => {}
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(results[2].is_ok());
    }

    #[test]
    #[should_panic(expected = "node 1 failed")]
    fn test_panic_is_reraised() {
        LocalCluster::run(2, |mut node| {
            if node.rank() == 1 {
                panic!("node 1 failed");
            }
            let mut buf = vec![0f32; 2];
            node.synchronize(&mut buf, SyncMode::Average)
        });
    }

    #[test]
    fn test_none_is_local() {
        let results = LocalCluster::run(2, |mut node| {
            let mut buf = vec![node.rank() as f32];
            node.synchronize(&mut buf, SyncMode::None).unwrap();
            buf
        });
        assert_eq!(results, vec![vec![0.], vec![1.]]);
    }
}
