use super::FsiError;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Barrier};
use std::time::Duration;

/// Maximum time a blocking receive waits for its message
const RECV_TIMEOUT: Duration = Duration::from_secs(120);

/// Defines the collective and point-to-point operations among lock-step processes
///
/// Every collective must be called by all processes in the same order. The
/// reductions are derived from `all_gather` and combine the values in rank
/// order, thus all processes obtain bitwise identical results.
pub trait Communicator: Send + Sync {
    /// Returns the rank of this process
    fn rank(&self) -> usize;

    /// Returns the number of processes
    fn size(&self) -> usize;

    /// Blocks until all processes arrive
    fn barrier(&self);

    /// Returns the data of all processes, indexed by rank
    fn all_gather(&self, data: &[f64]) -> Vec<Vec<f64>>;

    /// Sends data to another process
    fn send(&self, dest: usize, data: &[f64]) -> Result<(), FsiError>;

    /// Receives the next message sent by another process
    fn recv(&self, source: usize) -> Result<Vec<f64>, FsiError>;

    /// Returns the sum over all processes
    fn sum(&self, value: f64) -> f64 {
        if self.size() == 1 {
            return value;
        }
        self.all_gather(&[value]).iter().map(|v| v[0]).sum()
    }

    /// Replaces each entry by its sum over all processes
    fn sum_in_place(&self, data: &mut [f64]) {
        if self.size() == 1 {
            return;
        }
        let all = self.all_gather(data);
        for (i, x) in data.iter_mut().enumerate() {
            *x = all.iter().map(|v| v[i]).sum();
        }
    }

    /// Returns the maximum over all processes
    fn max(&self, value: f64) -> f64 {
        if self.size() == 1 {
            return value;
        }
        self.all_gather(&[value]).iter().fold(f64::MIN, |acc, v| f64::max(acc, v[0]))
    }

    /// Returns the maximum count over all processes
    fn max_usize(&self, value: usize) -> usize {
        self.max(value as f64) as usize
    }

    /// Returns the minimum over all processes and the rank holding it
    ///
    /// Ties are resolved by the lowest rank.
    fn min_loc(&self, value: f64) -> (f64, usize) {
        if self.size() == 1 {
            return (value, 0);
        }
        let all = self.all_gather(&[value]);
        let mut res = (all[0][0], 0);
        for (rank, v) in all.iter().enumerate().skip(1) {
            if v[0] < res.0 {
                res = (v[0], rank);
            }
        }
        res
    }

    /// Returns true if at least one process reports true
    fn any(&self, flag: bool) -> bool {
        if self.size() == 1 {
            return flag;
        }
        self.all_gather(&[if flag { 1.0 } else { 0.0 }]).iter().any(|v| v[0] != 0.0)
    }

    /// Returns true when every process reports inactive
    fn all_inactive(&self, active: bool) -> bool {
        !self.any(active)
    }

    /// Sends an optional index from the root to all processes
    fn broadcast_index(&self, root: usize, index: Option<usize>) -> Option<usize> {
        if self.size() == 1 {
            return index;
        }
        let value = if self.rank() == root {
            index.map(|i| i as f64).unwrap_or(-1.0)
        } else {
            -1.0
        };
        let all = self.all_gather(&[value]);
        let v = all[root][0];
        if v < 0.0 {
            None
        } else {
            Some(v as usize)
        }
    }
}

/// Turns the result of a rank-local task into a collective result
///
/// Every process must call this function after the task. If any process
/// failed, all processes return an error: a failing process returns its own
/// error and the others return a protocol error naming the task. Thus no
/// process is left waiting in a later collective operation.
pub fn agree<T>(comm: &dyn Communicator, task: &str, res: Result<T, FsiError>) -> Result<T, FsiError> {
    let failed = comm.any(res.is_err());
    match res {
        Err(e) => Err(e),
        Ok(_) if failed => Err(FsiError::Protocol(format!("{} failed on another process", task))),
        Ok(value) => Ok(value),
    }
}

/// Implements the communicator of a single process
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialComm;

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) {}

    fn all_gather(&self, data: &[f64]) -> Vec<Vec<f64>> {
        vec![data.to_vec()]
    }

    fn send(&self, dest: usize, _data: &[f64]) -> Result<(), FsiError> {
        Err(FsiError::Protocol(format!("cannot send to rank {} with a single process", dest)))
    }

    fn recv(&self, source: usize) -> Result<Vec<f64>, FsiError> {
        Err(FsiError::Protocol(format!("cannot receive from rank {} with a single process", source)))
    }
}

/// Holds the state shared by the processes of a [LocalComm] group
struct Shared {
    size: usize,
    barrier: Barrier,
    slots: Mutex<Vec<Vec<f64>>>,
    mailbox: Mutex<HashMap<(usize, usize), VecDeque<Vec<f64>>>>,
    arrived: Condvar,
}

/// Implements a communicator among threads of the same process
///
/// Each thread holds one instance (one rank). The group behaves like a fixed
/// set of lock-step processes: collectives block until every rank arrives and
/// messages between a pair of ranks are delivered in order.
#[derive(Clone)]
pub struct LocalComm {
    rank: usize,
    shared: Arc<Shared>,
}

impl LocalComm {
    /// Allocates a group of `size` communicators (one per rank)
    pub fn create(size: usize) -> Vec<LocalComm> {
        let size = usize::max(size, 1);
        let shared = Arc::new(Shared {
            size,
            barrier: Barrier::new(size),
            slots: Mutex::new(vec![Vec::new(); size]),
            mailbox: Mutex::new(HashMap::new()),
            arrived: Condvar::new(),
        });
        (0..size)
            .map(|rank| LocalComm {
                rank,
                shared: shared.clone(),
            })
            .collect()
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn barrier(&self) {
        self.shared.barrier.wait();
    }

    fn all_gather(&self, data: &[f64]) -> Vec<Vec<f64>> {
        self.shared.slots.lock()[self.rank] = data.to_vec();
        self.shared.barrier.wait();
        let all = self.shared.slots.lock().clone();
        // nobody may overwrite a slot before everyone has read it
        self.shared.barrier.wait();
        all
    }

    fn send(&self, dest: usize, data: &[f64]) -> Result<(), FsiError> {
        if dest >= self.shared.size {
            return Err(FsiError::Protocol(format!("destination rank {} does not exist", dest)));
        }
        let mut mailbox = self.shared.mailbox.lock();
        mailbox.entry((self.rank, dest)).or_default().push_back(data.to_vec());
        self.shared.arrived.notify_all();
        Ok(())
    }

    fn recv(&self, source: usize) -> Result<Vec<f64>, FsiError> {
        if source >= self.shared.size {
            return Err(FsiError::Protocol(format!("source rank {} does not exist", source)));
        }
        let mut mailbox = self.shared.mailbox.lock();
        loop {
            if let Some(message) = mailbox.get_mut(&(source, self.rank)).and_then(|q| q.pop_front()) {
                return Ok(message);
            }
            if self.shared.arrived.wait_for(&mut mailbox, RECV_TIMEOUT).timed_out() {
                return Err(FsiError::Protocol(format!(
                    "rank {} timed out waiting for rank {}",
                    self.rank, source
                )));
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::{agree, Communicator, LocalComm, SerialComm};
    use crate::base::FsiError;
    use std::thread;

    #[test]
    fn serial_comm_works() {
        let comm = SerialComm;
        assert_eq!(comm.sum(2.5), 2.5);
        assert_eq!(comm.min_loc(1.0), (1.0, 0));
        assert!(comm.all_inactive(false));
        assert!(!comm.all_inactive(true));
        assert_eq!(comm.broadcast_index(0, Some(7)), Some(7));
        assert!(comm.send(1, &[1.0]).unwrap_err().is_protocol());
    }

    #[test]
    fn local_comm_reductions_work() {
        let comms = LocalComm::create(3);
        let results: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = comms
                .iter()
                .map(|comm| {
                    s.spawn(move || {
                        let r = comm.rank() as f64;
                        let sum = comm.sum(r + 1.0);
                        let max = comm.max(r * 10.0);
                        let count = comm.max_usize(comm.rank() + 5);
                        // ranks 1 and 2 tie
                        let (min, loc) = comm.min_loc(if comm.rank() == 0 { 3.0 } else { 2.0 });
                        let any = comm.any(comm.rank() == 2);
                        let mut data = [r, 1.0];
                        comm.sum_in_place(&mut data);
                        let index = comm.broadcast_index(1, if comm.rank() == 1 { Some(42) } else { None });
                        (sum, max, count, min, loc, any, data, index)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for (sum, max, count, min, loc, any, data, index) in results {
            assert_eq!(sum, 6.0);
            assert_eq!(max, 20.0);
            assert_eq!(count, 7);
            assert_eq!((min, loc), (2.0, 1));
            assert!(any);
            assert_eq!(data, [3.0, 3.0]);
            assert_eq!(index, Some(42));
        }
    }

    #[test]
    fn local_comm_messages_work() {
        let comms = LocalComm::create(2);
        thread::scope(|s| {
            let (c0, c1) = (&comms[0], &comms[1]);
            s.spawn(move || {
                c0.send(1, &[1.0, 2.0]).unwrap();
                c0.send(1, &[3.0]).unwrap();
                assert_eq!(c0.recv(1).unwrap(), &[4.0]);
            });
            s.spawn(move || {
                assert_eq!(c1.recv(0).unwrap(), &[1.0, 2.0]);
                assert_eq!(c1.recv(0).unwrap(), &[3.0]);
                c1.send(0, &[4.0]).unwrap();
            });
        });
        assert!(comms[0].send(5, &[0.0]).unwrap_err().is_protocol());
    }

    #[test]
    fn agree_fails_on_every_rank() {
        let comms = LocalComm::create(3);
        let results: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = comms
                .iter()
                .map(|comm| {
                    s.spawn(move || {
                        let res = if comm.rank() == 1 {
                            Err(FsiError::Config("bad material".to_string()))
                        } else {
                            Ok(comm.rank())
                        };
                        let first = agree(comm, "assembly", res).map_err(|e| e.to_string());
                        let second = agree(comm, "assembly", Ok(comm.rank()));
                        (first, second.unwrap())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results[0].0, Err("coupling protocol error: assembly failed on another process".to_string()));
        assert_eq!(results[1].0, Err(FsiError::Config("bad material".to_string()).to_string()));
        assert_eq!(results[2].0, Err("coupling protocol error: assembly failed on another process".to_string()));
        for (rank, (_, second)) in results.iter().enumerate() {
            assert_eq!(*second, rank);
        }
        assert_eq!(agree(&SerialComm, "assembly", Ok(3)).unwrap(), 3);
    }
}
