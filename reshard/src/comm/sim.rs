/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! In-process simulated communication.
//!
//! [`SimWorld`] wires `n` fully-connected endpoints over buffered
//! in-process channels, one channel per ordered process pair, and runs
//! one closure per process on its own thread. [`SimComm`] implements
//! [`Communicator`] on top: sends enqueue without blocking, receives
//! block with a configurable timeout, and collectives are built from
//! send/recv by posting to every peer first and draining in ascending
//! group order — deterministic and deadlock-free over buffered
//! channels.

use std::sync::Mutex;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::mpsc::Sender;
use std::sync::mpsc::channel;
use std::time::Duration;

use ndmesh::ProcId;

use crate::buffer::Buffer;
use crate::comm::CommError;
use crate::comm::Communicator;
use crate::config::CommConfig;

/// A fully-connected set of in-process endpoints.
pub struct SimWorld {
    comms: Vec<SimComm>,
}

impl SimWorld {
    /// A world of `n` processes with ids `0..n`, configured from the
    /// environment.
    pub fn new(n: usize) -> Self {
        Self::with_config(n, CommConfig::from_env())
    }

    /// A world of `n` processes with explicit configuration.
    pub fn with_config(n: usize, config: CommConfig) -> Self {
        let mut outboxes: Vec<Vec<Sender<Buffer>>> = (0..n).map(|_| Vec::with_capacity(n)).collect();
        let mut inboxes: Vec<Vec<Mutex<Receiver<Buffer>>>> =
            (0..n).map(|_| Vec::with_capacity(n)).collect();
        for src in 0..n {
            for dst in 0..n {
                let (tx, rx) = channel();
                outboxes[src].push(tx);
                inboxes[dst].push(Mutex::new(rx));
            }
        }
        // inboxes[dst] was filled in ascending src order, so
        // inboxes[dst][src] is the channel from src to dst.
        let comms = outboxes
            .into_iter()
            .zip(inboxes)
            .enumerate()
            .map(|(proc, (outboxes, inboxes))| SimComm {
                proc,
                outboxes,
                inboxes,
                recv_timeout: config.recv_timeout,
            })
            .collect();
        Self { comms }
    }

    /// The number of processes in the world.
    pub fn len(&self) -> usize {
        self.comms.len()
    }

    /// Whether the world has no processes.
    pub fn is_empty(&self) -> bool {
        self.comms.is_empty()
    }

    /// Consumes the world, yielding one endpoint per process in rank
    /// order, for callers that manage their own threads.
    pub fn into_comms(self) -> Vec<SimComm> {
        self.comms
    }

    /// Runs `f` once per process, each on its own thread, and returns
    /// the results in rank order. A panic on any thread is resumed on
    /// the caller.
    pub fn run<F, R>(self, f: F) -> Vec<R>
    where
        F: Fn(SimComm) -> R + Send + Sync,
        R: Send,
    {
        std::thread::scope(|scope| {
            let f = &f;
            let handles: Vec<_> = self
                .comms
                .into_iter()
                .map(|comm| scope.spawn(move || f(comm)))
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }
}

/// One process's endpoint in a [`SimWorld`].
pub struct SimComm {
    proc: ProcId,
    outboxes: Vec<Sender<Buffer>>,
    inboxes: Vec<Mutex<Receiver<Buffer>>>,
    recv_timeout: Duration,
}

impl Communicator for SimComm {
    fn proc(&self) -> ProcId {
        self.proc
    }

    fn all_reduce_sum(&self, buf: Buffer, group: &[ProcId]) -> Result<Buffer, CommError> {
        let mut contributions = self.all_gather(buf, group)?.into_iter();
        let Some(mut acc) = contributions.next() else {
            return Err(CommError::NotInGroup(self.proc));
        };
        for contribution in contributions {
            acc.add_assign(&contribution)?;
        }
        Ok(acc)
    }

    fn all_gather(&self, buf: Buffer, group: &[ProcId]) -> Result<Vec<Buffer>, CommError> {
        if !group.contains(&self.proc) {
            return Err(CommError::NotInGroup(self.proc));
        }
        for &peer in group {
            if peer != self.proc {
                self.send(buf.clone(), peer)?;
            }
        }
        let mut gathered = Vec::with_capacity(group.len());
        for &peer in group {
            let contribution = if peer == self.proc {
                buf.clone()
            } else {
                self.recv(peer)?
            };
            if contribution.dtype() != buf.dtype() {
                return Err(CommError::DTypeMismatch {
                    lhs: buf.dtype(),
                    rhs: contribution.dtype(),
                });
            }
            gathered.push(contribution);
        }
        Ok(gathered)
    }

    fn send(&self, buf: Buffer, dst: ProcId) -> Result<(), CommError> {
        let outbox = self
            .outboxes
            .get(dst)
            .ok_or(CommError::Unreachable(dst))?;
        outbox.send(buf).map_err(|_| CommError::Closed(dst))
    }

    fn recv(&self, src: ProcId) -> Result<Buffer, CommError> {
        let inbox = self.inboxes.get(src).ok_or(CommError::Unreachable(src))?;
        let inbox = inbox.lock().unwrap();
        match inbox.recv_timeout(self.recv_timeout) {
            Ok(buf) => Ok(buf),
            Err(RecvTimeoutError::Timeout) => Err(CommError::Timeout(self.recv_timeout, src)),
            Err(RecvTimeoutError::Disconnected) => Err(CommError::Closed(src)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::buffer::Storage;

    fn tiny(value: i32) -> Buffer {
        Buffer::from_i32(vec![1], vec![value]).unwrap()
    }

    #[test]
    fn test_send_recv() {
        let world = SimWorld::new(2);
        let results = world.run(|comm| match comm.proc() {
            0 => comm.send(tiny(41), 1).map(|_| None),
            _ => comm.recv(0).map(Some),
        });
        assert!(results[0].is_ok());
        let received = results[1].as_ref().unwrap().as_ref().unwrap();
        assert_eq!(received.storage(), &Storage::I32(vec![41]));
    }

    #[test]
    fn test_all_gather_orders_by_group() {
        let world = SimWorld::new(3);
        // Gather in reversed group order; contributions must come back
        // in that order on every process.
        let group = [2, 1, 0];
        let results = world.run(|comm| {
            let buf = tiny(comm.proc() as i32);
            comm.all_gather(buf, &group).unwrap()
        });
        for gathered in results {
            let values: Vec<i32> = gathered
                .iter()
                .map(|b| match b.storage() {
                    Storage::I32(data) => data[0],
                    _ => unreachable!(),
                })
                .collect();
            assert_eq!(values, vec![2, 1, 0]);
        }
    }

    #[test]
    fn test_all_reduce_sums() {
        let world = SimWorld::new(4);
        let group = [0, 1, 2, 3];
        let results = world.run(|comm| {
            let buf = tiny(comm.proc() as i32 + 1);
            comm.all_reduce_sum(buf, &group).unwrap()
        });
        for reduced in results {
            assert_eq!(reduced.storage(), &Storage::I32(vec![10]));
        }
    }

    #[test]
    fn test_unreachable_and_not_in_group() {
        let world = SimWorld::new(1);
        let results = world.run(|comm| {
            assert!(matches!(
                comm.send(tiny(0), 5),
                Err(CommError::Unreachable(5))
            ));
            assert!(matches!(
                comm.all_gather(tiny(0), &[1, 2]),
                Err(CommError::NotInGroup(0))
            ));
        });
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_recv_timeout() {
        let config = CommConfig {
            recv_timeout: Duration::from_millis(20),
        };
        let world = SimWorld::with_config(2, config);
        let results = world.run(|comm| match comm.proc() {
            0 => comm.recv(1).err(),
            _ => None, // never sends
        });
        assert!(matches!(results[0], Some(CommError::Timeout(_, 1))));
    }
}
