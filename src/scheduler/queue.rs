use std::{
    collections::VecDeque,
    time::Duration,
    };
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::{
    entities::{GroupId, FuncId, Value},
    master::Error,
    };


/// deferred unit of bus work
#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    /// refresh a group of variables of each device into the mirror
    ReadGroup {devices: Vec<u8>, group: GroupId},
    /// refresh the curves of each device into the mirror, unless refreshed more recently than `interval`
    UpdateCurves {devices: Vec<u8>, interval: Duration},
    /// execute a function on each device
    ExecFunction {devices: Vec<u8>, function: FuncId, arg: Option<Value>},
    /// write a waveform reference on each device
    WriteCurve {devices: Vec<u8>, curve: Vec<f32>},
}
impl Operation {
    pub fn devices(&self) -> &[u8] {
        match self {
            Self::ReadGroup {devices, ..}
            | Self::UpdateCurves {devices, ..}
            | Self::ExecFunction {devices, ..}
            | Self::WriteCurve {devices, ..}
                => devices,
        }
    }
}

/// queued operation, with the channel its result is reported to if someone waits for it
#[derive(Debug)]
pub struct Job {
    pub operation: Operation,
    pub reply: Option<oneshot::Sender<Result<(), Error>>>,
}
impl Job {
    pub fn new(operation: Operation) -> Self {
        Self {operation, reply: None}
    }
    /// job reporting its result to the returned receiver
    pub fn waited(operation: Operation) -> (Self, oneshot::Receiver<Result<(), Error>>) {
        let (send, receive) = oneshot::channel();
        (Self {operation, reply: Some(send)}, receive)
    }
}

/// outcome of [OpQueue::push]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Push {
    Appended,
    /// the job is identical to the current tail and was discarded
    Duplicate,
    /// the queue reached its capacity and the job was discarded
    Full,
}

/**
    bounded FIFO of bus operations

    jobs are executed strictly in order. A job pushed as unique is discarded when identical to the current tail, which only matters for periodic polls.
*/
pub struct OpQueue {
    jobs: Mutex<VecDeque<Job>>,
    capacity: usize,
}

impl OpQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
            capacity,
        }
    }
    pub fn push(&self, job: Job, unique: bool) -> Push {
        let mut jobs = self.jobs.lock();
        if unique && jobs.back().is_some_and(|last| last.operation == job.operation) {
            return Push::Duplicate;
        }
        if jobs.len() >= self.capacity {
            return Push::Full;
        }
        jobs.push_back(job);
        Push::Appended
    }
    pub fn pop(&self) -> Option<Job> {
        self.jobs.lock().pop_front()
    }
    /// discard every waiting job, returning how many were dropped
    pub fn clear(&self) -> usize {
        let mut jobs = self.jobs.lock();
        let dropped = jobs.len();
        jobs.clear();
        dropped
    }
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }
    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn read(devices: &[u8]) -> Job {
        Job::new(Operation::ReadGroup {devices: devices.to_vec(), group: 4})
    }

    #[test]
    fn unique_tail() {
        let queue = OpQueue::new(8);
        assert_eq!(queue.push(read(&[1, 2]), true), Push::Appended);
        assert_eq!(queue.push(read(&[1, 2]), true), Push::Duplicate);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.push(read(&[1, 2]), false), Push::Appended);
        assert_eq!(queue.len(), 2);
        // only the tail is compared
        assert_eq!(queue.push(read(&[3]), true), Push::Appended);
        assert_eq!(queue.push(read(&[1, 2]), true), Push::Appended);
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn fifo_and_capacity() {
        let queue = OpQueue::new(2);
        assert_eq!(queue.push(read(&[1]), false), Push::Appended);
        assert_eq!(queue.push(read(&[2]), false), Push::Appended);
        assert_eq!(queue.push(read(&[3]), false), Push::Full);
        assert_eq!(queue.pop().unwrap().operation.devices(), [1]);
        assert_eq!(queue.pop().unwrap().operation.devices(), [2]);
        assert!(queue.pop().is_none());

        queue.push(read(&[1]), false);
        assert_eq!(queue.clear(), 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn dropped_reply() {
        let queue = OpQueue::new(2);
        let (job, result) = Job::waited(Operation::ExecFunction {devices: vec![1], function: 0, arg: None});
        queue.push(job, false);
        queue.clear();
        assert!(result.await.is_err());
    }
}
