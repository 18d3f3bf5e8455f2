use std::sync::Weak;
use log::*;

use crate::{
    entities::{VarId, Value, GROUP_SYNC_OFF, GROUP_MIRROR, GROUP_CYCLE},
    master::Error,
    utils::fit,
    };
use super::*;


/// periodically append the poll matching the synchronization state
pub(super) async fn scan(orchestrator: Weak<Orchestrator>) {
    loop {
        let Some(this) = orchestrator.upgrade()
            else {break};
        this.scan_once();
        let interval = this.scan_interval();
        drop(this);
        tokio::time::sleep(interval).await;
    }
}

/// execute queued operations as the gate allows
pub(super) async fn process(orchestrator: Weak<Orchestrator>) {
    loop {
        let Some(this) = orchestrator.upgrade()
            else {break};
        let tick = this.config.process_tick;
        while this.process_once().await {}
        drop(this);
        tokio::time::sleep(tick).await;
    }
}

impl Orchestrator {
    /**
        one iteration of the scan task: append the next poll to the queue

        returns `None` while scanning is suspended by a synchronization transition
    */
    pub fn scan_once(&self) -> Option<Push> {
        let mut state = self.state.lock();
        if ! state.scan_enabled {
            return None;
        }
        let all = || -> Vec<u8> {self.devices.iter()
            .map(|d| d.client.address()).collect()};
        let (devices, group) = match state.sync {
            SyncState::Off => (all(), GROUP_SYNC_OFF),
            SyncState::On(SyncMode::Broadcast) => (all(), GROUP_CYCLE),
            SyncState::On(_) => {
                // the lowest device reports the state of all its peers
                if self.model.behavior().mirrored() {
                    (vec![self.lowest()], GROUP_MIRROR)
                }
                else {
                    let index = state.next % self.devices.len();
                    state.next = index + 1;
                    (vec![self.devices[index].client.address()], GROUP_MIRROR)
                }
            },
        };
        // order of periodic polls is meaningless while synchronized
        let unique = state.sync.is_on();
        let push = self.queue.push(Job::new(Operation::ReadGroup {devices, group}), unique);
        drop(state);
        if push == Push::Full {
            warn!("operation queue full, poll dropped");
        }
        Some(push)
    }

    /**
        one iteration of the process task: execute the queue head

        waits for the transport gate, returns whether a job was executed
    */
    pub async fn process_once(&self) -> bool {
        let Ok(_permit) = self.gate.acquire().await
            else {return false};
        match self.queue.pop() {
            Some(job) => {
                self.run(job).await;
                true
            },
            None => false,
        }
    }

    pub(super) async fn run(&self, job: Job) {
        let result = self.execute(&job.operation).await;
        if let Err(error) = &result {
            match error {
                Error::Nack(_) => warn!("operation {:?} refused: {}", job.operation, error),
                _ => debug!("operation {:?} aborted: {}", job.operation, error),
            }
        }
        if let Some(reply) = job.reply {
            // the caller may have stopped waiting
            reply.send(result).ok();
        }
    }

    /// perform an operation on the bus, the gate must be held
    pub(super) async fn execute(&self, operation: &Operation) -> Result<(), Error> {
        match operation {
            Operation::ReadGroup {devices, group} => {
                for &address in devices {
                    let device = self.device(address)?;
                    let values = device.mirror.update_variables(&device.client, *group, self.config.variables_interval).await?;
                    if *group == GROUP_MIRROR && self.model.behavior().mirrored() {
                        if let Some(values) = values {
                            self.distribute(&values);
                        }
                    }
                }
                Ok(())
            },

            Operation::UpdateCurves {devices, interval} => {
                for &address in devices {
                    let device = self.device(address)?;
                    device.mirror.update_curves(&device.client, *interval).await?;
                }
                Ok(())
            },

            Operation::ExecFunction {devices, function, arg} => {
                let mut refused = None;
                for &address in devices {
                    let device = self.device(address)?;
                    match device.client.execute_function(*function, arg.as_ref()).await {
                        Ok(_) => device.mirror.set_connected(true),
                        Err(error) if error.is_transport() => return Err(device.mirror.failed(error)),
                        Err(Error::Nack(ack)) => {
                            warn!("device {} refused function {}: {:?}", address, function, ack);
                            refused.get_or_insert(Error::Nack(ack));
                        },
                        Err(error) => return Err(error),
                    }
                }
                refused.map_or(Ok(()), Err)
            },

            Operation::WriteCurve {devices, curve} => {
                for &address in devices {
                    let device = self.device(address)?;
                    let mut samples = match &self.buffers {
                        Some(buffers) => buffers.lock().get(address).map(<[f32]>::to_vec),
                        None => None,
                    }.unwrap_or_else(|| curve.clone());
                    // as stored by the device
                    fit(&mut samples, self.catalog.wfmref_max_size());
                    match device.client.wfmref_write(&samples).await {
                        Ok(slot) => device.mirror.set_written(slot, samples),
                        Err(error) => return Err(device.mirror.failed(error)),
                    }
                }
                if let Some(buffers) = &self.buffers {
                    buffers.lock().flush(self.pru.as_ref());
                }
                Ok(())
            },
        }
    }

    /**
        spread the values a device reported for its peers to their mirrors

        a peer whose values were reported is connected, since it shares its controller with the device that answered
    */
    fn distribute(&self, values: &[(VarId, Value)]) {
        let Some(layout) = self.catalog.mirror()
            else {return};
        for (slot, device) in self.devices.iter().enumerate() {
            let reported: Vec<(VarId, Value)> = layout.fields.iter()
                .filter_map(|field| {
                    let source = field.sources.get(slot)?;
                    values.iter()
                        .find(|(id, _)| id == source)
                        .map(|(_, value)| (field.target, value.clone()))
                    })
                .collect();
            if ! reported.is_empty() {
                device.mirror.apply(reported);
                device.mirror.set_connected(true);
            }
        }
    }
}
