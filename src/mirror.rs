/*!
    local mirror of the last known state of each device

    every device has one [DeviceMirror] behind a single lock. The lock is only taken to copy values in or out, never while waiting on the bus, so a slow device cannot stall readers of the others. Readers get a [Snapshot], an owned copy consistent at the time it was taken.
*/

use std::{
    collections::BTreeMap,
    time::Duration,
    };
use parking_lot::Mutex;
use tokio::time::Instant;
use log::*;

use crate::{
    entities::{VarId, CurveId, Value},
    master::{Client, Error},
    variables::*,
    };


/// copy of the state of a device at some instant
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    pub address: u8,
    /// whether the last exchange with the device succeeded
    pub connected: bool,
    pub variables: BTreeMap<VarId, Value>,
    /// waveform slot last written, read back
    pub rb: Vec<f32>,
    /// waveform slot selected for playback
    pub ref_mon: Vec<f32>,
    /// output samples last recorded by the device
    pub mon: Vec<f32>,
    pub variables_updated: Option<Instant>,
    pub curves_updated: Option<Instant>,
}
impl Snapshot {
    pub fn get(&self, id: VarId) -> Option<&Value> {
        self.variables.get(&id)
    }
    pub fn status(&self) -> Option<PsStatus> {
        match self.get(PS_STATUS.id())? {
            Value::U16(raw) => Some(PsStatus::from(*raw)),
            _ => None,
        }
    }
}

#[derive(Default)]
struct MirrorState {
    snapshot: Snapshot,
    /// slot targeted by the last waveform write
    written: Option<CurveId>,
}

pub struct DeviceMirror {
    address: u8,
    state: Mutex<MirrorState>,
}

impl DeviceMirror {
    pub fn new(address: u8) -> Self {
        Self {
            address,
            state: Mutex::new(MirrorState {
                snapshot: Snapshot {address, .. Default::default()},
                written: None,
                }),
        }
    }
    pub fn address(&self) -> u8  {self.address}

    pub fn snapshot(&self) -> Snapshot {
        self.state.lock().snapshot.clone()
    }
    pub fn connected(&self) -> bool {
        self.state.lock().snapshot.connected
    }
    pub fn set_connected(&self, connected: bool) {
        let mut state = self.state.lock();
        if state.snapshot.connected != connected {
            info!("device {} {}", self.address, if connected {"connected"} else {"disconnected"});
        }
        state.snapshot.connected = connected;
    }
    pub fn value(&self, id: VarId) -> Option<Value> {
        self.state.lock().snapshot.variables.get(&id).cloned()
    }
    pub fn rb(&self) -> Vec<f32>  {self.state.lock().snapshot.rb.clone()}
    pub fn ref_mon(&self) -> Vec<f32>  {self.state.lock().snapshot.ref_mon.clone()}
    pub fn mon(&self) -> Vec<f32>  {self.state.lock().snapshot.mon.clone()}

    /// store values received from the device, or reported for it by a peer
    pub fn apply(&self, values: impl IntoIterator<Item=(VarId, Value)>) {
        let mut state = self.state.lock();
        state.snapshot.variables.extend(values);
    }
    /// remember a waveform write, its read back is the written curve until the next curve refresh
    pub fn set_written(&self, curve: CurveId, samples: Vec<f32>) {
        let mut state = self.state.lock();
        state.written = Some(curve);
        state.snapshot.rb = samples;
    }

    /**
        read a group of variables from the device into the mirror

        nothing is done if the previous refresh is more recent than `min_interval`, in which case `None` is returned. Otherwise the values read are also returned so the caller can dispatch mirrored values to peers.
    */
    pub async fn update_variables(&self, client: &Client, group: u8, min_interval: Duration) -> Result<Option<Vec<(VarId, Value)>>, Error> {
        {
            let mut state = self.state.lock();
            if ! due(state.snapshot.variables_updated, min_interval)
                {return Ok(None)}
            state.snapshot.variables_updated = Some(Instant::now());
        }
        match client.read_group(group).await {
            Ok(values) => {
                let mut state = self.state.lock();
                state.snapshot.variables.extend(values.iter().cloned());
                state.snapshot.connected = true;
                Ok(Some(values))
            },
            Err(error) => Err(self.failed(error)),
        }
    }

    /**
        read the curves of the device into the mirror

        nothing is done if the previous refresh is more recent than `min_interval`, and `false` is returned.

        the output samples are only read when the device is not filling its buffer anymore, and the acquisition is then restarted.
    */
    pub async fn update_curves(&self, client: &Client, min_interval: Duration) -> Result<bool, Error> {
        let written = {
            let mut state = self.state.lock();
            if ! due(state.snapshot.curves_updated, min_interval)
                {return Ok(false)}
            state.snapshot.curves_updated = Some(Instant::now());
            state.written
        };
        match read_curves(client, written).await {
            Ok((rb, ref_mon, mon)) => {
                let mut state = self.state.lock();
                state.snapshot.rb = rb;
                state.snapshot.ref_mon = ref_mon;
                if let Some(mon) = mon {
                    state.snapshot.mon = mon;
                }
                state.snapshot.connected = true;
                Ok(true)
            },
            Err(error) => Err(self.failed(error)),
        }
    }

    /// mark the device disconnected if the error means it did not answer
    pub fn failed(&self, error: Error) -> Error {
        if error.is_transport() {
            warn!("device {}: {}", self.address, error);
            self.set_connected(false);
        }
        error
    }
}

fn due(last: Option<Instant>, interval: Duration) -> bool {
    match last {
        Some(last) => last.elapsed() >= interval,
        None => true,
    }
}

async fn read_curves(client: &Client, written: Option<CurveId>) -> Result<(Vec<f32>, Vec<f32>, Option<Vec<f32>>), Error> {
    let selected = match client.read(WFMREF_SELECTED).await? {
        1 => WFMREF_1,
        _ => WFMREF_0,
    };
    let ref_mon = client.curve_read(selected).await?;
    let rb = match written {
        Some(written) if written != selected => client.curve_read(written).await?,
        _ => ref_mon.clone(),
    };

    let mon = if client.read(BUF_SAMPLES_PENDING).await? == 0 {
        let mon = client.curve_read(BUF_SAMPLES).await?;
        // the sampler stops once its buffer is full
        match client.execute_function(ENABLE_BUF_SAMPLES, None).await {
            Err(error) if error.is_transport() => return Err(error),
            Err(error) => warn!("device {} did not resume sampling: {}", client.address(), error),
            Ok(_) => {},
        }
        Some(mon)
    }
    else {None};

    Ok((rb, ref_mon, mon))
}
