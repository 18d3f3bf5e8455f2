/*!
    orchestration of all bus traffic of a device chain

    The [Orchestrator] owns the devices of one chain, their mirrors, and the operation queue through which every exchange goes. Two background tasks run on it:

    - the scan task periodically decides which devices and group to poll, depending on the synchronization state, and appends the read to the queue
    - the process task pops and executes queued operations, one at a time, whenever the transport reservation gate is open

    User facing operations only read mirrors or append to the queue, except synchronization transitions which take the gate to talk to devices directly.

    While synchronization is on, the chain advances through waveforms on its own and only queue-ordered polling is allowed: function executions and waveform writes are refused.
*/

mod queue;
mod sync;
mod tasks;

pub use queue::{Operation, Job, Push, OpQueue};
pub use sync::{SyncMode, SyncState};

use std::{
    collections::BTreeMap,
    sync::Arc,
    time::Duration,
    };
use parking_lot::Mutex;
use tokio::{
    sync::{Semaphore, OwnedSemaphorePermit},
    task::JoinHandle,
    };
use log::*;

use crate::{
    config::Config,
    curves::{CurveBuffers, MAX_BUFFERS},
    entities::{Catalog, VarId, FuncId, Value, GROUP_ALL_RELEVANT, GROUP_SYNC_OFF},
    master::{Bus, Client, Error, check_curve},
    mirror::{DeviceMirror, Snapshot},
    models::{Model, Registry, Field},
    pru::Pru,
    variables::WFMREF_0,
    };


/// one device of the chain
struct Device {
    client: Client,
    mirror: DeviceMirror,
}

/// scheduling state, only held to copy or switch flags
struct State {
    sync: SyncState,
    /// a synchronization transition is in progress, the write path is closed
    changing: bool,
    scan_enabled: bool,
    scan_interval: Duration,
    /// next device polled in round robin
    next: usize,
}

pub struct Orchestrator {
    model: Model,
    catalog: Arc<Catalog>,
    config: Config,
    pru: Arc<dyn Pru>,
    /// sorted by ascending address, which is also the mirror slot order
    devices: Vec<Device>,
    queue: OpQueue,
    /// one permit, held while the transport is in use by a job or reserved
    gate: Arc<Semaphore>,
    state: Mutex<State>,
    /// local waveform buffers, when the controller memory can hold a curve per device
    buffers: Option<Mutex<CurveBuffers>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /**
        create the orchestrator of a chain of devices of the same model

        devices are sorted by address. For a model whose devices report each other's state, the k-th lowest address is the k-th slot of the mirror layout, so there cannot be more devices than slots.
    */
    pub fn new(
        bus: Arc<Bus>,
        pru: Arc<dyn Pru>,
        registry: &Registry,
        model: Model,
        addresses: &[u8],
        config: Config,
        ) -> Result<Self, Error>
    {
        let catalog = registry.catalog(model)?;

        let mut sorted = addresses.to_vec();
        sorted.sort_unstable();
        if sorted.is_empty() {
            return Err(Error::Config("no device to orchestrate".into()));
        }
        if sorted.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(Error::Config("device addresses must be unique".into()));
        }
        if model.behavior().mirrored() {
            let slots = catalog.mirror()
                .ok_or_else(|| Error::Config(format!("model {} has no mirror layout", model.name())))?
                .slots;
            if sorted.len() > slots {
                return Err(Error::Config(format!("model {} mirrors at most {} devices, got {}", model.name(), slots, sorted.len())));
            }
        }
        for frequency in [config.scan_frequency, config.ramp_frequency] {
            if ! (frequency.is_finite() && frequency > 0.) {
                return Err(Error::Config(format!("scan frequency {} is not a positive number", frequency)));
            }
        }
        if config.queue_capacity == 0 {
            return Err(Error::Config("queue cannot have zero capacity".into()));
        }

        let buffers = if sorted.len() <= MAX_BUFFERS {
            Some(Mutex::new(CurveBuffers::new(&sorted, catalog.wfmref_max_size())?))
        }
        else {None};
        let devices = sorted.iter()
            .map(|&address| Device {
                client: Client::new(bus.clone(), address, catalog.clone(), config.settle),
                mirror: DeviceMirror::new(address),
                })
            .collect();
        let sync = SyncState::Off;

        Ok(Self {
            model,
            catalog,
            pru,
            devices,
            queue: OpQueue::new(config.queue_capacity),
            gate: Arc::new(Semaphore::new(1)),
            state: Mutex::new(State {
                sync,
                changing: false,
                scan_enabled: true,
                scan_interval: sync.scan_interval(&config),
                next: 0,
                }),
            buffers,
            tasks: Mutex::new(Vec::new()),
            config,
        })
    }

    /**
        install the model groups on every device and fill the mirrors

        every device is attempted, the first failure is reported after that
    */
    pub async fn init(&self) -> Result<(), Error> {
        let _permit = self.gate.acquire().await.map_err(|_| Error::Discarded)?;
        let mut result = Ok(());
        for device in &self.devices {
            let outcome = match device.client.configure_groups().await {
                Ok(()) => device.mirror.update_variables(&device.client, GROUP_ALL_RELEVANT, Duration::ZERO).await,
                Err(error) => Err(device.mirror.failed(error)),
            };
            if let Err(error) = outcome {
                warn!("device {} could not be initialized: {}", device.client.address(), error);
                if result.is_ok() {
                    result = Err(error);
                }
            }
        }
        result
    }

    /**
        start the scan and process tasks on the current tokio runtime

        the tasks stop when the orchestrator is dropped
    */
    pub fn spawn(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if ! tasks.is_empty() {
            return;
        }
        tasks.push(tokio::spawn(tasks::scan(Arc::downgrade(self))));
        tasks.push(tokio::spawn(tasks::process(Arc::downgrade(self))));
    }

    pub fn model(&self) -> Model  {self.model}
    pub fn catalog(&self) -> &Catalog  {&self.catalog}
    pub fn config(&self) -> &Config  {&self.config}
    /// device addresses, ascending
    pub fn addresses(&self) -> Vec<u8> {
        self.devices.iter().map(|d| d.client.address()).collect()
    }
    /// protocol client of a device, for direct use while holding [Self::reserve]
    pub fn client(&self, address: u8) -> Result<&Client, Error> {
        Ok(&self.device(address)?.client)
    }
    pub fn sync_state(&self) -> SyncState  {self.state.lock().sync}
    pub fn scan_interval(&self) -> Duration  {self.state.lock().scan_interval}
    pub fn scan_enabled(&self) -> bool  {self.state.lock().scan_enabled}
    pub fn queue_len(&self) -> usize  {self.queue.len()}

    /**
        take exclusive use of the transport

        the process task does not execute anything until the returned permit is dropped, queued operations simply wait
    */
    pub async fn reserve(&self) -> Result<OwnedSemaphorePermit, Error> {
        self.gate.clone().acquire_owned().await.map_err(|_| Error::Discarded)
    }

    // reads

    /// last known values of the given variable, or of all variables, for each device
    pub fn read_variables(&self, devices: &[u8], variable: Option<VarId>) -> Result<BTreeMap<u8, BTreeMap<VarId, Value>>, Error> {
        let mut values = BTreeMap::new();
        for &address in devices {
            let snapshot = self.device(address)?.mirror.snapshot();
            let device_values = match variable {
                Some(id) => snapshot.variables.get(&id)
                    .map(|value| BTreeMap::from([(id, value.clone())]))
                    .unwrap_or_default(),
                None => snapshot.variables,
            };
            values.insert(address, device_values);
        }
        Ok(values)
    }
    pub fn connected(&self, address: u8) -> Result<bool, Error> {
        Ok(self.device(address)?.mirror.connected())
    }
    pub fn snapshot(&self, address: u8) -> Result<Snapshot, Error> {
        Ok(self.device(address)?.mirror.snapshot())
    }
    /// last known value of a model quantity, `None` if the model lacks it or it was never read
    pub fn read_field(&self, address: u8, field: Field) -> Result<Option<Value>, Error> {
        let device = self.device(address)?;
        Ok(self.model.behavior().field(field).and_then(|id| device.mirror.value(id)))
    }
    /// waveform reference last written, read back
    pub fn wfm_rb(&self, address: u8) -> Result<Vec<f32>, Error> {
        Ok(self.device(address)?.mirror.rb())
    }
    /// waveform reference selected for playback
    pub fn wfmref_mon(&self, address: u8) -> Result<Vec<f32>, Error> {
        Ok(self.device(address)?.mirror.ref_mon())
    }
    /// last recorded output samples
    pub fn wfm_mon(&self, address: u8) -> Result<Vec<f32>, Error> {
        Ok(self.device(address)?.mirror.mon())
    }

    // write path

    /**
        queue a function execution on the given devices

        returns `false` without queuing anything while synchronization is on
    */
    pub fn exec_functions(&self, devices: &[u8], function: FuncId, arg: Option<Value>) -> Result<bool, Error> {
        let operation = self.function_operation(devices, function, arg)?;
        Ok(self.push_write(Job::new(operation)))
    }
    /**
        execute a function on the given devices through the queue and wait for its completion

        returns `false` if refused because synchronization is on. A device refusing the function is reported as [Error::Nack].
    */
    pub async fn exec_functions_wait(&self, devices: &[u8], function: FuncId, arg: Option<Value>) -> Result<bool, Error> {
        let operation = self.function_operation(devices, function, arg)?;
        let (job, result) = Job::waited(operation);
        if ! self.push_write(job) {
            return Ok(false);
        }
        result.await.map_err(|_| Error::Discarded)??;
        Ok(true)
    }
    /**
        queue the writing of a waveform reference on the given devices

        a curve that is empty or exceeds the waveform size is refused immediately with [Error::Config]. While synchronization is on, `false` is returned and nothing is queued.

        when the controller holds local buffers, the curve goes through them: all buffers keep the same length, so a device may receive its curve padded to the length of the others.
    */
    pub fn wfm_write(&self, devices: &[u8], curve: &[f32]) -> Result<bool, Error> {
        let spec = self.catalog.curve(WFMREF_0)
            .ok_or_else(|| Error::Config(format!("model {} has no waveform reference", self.model.name())))?;
        check_curve(spec, curve.len())?;
        let devices = self.known(devices)?;

        let state = self.state.lock();
        if state.sync.is_on() || state.changing {
            debug!("waveform write refused, synchronization is on");
            return Ok(false);
        }
        if let Some(buffers) = &self.buffers {
            let mut buffers = buffers.lock();
            for &device in &devices {
                buffers.set(device, curve)?;
            }
        }
        let pushed = self.queue.push(Job::new(Operation::WriteCurve {devices, curve: curve.to_vec()}), false);
        drop(state);
        Ok(self.pushed(pushed))
    }
    /**
        queue a refresh of the curves of the given devices, skipped for devices refreshed more recently than `interval`

        allowed while synchronization is on, but `false` is returned during a synchronization transition
    */
    pub fn wfm_update(&self, devices: &[u8], interval: Option<Duration>) -> Result<bool, Error> {
        let operation = Operation::UpdateCurves {
            devices: self.known(devices)?,
            interval: interval.unwrap_or(self.config.curves_interval),
        };
        let state = self.state.lock();
        if state.changing {
            debug!("curve refresh refused, synchronization is changing");
            return Ok(false);
        }
        let pushed = self.queue.push(Job::new(operation), false);
        drop(state);
        Ok(self.pushed(pushed))
    }

    // synchronization

    /**
        enter a synchronization mode

        scanning is suspended and pending operations are executed, then a last read of the sync-off group refreshes the mirrors before the controller is commanded into `mode`. When this returns, the queue is empty and the state is exactly `On(mode)`.
    */
    pub async fn pru_sync_start(&self, mode: SyncMode) -> Result<(), Error> {
        if self.sync_state().is_on() {
            self.pru_sync_abort();
        }
        let transition = Transition::begin(self);
        let permit = self.gate.acquire().await.map_err(|_| Error::Discarded)?;
        self.drain().await;

        // regardless of the refresh interval
        for device in &self.devices {
            if let Err(error) = device.mirror.update_variables(&device.client, GROUP_SYNC_OFF, Duration::ZERO).await {
                warn!("device {} not refreshed before synchronization: {}", device.client.address(), error);
            }
        }
        self.pru.set_curve_pointer(0);
        self.pru.sync_start(mode, self.lowest());
        let delay = mode.settle_delay(&self.config);
        if ! delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        transition.finish(SyncState::On(mode));
        drop(permit);
        info!("synchronization {:?} started", mode);
        Ok(())
    }
    /**
        leave synchronization gracefully

        operations already queued are executed before the controller stops
    */
    pub async fn pru_sync_stop(&self) -> Result<(), Error> {
        let transition = Transition::begin(self);
        let permit = self.gate.acquire().await.map_err(|_| Error::Discarded)?;
        self.drain().await;
        self.pru.sync_stop();
        transition.finish(SyncState::Off);
        drop(permit);
        info!("synchronization stopped");
        Ok(())
    }
    /// leave synchronization immediately, discarding queued operations
    pub fn pru_sync_abort(&self) {
        let dropped = self.queue.clear();
        self.pru.sync_stop();
        self.switch(SyncState::Off);
        info!("synchronization aborted, {} operations discarded", dropped);
    }

    /// set a new synchronization state and resume scanning
    fn switch(&self, sync: SyncState) {
        let mut state = self.state.lock();
        state.sync = sync;
        state.changing = false;
        state.scan_interval = sync.scan_interval(&self.config);
        state.next = 0;
        state.scan_enabled = true;
    }
    /// execute every queued job, the gate must be held
    async fn drain(&self) {
        while let Some(job) = self.queue.pop() {
            self.run(job).await;
        }
    }

    fn push_write(&self, job: Job) -> bool {
        let state = self.state.lock();
        if state.sync.is_on() || state.changing {
            debug!("function execution refused, synchronization is on");
            return false;
        }
        let pushed = self.queue.push(job, false);
        drop(state);
        self.pushed(pushed)
    }
    fn pushed(&self, push: Push) -> bool {
        match push {
            Push::Appended => true,
            Push::Duplicate => false,
            Push::Full => {
                warn!("operation queue full, operation dropped");
                false
            },
        }
    }
    fn function_operation(&self, devices: &[u8], function: FuncId, arg: Option<Value>) -> Result<Operation, Error> {
        if self.catalog.function(function).is_none() {
            return Err(Error::Config(format!("function {} does not exist in {}", function, self.catalog.name())));
        }
        Ok(Operation::ExecFunction {devices: self.known(devices)?, function, arg})
    }
    /// check that all devices belong to this chain
    fn known(&self, devices: &[u8]) -> Result<Vec<u8>, Error> {
        for &address in devices {
            self.device(address)?;
        }
        Ok(devices.to_vec())
    }
    fn device(&self, address: u8) -> Result<&Device, Error> {
        self.devices.binary_search_by_key(&address, |d| d.client.address())
            .map(|index| &self.devices[index])
            .map_err(|_| Error::Config(format!("device {} is not on this chain", address)))
    }
    fn lowest(&self) -> u8 {
        self.devices.first().map(|d| d.client.address()).unwrap_or_default()
    }
}

/**
    scheduling state of a synchronization transition in progress

    scanning is suspended and the write path closed until [Transition::finish]. A transition dropped before finishing, because its future was cancelled or failed, leaves the chain unsynchronized with scanning resumed.
*/
struct Transition<'o> {
    orchestrator: &'o Orchestrator,
    finished: bool,
}
impl<'o> Transition<'o> {
    fn begin(orchestrator: &'o Orchestrator) -> Self {
        let mut state = orchestrator.state.lock();
        state.scan_enabled = false;
        state.changing = true;
        drop(state);
        Self {orchestrator, finished: false}
    }
    fn finish(mut self, sync: SyncState) {
        self.orchestrator.switch(sync);
        self.finished = true;
    }
}
impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if ! self.finished {
            warn!("synchronization transition interrupted, synchronization is off");
            self.orchestrator.pru.sync_stop();
            self.orchestrator.switch(SyncState::Off);
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}
