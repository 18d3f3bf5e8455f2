/*!
    simulated chain of power supply controllers

    [SimulatedChain] answers the BSMP requests of a master for a set of devices of one model, as real controllers would: variables and groups, functions with their effect on the device state, curves transferred by blocks. It is meant to run the master side without hardware, on any byte stream such as [tokio::io::duplex].

    faults can be injected per device: a device can stop answering, answer with a corrupted checksum, or fail every function.
*/

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    };
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use bilge::prelude::*;
use log::*;

use crate::{
    command::*,
    entities::*,
    variables::*,
    };


/// behavior of a simulated device towards requests
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Fault {
    #[default]
    None,
    /// no answer at all
    Offline,
    /// answers carry a wrong checksum
    Garbled,
    /// functions are acknowledged as failed
    RefuseFunctions,
}

pub struct SimulatedChain {
    catalog: Arc<Catalog>,
    state: Mutex<ChainState>,
}
struct ChainState {
    devices: BTreeMap<u8, SimDevice>,
    /// (address, command) of every frame received
    history: Vec<(u8, u8)>,
}
struct SimDevice {
    values: Vec<Value>,
    curves: HashMap<CurveId, Vec<f32>>,
    /// variables of model groups, in creation order
    groups: Vec<Vec<VarId>>,
    fault: Fault,
    /// number of times the samples buffer was restarted
    restarts: u32,
}

impl SimulatedChain {
    pub fn new(catalog: Arc<Catalog>, addresses: &[u8]) -> Self {
        let devices = addresses.iter()
            .map(|&address| (address, SimDevice::new(&catalog)))
            .collect();
        Self {
            catalog,
            state: Mutex::new(ChainState {
                devices,
                history: Vec::new(),
                }),
        }
    }
    pub fn catalog(&self) -> &Catalog  {&self.catalog}

    /// answer requests until the stream is closed
    pub async fn run<S>(&self, mut stream: S) -> std::io::Result<()>
    where S: AsyncRead + AsyncWrite + Unpin
    {
        loop {
            let frame = match read_frame(&mut stream).await {
                Ok(frame) => frame,
                Err(error) if error.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(error) => return Err(error),
            };
            if let Some(answer) = self.answer(frame) {
                stream.write_all(&answer).await?;
                stream.flush().await?;
            }
        }
    }

    pub fn set_fault(&self, address: u8, fault: Fault) {
        if let Some(device) = self.state.lock().devices.get_mut(&address) {
            device.fault = fault;
        }
    }
    /// current value of a variable, as the device would answer it
    pub fn value(&self, address: u8, id: VarId) -> Option<Value> {
        self.state.lock().read(&self.catalog, address, id)
    }
    pub fn set_value(&self, address: u8, id: VarId, value: Value) {
        if let Some(device) = self.state.lock().devices.get_mut(&address) {
            if let Some(slot) = device.values.get_mut(usize::from(id)) {
                *slot = value;
            }
        }
    }
    pub fn status(&self, address: u8) -> Option<PsStatus> {
        self.state.lock().devices.get(&address).map(SimDevice::status)
    }
    pub fn set_state(&self, address: u8, ps: PsState) {
        if let Some(device) = self.state.lock().devices.get_mut(&address) {
            let mut status = device.status();
            status.set_state(ps);
            device.set_status(status);
        }
    }
    /// samples stored in a curve
    pub fn curve(&self, address: u8, id: CurveId) -> Option<Vec<f32>> {
        self.state.lock().devices.get(&address)?.curves.get(&id).cloned()
    }
    /// store samples in a curve, updating its pointers
    pub fn set_curve(&self, address: u8, id: CurveId, samples: Vec<f32>) {
        let Some(spec) = self.catalog.curve(id)
            else {return};
        if let Some(device) = self.state.lock().devices.get_mut(&address) {
            device.store_curve(spec, samples);
        }
    }
    pub fn buffer_restarts(&self, address: u8) -> u32 {
        self.state.lock().devices.get(&address).map(|d| d.restarts).unwrap_or(0)
    }
    /// (address, command) of every frame received so far
    pub fn history(&self) -> Vec<(u8, u8)> {
        self.state.lock().history.clone()
    }
    pub fn clear_history(&self) {
        self.state.lock().history.clear();
    }

    /// compute the bytes to send back for a received frame, if any
    fn answer(&self, frame: Frame) -> Option<Vec<u8>> {
        let address = frame.header.address;
        let mut state = self.state.lock();
        state.history.push((address, frame.header.command));
        if ! frame.valid {
            debug!("device {} ignores corrupted frame", address);
            return None;
        }
        let fault = state.devices.get(&address)?.fault;
        if fault == Fault::Offline {
            return None;
        }
        let message = frame.message();
        debug!("device {} received command {:#x} with {} bytes", address, message.command, message.payload.len());
        let answer = state.process(&self.catalog, address, message)
            .unwrap_or_else(|ack| Message::empty(u8::from(ack)));
        let mut bytes = answer.frame(address);
        if fault == Fault::Garbled {
            if let Some(last) = bytes.last_mut() {
                *last = last.wrapping_add(1);
            }
        }
        Some(bytes)
    }
}

impl ChainState {
    /// value of a variable, mirrored variables reflecting the device of their slot
    fn read(&self, catalog: &Catalog, address: u8, id: VarId) -> Option<Value> {
        if let Some(layout) = catalog.mirror() {
            for field in &layout.fields {
                if let Some(slot) = field.sources.iter().position(|&source| source == id) {
                    return Some(match self.devices.values().nth(slot) {
                        Some(peer) => peer.values.get(usize::from(field.target))?.clone(),
                        None => catalog.variable(id)?.ty.default_value(),
                    });
                }
            }
        }
        self.devices.get(&address)?.values.get(usize::from(id)).cloned()
    }

    fn encode(&self, catalog: &Catalog, address: u8, id: VarId) -> Result<Vec<u8>, Ack> {
        let spec = catalog.variable(id).ok_or(Ack::InvalidId)?;
        let value = self.read(catalog, address, id).ok_or(Ack::InvalidId)?;
        spec.ty.encode(&value).ok_or(Ack::InvalidValue)
    }

    fn process(&mut self, catalog: &Catalog, address: u8, message: Message) -> Result<Message, Ack> {
        let payload = message.payload.as_slice();
        match message.command {
            READ_VARIABLE => {
                let &[id] = payload
                    else {return Err(Ack::Malformed)};
                Ok(Message::new(VARIABLE_VALUE, self.encode(catalog, address, id)?))
            },
            READ_GROUP => {
                let &[id] = payload
                    else {return Err(Ack::Malformed)};
                let device = self.devices.get(&address).ok_or(Ack::Busy)?;
                let variables = if id < FIRST_CUSTOM_GROUP {
                    catalog.group(id).ok_or(Ack::InvalidId)?.variables.clone()
                }
                else {
                    device.groups.get(usize::from(id - FIRST_CUSTOM_GROUP)).ok_or(Ack::InvalidId)?.clone()
                };
                let mut values = Vec::new();
                for variable in variables {
                    values.extend(self.encode(catalog, address, variable)?);
                }
                Ok(Message::new(GROUP_VALUES, values))
            },
            WRITE_VARIABLE => {
                let (&id, data) = payload.split_first().ok_or(Ack::Malformed)?;
                let spec = catalog.variable(id).ok_or(Ack::InvalidId)?;
                if ! spec.writable {
                    return Err(Ack::ReadOnly);
                }
                let value = spec.ty.decode(data).ok_or(Ack::InvalidLength)?;
                self.device(address)?.values[usize::from(id)] = value;
                Ok(Message::empty(u8::from(Ack::Ok)))
            },
            CREATE_GROUP => {
                if payload.is_empty() {
                    return Err(Ack::Malformed);
                }
                if payload.iter().any(|&id| catalog.variable(id).is_none()) {
                    return Err(Ack::InvalidId);
                }
                let device = self.device(address)?;
                if usize::from(FIRST_CUSTOM_GROUP) + device.groups.len() > usize::from(u8::MAX) {
                    return Err(Ack::InsufficientMemory);
                }
                device.groups.push(payload.to_vec());
                Ok(Message::empty(u8::from(Ack::Ok)))
            },
            REMOVE_GROUPS => {
                self.device(address)?.groups.clear();
                Ok(Message::empty(u8::from(Ack::Ok)))
            },
            CURVE_BLOCK_REQUEST => {
                let &[id, high, low] = payload
                    else {return Err(Ack::Malformed)};
                let spec = catalog.curve(id).ok_or(Ack::InvalidId)?;
                let offset = usize::from(u16::from_be_bytes([high, low]));
                if offset >= spec.blocks {
                    return Err(Ack::InvalidValue);
                }
                let device = self.device(address)?;
                let samples = device.curves.get(&id).map(Vec::as_slice).unwrap_or_default();
                let mut block: Vec<f32> = samples.iter()
                    .skip(offset * spec.block_size)
                    .take(spec.block_size)
                    .copied()
                    .collect();
                block.resize(spec.block_size, 0.);
                let mut answer = vec![id, high, low];
                answer.extend(crate::utils::samples_to_bytes(&block));
                Ok(Message::new(CURVE_BLOCK, answer))
            },
            CURVE_BLOCK => {
                if payload.len() < 3 {
                    return Err(Ack::Malformed);
                }
                let (header, data) = payload.split_at(3);
                let id = header[0];
                let spec = catalog.curve(id).ok_or(Ack::InvalidId)?;
                if ! spec.writable {
                    return Err(Ack::ReadOnly);
                }
                if data.len() != spec.block_bytes() {
                    return Err(Ack::InvalidLength);
                }
                let offset = usize::from(u16::from_be_bytes([header[1], header[2]]));
                if offset >= spec.blocks {
                    return Err(Ack::InvalidValue);
                }
                let device = self.device(address)?;
                let mut samples = device.curves.get(&id).cloned().unwrap_or_default();
                let start = offset * spec.block_size;
                if samples.len() < start + spec.block_size {
                    samples.resize(start + spec.block_size, 0.);
                }
                samples[start ..][.. spec.block_size].copy_from_slice(&crate::utils::bytes_to_samples(data));
                device.store_curve(spec, samples);
                Ok(Message::empty(u8::from(Ack::Ok)))
            },
            EXECUTE_FUNCTION => {
                let (&id, arg) = payload.split_first().ok_or(Ack::Malformed)?;
                let spec = catalog.function(id).ok_or(Ack::InvalidId)?;
                let input = match spec.input {
                    Some(ty) => Some(ty.decode(arg).ok_or(Ack::InvalidLength)?),
                    None if arg.is_empty() => None,
                    None => return Err(Ack::InvalidLength),
                };
                let slot = self.devices.keys().position(|&a| a == address).unwrap_or(0);
                let device = self.device(address)?;
                if device.fault == Fault::RefuseFunctions {
                    return Ok(Message::new(FUNCTION_ERROR, vec![1]));
                }
                let output = device.execute(catalog, id, input, slot)?;
                let bytes = match (spec.output, output) {
                    (Some(ty), Some(value)) => ty.encode(&value).ok_or(Ack::InvalidValue)?,
                    (Some(ty), None) => vec![0; ty.size()],
                    (None, _) => Vec::new(),
                };
                Ok(Message::new(FUNCTION_RETURN, bytes))
            },
            _ => Err(Ack::NotSupported),
        }
    }

    fn device(&mut self, address: u8) -> Result<&mut SimDevice, Ack> {
        self.devices.get_mut(&address).ok_or(Ack::Busy)
    }
}

impl SimDevice {
    fn new(catalog: &Catalog) -> Self {
        let mut device = Self {
            values: catalog.variables().iter().map(|v| v.ty.default_value()).collect(),
            curves: HashMap::new(),
            groups: Vec::new(),
            fault: Fault::None,
            restarts: 0,
        };
        for curve in catalog.curves() {
            device.store_curve(curve, vec![0.; if curve.pointers.is_some() {1} else {curve.max_size()}]);
        }
        device
    }
    fn status(&self) -> PsStatus {
        match self.values.get(usize::from(PS_STATUS.id())) {
            Some(Value::U16(raw)) => PsStatus::from(*raw),
            _ => PsStatus::from(0u16),
        }
    }
    fn set_status(&mut self, status: PsStatus) {
        self.set(PS_STATUS.id(), Value::U16(u16::from(status)));
    }
    fn set(&mut self, id: VarId, value: Value) {
        if let Some(slot) = self.values.get_mut(usize::from(id)) {
            *slot = value;
        }
    }
    fn increment(&mut self, id: VarId) {
        if let Some(Value::U32(count)) = self.values.get_mut(usize::from(id)) {
            *count = count.wrapping_add(1);
        }
    }
    fn store_curve(&mut self, spec: &CurveSpec, mut samples: Vec<f32>) {
        samples.truncate(spec.max_size());
        if let Some((begin, end)) = spec.pointers {
            let start = self.values.get(usize::from(begin)).and_then(Value::as_u32).unwrap_or(0);
            let size = samples.len().max(1) as u32;
            self.set(end, Value::U32(start + 2*(size - 1)));
        }
        self.curves.insert(spec.id, samples);
    }
    /// set a variable found by name, for model variables
    fn set_named(&mut self, catalog: &Catalog, name: &str, value: Value) {
        if let Some(spec) = catalog.variables().iter().find(|v| v.name == name) {
            self.set(spec.id, value);
        }
    }

    fn execute(&mut self, catalog: &Catalog, id: FuncId, input: Option<Value>, slot: usize) -> Result<Option<Value>, Ack> {
        let mut status = self.status();
        match id {
            TURN_ON => status.set_state(PsState::SlowRef),
            TURN_OFF => status.set_state(PsState::Off),
            OPEN_LOOP => status.set_open_loop(true),
            CLOSE_LOOP => status.set_open_loop(false),
            SELECT_OP_MODE => {
                let mode = input.and_then(|v| v.as_u32()).ok_or(Ack::InvalidValue)?;
                let state = PsState::from(u4::new((mode & 0xf) as u8));
                if state == PsState::Unknown {
                    return Err(Ack::InvalidValue);
                }
                status.set_state(state);
            },
            SET_COMMAND_INTERFACE => {
                let interface = input.and_then(|v| v.as_u32()).ok_or(Ack::InvalidValue)?;
                if interface > 2 {
                    return Err(Ack::InvalidValue);
                }
                status.set_interface(u2::new(interface as u8));
            },
            RESET_INTERLOCKS => {
                self.set_named(catalog, "ps_soft_interlocks", Value::U32(0));
                self.set_named(catalog, "ps_hard_interlocks", Value::U32(0));
                if status.state() == PsState::Interlock {
                    status.set_state(PsState::Off);
                }
            },
            SYNC_PULSE => self.increment(COUNTER_SYNC_PULSE.id()),
            SET_SLOWREF | SET_SLOWREF_FBP => {
                let reference = match input {
                    Some(Value::F32(reference)) => reference,
                    Some(Value::Floats(references)) => *references.get(slot).ok_or(Ack::InvalidValue)?,
                    _ => return Err(Ack::InvalidValue),
                };
                self.set(PS_SETPOINT.id(), Value::F32(reference));
                self.set(PS_REFERENCE.id(), Value::F32(reference));
                self.set_named(catalog, "i_load", Value::F32(reference));
                self.increment(COUNTER_SET_SLOWREF.id());
            },
            RESET_COUNTERS => {
                self.set(COUNTER_SET_SLOWREF.id(), Value::U32(0));
                self.set(COUNTER_SYNC_PULSE.id(), Value::U32(0));
            },
            SELECT_WFMREF => {
                let curve = input.and_then(|v| v.as_u32()).ok_or(Ack::InvalidValue)?;
                if curve != u32::from(WFMREF_0) && curve != u32::from(WFMREF_1) {
                    return Err(Ack::InvalidValue);
                }
                self.set(WFMREF_SELECTED.id(), Value::U16(curve as u16));
            },
            GET_WFMREF_SIZE => {
                let curve = input.and_then(|v| v.as_u32()).ok_or(Ack::InvalidValue)?;
                let size = u8::try_from(curve).ok()
                    .and_then(|id| self.curves.get(&id))
                    .ok_or(Ack::InvalidValue)?
                    .len();
                return Ok(Some(Value::U16(size as u16)));
            },
            RESET_WFMREF => {
                for (begin, index) in [(WFMREF0_PTR_BEG, WFMREF0_PTR_IDX), (WFMREF1_PTR_BEG, WFMREF1_PTR_IDX)] {
                    let start = self.values.get(usize::from(begin.id())).cloned().unwrap_or(Value::U32(0));
                    self.set(index.id(), start);
                }
            },
            ENABLE_SIGGEN => self.set(SIGGEN_ENABLE.id(), Value::U16(1)),
            DISABLE_SIGGEN => self.set(SIGGEN_ENABLE.id(), Value::U16(0)),
            ENABLE_BUF_SAMPLES => {
                // the simulated sampler fills its buffer at once with the present reference
                let reference = self.values.get(usize::from(PS_REFERENCE.id())).and_then(Value::as_f32).unwrap_or(0.);
                if let Some(spec) = catalog.curve(BUF_SAMPLES) {
                    self.store_curve(spec, vec![reference; spec.max_size()]);
                }
                self.set(BUF_SAMPLES_PENDING.id(), Value::U16(0));
                self.restarts += 1;
            },
            DISABLE_BUF_SAMPLES => self.set(BUF_SAMPLES_PENDING.id(), Value::U16(1)),
            _ => {},
        }
        self.set_status(status);
        Ok(None)
    }
}
