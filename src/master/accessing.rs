use std::sync::Arc;
use packbytes::{FromBytes, ByteArray};
use log::*;

use crate::{
    command::*,
    config::SettleDelays,
    entities::*,
    utils::{fit, samples_to_bytes, bytes_to_samples},
    variables::{Variable, PS_STATUS, WFMREF_SELECTED, WFMREF_0, WFMREF_1, SELECT_WFMREF},
    };
use super::{Bus, Error};


/// what a device returned after executing a function
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FunctionResponse {
    /// decoded return value, when the function declares one and it arrived with the expected size
    pub value: Option<Value>,
    /// raw returned payload
    pub payload: Vec<u8>,
}

/**
    protocol client for one device on the bus

    this is a lightweight handle: cloning it only clones references to the bus and catalog. Every operation checks the acknowledgement of the device, a refusal is reported as [Error::Nack] while a missing or corrupted answer is a transport error (see [Error::is_transport]).
*/
#[derive(Clone)]
pub struct Client {
    bus: Arc<Bus>,
    address: u8,
    catalog: Arc<Catalog>,
    settle: SettleDelays,
}

impl Client {
    pub fn new(bus: Arc<Bus>, address: u8, catalog: Arc<Catalog>, settle: SettleDelays) -> Self {
        Self {bus, address, catalog, settle}
    }
    pub fn address(&self) -> u8  {self.address}
    pub fn catalog(&self) -> &Catalog  {&self.catalog}

    /// exchange a message, expecting the given answer command
    pub(super) async fn request(&self, request: Message, expected: u8) -> Result<Message, Error> {
        let answer = self.bus.exchange(self.address, &request).await?;
        if answer.command == expected {
            return Ok(answer);
        }
        match Ack::from(answer.command) {
            Ack::Ok | Ack::Unknown => Err(Error::Garbled("unexpected answer command")),
            ack => {
                debug!("device {} refused command {:#x}: {:?}", self.address, request.command, ack);
                Err(Error::Nack(ack))
            },
        }
    }

    pub async fn read_variable(&self, id: VarId) -> Result<Value, Error> {
        let spec = self.variable_spec(id)?;
        let answer = self.request(Message::new(READ_VARIABLE, vec![id]), VARIABLE_VALUE).await?;
        spec.ty.decode(&answer.payload)
            .ok_or(Error::Garbled("variable size mismatch"))
    }
    /// read a variable directly into its declared type
    pub async fn read<T: FromBytes>(&self, variable: Variable<T>) -> Result<T, Error> {
        let answer = self.request(Message::new(READ_VARIABLE, vec![variable.id()]), VARIABLE_VALUE).await?;
        let mut buffer = T::Bytes::zeroed();
        if answer.payload.len() != T::Bytes::SIZE {
            return Err(Error::Garbled("variable size mismatch"));
        }
        buffer.as_mut().copy_from_slice(&answer.payload);
        Ok(T::from_le_bytes(buffer))
    }
    pub async fn write_variable(&self, id: VarId, value: &Value) -> Result<(), Error> {
        let spec = self.variable_spec(id)?;
        if ! spec.writable {
            return Err(Error::Config(format!("variable {} is read-only", spec.name)));
        }
        let bytes = spec.ty.encode(value)
            .ok_or_else(|| Error::Config(format!("value {:?} does not fit variable {}", value, spec.name)))?;
        let mut payload = vec![id];
        payload.extend_from_slice(&bytes);
        self.request(Message::new(WRITE_VARIABLE, payload), u8::from(Ack::Ok)).await?;
        Ok(())
    }

    /// read all values of a group, in group order
    pub async fn read_group(&self, id: GroupId) -> Result<Vec<(VarId, Value)>, Error> {
        let group = self.catalog.group(id)
            .ok_or_else(|| Error::Config(format!("group {} does not exist in {}", id, self.catalog.name())))?;
        let answer = self.request(Message::new(READ_GROUP, vec![id]), GROUP_VALUES).await?;

        let mut values = Vec::with_capacity(group.variables.len());
        let mut remain = answer.payload.as_slice();
        for &variable in &group.variables {
            let ty = self.variable_spec(variable)?.ty;
            if remain.len() < ty.size() {
                return Err(Error::Garbled("group answer too short"));
            }
            let (data, rest) = remain.split_at(ty.size());
            values.push((variable, ty.decode(data).ok_or(Error::Garbled("group value size mismatch"))?));
            remain = rest;
        }
        if ! remain.is_empty() {
            return Err(Error::Garbled("group answer too long"));
        }
        Ok(values)
    }

    /**
        execute a function, with its argument if it declares one

        functions moving an actuator (power, loop, interlock reset) keep the client busy for their settle delay after acknowledgement, so the next request cannot reach the device too early.
    */
    pub async fn execute_function(&self, id: FuncId, arg: Option<&Value>) -> Result<FunctionResponse, Error> {
        let spec = self.catalog.function(id)
            .ok_or_else(|| Error::Config(format!("function {} does not exist in {}", id, self.catalog.name())))?;
        let mut payload = vec![id];
        match (spec.input, arg) {
            (Some(ty), Some(value)) => payload.extend(ty.encode(value)
                .ok_or_else(|| Error::Config(format!("argument {:?} does not fit function {}", value, spec.name)))?),
            (None, None) => {},
            (Some(_), None) => return Err(Error::Config(format!("function {} expects an argument", spec.name))),
            (None, Some(_)) => return Err(Error::Config(format!("function {} takes no argument", spec.name))),
        }

        let answer = self.bus.exchange(self.address, &Message::new(EXECUTE_FUNCTION, payload)).await?;
        let response = match answer.command {
            FUNCTION_RETURN => {
                let value = match spec.output {
                    Some(ty) => ty.decode(&answer.payload),
                    None => None,
                };
                let expected = spec.output.map(VarType::size).unwrap_or(0);
                if answer.payload.len() != expected {
                    warn!("device {} function {} returned {} bytes instead of {}",
                        self.address, spec.name, answer.payload.len(), expected);
                }
                FunctionResponse {value, payload: answer.payload}
            },
            FUNCTION_ERROR => {
                warn!("device {} function {} failed with code {:?}", self.address, spec.name, answer.payload.first());
                return Err(Error::Nack(Ack::FunctionError));
            },
            other => {
                let ack = Ack::from(other);
                if matches!(ack, Ack::Ok | Ack::Unknown) {
                    return Err(Error::Garbled("unexpected answer command"));
                }
                return Err(Error::Nack(ack));
            },
        };

        let delay = self.settle.get(spec.settle);
        if ! delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(response)
    }

    /// number of valid samples currently reported by the device for a curve
    pub async fn curve_size(&self, id: CurveId) -> Result<usize, Error> {
        let curve = self.curve_spec(id)?;
        let Some((begin, end)) = curve.pointers
            else {return Ok(curve.max_size())};
        let begin = self.read_variable(begin).await?.as_u32().unwrap_or(0);
        let end = self.read_variable(end).await?.as_u32().unwrap_or(0);
        // pointers are in half-sample units
        Ok(1 + end.saturating_sub(begin) as usize / 2)
    }

    /// read the valid samples of a curve, block by block
    pub async fn curve_read(&self, id: CurveId) -> Result<Vec<f32>, Error> {
        let curve = self.curve_spec(id)?.clone();
        let size = self.curve_size(id).await?.min(curve.max_size());
        let blocks = size.div_ceil(curve.block_size);

        let mut samples = Vec::with_capacity(blocks * curve.block_size);
        for block in 0 .. blocks {
            let offset = block_offset(block)?;
            let mut request = vec![id];
            request.extend_from_slice(&offset.to_be_bytes());
            let answer = self.request(Message::new(CURVE_BLOCK_REQUEST, request), CURVE_BLOCK).await?;
            let (echo, data) = answer.payload.split_at(answer.payload.len().min(3));
            if echo != [id, (offset >> 8) as u8, offset as u8] {
                return Err(Error::Garbled("curve block answer does not match request"));
            }
            if data.len() != curve.block_bytes() {
                return Err(Error::Garbled("curve block size mismatch"));
            }
            samples.extend(bytes_to_samples(data));
        }
        samples.truncate(size);
        Ok(samples)
    }

    /**
        write a curve block by block

        the curve is padded to the curve's maximum size with its last sample. A curve that is empty or longer than the maximum is refused before anything is sent.
    */
    pub async fn curve_write(&self, id: CurveId, samples: &[f32]) -> Result<(), Error> {
        let curve = self.curve_spec(id)?.clone();
        if ! curve.writable {
            return Err(Error::Config(format!("curve {} is read-only", curve.name)));
        }
        check_curve(&curve, samples.len())?;
        let mut padded = samples.to_vec();
        fit(&mut padded, curve.max_size());

        for (block, chunk) in padded.chunks(curve.block_size).enumerate() {
            let offset = block_offset(block)?;
            let mut payload = vec![id];
            payload.extend_from_slice(&offset.to_be_bytes());
            payload.extend(samples_to_bytes(chunk));
            self.request(Message::new(CURVE_BLOCK, payload), u8::from(Ack::Ok)).await?;
        }
        debug!("device {} curve {} written with {} samples", self.address, curve.name, samples.len());
        Ok(())
    }

    /// waveform slot that can be overwritten without disturbing the curve being played
    pub async fn select_writable_curve(&self) -> Result<CurveId, Error> {
        let status = self.read(PS_STATUS).await?;
        let selected = match self.read(WFMREF_SELECTED).await? {
            1 => WFMREF_1,
            _ => WFMREF_0,
        };
        if status.state().plays_wfmref() {
            Ok(if selected == WFMREF_0 {WFMREF_1} else {WFMREF_0})
        }
        else {
            Ok(selected)
        }
    }

    /// write a new waveform reference into the writable slot and select it for the next playback
    pub async fn wfmref_write(&self, samples: &[f32]) -> Result<CurveId, Error> {
        check_curve(self.curve_spec(WFMREF_0)?, samples.len())?;
        let curve = self.select_writable_curve().await?;
        self.curve_write(curve, samples).await?;
        self.execute_function(SELECT_WFMREF, Some(&Value::U16(u16::from(curve)))).await?;
        Ok(curve)
    }

    fn variable_spec(&self, id: VarId) -> Result<&VariableSpec, Error> {
        self.catalog.variable(id)
            .ok_or_else(|| Error::Config(format!("variable {} does not exist in {}", id, self.catalog.name())))
    }
    fn curve_spec(&self, id: CurveId) -> Result<&CurveSpec, Error> {
        self.catalog.curve(id)
            .ok_or_else(|| Error::Config(format!("curve {} does not exist in {}", id, self.catalog.name())))
    }
}

/// refuse curves that cannot be transferred
pub fn check_curve(curve: &CurveSpec, size: usize) -> Result<(), Error> {
    if size == 0 {
        return Err(Error::Config(format!("curve {} cannot be empty", curve.name)));
    }
    if size > curve.max_size() {
        return Err(Error::Config(format!("curve of {} samples exceeds maximum {} of {}", size, curve.max_size(), curve.name)));
    }
    Ok(())
}

fn block_offset(block: usize) -> Result<u16, Error> {
    u16::try_from(block).map_err(|_| Error::Config("curve has too many blocks".into()))
}
