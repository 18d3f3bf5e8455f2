/*!
    standard entities shared by every power supply model

    each standard variable is described by a serializable data type and a constant of type [Variable] holding its ID. Functions and curves are plain IDs since their payloads depend on the call.
*/

use core::marker::PhantomData;
use packbytes::{FromBytes, ByteArray};
use bilge::prelude::*;
use crate::{
    pack_bilge,
    entities::{VarId, FuncId, CurveId},
    };


/**
    a variable is a typed ID in a device's variable table

    it holds nothing but the ID, hence can be created, copied or destroyed at no cost
*/
#[derive(PartialEq, Hash)]
pub struct Variable<T> {
    id: VarId,
    ty: PhantomData<T>,
}
impl<T> Variable<T> {
    pub const fn new(id: VarId) -> Self {
        Self{id, ty: PhantomData}
    }
    pub const fn id(&self) -> VarId {self.id}
}
impl<T: FromBytes> Variable<T> {
    pub const fn size(&self) -> usize {T::Bytes::SIZE}
}
impl<T> Clone for Variable<T> {
    fn clone(&self) -> Self {
        Self::new(self.id)
    }
}
impl<T> Copy for Variable<T> {}


/// operation state and flags
pub const PS_STATUS: Variable<PsStatus> = Variable::new(0);
/// last setpoint received
pub const PS_SETPOINT: Variable<f32> = Variable::new(1);
/// reference currently applied to the control loop
pub const PS_REFERENCE: Variable<f32> = Variable::new(2);
pub const FIRMWARE_VERSION: VarId = 3;
/// number of slow reference changes since last counter reset
pub const COUNTER_SET_SLOWREF: Variable<u32> = Variable::new(4);
/// number of synchronization pulses received since last counter reset
pub const COUNTER_SYNC_PULSE: Variable<u32> = Variable::new(5);
pub const SIGGEN_ENABLE: Variable<u16> = Variable::new(6);
pub const SIGGEN_TYPE: Variable<u16> = Variable::new(7);
pub const SIGGEN_NUM_CYCLES: Variable<u16> = Variable::new(8);
pub const SIGGEN_N: Variable<f32> = Variable::new(9);
pub const SIGGEN_FREQ: Variable<f32> = Variable::new(10);
pub const SIGGEN_AMPLITUDE: Variable<f32> = Variable::new(11);
pub const SIGGEN_OFFSET: Variable<f32> = Variable::new(12);
pub const SIGGEN_AUX_PARAM: VarId = 13;
/// waveform slot selected for playback
pub const WFMREF_SELECTED: Variable<u16> = Variable::new(14);
pub const WFMREF_SYNC_MODE: Variable<u16> = Variable::new(15);
pub const WFMREF_GAIN: Variable<f32> = Variable::new(16);
pub const WFMREF_OFFSET: Variable<f32> = Variable::new(17);
pub const WFMREF0_PTR_BEG: Variable<u32> = Variable::new(18);
pub const WFMREF0_PTR_END: Variable<u32> = Variable::new(19);
pub const WFMREF0_PTR_IDX: Variable<u32> = Variable::new(20);
pub const WFMREF1_PTR_BEG: Variable<u32> = Variable::new(21);
pub const WFMREF1_PTR_END: Variable<u32> = Variable::new(22);
pub const WFMREF1_PTR_IDX: Variable<u32> = Variable::new(23);
pub const SCOPE_FREQUENCY: Variable<f32> = Variable::new(24);
/// non-zero while the device is still filling its samples buffer
pub const BUF_SAMPLES_PENDING: Variable<u16> = Variable::new(25);
/// first ID available for model variables
pub const FIRST_MODEL_VARIABLE: VarId = 26;


pub const TURN_ON: FuncId = 0;
pub const TURN_OFF: FuncId = 1;
pub const OPEN_LOOP: FuncId = 2;
pub const CLOSE_LOOP: FuncId = 3;
/// argument is a [PsState] value
pub const SELECT_OP_MODE: FuncId = 4;
pub const RESET_INTERLOCKS: FuncId = 5;
pub const SET_COMMAND_INTERFACE: FuncId = 6;
pub const SYNC_PULSE: FuncId = 15;
pub const SET_SLOWREF: FuncId = 16;
/// set the slow reference of the 4 devices of a controller at once
pub const SET_SLOWREF_FBP: FuncId = 17;
pub const RESET_COUNTERS: FuncId = 22;
/// argument is the curve ID to play
pub const SELECT_WFMREF: FuncId = 24;
pub const GET_WFMREF_SIZE: FuncId = 25;
pub const RESET_WFMREF: FuncId = 26;
pub const ENABLE_SIGGEN: FuncId = 29;
pub const DISABLE_SIGGEN: FuncId = 30;
/// restart the samples buffer acquisition
pub const ENABLE_BUF_SAMPLES: FuncId = 31;
pub const DISABLE_BUF_SAMPLES: FuncId = 32;


/// first waveform reference slot
pub const WFMREF_0: CurveId = 0;
/// second waveform reference slot
pub const WFMREF_1: CurveId = 1;
/// samples of the output recorded by the device
pub const BUF_SAMPLES: CurveId = 2;


/// content of [PS_STATUS]
#[bitsize(16)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq, Default)]
pub struct PsStatus {
    pub state: PsState,
    pub open_loop: bool,
    /// 0 remote, 1 local, 2 PC host
    pub interface: u2,
    pub active: bool,
    pub model: u5,
    pub unlocked: bool,
    reserved: u2,
}
pack_bilge!(PsStatus, u16);

/// operation state of a power supply
#[bitsize(4)]
#[derive(Copy, Clone, Default, FromBits, Debug, PartialEq)]
pub enum PsState {
    #[default]
    Off = 0,
    Interlock = 1,
    Initializing = 2,
    SlowRef = 3,
    SlowRefSync = 4,
    Cycle = 5,
    /// playing a waveform, synchronized on ramp pulses
    RmpWfm = 6,
    /// playing a waveform once, for migration
    MigWfm = 7,
    FastRef = 8,
    #[fallback]
    Unknown = 15,
}
impl PsState {
    /// whether a waveform slot is currently being consumed
    pub fn plays_wfmref(self) -> bool {
        matches!(self, Self::RmpWfm | Self::MigWfm)
    }
}
