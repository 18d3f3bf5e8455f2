/*!
    hardware models and their entity catalogs

    each [Model] variant has a [ModelBehavior] implementation building its [Catalog] and mapping generic quantities to its variables. Adding a model is adding a variant and its module, the compiler then points every place the new variant must be handled.

    catalogs are built once at startup into a [Registry], which is then handed read-only to the components that need it.
*/

use std::{
    collections::HashMap,
    sync::Arc,
    };
use crate::{
    master::Error,
    entities::{Catalog, CatalogBuilder, CurveSpec, VarId, VarType, Settle},
    variables::*,
    };

pub mod fbp;
pub mod fbp_dclink;
pub mod fac_dcdc;
pub mod fap;

pub use fbp::Fbp;
pub use fbp_dclink::FbpDclink;
pub use fac_dcdc::FacDcdc;
pub use fap::Fap;


/// hardware model of a power supply controller
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Model {
    /// low power supplies, 4 per controller sharing their status
    Fbp,
    /// DC link feeding FBP crates
    FbpDclink,
    /// high power DC/DC converter
    FacDcdc,
    /// high power converter with IGBT pairs
    Fap,
}
impl Model {
    pub const ALL: [Model; 4] = [Model::Fbp, Model::FbpDclink, Model::FacDcdc, Model::Fap];

    pub fn behavior(self) -> &'static dyn ModelBehavior {
        match self {
            Model::Fbp => &Fbp,
            Model::FbpDclink => &FbpDclink,
            Model::FacDcdc => &FacDcdc,
            Model::Fap => &Fap,
        }
    }
    pub fn name(self) -> &'static str {
        self.behavior().name()
    }
}

/// generic quantities whose variable depends on the model
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    Current,
    Voltage,
    SoftInterlocks,
    HardInterlocks,
}

/// block geometry of the curves of a model
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CurveGeometry {
    /// samples per block, common to all curves
    pub block_size: usize,
    /// blocks of each waveform reference slot
    pub wfmref_blocks: usize,
    /// blocks of the samples buffer
    pub samples_blocks: usize,
}
impl Default for CurveGeometry {
    fn default() -> Self {
        Self {
            block_size: 256,
            wfmref_blocks: 16,
            samples_blocks: 16,
        }
    }
}

/// model specific knowledge
pub trait ModelBehavior: Send + Sync {
    fn model(&self) -> Model;
    fn name(&self) -> &'static str;
    /// build and validate the entity catalog for the given curve geometry
    fn catalog(&self, geometry: CurveGeometry) -> Result<Catalog, Error>;
    fn default_geometry(&self) -> CurveGeometry {
        CurveGeometry::default()
    }
    /// variable holding a generic quantity, if the model has it
    fn field(&self, field: Field) -> Option<VarId>;
    /// whether a single device reports the state of all devices of its controller
    fn mirrored(&self) -> bool {
        false
    }
}


/// catalogs of all known models, built once at startup
#[derive(Clone, Debug, Default)]
pub struct Registry {
    catalogs: HashMap<Model, Arc<Catalog>>,
}
impl Registry {
    /// registry without any model
    pub fn empty() -> Self {
        Self::default()
    }
    /// build the catalogs of every model with their default geometry
    pub fn load() -> Result<Self, Error> {
        let mut registry = Self::empty();
        for model in Model::ALL {
            let behavior = model.behavior();
            let catalog = behavior.catalog(behavior.default_geometry())?;
            log::debug!("loaded catalog of {} with {} variables", catalog.name(), catalog.variables().len());
            registry = registry.with(model, catalog);
        }
        Ok(registry)
    }
    /// register or replace the catalog of a model
    pub fn with(mut self, model: Model, catalog: Catalog) -> Self {
        self.catalogs.insert(model, Arc::new(catalog));
        self
    }
    pub fn catalog(&self, model: Model) -> Result<Arc<Catalog>, Error> {
        self.catalogs.get(&model)
            .cloned()
            .ok_or_else(|| Error::Config(format!("no catalog registered for model {}", model.name())))
    }
}


/// entities every model shares, variables 0 to 25, common functions and the three curves
fn common(builder: CatalogBuilder, geometry: CurveGeometry) -> CatalogBuilder {
    builder
        .variable(PS_STATUS.id(), "ps_status", VarType::U16, false)
        .variable(PS_SETPOINT.id(), "ps_setpoint", VarType::F32, false)
        .variable(PS_REFERENCE.id(), "ps_reference", VarType::F32, false)
        .variable(FIRMWARE_VERSION, "firmware_version", VarType::Chars(128), false)
        .variable(COUNTER_SET_SLOWREF.id(), "counter_set_slowref", VarType::U32, false)
        .variable(COUNTER_SYNC_PULSE.id(), "counter_sync_pulse", VarType::U32, false)
        .variable(SIGGEN_ENABLE.id(), "siggen_enable", VarType::U16, false)
        .variable(SIGGEN_TYPE.id(), "siggen_type", VarType::U16, false)
        .variable(SIGGEN_NUM_CYCLES.id(), "siggen_num_cycles", VarType::U16, false)
        .variable(SIGGEN_N.id(), "siggen_n", VarType::F32, false)
        .variable(SIGGEN_FREQ.id(), "siggen_freq", VarType::F32, false)
        .variable(SIGGEN_AMPLITUDE.id(), "siggen_amplitude", VarType::F32, false)
        .variable(SIGGEN_OFFSET.id(), "siggen_offset", VarType::F32, false)
        .variable(SIGGEN_AUX_PARAM, "siggen_aux_param", VarType::Floats(4), false)
        .variable(WFMREF_SELECTED.id(), "wfmref_selected", VarType::U16, false)
        .variable(WFMREF_SYNC_MODE.id(), "wfmref_sync_mode", VarType::U16, false)
        .variable(WFMREF_GAIN.id(), "wfmref_gain", VarType::F32, false)
        .variable(WFMREF_OFFSET.id(), "wfmref_offset", VarType::F32, false)
        .variable(WFMREF0_PTR_BEG.id(), "wfmref0_ptr_beg", VarType::U32, false)
        .variable(WFMREF0_PTR_END.id(), "wfmref0_ptr_end", VarType::U32, false)
        .variable(WFMREF0_PTR_IDX.id(), "wfmref0_ptr_idx", VarType::U32, false)
        .variable(WFMREF1_PTR_BEG.id(), "wfmref1_ptr_beg", VarType::U32, false)
        .variable(WFMREF1_PTR_END.id(), "wfmref1_ptr_end", VarType::U32, false)
        .variable(WFMREF1_PTR_IDX.id(), "wfmref1_ptr_idx", VarType::U32, false)
        .variable(SCOPE_FREQUENCY.id(), "scope_frequency", VarType::F32, false)
        .variable(BUF_SAMPLES_PENDING.id(), "buf_samples_pending", VarType::U16, false)

        .function(TURN_ON, "turn_on", None, None, Settle::Power)
        .function(TURN_OFF, "turn_off", None, None, Settle::Power)
        .function(OPEN_LOOP, "open_loop", None, None, Settle::Loop)
        .function(CLOSE_LOOP, "close_loop", None, None, Settle::Loop)
        .function(SELECT_OP_MODE, "select_op_mode", Some(VarType::U16), None, Settle::None)
        .function(RESET_INTERLOCKS, "reset_interlocks", None, None, Settle::Reset)
        .function(SET_COMMAND_INTERFACE, "set_command_interface", Some(VarType::U16), None, Settle::None)
        .function(SYNC_PULSE, "sync_pulse", None, None, Settle::None)
        .function(SET_SLOWREF, "set_slowref", Some(VarType::F32), None, Settle::None)
        .function(RESET_COUNTERS, "reset_counters", None, None, Settle::None)
        .function(SELECT_WFMREF, "select_wfmref", Some(VarType::U16), None, Settle::None)
        .function(GET_WFMREF_SIZE, "get_wfmref_size", Some(VarType::U16), Some(VarType::U16), Settle::None)
        .function(RESET_WFMREF, "reset_wfmref", None, None, Settle::None)
        .function(ENABLE_SIGGEN, "enable_siggen", None, None, Settle::None)
        .function(DISABLE_SIGGEN, "disable_siggen", None, None, Settle::None)
        .function(ENABLE_BUF_SAMPLES, "enable_buf_samples", None, None, Settle::None)
        .function(DISABLE_BUF_SAMPLES, "disable_buf_samples", None, None, Settle::None)

        .curve(CurveSpec {
            id: WFMREF_0,
            name: "wfmref_data_0",
            writable: true,
            block_size: geometry.block_size,
            blocks: geometry.wfmref_blocks,
            pointers: Some((WFMREF0_PTR_BEG.id(), WFMREF0_PTR_END.id())),
            })
        .curve(CurveSpec {
            id: WFMREF_1,
            name: "wfmref_data_1",
            writable: true,
            block_size: geometry.block_size,
            blocks: geometry.wfmref_blocks,
            pointers: Some((WFMREF1_PTR_BEG.id(), WFMREF1_PTR_END.id())),
            })
        .curve(CurveSpec {
            id: BUF_SAMPLES,
            name: "buf_samples",
            writable: false,
            block_size: geometry.block_size,
            blocks: geometry.samples_blocks,
            pointers: None,
            })
}

/// common variables worth monitoring, firmware version excepted
fn common_relevant() -> impl Iterator<Item=VarId> {
    (0 .. FIRST_MODEL_VARIABLE).filter(|&id| id != FIRMWARE_VERSION)
}

/// common variables needed while synchronization is off
const COMMON_SYNC_OFF: [VarId; 7] = [
    PS_STATUS.id(),
    PS_SETPOINT.id(),
    PS_REFERENCE.id(),
    COUNTER_SET_SLOWREF.id(),
    COUNTER_SYNC_PULSE.id(),
    WFMREF_SELECTED.id(),
    WFMREF_SYNC_MODE.id(),
    ];
