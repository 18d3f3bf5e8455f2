use crate::{
    master::Error,
    entities::{Catalog, MirrorLayout, MirrorField, VarId, VarType, Settle},
    variables::*,
    };
use super::*;


pub const PS_SOFT_INTERLOCKS: VarId = 26;
pub const PS_HARD_INTERLOCKS: VarId = 27;
pub const I_LOAD: VarId = 28;
pub const V_LOAD: VarId = 29;
pub const V_DCLINK: VarId = 30;
pub const TEMP_SWITCHES: VarId = 31;
pub const DUTY_CYCLE: VarId = 32;
pub const SCOPE_DURATION: VarId = 33;

/// number of devices sharing one controller
pub const SLOTS: usize = 4;
/// mirrored variables, each block of 4 is indexed by device slot
pub const PS_STATUS_MIRROR: VarId = 34;
pub const PS_SETPOINT_MIRROR: VarId = 38;
pub const PS_REFERENCE_MIRROR: VarId = 42;
pub const PS_SOFT_INTERLOCKS_MIRROR: VarId = 46;
pub const PS_HARD_INTERLOCKS_MIRROR: VarId = 50;
pub const I_LOAD_MIRROR: VarId = 54;
pub const V_LOAD_MIRROR: VarId = 58;

/// (target variable, first mirror variable, name of mirror variables, type)
const MIRRORED: [(VarId, VarId, [&str; SLOTS], VarType); 7] = [
    (PS_STATUS.id(), PS_STATUS_MIRROR, ["ps_status_1", "ps_status_2", "ps_status_3", "ps_status_4"], VarType::U16),
    (PS_SETPOINT.id(), PS_SETPOINT_MIRROR, ["ps_setpoint_1", "ps_setpoint_2", "ps_setpoint_3", "ps_setpoint_4"], VarType::F32),
    (PS_REFERENCE.id(), PS_REFERENCE_MIRROR, ["ps_reference_1", "ps_reference_2", "ps_reference_3", "ps_reference_4"], VarType::F32),
    (PS_SOFT_INTERLOCKS, PS_SOFT_INTERLOCKS_MIRROR, ["ps_soft_interlocks_1", "ps_soft_interlocks_2", "ps_soft_interlocks_3", "ps_soft_interlocks_4"], VarType::U32),
    (PS_HARD_INTERLOCKS, PS_HARD_INTERLOCKS_MIRROR, ["ps_hard_interlocks_1", "ps_hard_interlocks_2", "ps_hard_interlocks_3", "ps_hard_interlocks_4"], VarType::U32),
    (I_LOAD, I_LOAD_MIRROR, ["i_load_1", "i_load_2", "i_load_3", "i_load_4"], VarType::F32),
    (V_LOAD, V_LOAD_MIRROR, ["v_load_1", "v_load_2", "v_load_3", "v_load_4"], VarType::F32),
    ];


/// low power supplies, up to 4 per controller
pub struct Fbp;

impl ModelBehavior for Fbp {
    fn model(&self) -> Model {Model::Fbp}
    fn name(&self) -> &'static str {"FBP"}

    fn catalog(&self, geometry: CurveGeometry) -> Result<Catalog, Error> {
        let mut builder = common(Catalog::builder(self.name()), geometry)
            .variable(PS_SOFT_INTERLOCKS, "ps_soft_interlocks", VarType::U32, false)
            .variable(PS_HARD_INTERLOCKS, "ps_hard_interlocks", VarType::U32, false)
            .variable(I_LOAD, "i_load", VarType::F32, false)
            .variable(V_LOAD, "v_load", VarType::F32, false)
            .variable(V_DCLINK, "v_dclink", VarType::F32, false)
            .variable(TEMP_SWITCHES, "temp_switches", VarType::F32, false)
            .variable(DUTY_CYCLE, "duty_cycle", VarType::F32, false)
            .variable(SCOPE_DURATION, "scope_duration", VarType::F32, true);
        let mut fields = Vec::new();
        for (target, first, names, ty) in MIRRORED {
            let sources: Vec<VarId> = (first ..).take(SLOTS).collect();
            for (&id, name) in sources.iter().zip(names) {
                builder = builder.variable(id, name, ty, false);
            }
            fields.push(MirrorField {target, sources});
        }
        builder
            .function(SET_SLOWREF_FBP, "set_slowref_fbp", Some(VarType::Floats(SLOTS)), None, Settle::None)
            .group("all_relevant", common_relevant().chain(PS_SOFT_INTERLOCKS ..= SCOPE_DURATION))
            .group("sync_off", COMMON_SYNC_OFF.into_iter().chain(PS_SOFT_INTERLOCKS ..= DUTY_CYCLE))
            .group("mirror", PS_STATUS_MIRROR .. V_LOAD_MIRROR + SLOTS as VarId)
            .group("cycle", [PS_STATUS.id(), PS_REFERENCE.id(), COUNTER_SYNC_PULSE.id(), I_LOAD])
            .mirror(MirrorLayout {slots: SLOTS, fields})
            .build()
    }
    fn field(&self, field: Field) -> Option<VarId> {
        Some(match field {
            Field::Current => I_LOAD,
            Field::Voltage => V_LOAD,
            Field::SoftInterlocks => PS_SOFT_INTERLOCKS,
            Field::HardInterlocks => PS_HARD_INTERLOCKS,
        })
    }
    fn mirrored(&self) -> bool {true}
}
