use crate::{
    master::Error,
    entities::{Catalog, VarId, VarType},
    variables::*,
    };
use super::*;


pub const PS_SOFT_INTERLOCKS: VarId = 26;
pub const PS_HARD_INTERLOCKS: VarId = 27;
pub const IIB_INTERLOCKS: VarId = 28;
pub const I_LOAD_MEAN: VarId = 29;
pub const I_LOAD_1: VarId = 30;
pub const I_LOAD_2: VarId = 31;
pub const V_DCLINK: VarId = 32;
pub const I_IGBT_1: VarId = 33;
pub const I_IGBT_2: VarId = 34;
pub const DUTY_CYCLE_1: VarId = 35;
pub const DUTY_CYCLE_2: VarId = 36;
pub const SCOPE_DURATION: VarId = 37;


/// high power converter driving two IGBT legs
pub struct Fap;

impl ModelBehavior for Fap {
    fn model(&self) -> Model {Model::Fap}
    fn name(&self) -> &'static str {"FAP"}

    fn catalog(&self, geometry: CurveGeometry) -> Result<Catalog, Error> {
        common(Catalog::builder(self.name()), geometry)
            .variable(PS_SOFT_INTERLOCKS, "ps_soft_interlocks", VarType::U32, false)
            .variable(PS_HARD_INTERLOCKS, "ps_hard_interlocks", VarType::U32, false)
            .variable(IIB_INTERLOCKS, "iib_interlocks", VarType::U32, false)
            .variable(I_LOAD_MEAN, "i_load_mean", VarType::F32, false)
            .variable(I_LOAD_1, "i_load_1", VarType::F32, false)
            .variable(I_LOAD_2, "i_load_2", VarType::F32, false)
            .variable(V_DCLINK, "v_dclink", VarType::F32, false)
            .variable(I_IGBT_1, "i_igbt_1", VarType::F32, false)
            .variable(I_IGBT_2, "i_igbt_2", VarType::F32, false)
            .variable(DUTY_CYCLE_1, "duty_cycle_1", VarType::F32, false)
            .variable(DUTY_CYCLE_2, "duty_cycle_2", VarType::F32, false)
            .variable(SCOPE_DURATION, "scope_duration", VarType::F32, true)
            .group("all_relevant", common_relevant().chain(PS_SOFT_INTERLOCKS ..= SCOPE_DURATION))
            .group("sync_off", COMMON_SYNC_OFF.into_iter().chain(PS_SOFT_INTERLOCKS ..= I_LOAD_2))
            .group("mirror", [PS_STATUS.id(), PS_SETPOINT.id(), PS_REFERENCE.id(), PS_SOFT_INTERLOCKS, PS_HARD_INTERLOCKS, IIB_INTERLOCKS, I_LOAD_MEAN])
            .group("cycle", [PS_STATUS.id(), PS_REFERENCE.id(), COUNTER_SYNC_PULSE.id(), I_LOAD_MEAN])
            .build()
    }
    fn field(&self, field: Field) -> Option<VarId> {
        Some(match field {
            Field::Current => I_LOAD_MEAN,
            Field::Voltage => V_DCLINK,
            Field::SoftInterlocks => PS_SOFT_INTERLOCKS,
            Field::HardInterlocks => PS_HARD_INTERLOCKS,
        })
    }
}
