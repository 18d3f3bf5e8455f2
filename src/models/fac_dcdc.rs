use crate::{
    master::Error,
    entities::{Catalog, VarId, VarType},
    variables::*,
    };
use super::*;


pub const PS_SOFT_INTERLOCKS: VarId = 26;
pub const PS_HARD_INTERLOCKS: VarId = 27;
pub const I_LOAD_MEAN: VarId = 28;
pub const I_LOAD_1: VarId = 29;
pub const I_LOAD_2: VarId = 30;
pub const V_CAPBANK: VarId = 31;
pub const DUTY_CYCLE: VarId = 32;
pub const I_INPUT_IIB: VarId = 33;
pub const V_INPUT_IIB: VarId = 34;
pub const TEMP_INDUCTORS: VarId = 35;
pub const TEMP_IGBT: VarId = 36;
pub const SCOPE_DURATION: VarId = 37;


/// high power DC/DC converter, one per controller
pub struct FacDcdc;

impl ModelBehavior for FacDcdc {
    fn model(&self) -> Model {Model::FacDcdc}
    fn name(&self) -> &'static str {"FAC_DCDC"}

    fn catalog(&self, geometry: CurveGeometry) -> Result<Catalog, Error> {
        common(Catalog::builder(self.name()), geometry)
            .variable(PS_SOFT_INTERLOCKS, "ps_soft_interlocks", VarType::U32, false)
            .variable(PS_HARD_INTERLOCKS, "ps_hard_interlocks", VarType::U32, false)
            .variable(I_LOAD_MEAN, "i_load_mean", VarType::F32, false)
            .variable(I_LOAD_1, "i_load_1", VarType::F32, false)
            .variable(I_LOAD_2, "i_load_2", VarType::F32, false)
            .variable(V_CAPBANK, "v_capbank", VarType::F32, false)
            .variable(DUTY_CYCLE, "duty_cycle", VarType::F32, false)
            .variable(I_INPUT_IIB, "i_input_iib", VarType::F32, false)
            .variable(V_INPUT_IIB, "v_input_iib", VarType::F32, false)
            .variable(TEMP_INDUCTORS, "temp_inductors", VarType::F32, false)
            .variable(TEMP_IGBT, "temp_igbt", VarType::F32, false)
            .variable(SCOPE_DURATION, "scope_duration", VarType::F32, true)
            .group("all_relevant", common_relevant().chain(PS_SOFT_INTERLOCKS ..= SCOPE_DURATION))
            .group("sync_off", COMMON_SYNC_OFF.into_iter().chain(PS_SOFT_INTERLOCKS ..= DUTY_CYCLE))
            .group("mirror", [PS_STATUS.id(), PS_SETPOINT.id(), PS_REFERENCE.id(), PS_SOFT_INTERLOCKS, PS_HARD_INTERLOCKS, I_LOAD_MEAN])
            .group("cycle", [PS_STATUS.id(), PS_REFERENCE.id(), COUNTER_SYNC_PULSE.id(), I_LOAD_MEAN])
            .build()
    }
    fn field(&self, field: Field) -> Option<VarId> {
        Some(match field {
            Field::Current => I_LOAD_MEAN,
            Field::Voltage => V_CAPBANK,
            Field::SoftInterlocks => PS_SOFT_INTERLOCKS,
            Field::HardInterlocks => PS_HARD_INTERLOCKS,
        })
    }
}
