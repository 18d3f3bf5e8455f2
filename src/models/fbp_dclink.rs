use crate::{
    master::Error,
    entities::{Catalog, VarId, VarType},
    variables::*,
    };
use super::*;


pub const PS_SOFT_INTERLOCKS: VarId = 26;
pub const PS_HARD_INTERLOCKS: VarId = 27;
pub const MODULES_STATUS: VarId = 28;
pub const V_OUT: VarId = 29;
pub const V_OUT_1: VarId = 30;
pub const V_OUT_2: VarId = 31;
pub const V_OUT_3: VarId = 32;
pub const DIG_POT_TAP: VarId = 33;


/// DC link feeding a crate of FBP power supplies
pub struct FbpDclink;

impl ModelBehavior for FbpDclink {
    fn model(&self) -> Model {Model::FbpDclink}
    fn name(&self) -> &'static str {"FBP_DCLINK"}

    fn catalog(&self, geometry: CurveGeometry) -> Result<Catalog, Error> {
        common(Catalog::builder(self.name()), geometry)
            .variable(PS_SOFT_INTERLOCKS, "ps_soft_interlocks", VarType::U32, false)
            .variable(PS_HARD_INTERLOCKS, "ps_hard_interlocks", VarType::U32, false)
            .variable(MODULES_STATUS, "modules_status", VarType::U32, false)
            .variable(V_OUT, "v_out", VarType::F32, false)
            .variable(V_OUT_1, "v_out_1", VarType::F32, false)
            .variable(V_OUT_2, "v_out_2", VarType::F32, false)
            .variable(V_OUT_3, "v_out_3", VarType::F32, false)
            .variable(DIG_POT_TAP, "dig_pot_tap", VarType::U8, true)
            .group("all_relevant", common_relevant().chain(PS_SOFT_INTERLOCKS ..= DIG_POT_TAP))
            .group("sync_off", COMMON_SYNC_OFF.into_iter().chain(PS_SOFT_INTERLOCKS ..= V_OUT))
            .group("mirror", [PS_STATUS.id(), PS_SETPOINT.id(), PS_REFERENCE.id(), PS_SOFT_INTERLOCKS, PS_HARD_INTERLOCKS, V_OUT])
            .group("cycle", [PS_STATUS.id(), PS_REFERENCE.id(), COUNTER_SYNC_PULSE.id(), V_OUT])
            .build()
    }
    fn field(&self, field: Field) -> Option<VarId> {
        match field {
            Field::Current => None,
            Field::Voltage => Some(V_OUT),
            Field::SoftInterlocks => Some(PS_SOFT_INTERLOCKS),
            Field::HardInterlocks => Some(PS_HARD_INTERLOCKS),
        }
    }
}
