/*!
    description of the entities exposed by a hardware model: variables, groups, functions and curves

    a [Catalog] is pure data, built once at startup and never mutated. Its construction checks every structural rule the protocol relies on, so the rest of the crate can index it without further checks.
*/

use std::collections::HashSet;
use crate::{
    master::Error,
    command::MAX_PAYLOAD,
    };


pub type VarId = u8;
pub type GroupId = u8;
pub type FuncId = u8;
pub type CurveId = u8;

/// every variable, in ID order
pub const GROUP_ALL: GroupId = 0;
/// read-only variables, in ID order
pub const GROUP_READ_ONLY: GroupId = 1;
/// writable variables, in ID order
pub const GROUP_WRITABLE: GroupId = 2;
/// first ID available for model groups
pub const FIRST_CUSTOM_GROUP: GroupId = 3;

/// variables worth monitoring at all
pub const GROUP_ALL_RELEVANT: GroupId = 3;
/// variables polled while synchronization is off
pub const GROUP_SYNC_OFF: GroupId = 4;
/// variables polled during ramps, possibly mirroring peer devices
pub const GROUP_MIRROR: GroupId = 5;
/// variables polled while cycling on broadcast pulses
pub const GROUP_CYCLE: GroupId = 6;


/// wire type of a variable
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum VarType {
    U8,
    U16,
    U32,
    F32,
    /// fixed size array of floats
    Floats(usize),
    /// fixed size zero-padded text
    Chars(usize),
}

/// decoded value of a variable
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    F32(f32),
    Floats(Vec<f32>),
    Chars(String),
}

impl VarType {
    /// number of bytes on the wire
    pub const fn size(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 | Self::F32 => 4,
            Self::Floats(n) => 4*n,
            Self::Chars(n) => n,
        }
    }
    pub fn default_value(self) -> Value {
        match self {
            Self::U8 => Value::U8(0),
            Self::U16 => Value::U16(0),
            Self::U32 => Value::U32(0),
            Self::F32 => Value::F32(0.),
            Self::Floats(n) => Value::Floats(vec![0.; n]),
            Self::Chars(_) => Value::Chars(String::new()),
        }
    }
    /// decode bytes received for this type, `None` if the size does not match
    pub fn decode(self, bytes: &[u8]) -> Option<Value> {
        if bytes.len() != self.size()
            {return None}
        Some(match self {
            Self::U8 => Value::U8(bytes[0]),
            Self::U16 => Value::U16(u16::from_le_bytes(bytes.try_into().ok()?)),
            Self::U32 => Value::U32(u32::from_le_bytes(bytes.try_into().ok()?)),
            Self::F32 => Value::F32(f32::from_le_bytes(bytes.try_into().ok()?)),
            Self::Floats(_) => Value::Floats(crate::utils::bytes_to_samples(bytes)),
            Self::Chars(_) => {
                let end = bytes.iter().position(|&c| c == 0).unwrap_or(bytes.len());
                Value::Chars(String::from_utf8_lossy(&bytes[.. end]).into_owned())
            },
        })
    }
    /// encode a value for this type, `None` if the value does not fit
    pub fn encode(self, value: &Value) -> Option<Vec<u8>> {
        match (self, value) {
            (Self::U8, Value::U8(v)) => Some(vec![*v]),
            (Self::U16, Value::U16(v)) => Some(v.to_le_bytes().to_vec()),
            (Self::U32, Value::U32(v)) => Some(v.to_le_bytes().to_vec()),
            (Self::F32, Value::F32(v)) => Some(v.to_le_bytes().to_vec()),
            (Self::Floats(n), Value::Floats(v)) if v.len() == n
                => Some(crate::utils::samples_to_bytes(v)),
            (Self::Chars(n), Value::Chars(s)) if s.len() <= n => {
                let mut bytes = s.as_bytes().to_vec();
                bytes.resize(n, 0);
                Some(bytes)
            },
            _ => None,
        }
    }
}

impl Value {
    /// integer content, for any integer type
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U8(v) => Some(u32::from(*v)),
            Self::U16(v) => Some(u32::from(*v)),
            Self::U32(v) => Some(*v),
            _ => None,
        }
    }
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Self::F32(v) => Some(*v),
            _ => None,
        }
    }
    pub fn ty(&self) -> VarType {
        match self {
            Self::U8(_) => VarType::U8,
            Self::U16(_) => VarType::U16,
            Self::U32(_) => VarType::U32,
            Self::F32(_) => VarType::F32,
            Self::Floats(v) => VarType::Floats(v.len()),
            Self::Chars(s) => VarType::Chars(s.len()),
        }
    }
}


#[derive(Clone, Debug, PartialEq)]
pub struct VariableSpec {
    pub id: VarId,
    pub name: &'static str,
    pub ty: VarType,
    pub writable: bool,
}

/// delay category a function requires after acknowledgement, before the bus may be used again
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Settle {
    #[default]
    None,
    /// actuator switching power on or off
    Power,
    /// control loop opening or closing
    Loop,
    /// interlock reset
    Reset,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionSpec {
    pub id: FuncId,
    pub name: &'static str,
    pub input: Option<VarType>,
    pub output: Option<VarType>,
    pub settle: Settle,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CurveSpec {
    pub id: CurveId,
    pub name: &'static str,
    pub writable: bool,
    /// number of samples per transferred block
    pub block_size: usize,
    /// number of blocks of the full curve
    pub blocks: usize,
    /// variables holding the begin and end pointers of the valid samples, if the device reports them
    pub pointers: Option<(VarId, VarId)>,
}
impl CurveSpec {
    /// maximum number of samples
    pub fn max_size(&self) -> usize {
        self.block_size * self.blocks
    }
    pub fn block_bytes(&self) -> usize {
        4 * self.block_size
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GroupSpec {
    pub id: GroupId,
    pub name: &'static str,
    pub variables: Vec<VarId>,
}

/// one mirrored quantity: `sources[k]` on the polled device holds the value of `target` on the k-th device of the controller
#[derive(Clone, Debug, PartialEq)]
pub struct MirrorField {
    pub target: VarId,
    pub sources: Vec<VarId>,
}
/**
    layout of variables by which one device reports the state of all devices sharing its controller

    slot `k` is the device with the k-th lowest address, this is checked when devices are attached to an orchestrator
*/
#[derive(Clone, Debug, PartialEq)]
pub struct MirrorLayout {
    pub slots: usize,
    pub fields: Vec<MirrorField>,
}


/// validated description of all entities of a hardware model
#[derive(Clone, Debug)]
pub struct Catalog {
    name: &'static str,
    variables: Vec<VariableSpec>,
    functions: Vec<FunctionSpec>,
    curves: Vec<CurveSpec>,
    groups: Vec<GroupSpec>,
    mirror: Option<MirrorLayout>,
}

impl Catalog {
    /// assemble a catalog from explicit tables, checking all structural rules
    pub fn new(
        name: &'static str,
        variables: Vec<VariableSpec>,
        functions: Vec<FunctionSpec>,
        curves: Vec<CurveSpec>,
        groups: Vec<GroupSpec>,
        mirror: Option<MirrorLayout>,
        ) -> Result<Self, Error>
    {
        let catalog = Self {name, variables, functions, curves, groups, mirror};
        catalog.validate()?;
        Ok(catalog)
    }
    pub fn builder(name: &'static str) -> CatalogBuilder {
        CatalogBuilder::new(name)
    }

    pub fn name(&self) -> &'static str  {self.name}
    pub fn variables(&self) -> &[VariableSpec]  {&self.variables}
    pub fn functions(&self) -> &[FunctionSpec]  {&self.functions}
    pub fn curves(&self) -> &[CurveSpec]  {&self.curves}
    pub fn groups(&self) -> &[GroupSpec]  {&self.groups}
    pub fn mirror(&self) -> Option<&MirrorLayout>  {self.mirror.as_ref()}

    pub fn variable(&self, id: VarId) -> Option<&VariableSpec> {
        // IDs are consecutive from 0
        self.variables.get(usize::from(id))
    }
    pub fn group(&self, id: GroupId) -> Option<&GroupSpec> {
        // IDs are consecutive from 0
        self.groups.get(usize::from(id))
    }
    pub fn function(&self, id: FuncId) -> Option<&FunctionSpec> {
        self.functions.iter().find(|f| f.id == id)
    }
    pub fn curve(&self, id: CurveId) -> Option<&CurveSpec> {
        self.curves.iter().find(|c| c.id == id)
    }
    /// model groups that must be created on devices, in ID order
    pub fn custom_groups(&self) -> &[GroupSpec] {
        &self.groups[usize::from(FIRST_CUSTOM_GROUP) ..]
    }
    /// maximum size of the waveform reference slots
    pub fn wfmref_max_size(&self) -> usize {
        self.curve(0).map(CurveSpec::max_size).unwrap_or(0)
    }

    fn validate(&self) -> Result<(), Error> {
        let fail = |message: String| Err(Error::Config(format!("catalog {}: {}", self.name, message)));

        // variables
        for (index, variable) in self.variables.iter().enumerate() {
            if usize::from(variable.id) != index {
                return fail(format!("variable {} has ID {}, expected {}", variable.name, variable.id, index));
            }
            if variable.ty.size() == 0 || variable.ty.size() > MAX_PAYLOAD {
                return fail(format!("variable {} has unsupported size", variable.name));
            }
        }

        // structural groups
        if self.groups.len() < usize::from(FIRST_CUSTOM_GROUP) {
            return fail("groups 0 to 2 are mandatory".into());
        }
        for (index, group) in self.groups.iter().enumerate() {
            if usize::from(group.id) != index {
                return fail(format!("group {} has ID {}, group IDs must be contiguous from 0", group.name, group.id));
            }
            let mut seen = HashSet::new();
            for &id in &group.variables {
                if self.variable(id).is_none() {
                    return fail(format!("group {} references unknown variable {}", group.name, id));
                }
                if ! seen.insert(id) {
                    return fail(format!("group {} lists variable {} twice", group.name, id));
                }
            }
            let size: usize = group.variables.iter()
                .filter_map(|&id| self.variable(id))
                .map(|v| v.ty.size())
                .sum();
            if size > MAX_PAYLOAD {
                return fail(format!("group {} exceeds the maximum message size", group.name));
            }
        }
        let all: Vec<VarId> = self.variables.iter().map(|v| v.id).collect();
        let read_only: Vec<VarId> = self.variables.iter().filter(|v| ! v.writable).map(|v| v.id).collect();
        let writable: Vec<VarId> = self.variables.iter().filter(|v| v.writable).map(|v| v.id).collect();
        if self.groups[usize::from(GROUP_ALL)].variables != all {
            return fail("group 0 must list all variables consecutively from 0".into());
        }
        if self.groups[usize::from(GROUP_READ_ONLY)].variables != read_only {
            return fail("group 1 must list exactly the read-only variables".into());
        }
        if self.groups[usize::from(GROUP_WRITABLE)].variables != writable {
            return fail("group 2 must list exactly the writable variables".into());
        }

        // functions
        let mut seen = HashSet::new();
        for function in &self.functions {
            if ! seen.insert(function.id) {
                return fail(format!("function ID {} defined twice", function.id));
            }
        }

        // curves
        let mut seen = HashSet::new();
        for curve in &self.curves {
            if ! seen.insert(curve.id) {
                return fail(format!("curve ID {} defined twice", curve.id));
            }
            if curve.block_size == 0 || curve.blocks == 0 {
                return fail(format!("curve {} is empty", curve.name));
            }
            if curve.block_bytes() + 3 > MAX_PAYLOAD {
                return fail(format!("curve {} blocks exceed the maximum message size", curve.name));
            }
            if let Some((begin, end)) = curve.pointers {
                for pointer in [begin, end] {
                    if self.variable(pointer).and_then(|v| v.ty.default_value().as_u32()).is_none() {
                        return fail(format!("curve {} pointer {} is not an integer variable", curve.name, pointer));
                    }
                }
            }
        }
        match (self.curve(0), self.curve(1)) {
            (Some(first), Some(second)) =>
                if first.block_size != second.block_size || first.blocks != second.blocks {
                    return fail("waveform slots 0 and 1 must have identical size".into());
                },
            (None, None) => {},
            _ => return fail("waveform slots come by pair".into()),
        }

        // mirror layout
        if let Some(mirror) = &self.mirror {
            let Some(group) = self.group(GROUP_MIRROR)
                else {return fail("a mirror layout requires the mirror group".into())};
            if mirror.slots == 0 {
                return fail("mirror layout has no slot".into());
            }
            for field in &mirror.fields {
                let Some(target) = self.variable(field.target)
                    else {return fail(format!("mirror target {} does not exist", field.target))};
                if field.sources.len() != mirror.slots {
                    return fail(format!("mirror of {} must have {} sources", target.name, mirror.slots));
                }
                if ! field.sources.windows(2).all(|pair| pair[0] < pair[1]) {
                    return fail(format!("mirror sources of {} must ascend with device slots", target.name));
                }
                for &source in &field.sources {
                    if self.variable(source).map(|v| v.ty) != Some(target.ty) {
                        return fail(format!("mirror source {} does not match type of {}", source, target.name));
                    }
                    if ! group.variables.contains(&source) {
                        return fail(format!("mirror source {} is not in the mirror group", source));
                    }
                }
            }
        }
        Ok(())
    }
}


/// convenience for declaring catalogs, structural groups are derived and model groups get consecutive IDs
pub struct CatalogBuilder {
    name: &'static str,
    variables: Vec<VariableSpec>,
    functions: Vec<FunctionSpec>,
    curves: Vec<CurveSpec>,
    groups: Vec<(&'static str, Vec<VarId>)>,
    mirror: Option<MirrorLayout>,
}
impl CatalogBuilder {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            variables: Vec::new(),
            functions: Vec::new(),
            curves: Vec::new(),
            groups: Vec::new(),
            mirror: None,
        }
    }
    pub fn variable(mut self, id: VarId, name: &'static str, ty: VarType, writable: bool) -> Self {
        self.variables.push(VariableSpec {id, name, ty, writable});
        self
    }
    pub fn function(mut self, id: FuncId, name: &'static str, input: Option<VarType>, output: Option<VarType>, settle: Settle) -> Self {
        self.functions.push(FunctionSpec {id, name, input, output, settle});
        self
    }
    pub fn curve(mut self, spec: CurveSpec) -> Self {
        self.curves.push(spec);
        self
    }
    /// append a model group, it will take the next free group ID
    pub fn group(mut self, name: &'static str, variables: impl IntoIterator<Item=VarId>) -> Self {
        self.groups.push((name, variables.into_iter().collect()));
        self
    }
    pub fn mirror(mut self, layout: MirrorLayout) -> Self {
        self.mirror = Some(layout);
        self
    }
    pub fn build(mut self) -> Result<Catalog, Error> {
        self.variables.sort_by_key(|v| v.id);
        let all = self.variables.iter().map(|v| v.id).collect();
        let read_only = self.variables.iter().filter(|v| ! v.writable).map(|v| v.id).collect();
        let writable = self.variables.iter().filter(|v| v.writable).map(|v| v.id).collect();
        let mut groups = vec![
            GroupSpec {id: GROUP_ALL, name: "all", variables: all},
            GroupSpec {id: GROUP_READ_ONLY, name: "read-only", variables: read_only},
            GroupSpec {id: GROUP_WRITABLE, name: "writable", variables: writable},
            ];
        for (index, (name, variables)) in self.groups.into_iter().enumerate() {
            let id = GroupId::try_from(usize::from(FIRST_CUSTOM_GROUP) + index)
                .map_err(|_| Error::Config(format!("catalog {}: too many groups", self.name)))?;
            groups.push(GroupSpec {id, name, variables});
        }
        Catalog::new(self.name, self.variables, self.functions, self.curves, groups, self.mirror)
    }
}
