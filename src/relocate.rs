//! Device / dtype relocation of tensors held in nested containers.
//!
//! Model inputs and outputs arrive as heterogeneous trees: keyword mappings
//! of tensors, lists of past key/values, named tuples, plain host buffers
//! coming from an image processor, and so on. [`relocate`] walks such a tree
//! and returns a structurally identical copy where every tensor has been
//! moved to a device or cast to a dtype. Everything that is not a tensor
//! passes through untouched.

use candle_core::{DType, Device, Tensor};

use crate::error::{RelocateError, RelocateResult};

/// Concrete mapping type of a [`Nested::Map`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapKind {
    Dict,
    UserDict,
    /// Model output record, keeps the record type name.
    ModelOutput(String),
}

/// Non-array leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// Typed flat buffer of a host (non-candle) array.
#[derive(Debug, Clone, PartialEq)]
pub enum HostData {
    U8(Vec<u8>),
    U32(Vec<u32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    // No candle counterpart.
    I16(Vec<i16>),
    I32(Vec<i32>),
    Bool(Vec<bool>),
}

impl HostData {
    pub fn dtype_name(&self) -> &'static str {
        match self {
            HostData::U8(_) => "uint8",
            HostData::U32(_) => "uint32",
            HostData::I64(_) => "int64",
            HostData::F32(_) => "float32",
            HostData::F64(_) => "float64",
            HostData::I16(_) => "int16",
            HostData::I32(_) => "int32",
            HostData::Bool(_) => "bool",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            HostData::U8(v) => v.len(),
            HostData::U32(v) => v.len(),
            HostData::I64(v) => v.len(),
            HostData::F32(v) => v.len(),
            HostData::F64(v) => v.len(),
            HostData::I16(v) => v.len(),
            HostData::I32(v) => v.len(),
            HostData::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A host array (numpy-like): a typed buffer plus its shape.
#[derive(Debug, Clone, PartialEq)]
pub struct HostArray {
    pub data: HostData,
    pub shape: Vec<usize>,
}

impl HostArray {
    pub fn new(data: HostData, shape: Vec<usize>) -> Self {
        Self { data, shape }
    }

    /// Adapts the buffer into a CPU tensor.
    ///
    /// Fails with [`RelocateError::Conversion`] when the element type has no
    /// candle dtype or when the buffer length does not match the shape.
    pub fn to_tensor(&self) -> RelocateResult<Tensor> {
        let expected = self
            .shape
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| RelocateError::Conversion {
                dtype: self.data.dtype_name().to_string(),
                reason: format!("shape {:?} overflows usize", self.shape),
            })?;
        if expected != self.data.len() {
            return Err(RelocateError::Conversion {
                dtype: self.data.dtype_name().to_string(),
                reason: format!(
                    "buffer holds {} elements but shape {:?} needs {}",
                    self.data.len(),
                    self.shape,
                    expected
                ),
            });
        }
        let shape = self.shape.clone();
        let device = Device::Cpu;
        let tensor = match &self.data {
            HostData::U8(v) => Tensor::from_vec(v.clone(), shape, &device)?,
            HostData::U32(v) => Tensor::from_vec(v.clone(), shape, &device)?,
            HostData::I64(v) => Tensor::from_vec(v.clone(), shape, &device)?,
            HostData::F32(v) => Tensor::from_vec(v.clone(), shape, &device)?,
            HostData::F64(v) => Tensor::from_vec(v.clone(), shape, &device)?,
            other => {
                return Err(RelocateError::Conversion {
                    dtype: other.dtype_name().to_string(),
                    reason: "no matching tensor dtype".to_string(),
                })
            }
        };
        Ok(tensor)
    }
}

/// A recursively nested value whose leaves may be tensors.
#[derive(Debug, Clone)]
pub enum Nested {
    Map {
        kind: MapKind,
        entries: Vec<(String, Nested)>,
    },
    List(Vec<Nested>),
    Tuple(Vec<Nested>),
    NamedTuple {
        name: String,
        fields: Vec<(String, Nested)>,
    },
    /// Elements in insertion order. Relocation does not re-check uniqueness.
    Set(Vec<Nested>),
    Tensor(Tensor),
    Array(HostArray),
    Scalar(Scalar),
}

impl Nested {
    pub fn dict<K: Into<String>>(entries: impl IntoIterator<Item = (K, Nested)>) -> Self {
        Nested::Map {
            kind: MapKind::Dict,
            entries: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Rebuilds the tree, passing every tensor leaf through `f`.
    ///
    /// Host arrays are adapted to tensors first. Containers are always
    /// rebuilt; scalars are cloned as is.
    pub fn try_map_tensors<F>(&self, f: &mut F) -> RelocateResult<Nested>
    where
        F: FnMut(&Tensor) -> RelocateResult<Tensor>,
    {
        let out = match self {
            Nested::Map { kind, entries } => Nested::Map {
                kind: kind.clone(),
                entries: map_entries(entries, f)?,
            },
            Nested::List(items) => Nested::List(map_items(items, f)?),
            Nested::Tuple(items) => Nested::Tuple(map_items(items, f)?),
            Nested::NamedTuple { name, fields } => Nested::NamedTuple {
                name: name.clone(),
                fields: map_entries(fields, f)?,
            },
            Nested::Set(items) => Nested::Set(map_items(items, f)?),
            Nested::Tensor(t) => Nested::Tensor(f(t)?),
            Nested::Array(array) => Nested::Tensor(f(&array.to_tensor()?)?),
            Nested::Scalar(_) => self.clone(),
        };
        Ok(out)
    }

    /// All tensor leaves, depth-first.
    pub fn tensors(&self) -> Vec<&Tensor> {
        let mut out = Vec::new();
        self.collect_tensors(&mut out);
        out
    }

    fn collect_tensors<'a>(&'a self, out: &mut Vec<&'a Tensor>) {
        match self {
            Nested::Map { entries, .. } | Nested::NamedTuple { fields: entries, .. } => {
                for (_, v) in entries {
                    v.collect_tensors(out);
                }
            }
            Nested::List(items) | Nested::Tuple(items) | Nested::Set(items) => {
                for v in items {
                    v.collect_tensors(out);
                }
            }
            Nested::Tensor(t) => out.push(t),
            Nested::Array(_) | Nested::Scalar(_) => {}
        }
    }
}

fn map_items<F>(items: &[Nested], f: &mut F) -> RelocateResult<Vec<Nested>>
where
    F: FnMut(&Tensor) -> RelocateResult<Tensor>,
{
    items.iter().map(|v| v.try_map_tensors(f)).collect()
}

fn map_entries<F>(entries: &[(String, Nested)], f: &mut F) -> RelocateResult<Vec<(String, Nested)>>
where
    F: FnMut(&Tensor) -> RelocateResult<Tensor>,
{
    entries
        .iter()
        .map(|(k, v)| Ok((k.clone(), v.try_map_tensors(f)?)))
        .collect()
}

/// Structural equality; tensors compare by device, dtype, shape and values.
impl PartialEq for Nested {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Nested::Map { kind: ka, entries: ea },
                Nested::Map { kind: kb, entries: eb },
            ) => ka == kb && ea == eb,
            (Nested::List(a), Nested::List(b))
            | (Nested::Tuple(a), Nested::Tuple(b))
            | (Nested::Set(a), Nested::Set(b)) => a == b,
            (
                Nested::NamedTuple { name: na, fields: fa },
                Nested::NamedTuple { name: nb, fields: fb },
            ) => na == nb && fa == fb,
            (Nested::Tensor(a), Nested::Tensor(b)) => tensors_equal(a, b),
            (Nested::Array(a), Nested::Array(b)) => a == b,
            (Nested::Scalar(a), Nested::Scalar(b)) => a == b,
            _ => false,
        }
    }
}

fn tensors_equal(a: &Tensor, b: &Tensor) -> bool {
    if !a.device().same_device(b.device()) || a.dtype() != b.dtype() || a.dims() != b.dims() {
        return false;
    }
    let values = |t: &Tensor| -> candle_core::Result<Vec<f64>> {
        t.to_dtype(DType::F64)?.flatten_all()?.to_vec1::<f64>()
    };
    match (values(a), values(b)) {
        (Ok(va), Ok(vb)) => va == vb,
        _ => false,
    }
}

impl From<Tensor> for Nested {
    fn from(t: Tensor) -> Self {
        Nested::Tensor(t)
    }
}

impl From<HostArray> for Nested {
    fn from(a: HostArray) -> Self {
        Nested::Array(a)
    }
}

impl From<Scalar> for Nested {
    fn from(s: Scalar) -> Self {
        Nested::Scalar(s)
    }
}

impl From<&str> for Nested {
    fn from(s: &str) -> Self {
        Nested::Scalar(Scalar::Str(s.to_string()))
    }
}

impl From<i64> for Nested {
    fn from(v: i64) -> Self {
        Nested::Scalar(Scalar::Int(v))
    }
}

impl From<f64> for Nested {
    fn from(v: f64) -> Self {
        Nested::Scalar(Scalar::Float(v))
    }
}

impl From<bool> for Nested {
    fn from(v: bool) -> Self {
        Nested::Scalar(Scalar::Bool(v))
    }
}

/// Where tensors should end up.
#[derive(Debug, Clone)]
pub enum Target {
    Device(Device),
    DType(DType),
}

impl From<Device> for Target {
    fn from(d: Device) -> Self {
        Target::Device(d)
    }
}

impl From<DType> for Target {
    fn from(d: DType) -> Self {
        Target::DType(d)
    }
}

/// Returns a copy of `value` with every tensor moved to / cast to `target`.
///
/// A tensor already on the target device or dtype is returned as a new
/// handle on the same storage.
pub fn relocate(value: &Nested, target: &Target) -> RelocateResult<Nested> {
    match target {
        Target::Device(device) => value.try_map_tensors(&mut |t: &Tensor| Ok(t.to_device(device)?)),
        Target::DType(dtype) => value.try_map_tensors(&mut |t: &Tensor| Ok(t.to_dtype(*dtype)?)),
    }
}

pub fn ensure_tensor_on_device(value: &Nested, device: &Device) -> RelocateResult<Nested> {
    relocate(value, &Target::Device(device.clone()))
}

pub fn ensure_tensor_dtype(value: &Nested, dtype: DType) -> RelocateResult<Nested> {
    relocate(value, &Target::DType(dtype))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> Nested {
        let device = Device::Cpu;
        let ids = Tensor::new(&[1u32, 2, 3], &device).unwrap();
        let mask = Tensor::new(&[[1f32, 1.0], [0.0, 1.0]], &device).unwrap();
        Nested::dict([
            ("input_ids", Nested::Tensor(ids)),
            (
                "past",
                Nested::List(vec![Nested::Tuple(vec![
                    Nested::Tensor(mask.clone()),
                    Nested::Tensor(mask),
                ])]),
            ),
            ("name", Nested::from("prompt")),
            ("count", Nested::from(3i64)),
        ])
    }

    // ── identity on tensor-free trees ──

    #[test]
    fn no_tensors_is_identity() {
        let tree = Nested::Map {
            kind: MapKind::UserDict,
            entries: vec![
                ("a".into(), Nested::from(1i64)),
                (
                    "b".into(),
                    Nested::List(vec![Nested::from("x"), Nested::Scalar(Scalar::None)]),
                ),
                (
                    "c".into(),
                    Nested::NamedTuple {
                        name: "Point".into(),
                        fields: vec![("x".into(), Nested::from(0.5)), ("y".into(), Nested::from(true))],
                    },
                ),
                ("d".into(), Nested::Set(vec![Nested::from(1i64), Nested::from(2i64)])),
            ],
        };
        let out = relocate(&tree, &Target::DType(DType::F16)).unwrap();
        assert_eq!(out, tree);
        let out = ensure_tensor_on_device(&tree, &Device::Cpu).unwrap();
        assert_eq!(out, tree);
    }

    // ── dtype / device ──

    #[test]
    fn dtype_cast_reaches_every_tensor() {
        let out = ensure_tensor_dtype(&sample_tree(), DType::F64).unwrap();
        let tensors = out.tensors();
        assert_eq!(tensors.len(), 3);
        assert!(tensors.iter().all(|t| t.dtype() == DType::F64));
    }

    #[test]
    fn field_order_and_kinds_preserved() {
        let out = ensure_tensor_dtype(&sample_tree(), DType::F32).unwrap();
        match out {
            Nested::Map { kind, entries } => {
                assert_eq!(kind, MapKind::Dict);
                let keys: Vec<_> = entries.iter().map(|(k, _)| k.as_str()).collect();
                assert_eq!(keys, ["input_ids", "past", "name", "count"]);
                assert!(matches!(&entries[1].1, Nested::List(v) if matches!(v[0], Nested::Tuple(_))));
                assert_eq!(entries[2].1, Nested::from("prompt"));
            }
            other => panic!("expected map, got {other:?}"),
        }
    }

    #[test]
    fn relocation_is_idempotent() {
        let target = Target::DType(DType::F64);
        let once = relocate(&sample_tree(), &target).unwrap();
        let twice = relocate(&once, &target).unwrap();
        assert_eq!(once, twice);

        let target = Target::Device(Device::Cpu);
        let once = relocate(&sample_tree(), &target).unwrap();
        let twice = relocate(&once, &target).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn named_tuple_keeps_names() {
        let t = Tensor::new(&[1f32, 2.0], &Device::Cpu).unwrap();
        let tree = Nested::NamedTuple {
            name: "CausalLMOutput".into(),
            fields: vec![("logits".into(), Nested::Tensor(t)), ("loss".into(), Nested::Scalar(Scalar::None))],
        };
        let out = ensure_tensor_dtype(&tree, DType::F64).unwrap();
        match out {
            Nested::NamedTuple { name, fields } => {
                assert_eq!(name, "CausalLMOutput");
                assert_eq!(fields[0].0, "logits");
                assert!(matches!(&fields[0].1, Nested::Tensor(t) if t.dtype() == DType::F64));
                assert_eq!(fields[1].1, Nested::Scalar(Scalar::None));
            }
            other => panic!("expected named tuple, got {other:?}"),
        }
    }

    // ── host arrays ──

    #[test]
    fn host_array_becomes_tensor() {
        let array = HostArray::new(HostData::F64(vec![1.0, 2.0, 3.0, 4.0]), vec![2, 2]);
        let tree = Nested::List(vec![Nested::Array(array)]);
        let out = ensure_tensor_on_device(&tree, &Device::Cpu).unwrap();
        let tensors = out.tensors();
        assert_eq!(tensors.len(), 1);
        assert_eq!(tensors[0].dims(), &[2, 2]);
        assert_eq!(tensors[0].dtype(), DType::F64);
        assert_eq!(
            tensors[0].to_vec2::<f64>().unwrap(),
            vec![vec![1.0, 2.0], vec![3.0, 4.0]]
        );
    }

    #[test]
    fn host_array_cast() {
        let array = HostArray::new(HostData::U8(vec![0, 255]), vec![2]);
        let out = ensure_tensor_dtype(&Nested::Array(array), DType::F32).unwrap();
        match out {
            Nested::Tensor(t) => assert_eq!(t.to_vec1::<f32>().unwrap(), vec![0.0, 255.0]),
            other => panic!("expected tensor, got {other:?}"),
        }
    }

    #[test]
    fn unsupported_host_dtype_fails() {
        let array = HostArray::new(HostData::I32(vec![1, 2]), vec![2]);
        let tree = Nested::dict([("pixel_values", Nested::Array(array))]);
        let err = ensure_tensor_dtype(&tree, DType::F32).unwrap_err();
        assert!(matches!(err, RelocateError::Conversion { ref dtype, .. } if dtype == "int32"));
    }

    #[test]
    fn shape_mismatch_fails() {
        let array = HostArray::new(HostData::F32(vec![1.0, 2.0, 3.0]), vec![2, 2]);
        let err = array.to_tensor().unwrap_err();
        assert!(matches!(err, RelocateError::Conversion { .. }));
    }

    #[test]
    fn overflowing_shape_fails() {
        let array = HostArray::new(HostData::F32(vec![1.0]), vec![usize::MAX, 2]);
        let err = array.to_tensor().unwrap_err();
        assert!(matches!(err, RelocateError::Conversion { ref reason, .. } if reason.contains("overflows")));

        let tree = Nested::List(vec![Nested::Array(array)]);
        assert!(ensure_tensor_dtype(&tree, DType::F32).is_err());
    }

    // ── sets ──

    #[test]
    fn set_elements_relocated_in_order() {
        let a = Tensor::new(&[1u32], &Device::Cpu).unwrap();
        let tree = Nested::Set(vec![Nested::Tensor(a), Nested::from("tag")]);
        let out = ensure_tensor_dtype(&tree, DType::I64).unwrap();
        match out {
            Nested::Set(items) => {
                assert_eq!(items.len(), 2);
                assert!(matches!(&items[0], Nested::Tensor(t) if t.dtype() == DType::I64));
                assert_eq!(items[1], Nested::from("tag"));
            }
            other => panic!("expected set, got {other:?}"),
        }
    }
}
