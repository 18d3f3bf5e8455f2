
/// implement [packbytes] conversions for a bilge bitfield backed by the given integer type
#[macro_export]
macro_rules! pack_bilge {
    ($t:ty, $int:ty) => {

        impl packbytes::ToBytes for $t {
            type Bytes = [u8; core::mem::size_of::<$int>()];

            fn to_le_bytes(self) -> Self::Bytes {
                <$int>::from(self).to_le_bytes()
            }
            fn to_be_bytes(self) -> Self::Bytes {
                <$int>::from(self).to_be_bytes()
            }
        }
        impl packbytes::FromBytes for $t {
            type Bytes = [u8; core::mem::size_of::<$int>()];

            fn from_le_bytes(bytes: Self::Bytes) -> Self {
                <$t>::from(<$int>::from_le_bytes(bytes))
            }
            fn from_be_bytes(bytes: Self::Bytes) -> Self {
                <$t>::from(<$int>::from_be_bytes(bytes))
            }
        }
    };
}

/// curve samples as transmitted, little endian floats
pub fn samples_to_bytes(samples: &[f32]) -> Vec<u8> {
    samples.iter()
        .flat_map(|sample| sample.to_le_bytes())
        .collect()
}

/// decode little endian floats, trailing bytes not forming a sample are ignored
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<f32> {
    bytes.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// extend a curve to `size` by repeating its last sample, or cut it
pub fn fit(curve: &mut Vec<f32>, size: usize) {
    let last = curve.last().copied().unwrap_or_default();
    curve.resize(size, last);
}
