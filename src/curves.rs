/*!
    local waveform buffers feeding the synchronization controller memory

    the controller memory only holds a few curves per block whatever the number of devices on the chain, and all curves of a block are played with the same index, so buffers are kept at the same length.
*/

use heapless::Vec as Bounded;
use log::*;
use crate::{
    master::Error,
    pru::{Pru, BLOCKS},
    utils::fit,
    };


/// number of curves the controller memory holds per block
pub const MAX_BUFFERS: usize = 4;

pub struct CurveBuffers {
    devices: Bounded<u8, MAX_BUFFERS>,
    buffers: Bounded<Vec<f32>, MAX_BUFFERS>,
    max_size: usize,
}

impl CurveBuffers {
    /// one empty buffer per device, in the given order
    pub fn new(devices: &[u8], max_size: usize) -> Result<Self, Error> {
        let mut new = Self {
            devices: Bounded::new(),
            buffers: Bounded::new(),
            max_size,
        };
        for &device in devices {
            if new.devices.contains(&device) {
                return Err(Error::Config(format!("device {} has two curve buffers", device)));
            }
            new.devices.push(device)
                .and_then(|_| new.buffers.push(Vec::new()).map_err(|_| device))
                .map_err(|_| Error::Config(format!("at most {} curve buffers are available", MAX_BUFFERS)))?;
        }
        Ok(new)
    }
    pub fn devices(&self) -> &[u8]  {&self.devices}
    pub fn max_size(&self) -> usize  {self.max_size}
    /// common length of all buffers
    pub fn len(&self) -> usize {
        self.buffers.iter().map(Vec::len).max().unwrap_or(0)
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn get(&self, device: u8) -> Option<&[f32]> {
        let index = self.index(device).ok()?;
        Some(&self.buffers[index])
    }

    /**
        replace the curve of a device

        a curve shorter than the other buffers is padded with its last sample, a longer one extends the others with their own last sample, so all buffers keep the same length and stay index-aligned.
    */
    pub fn set(&mut self, device: u8, curve: &[f32]) -> Result<(), Error> {
        let index = self.index(device)?;
        if curve.is_empty() {
            return Err(Error::Config("curve cannot be empty".into()));
        }
        if curve.len() > self.max_size {
            return Err(Error::Config(format!("curve of {} samples exceeds maximum {}", curve.len(), self.max_size)));
        }
        let size = curve.len().max(self.len());
        self.buffers[index] = curve.to_vec();
        if size != curve.len() {
            debug!("curve of device {} padded from {} to {} samples", device, curve.len(), size);
        }
        self.resize(size);
        Ok(())
    }
    /// pad or truncate all buffers to the given length
    pub fn resize(&mut self, size: usize) {
        for buffer in self.buffers.iter_mut() {
            fit(buffer, size);
        }
    }

    /// write all buffers in the block not being played, then make it the played block
    pub fn flush(&self, pru: &dyn Pru) {
        let block = (pru.curve_block() + 1) % BLOCKS;
        let curves: Vec<Vec<f32>> = self.buffers.iter().cloned().collect();
        pru.write_curves(block, &curves);
        pru.set_curve_block(block);
        debug!("flushed {} curves of {} samples into block {}", curves.len(), self.len(), block);
    }

    fn index(&self, device: u8) -> Result<usize, Error> {
        self.devices.iter().position(|&d| d == device)
            .ok_or_else(|| Error::Config(format!("device {} has no curve buffer", device)))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::pru::SoftPru;

    #[test]
    fn too_many_devices() {
        assert!(CurveBuffers::new(&[1, 2, 3, 4, 5], 10).is_err());
        assert!(CurveBuffers::new(&[1, 1], 10).is_err());
    }

    #[test]
    fn aligned_buffers() {
        let mut buffers = CurveBuffers::new(&[1, 2, 3, 4], 100).unwrap();
        for device in [2, 3, 4] {
            buffers.set(device, &vec![device as f32; 100]).unwrap();
        }
        // unset buffer grew with zeros
        assert_eq!(buffers.get(1).unwrap(), vec![0.; 100]);

        let short: Vec<f32> = (0 .. 60).map(|i| i as f32).collect();
        buffers.set(1, &short).unwrap();
        for device in [1, 2, 3, 4] {
            assert_eq!(buffers.get(device).unwrap().len(), 100);
        }
        assert_eq!(buffers.get(1).unwrap()[.. 60], short[..]);
        assert!(buffers.get(1).unwrap()[60 ..].iter().all(|&s| s == 59.));

        assert!(matches!(buffers.set(1, &vec![0.; 150]), Err(Error::Config(_))));
        assert_eq!(buffers.get(1).unwrap().len(), 100);

        buffers.resize(20);
        assert_eq!(buffers.get(3).unwrap(), vec![3.; 20]);
    }

    #[test]
    fn flush_inactive_block() {
        let pru = SoftPru::new();
        let mut buffers = CurveBuffers::new(&[1, 2], 10).unwrap();
        buffers.set(1, &[1., 2.]).unwrap();
        buffers.set(2, &[3.]).unwrap();
        assert_eq!(pru.curve_block(), 0);
        buffers.flush(&pru);
        assert_eq!(pru.curve_block(), 1);
        assert_eq!(pru.read_curves(1), vec![vec![1., 2.], vec![3., 3.]]);
        assert!(pru.read_curves(0).is_empty());
    }
}
