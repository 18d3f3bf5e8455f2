/*!
    synchronization controller of the device chain

    the controller distributes synchronization pulses to all devices and holds two memory blocks of curves: one being played while the other is refilled. Its physical signaling is out of the scope of this crate, it is accessed through the [Pru] trait. [SoftPru] keeps the same state in software for chains without dedicated hardware, and for tests.
*/

use parking_lot::Mutex;
use log::*;
use crate::scheduler::SyncMode;


/// number of curve memory blocks
pub const BLOCKS: usize = 2;

pub trait Pru: Send + Sync {
    /// start distributing pulses in the given mode, the device at `address` receives the pulse function if the mode uses one
    fn sync_start(&self, mode: SyncMode, address: u8);
    fn sync_stop(&self);
    /// current mode, `None` while stopped
    fn sync_mode(&self) -> Option<SyncMode>;
    /// number of pulses sent since last start
    fn sync_pulse_count(&self) -> u32;

    /// memory block currently played
    fn curve_block(&self) -> usize;
    fn set_curve_block(&self, block: usize);
    /// index of the next sample to play in the current block
    fn curve_pointer(&self) -> usize;
    fn set_curve_pointer(&self, index: usize);
    /// replace the curves of a memory block, one curve per device
    fn write_curves(&self, block: usize, curves: &[Vec<f32>]);
    fn read_curves(&self, block: usize) -> Vec<Vec<f32>>;
}


/// software implementation of [Pru]
#[derive(Default)]
pub struct SoftPru {
    state: Mutex<SoftState>,
}
#[derive(Default)]
struct SoftState {
    sync: Option<(SyncMode, u8)>,
    pulses: u32,
    block: usize,
    pointer: usize,
    memory: [Vec<Vec<f32>>; BLOCKS],
}

impl SoftPru {
    pub fn new() -> Self {
        Self::default()
    }
    /// emit one pulse, as the timing system would
    pub fn pulse(&self) {
        let mut state = self.state.lock();
        if state.sync.is_some() {
            state.pulses = state.pulses.wrapping_add(1);
            let size = state.memory[state.block].first().map(Vec::len).unwrap_or(0);
            state.pointer = if size == 0 {0} else {(state.pointer + 1) % size};
        }
    }
    /// device receiving the pulse function, while synchronized
    pub fn sync_address(&self) -> Option<u8> {
        self.state.lock().sync.map(|(_, address)| address)
    }
}

impl Pru for SoftPru {
    fn sync_start(&self, mode: SyncMode, address: u8) {
        let mut state = self.state.lock();
        debug!("sync start {:?} on device {}", mode, address);
        state.sync = Some((mode, address));
        state.pulses = 0;
    }
    fn sync_stop(&self) {
        let mut state = self.state.lock();
        if let Some((mode, _)) = state.sync.take() {
            debug!("sync stop {:?} after {} pulses", mode, state.pulses);
        }
    }
    fn sync_mode(&self) -> Option<SyncMode> {
        self.state.lock().sync.map(|(mode, _)| mode)
    }
    fn sync_pulse_count(&self) -> u32 {
        self.state.lock().pulses
    }
    fn curve_block(&self) -> usize {
        self.state.lock().block
    }
    fn set_curve_block(&self, block: usize) {
        self.state.lock().block = block % BLOCKS;
    }
    fn curve_pointer(&self) -> usize {
        self.state.lock().pointer
    }
    fn set_curve_pointer(&self, index: usize) {
        self.state.lock().pointer = index;
    }
    fn write_curves(&self, block: usize, curves: &[Vec<f32>]) {
        self.state.lock().memory[block % BLOCKS] = curves.to_vec();
    }
    fn read_curves(&self, block: usize) -> Vec<Vec<f32>> {
        self.state.lock().memory[block % BLOCKS].clone()
    }
}
