/*!
    bridge between a control computer and chains of power supply controllers speaking BSMP on a shared serial line

    - [master] implements the protocol client of each device on a half-duplex [master::Bus]
    - [models] provides the entity catalog of each hardware model
    - [mirror] keeps the last known state of every device
    - [curves] and [pru] handle the waveform memory driving synchronized ramps
    - [scheduler] orchestrates all traffic according to the synchronization mode of the chain
    - [slave] simulates a chain of devices, to run all of this without hardware
*/

pub mod command;
mod utils;

pub mod config;
pub mod entities;
pub mod variables;
pub mod models;
pub mod master;
pub mod mirror;
pub mod curves;
pub mod pru;
pub mod scheduler;
pub mod slave;
