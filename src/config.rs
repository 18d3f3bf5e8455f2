use std::time::Duration;
use crate::entities::Settle;


/// timing and sizing of the whole bridge
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// maximum time waiting for the answer of one exchange
    pub timeout: Duration,
    /// polling rate while synchronization is off or cycling, in Hz
    pub scan_frequency: f64,
    /// polling rate during ramps and migrations, in Hz
    pub ramp_frequency: f64,
    /// period at which the process task checks the operation queue
    pub process_tick: Duration,
    /// operations waiting beyond this are dropped
    pub queue_capacity: usize,
    /// delay after entering broadcast synchronization
    pub sync_delay_broadcast: Duration,
    /// delay after entering a synchronization mode that triggers a device function
    pub sync_delay_function: Duration,
    /// delays after functions whose actuator needs time to respond
    pub settle: SettleDelays,
    /// minimum interval between two variable refreshes of the same device
    pub variables_interval: Duration,
    /// minimum interval between two curve refreshes of the same device
    pub curves_interval: Duration,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(100),
            scan_frequency: 10.,
            ramp_frequency: 2.,
            process_tick: Duration::from_millis(1),
            queue_capacity: 1024,
            sync_delay_broadcast: Duration::from_millis(10),
            sync_delay_function: Duration::from_millis(100),
            settle: SettleDelays::default(),
            variables_interval: Duration::from_millis(10),
            curves_interval: Duration::from_secs(1),
        }
    }
}
impl Config {
    /// configuration without any waiting, for simulated buses
    pub fn immediate() -> Self {
        Self {
            sync_delay_broadcast: Duration::ZERO,
            sync_delay_function: Duration::ZERO,
            settle: SettleDelays::none(),
            variables_interval: Duration::ZERO,
            curves_interval: Duration::ZERO,
            .. Self::default()
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SettleDelays {
    pub power: Duration,
    pub loop_: Duration,
    pub reset: Duration,
}
impl Default for SettleDelays {
    fn default() -> Self {
        Self {
            power: Duration::from_millis(300),
            loop_: Duration::from_millis(50),
            reset: Duration::from_millis(100),
        }
    }
}
impl SettleDelays {
    pub fn none() -> Self {
        Self {
            power: Duration::ZERO,
            loop_: Duration::ZERO,
            reset: Duration::ZERO,
        }
    }
    pub fn get(&self, settle: Settle) -> Duration {
        match settle {
            Settle::None => Duration::ZERO,
            Settle::Power => self.power,
            Settle::Loop => self.loop_,
            Settle::Reset => self.reset,
        }
    }
}
