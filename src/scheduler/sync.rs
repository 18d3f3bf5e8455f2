use std::time::Duration;
use crate::config::Config;


/// how the synchronization controller drives the chain through waveforms
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SyncMode {
    /// pulses are broadcast to every device, which cycle on them
    Broadcast,
    /// devices play their waveform reference on pulses, the last sample is held at the end
    RampEnd,
    /// devices play their waveform reference once, for a machine migration
    MigrationEnd,
}
impl SyncMode {
    pub const ALL: [SyncMode; 3] = [SyncMode::Broadcast, SyncMode::RampEnd, SyncMode::MigrationEnd];

    /// whether entering this mode calls a function on a device
    pub fn triggers_function(self) -> bool {
        ! matches!(self, Self::Broadcast)
    }
    /// delay to wait after commanding the controller into this mode
    pub fn settle_delay(self, config: &Config) -> Duration {
        if self.triggers_function()  {config.sync_delay_function}
        else  {config.sync_delay_broadcast}
    }
}

/// global synchronization state of the chain
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum SyncState {
    #[default]
    Off,
    On(SyncMode),
}
impl SyncState {
    pub fn is_on(self) -> bool {
        matches!(self, Self::On(_))
    }
    pub fn mode(self) -> Option<SyncMode> {
        match self {
            Self::Off => None,
            Self::On(mode) => Some(mode),
        }
    }
    /// period of the scan task in this state
    pub fn scan_interval(self, config: &Config) -> Duration {
        let frequency = match self {
            Self::Off | Self::On(SyncMode::Broadcast) => config.scan_frequency,
            Self::On(_) => config.ramp_frequency,
        };
        Duration::from_secs_f64(1. / frequency)
    }
}
