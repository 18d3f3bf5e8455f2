#![allow(dead_code)]

use std::{
    sync::Arc,
    time::Duration,
    };
use futures_concurrency::future::Race;

use psbsmp::{
    config::{Config, SettleDelays},
    entities::Catalog,
    master::{Bus, Client},
    models::{Model, Registry, CurveGeometry},
    pru::SoftPru,
    scheduler::Orchestrator,
    slave::SimulatedChain,
    };


/// small curves: 4 blocks of 25 samples
pub const GEOMETRY: CurveGeometry = CurveGeometry {
    block_size: 25,
    wfmref_blocks: 4,
    samples_blocks: 2,
    };
pub const MAX_CURVE: usize = 100;

/// master side of a simulated chain
pub struct Chain {
    pub model: Model,
    pub addresses: Vec<u8>,
    pub registry: Registry,
    pub catalog: Arc<Catalog>,
    pub devices: Arc<SimulatedChain>,
    pub bus: Arc<Bus>,
    pub pru: Arc<SoftPru>,
}

impl Chain {
    pub fn client(&self, address: u8) -> Client {
        Client::new(self.bus.clone(), address, self.catalog.clone(), SettleDelays::none())
    }
    pub fn orchestrator(&self) -> Orchestrator {
        self.orchestrator_with(Config::immediate())
    }
    pub fn orchestrator_with(&self, config: Config) -> Orchestrator {
        Orchestrator::new(
            self.bus.clone(),
            self.pru.clone(),
            &self.registry,
            self.model,
            &self.addresses,
            config,
            ).expect("failed to create orchestrator")
    }
}

/// run a test against a simulated chain of devices of the given model
pub fn simulate<T, F>(model: Model, addresses: &[u8], test: T)
where
    T: FnOnce(Chain) -> F,
    F: Future<Output=()>,
{
    let _ = env_logger::builder().is_test(true).try_init();
    tokio::runtime::Runtime::new()
    .expect("failed to create runtime")
    .block_on(async move {
        let catalog = model.behavior().catalog(GEOMETRY).expect("failed to build catalog");
        let registry = Registry::empty().with(model, catalog);
        let catalog = registry.catalog(model).expect("catalog not registered");
        let devices = Arc::new(SimulatedChain::new(catalog.clone(), addresses));
        let (master, slave) = tokio::io::duplex(8192);
        let chain = Chain {
            model,
            addresses: addresses.to_vec(),
            registry,
            catalog,
            devices: devices.clone(),
            bus: Arc::new(Bus::new(master, Duration::from_millis(50))),
            pru: Arc::new(SoftPru::new()),
        };
        (
            async {
                tokio::time::timeout(Duration::from_secs(20), test(chain))
                .await.expect("aborted test because took too long");
            },
            async {
                devices.run(slave)
                .await.expect("simulated chain failed");
            },
        ).race().await;
    });
}
