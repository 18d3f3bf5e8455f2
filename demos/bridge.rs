use std::{
    sync::Arc,
    time::Duration,
    };
use futures_concurrency::future::Join;
use psbsmp::{
    config::Config,
    master::Bus,
    models::{Model, Registry, Field},
    pru::SoftPru,
    scheduler::{Orchestrator, SyncMode},
    variables::{TURN_ON, CLOSE_LOOP, SET_SLOWREF},
    entities::Value,
    };

#[tokio::main]
async fn main() {
    env_logger::init();
    let mut args = std::env::args().skip(1);
    let path = args.next().unwrap_or("/dev/ttyUSB0".into());
    let addresses = [1, 2, 3, 4];

    let config = Config::default();
    let registry = Registry::load().unwrap();
    let bus = Arc::new(Bus::open(&path, 6_000_000, config.timeout).unwrap());
    let orchestrator = Arc::new(Orchestrator::new(
        bus,
        Arc::new(SoftPru::new()),
        &registry,
        Model::Fbp,
        &addresses,
        config,
        ).unwrap());
    if let Err(error) = orchestrator.init().await {
        println!("some devices are not answering: {}", error);
    }
    orchestrator.spawn();

    let monitor = async {
        for _ in 0 .. 20 {
            for address in addresses {
                println!("device {} connected: {}  current: {:?}",
                    address,
                    orchestrator.connected(address).unwrap(),
                    orchestrator.read_field(address, Field::Current).unwrap(),
                    );
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    };
    let control = async {
        orchestrator.exec_functions_wait(&addresses, TURN_ON, None).await.unwrap();
        orchestrator.exec_functions_wait(&addresses, CLOSE_LOOP, None).await.unwrap();
        orchestrator.exec_functions_wait(&addresses, SET_SLOWREF, Some(Value::F32(1.))).await.unwrap();

        let ramp: Vec<f32> = (0 .. 1000).map(|i| (i as f32 * 0.01).sin()).collect();
        orchestrator.wfm_write(&addresses, &ramp).unwrap();
        orchestrator.pru_sync_start(SyncMode::RampEnd).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        orchestrator.pru_sync_stop().await.unwrap();
        orchestrator.wfm_update(&addresses, None).unwrap();
    };
    (monitor, control).join().await;
}
