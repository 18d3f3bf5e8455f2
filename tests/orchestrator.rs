mod common;

use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Duration, Instant},
    };
use futures_concurrency::future::Join;
use psbsmp::{
    command::{Ack, READ_GROUP, CURVE_BLOCK},
    config::Config,
    entities::*,
    master::Error,
    models::{Model, Field, fbp},
    pru::Pru,
    scheduler::*,
    slave::{Fault, SimulatedChain},
    variables::*,
    };
use common::*;


#[test]
fn construction() {
    simulate(Model::Fbp, &[1, 2], |chain| async move {
        let create = |addresses: &[u8], config: Config| Orchestrator::new(
            chain.bus.clone(), chain.pru.clone(), &chain.registry, Model::Fbp, addresses, config);
        // one controller mirrors at most 4 devices
        assert!(matches!(create(&[1, 2, 3, 4, 5], Config::immediate()), Err(Error::Config(_))));
        assert!(matches!(create(&[1, 1], Config::immediate()), Err(Error::Config(_))));
        assert!(matches!(create(&[], Config::immediate()), Err(Error::Config(_))));
        assert!(matches!(create(&[1], Config {ramp_frequency: 0., .. Config::immediate()}), Err(Error::Config(_))));
        // model without catalog
        assert!(matches!(
            Orchestrator::new(chain.bus.clone(), chain.pru.clone(), &chain.registry, Model::Fap, &[1], Config::immediate()),
            Err(Error::Config(_))));

        let orchestrator = create(&[4, 2, 3], Config::immediate()).unwrap();
        assert_eq!(orchestrator.addresses(), [2, 3, 4]);
        assert_eq!(orchestrator.sync_state(), SyncState::Off);
        assert_eq!(orchestrator.scan_interval(), Duration::from_millis(100));
    });
}

#[test]
fn dedup_while_synchronized() {
    simulate(Model::Fbp, &[1, 2], |chain| async move {
        let orchestrator = chain.orchestrator();
        orchestrator.init().await.unwrap();

        // ordering matters while off
        assert_eq!(orchestrator.scan_once(), Some(Push::Appended));
        assert_eq!(orchestrator.scan_once(), Some(Push::Appended));
        assert_eq!(orchestrator.queue_len(), 2);

        orchestrator.pru_sync_start(SyncMode::RampEnd).await.unwrap();
        assert_eq!(orchestrator.queue_len(), 0);
        assert_eq!(orchestrator.scan_once(), Some(Push::Appended));
        assert_eq!(orchestrator.scan_once(), Some(Push::Duplicate));
        assert_eq!(orchestrator.queue_len(), 1);

        orchestrator.pru_sync_abort();
        assert_eq!(orchestrator.queue_len(), 0);
        assert_eq!(orchestrator.sync_state(), SyncState::Off);
    });
}

/// frames exchanged by the next scan
async fn polled(orchestrator: &Orchestrator, devices: &SimulatedChain) -> Vec<(u8, u8)> {
    orchestrator.scan_once();
    devices.clear_history();
    assert!(orchestrator.process_once().await);
    devices.history()
}

#[test]
fn scan_targets() {
    simulate(Model::FacDcdc, &[1, 2, 3], |chain| async move {
        let orchestrator = chain.orchestrator();
        orchestrator.init().await.unwrap();

        assert_eq!(polled(&orchestrator, &chain.devices).await, [(1, READ_GROUP), (2, READ_GROUP), (3, READ_GROUP)]);

        orchestrator.pru_sync_start(SyncMode::Broadcast).await.unwrap();
        assert_eq!(polled(&orchestrator, &chain.devices).await, [(1, READ_GROUP), (2, READ_GROUP), (3, READ_GROUP)]);

        // devices are polled one at a time during ramps
        orchestrator.pru_sync_start(SyncMode::MigrationEnd).await.unwrap();
        for address in [1, 2, 3, 1] {
            assert_eq!(polled(&orchestrator, &chain.devices).await, [(address, READ_GROUP)]);
        }
    });
}

#[test]
fn start_postconditions() {
    simulate(Model::Fap, &[1, 2], |chain| async move {
        let orchestrator = chain.orchestrator();
        orchestrator.init().await.unwrap();
        for mode in SyncMode::ALL {
            chain.devices.set_state(1, PsState::Off);
            chain.pru.set_curve_pointer(5);
            assert!(orchestrator.exec_functions(&[1], TURN_ON, None).unwrap());
            orchestrator.scan_once();
            assert_eq!(orchestrator.queue_len(), 2);

            orchestrator.pru_sync_start(mode).await.unwrap();
            assert_eq!(orchestrator.queue_len(), 0);
            assert_eq!(orchestrator.sync_state(), SyncState::On(mode));
            assert!(orchestrator.scan_enabled());
            assert_eq!(chain.pru.sync_mode(), Some(mode));
            assert_eq!(chain.pru.sync_address(), Some(1));
            assert_eq!(chain.pru.curve_pointer(), 0);
            // pending operations were executed, not dropped
            assert_eq!(chain.devices.status(1).unwrap().state(), PsState::SlowRef);

            let expected = if mode == SyncMode::Broadcast {100} else {500};
            assert_eq!(orchestrator.scan_interval(), Duration::from_millis(expected));

            orchestrator.pru_sync_abort();
            assert_eq!(chain.pru.sync_mode(), None);
        }

        // starting while on switches mode
        orchestrator.pru_sync_start(SyncMode::Broadcast).await.unwrap();
        orchestrator.scan_once();
        orchestrator.pru_sync_start(SyncMode::MigrationEnd).await.unwrap();
        assert_eq!(orchestrator.sync_state(), SyncState::On(SyncMode::MigrationEnd));
        assert_eq!(orchestrator.queue_len(), 0);
    });
}

#[test]
fn broadcast_abort_ramp() {
    simulate(Model::Fbp, &[1, 2, 3, 4], |chain| async move {
        let orchestrator = chain.orchestrator();
        orchestrator.pru_sync_start(SyncMode::Broadcast).await.unwrap();
        assert_eq!(orchestrator.scan_interval(), Duration::from_secs_f64(1. / orchestrator.config().scan_frequency));
        orchestrator.scan_once();
        orchestrator.pru_sync_abort();
        assert_eq!(orchestrator.sync_state(), SyncState::Off);
        assert_eq!(orchestrator.queue_len(), 0);

        orchestrator.pru_sync_start(SyncMode::RampEnd).await.unwrap();
        assert_eq!(orchestrator.sync_state(), SyncState::On(SyncMode::RampEnd));
        assert_eq!(orchestrator.scan_interval(), Duration::from_secs_f64(1. / orchestrator.config().ramp_frequency));
        assert_ne!(orchestrator.scan_interval(), Duration::from_secs_f64(1. / orchestrator.config().scan_frequency));
    });
}

#[test]
fn start_refreshes_mirrors() {
    simulate(Model::Fap, &[1, 2], |chain| async move {
        let orchestrator = chain.orchestrator_with(Config {
            variables_interval: Duration::from_secs(5),
            .. Config::immediate()
            });
        orchestrator.init().await.unwrap();
        chain.devices.set_value(1, PS_SETPOINT.id(), Value::F32(4.));

        // too recent for a scan
        orchestrator.scan_once();
        assert!(orchestrator.process_once().await);
        assert_eq!(orchestrator.snapshot(1).unwrap().get(PS_SETPOINT.id()), Some(&Value::F32(0.)));

        chain.devices.clear_history();
        orchestrator.pru_sync_start(SyncMode::RampEnd).await.unwrap();
        assert_eq!(chain.devices.history(), [(1, READ_GROUP), (2, READ_GROUP)]);
        assert_eq!(orchestrator.snapshot(1).unwrap().get(PS_SETPOINT.id()), Some(&Value::F32(4.)));
    });
}

#[test]
fn queue_closed_during_start() {
    simulate(Model::Fap, &[1], |chain| async move {
        let orchestrator = chain.orchestrator();
        let permit = orchestrator.reserve().await.unwrap();
        let start = orchestrator.pru_sync_start(SyncMode::RampEnd);
        let meanwhile = async {
            // the transition has begun and waits for the transport
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(! orchestrator.wfm_update(&[1], None).unwrap());
            assert!(! orchestrator.exec_functions(&[1], TURN_ON, None).unwrap());
            assert!(! orchestrator.wfm_write(&[1], &[1.]).unwrap());
            assert_eq!(orchestrator.scan_once(), None);
            drop(permit);
        };
        let (started, ()) = (start, meanwhile).join().await;
        started.unwrap();
        assert_eq!(orchestrator.queue_len(), 0);
        assert_eq!(orchestrator.sync_state(), SyncState::On(SyncMode::RampEnd));

        assert!(orchestrator.wfm_update(&[1], None).unwrap());
        assert_eq!(orchestrator.queue_len(), 1);
    });
}

#[test]
fn start_settle_delays() {
    simulate(Model::Fap, &[1], |chain| async move {
        let orchestrator = chain.orchestrator_with(Config {
            sync_delay_broadcast: Duration::from_millis(40),
            sync_delay_function: Duration::from_millis(150),
            .. Config::immediate()
            });
        for (mode, delay) in [
                (SyncMode::Broadcast, 40),
                (SyncMode::RampEnd, 150),
                (SyncMode::MigrationEnd, 150),
                ] {
            let start = Instant::now();
            orchestrator.pru_sync_start(mode).await.unwrap();
            assert!(start.elapsed() >= Duration::from_millis(delay), "{:?} started after {:?}", mode, start.elapsed());
            orchestrator.pru_sync_abort();
        }
    });
}

#[test]
fn interrupted_transitions() {
    simulate(Model::Fap, &[1], |chain| async move {
        let orchestrator = chain.orchestrator();

        let permit = orchestrator.reserve().await.unwrap();
        let start = tokio::time::timeout(Duration::from_millis(50), orchestrator.pru_sync_start(SyncMode::RampEnd));
        assert!(start.await.is_err());
        drop(permit);
        assert_eq!(orchestrator.sync_state(), SyncState::Off);
        assert!(orchestrator.scan_enabled());
        assert_eq!(chain.pru.sync_mode(), None);
        assert!(orchestrator.exec_functions(&[1], TURN_ON, None).unwrap());

        orchestrator.pru_sync_start(SyncMode::RampEnd).await.unwrap();
        let permit = orchestrator.reserve().await.unwrap();
        let stop = tokio::time::timeout(Duration::from_millis(50), orchestrator.pru_sync_stop());
        assert!(stop.await.is_err());
        drop(permit);
        assert_eq!(orchestrator.sync_state(), SyncState::Off);
        assert!(orchestrator.scan_enabled());
        assert_eq!(chain.pru.sync_mode(), None);
        assert_eq!(orchestrator.scan_once(), Some(Push::Appended));
    });
}

#[test]
fn stop_executes_pending() {
    simulate(Model::Fap, &[1], |chain| async move {
        let orchestrator = chain.orchestrator();
        orchestrator.init().await.unwrap();
        orchestrator.pru_sync_start(SyncMode::RampEnd).await.unwrap();
        orchestrator.scan_once();
        chain.devices.clear_history();

        orchestrator.pru_sync_stop().await.unwrap();
        assert_eq!(orchestrator.sync_state(), SyncState::Off);
        assert_eq!(orchestrator.queue_len(), 0);
        assert_eq!(chain.pru.sync_mode(), None);
        assert_eq!(chain.devices.history(), [(1, READ_GROUP)]);
        assert_eq!(orchestrator.scan_interval(), Duration::from_millis(100));
    });
}

#[test]
fn write_path_refused_while_on() {
    simulate(Model::Fap, &[1, 2], |chain| async move {
        let orchestrator = chain.orchestrator();
        assert!(orchestrator.exec_functions(&[1, 2], TURN_ON, None).unwrap());
        assert_eq!(orchestrator.queue_len(), 1);
        assert!(orchestrator.wfm_write(&[1], &[1., 2.]).unwrap());
        assert_eq!(orchestrator.queue_len(), 2);

        orchestrator.pru_sync_start(SyncMode::Broadcast).await.unwrap();
        assert!(! orchestrator.exec_functions(&[1], TURN_OFF, None).unwrap());
        assert!(! orchestrator.wfm_write(&[1], &[3.]).unwrap());
        assert!(! orchestrator.exec_functions_wait(&[1], TURN_OFF, None).await.unwrap());
        assert_eq!(orchestrator.queue_len(), 0);
        // reads are still allowed
        assert!(orchestrator.wfm_update(&[1], None).unwrap());
        assert_eq!(orchestrator.queue_len(), 1);

        // configuration errors are raised whatever the state
        assert!(matches!(orchestrator.wfm_write(&[1], &vec![0.; MAX_CURVE + 50]), Err(Error::Config(_))));
        assert!(matches!(orchestrator.exec_functions(&[7], TURN_ON, None), Err(Error::Config(_))));
        assert!(matches!(orchestrator.exec_functions(&[1], 200, None), Err(Error::Config(_))));

        orchestrator.pru_sync_stop().await.unwrap();
        assert!(orchestrator.exec_functions(&[1], TURN_OFF, None).unwrap());
        assert_eq!(orchestrator.queue_len(), 1);
    });
}

#[test]
fn transport_error_isolation() {
    simulate(Model::FacDcdc, &[1, 2, 3], |chain| async move {
        let orchestrator = chain.orchestrator();
        orchestrator.init().await.unwrap();
        for address in [1, 2, 3] {
            assert!(orchestrator.connected(address).unwrap());
        }

        chain.devices.set_fault(2, Fault::Offline);
        orchestrator.scan_once();
        assert!(orchestrator.process_once().await);
        assert!(orchestrator.connected(1).unwrap());
        assert!(! orchestrator.connected(2).unwrap());
        assert!(orchestrator.connected(3).unwrap());

        chain.devices.set_fault(2, Fault::Garbled);
        orchestrator.wfm_update(&[2], None).unwrap();
        assert!(orchestrator.process_once().await);
        assert!(! orchestrator.connected(2).unwrap());

        // no retry, the next scan brings it back
        chain.devices.set_fault(2, Fault::None);
        assert_eq!(orchestrator.queue_len(), 0);
        orchestrator.scan_once();
        assert!(orchestrator.process_once().await);
        assert!(orchestrator.connected(2).unwrap());
    });
}

#[test]
fn mirrored_peers() {
    simulate(Model::Fbp, &[1, 2, 3], |chain| async move {
        let orchestrator = chain.orchestrator();
        orchestrator.init().await.unwrap();
        orchestrator.pru_sync_start(SyncMode::RampEnd).await.unwrap();

        chain.devices.set_value(2, PS_SETPOINT.id(), Value::F32(3.));
        chain.devices.set_value(3, fbp::I_LOAD, Value::F32(7.));
        chain.devices.clear_history();
        orchestrator.scan_once();
        assert!(orchestrator.process_once().await);
        // only the lowest device was polled
        assert_eq!(chain.devices.history(), [(1, READ_GROUP)]);

        assert_eq!(
            orchestrator.read_variables(&[2], Some(PS_SETPOINT.id())).unwrap(),
            BTreeMap::from([(2, BTreeMap::from([(PS_SETPOINT.id(), Value::F32(3.))]))]));
        assert_eq!(orchestrator.read_field(3, Field::Current).unwrap(), Some(Value::F32(7.)));
        assert_eq!(orchestrator.snapshot(3).unwrap().get(fbp::I_LOAD), Some(&Value::F32(7.)));
    });
}

#[test]
fn mirrored_peers_reconnect() {
    simulate(Model::Fbp, &[1, 2, 3], |chain| async move {
        let orchestrator = chain.orchestrator();
        orchestrator.init().await.unwrap();
        orchestrator.pru_sync_start(SyncMode::RampEnd).await.unwrap();

        chain.devices.set_fault(2, Fault::Offline);
        assert!(orchestrator.wfm_update(&[2], None).unwrap());
        assert!(orchestrator.process_once().await);
        assert!(! orchestrator.connected(2).unwrap());

        // only the lowest device is polled, it reports for its peers
        chain.devices.set_fault(2, Fault::None);
        orchestrator.scan_once();
        assert!(orchestrator.process_once().await);
        assert!(orchestrator.connected(2).unwrap());
        assert!(orchestrator.connected(3).unwrap());
    });
}

#[test]
fn waited_functions() {
    simulate(Model::Fap, &[1, 2], |chain| async move {
        let orchestrator = Arc::new(chain.orchestrator());
        orchestrator.init().await.unwrap();
        orchestrator.spawn();

        assert!(orchestrator.exec_functions_wait(&[1, 2], TURN_ON, None).await.unwrap());
        assert_eq!(chain.devices.status(2).unwrap().state(), PsState::SlowRef);
        assert!(orchestrator.connected(1).unwrap());

        chain.devices.set_fault(1, Fault::RefuseFunctions);
        let result = orchestrator.exec_functions_wait(&[1, 2], TURN_OFF, None).await;
        assert!(matches!(result, Err(Error::Nack(Ack::FunctionError))));
        // the other device still executed it, and the refusing one is still there
        assert_eq!(chain.devices.status(2).unwrap().state(), PsState::Off);
        assert!(orchestrator.connected(1).unwrap());

        // the scan task keeps mirrors fresh
        chain.devices.set_value(2, PS_SETPOINT.id(), Value::F32(9.));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(orchestrator.snapshot(2).unwrap().get(PS_SETPOINT.id()), Some(&Value::F32(9.)));
    });
}

#[test]
fn reservation_gate() {
    simulate(Model::Fap, &[1], |chain| async move {
        let orchestrator = chain.orchestrator();
        let permit = orchestrator.reserve().await.unwrap();
        assert!(orchestrator.exec_functions(&[1], TURN_ON, None).unwrap());
        assert!(tokio::time::timeout(Duration::from_millis(50), orchestrator.process_once()).await.is_err());
        assert_eq!(orchestrator.queue_len(), 1);

        // the holder has the transport for itself
        orchestrator.client(1).unwrap().read(PS_STATUS).await.unwrap();
        drop(permit);

        assert!(orchestrator.process_once().await);
        assert_eq!(orchestrator.queue_len(), 0);
        assert_eq!(chain.devices.status(1).unwrap().state(), PsState::SlowRef);
    });
}

#[test]
fn buffered_curves() {
    simulate(Model::Fap, &[1, 2, 3, 4], |chain| async move {
        let orchestrator = chain.orchestrator();
        chain.devices.clear_history();
        assert!(matches!(orchestrator.wfm_write(&[1], &vec![0.; 150]), Err(Error::Config(_))));
        assert_eq!(orchestrator.queue_len(), 0);
        assert!(chain.devices.history().is_empty());

        let full: Vec<f32> = (0 .. MAX_CURVE).map(|i| i as f32).collect();
        let short: Vec<f32> = (0 .. 60).map(|i| -(i as f32)).collect();
        assert!(orchestrator.wfm_write(&[2, 3, 4], &full).unwrap());
        assert!(orchestrator.wfm_write(&[1], &short).unwrap());
        while orchestrator.process_once().await {}

        let curves = chain.pru.read_curves(chain.pru.curve_block());
        assert_eq!(curves.len(), 4);
        assert!(curves.iter().all(|curve| curve.len() == MAX_CURVE));
        assert_eq!(curves[0][.. 60], short[..]);
        assert!(curves[0][60 ..].iter().all(|&sample| sample == -59.));
        assert_eq!(curves[3], full);

        assert_eq!(orchestrator.wfm_rb(1).unwrap(), curves[0]);
        assert_eq!(chain.devices.curve(1, WFMREF_0).unwrap(), curves[0]);
        assert_eq!(chain.devices.value(1, WFMREF_SELECTED.id()), Some(Value::U16(0)));

        // read back from the devices
        assert!(orchestrator.wfm_update(&[1, 4], None).unwrap());
        assert!(orchestrator.process_once().await);
        assert_eq!(orchestrator.wfmref_mon(1).unwrap(), curves[0]);
        assert_eq!(orchestrator.wfmref_mon(4).unwrap(), full);
        assert_eq!(orchestrator.wfm_mon(1).unwrap().len(), 2 * GEOMETRY.block_size);
        assert_eq!(chain.devices.buffer_restarts(1), 1);
        assert!(chain.devices.history().iter().any(|&(_, command)| command == CURVE_BLOCK));
    });
}

#[test]
fn unbuffered_curves() {
    simulate(Model::FacDcdc, &[1, 2, 3, 4, 5], |chain| async move {
        let orchestrator = chain.orchestrator();
        assert!(orchestrator.wfm_write(&[5], &[1., 2.]).unwrap());
        assert!(orchestrator.process_once().await);
        assert_eq!(chain.devices.curve(5, WFMREF_0).unwrap()[.. 3], [1., 2., 2.]);
        // read back as the device holds it
        let rb = orchestrator.wfm_rb(5).unwrap();
        assert_eq!(rb.len(), MAX_CURVE);
        assert_eq!(rb[.. 3], [1., 2., 2.]);
        // the controller memory is only used when it holds every device
        assert!(chain.pru.read_curves(0).is_empty());
        assert!(chain.pru.read_curves(1).is_empty());
    });
}
