mod common;

use std::time::Duration;
use psbsmp::{
    command::{Ack, READ_GROUP},
    entities::*,
    master::Error,
    mirror::DeviceMirror,
    models::Model,
    slave::Fault,
    variables::*,
    };
use common::*;


#[test]
fn bounded_refresh() {
    simulate(Model::Fap, &[1], |chain| async move {
        let client = chain.client(1);
        let mirror = DeviceMirror::new(1);
        assert!(! mirror.connected());
        assert!(mirror.snapshot().variables.is_empty());

        let values = mirror.update_variables(&client, GROUP_ALL, Duration::from_secs(10)).await.unwrap();
        assert_eq!(values.unwrap().len(), chain.catalog.variables().len());
        assert!(mirror.connected());

        // too early, the device is not asked
        chain.devices.clear_history();
        assert!(mirror.update_variables(&client, GROUP_ALL, Duration::from_secs(10)).await.unwrap().is_none());
        assert!(chain.devices.history().is_empty());

        chain.devices.set_value(1, PS_SETPOINT.id(), Value::F32(1.5));
        mirror.update_variables(&client, GROUP_READ_ONLY, Duration::ZERO).await.unwrap();
        assert_eq!(chain.devices.history(), [(1, READ_GROUP)]);
        assert_eq!(mirror.value(PS_SETPOINT.id()), Some(Value::F32(1.5)));

        // snapshots are copies
        let snapshot = mirror.snapshot();
        chain.devices.set_value(1, PS_SETPOINT.id(), Value::F32(2.5));
        mirror.update_variables(&client, GROUP_ALL, Duration::ZERO).await.unwrap();
        assert_eq!(snapshot.get(PS_SETPOINT.id()), Some(&Value::F32(1.5)));
        assert_eq!(mirror.snapshot().get(PS_SETPOINT.id()), Some(&Value::F32(2.5)));
        assert_eq!(mirror.snapshot().status().unwrap().state(), PsState::Off);
    });
}

#[test]
fn resume_sampling() {
    simulate(Model::Fap, &[1], |chain| async move {
        let client = chain.client(1);
        let mirror = DeviceMirror::new(1);
        chain.devices.set_curve(1, WFMREF_0, vec![1., 2., 3.]);

        // the device is still sampling
        chain.devices.set_value(1, BUF_SAMPLES_PENDING.id(), Value::U16(1));
        assert!(mirror.update_curves(&client, Duration::ZERO).await.unwrap());
        assert_eq!(mirror.ref_mon(), [1., 2., 3.]);
        assert_eq!(mirror.rb(), [1., 2., 3.]);
        assert!(mirror.mon().is_empty());
        assert_eq!(chain.devices.buffer_restarts(1), 0);

        // buffer full, samples are read and acquisition restarted
        chain.devices.set_value(1, BUF_SAMPLES_PENDING.id(), Value::U16(0));
        chain.devices.set_value(1, PS_REFERENCE.id(), Value::F32(2.));
        assert!(mirror.update_curves(&client, Duration::ZERO).await.unwrap());
        assert_eq!(mirror.mon(), vec![0.; 2 * GEOMETRY.block_size]);
        assert_eq!(chain.devices.buffer_restarts(1), 1);

        assert!(mirror.update_curves(&client, Duration::ZERO).await.unwrap());
        assert_eq!(mirror.mon(), vec![2.; 2 * GEOMETRY.block_size]);
        assert_eq!(chain.devices.buffer_restarts(1), 2);

        assert!(! mirror.update_curves(&client, Duration::from_secs(10)).await.unwrap());
        assert_eq!(chain.devices.buffer_restarts(1), 2);
    });
}

#[test]
fn written_slot() {
    simulate(Model::FbpDclink, &[1], |chain| async move {
        let client = chain.client(1);
        let mirror = DeviceMirror::new(1);
        // playing slot 0, a new curve goes to slot 1
        chain.devices.set_state(1, PsState::RmpWfm);
        chain.devices.set_curve(1, WFMREF_0, vec![5.; 4]);
        client.curve_write(WFMREF_1, &[7., 8.]).await.unwrap();
        mirror.set_written(WFMREF_1, vec![7., 8.]);
        assert_eq!(mirror.rb(), [7., 8.]);

        mirror.update_curves(&client, Duration::ZERO).await.unwrap();
        assert_eq!(mirror.ref_mon(), [5.; 4]);
        assert_eq!(mirror.rb().len(), MAX_CURVE);
        assert_eq!(mirror.rb()[.. 3], [7., 8., 8.]);
    });
}

#[test]
fn disconnection() {
    simulate(Model::Fap, &[1], |chain| async move {
        let client = chain.client(1);
        let mirror = DeviceMirror::new(1);
        mirror.update_variables(&client, GROUP_ALL, Duration::ZERO).await.unwrap();
        assert!(mirror.connected());

        // refused, but the device answered
        let result = mirror.update_variables(&client, GROUP_MIRROR, Duration::ZERO).await;
        assert!(matches!(result, Err(Error::Nack(Ack::InvalidId))));
        assert!(mirror.connected());

        chain.devices.set_fault(1, Fault::Offline);
        let result = mirror.update_variables(&client, GROUP_ALL, Duration::ZERO).await;
        assert!(matches!(result, Err(Error::Timeout)));
        assert!(! mirror.connected());
        // last known values remain
        assert!(mirror.value(PS_STATUS.id()).is_some());

        chain.devices.set_fault(1, Fault::None);
        mirror.update_variables(&client, GROUP_ALL, Duration::ZERO).await.unwrap();
        assert!(mirror.connected());
    });
}
