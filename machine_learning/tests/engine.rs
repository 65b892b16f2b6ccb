use std::num::NonZeroUsize;

use comms::specs::{BaseWeightsSpec, DatasetSpec};
use machine_learning::{
    AdapterDims, Backend, ComputeEngine, CpuBackend, Dataset, MlErr, init, kernels,
};

fn dims() -> AdapterDims {
    let nz = |n| NonZeroUsize::new(n).unwrap();
    AdapterDims::new(nz(16), nz(8), nz(4))
}

fn engine() -> (ComputeEngine, Dataset) {
    let dims = dims();
    let device = CpuBackend.request_device("cpu:0").unwrap();
    let base = init::base_weights(&BaseWeightsSpec::Seeded { seed: 1 }, dims).unwrap();
    let adapter = init::init_adapter_seeded(Some(2), dims).unwrap();

    let spec = DatasetSpec::Synthetic {
        samples: NonZeroUsize::new(64).unwrap(),
        seed: 3,
    };
    let dataset = Dataset::from_spec(&spec, dims).unwrap();

    let engine = ComputeEngine::new(device, &base, &adapter, 0.25).unwrap();
    (engine, dataset)
}

#[test]
fn delta_after_training() {
    let (mut engine, dataset) = engine();
    let initial = engine.extract().unwrap();

    for batch in dataset.batches(8) {
        engine.train_batch(batch, 0.01).unwrap();
    }

    let trained = engine.extract().unwrap();
    let delta = trained.delta(&initial).unwrap();

    assert_eq!(delta.a().len(), 8 * 4);
    assert_eq!(delta.b().len(), 4 * 16);
    assert!(delta.a().iter().any(|x| *x != 0.));

    // B starts at zero so its delta is the learned B.
    assert_eq!(delta.b(), trained.b());
    assert_eq!(
        delta.a(),
        kernels::compute_delta(trained.a(), initial.a()).unwrap()
    );
}

#[test]
fn every_buffer_is_released() {
    let (mut engine, dataset) = engine();
    let device = engine.device().clone();

    for batch in dataset.batches(16) {
        engine.train_batch(batch, 0.01).unwrap();
    }
    engine.extract().unwrap();
    assert_eq!(device.live_buffers(), 3);

    engine.release();
    engine.release();
    assert_eq!(device.live_buffers(), 0);
    assert_eq!(device.allocated_bytes(), 0);

    let (engine, _) = self::engine();
    let device = engine.device().clone();
    drop(engine);
    assert_eq!(device.live_buffers(), 0);
}

#[test]
fn lost_device_is_fatal() {
    let (mut engine, dataset) = engine();
    let device = engine.device().clone();

    let mut batches = dataset.batches(8);
    engine.train_batch(batches.next().unwrap(), 0.01).unwrap();

    device.lose();

    let err = engine.train_batch(batches.next().unwrap(), 0.01).unwrap_err();
    assert!(matches!(err, MlErr::DeviceLost { .. }));
    assert!(matches!(engine.extract(), Err(MlErr::DeviceLost { .. })));

    drop(engine);
    assert_eq!(device.live_buffers(), 0);
}
