//! Stream ordering on a deferred (GPU-like) backend and on the CPU backends

mod common;

use common::{deferred_registry, kernel_path};
use hetero_core::{args, CopyOptions, Device, Error, Kernel, Memory, Properties};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

struct Pipeline {
    device: Device,
    add: Kernel,
    mult: Kernel,
    a: Memory,
    b: Memory,
}

impl Pipeline {
    fn new(device: Device, a: &[f32], b: &[f32]) -> Self {
        let path = kernel_path("streams/kernels.okl");
        let add = device.build_kernel_from_file(&path, "addVectors", &Properties::new()).unwrap();
        let mult = device.build_kernel_from_file(&path, "multVectors", &Properties::new()).unwrap();
        let a = device.allocate_from(a, &Properties::new()).unwrap();
        let b = device.allocate_from(b, &Properties::new()).unwrap();
        Self { device, add, mult, a, b }
    }

    fn output(&self) -> Memory {
        let out = self.device.allocate::<f32>(self.a.len(), &Properties::new()).unwrap();
        out.copy_from_slice(&vec![0.0f32; self.a.len()]).unwrap();
        out
    }
}

fn inputs(entries: usize) -> (Vec<f32>, Vec<f32>) {
    let mut rng = StdRng::seed_from_u64(0);
    let a = (0..entries).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
    let b = (0..entries).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
    (a, b)
}

fn checksum(values: &[f32]) -> u64 {
    values
        .iter()
        .fold(0u64, |acc, v| acc.rotate_left(5) ^ u64::from(v.to_bits()))
}

#[test]
fn test_streams_produce_independent_results() {
    let (a, b) = inputs(512);
    let sum: Vec<f32> = a.iter().zip(&b).map(|(a, b)| a + b).collect();
    let product: Vec<f32> = a.iter().zip(&b).map(|(a, b)| a * b).collect();

    let (registry, _probe) = deferred_registry();
    let p = Pipeline::new(Device::with_registry(registry, "CUDA").unwrap(), &a, &b);
    let (added, multiplied) = (p.output(), p.output());

    let stream_a = p.device.stream();
    let stream_b = p.device.create_stream().unwrap();

    p.device.set_stream(&stream_a).unwrap();
    p.add.call(&args![512, &p.a, &p.b, &added]).unwrap();
    p.device.set_stream(&stream_b).unwrap();
    p.mult.call(&args![512, &p.a, &p.b, &multiplied]).unwrap();
    p.device.finish().unwrap();
    p.device.set_stream(&stream_a).unwrap();
    p.device.finish().unwrap();

    assert_eq!(checksum(&added.to_vec::<f32>().unwrap()), checksum(&sum));
    assert_eq!(checksum(&multiplied.to_vec::<f32>().unwrap()), checksum(&product));
}

#[test]
fn test_finish_drains_only_the_current_stream() {
    let (a, b) = inputs(64);
    let (registry, probe) = deferred_registry();
    let p = Pipeline::new(Device::with_registry(registry, "CUDA").unwrap(), &a, &b);
    let (added, multiplied) = (p.output(), p.output());

    let first = p.device.stream();
    let second = p.device.create_stream().unwrap();

    p.add.launch_on(&first, &args![64, &p.a, &p.b, &added]).unwrap();
    p.mult.launch_on(&second, &args![64, &p.a, &p.b, &multiplied]).unwrap();
    assert_eq!(probe.pending(first.handle()), 1);
    assert_eq!(probe.pending(second.handle()), 1);

    // `first` is current
    p.device.finish().unwrap();
    assert_eq!(probe.pending(first.handle()), 0);
    assert_eq!(probe.pending(second.handle()), 1);

    // a read on `first` does not wait for `second`
    assert_eq!(multiplied.to_vec::<f32>().unwrap(), vec![0.0; 64]);
    assert_ne!(added.to_vec::<f32>().unwrap(), vec![0.0; 64]);

    p.device.set_stream(&second).unwrap();
    p.device.finish().unwrap();
    assert_eq!(probe.pending(second.handle()), 0);
    let expected: Vec<f32> = a.iter().zip(&b).map(|(a, b)| a * b).collect();
    assert_eq!(multiplied.to_vec::<f32>().unwrap(), expected);
}

#[test]
fn test_finish_all_drains_every_stream() {
    let (a, b) = inputs(32);
    let (registry, probe) = deferred_registry();
    let p = Pipeline::new(Device::with_registry(registry, "CUDA").unwrap(), &a, &b);
    let out = p.output();
    let streams: Vec<_> = (0..3).map(|_| p.device.create_stream().unwrap()).collect();
    for stream in &streams {
        p.add.launch_on(stream, &args![32, &p.a, &p.b, &out]).unwrap();
    }
    assert_eq!(p.device.stream_count(), 4);

    p.device.finish_all().unwrap();
    assert!(streams.iter().all(|s| probe.pending(s.handle()) == 0));
}

#[test]
fn test_launch_returns_before_completion_on_async_backends() {
    let (a, b) = inputs(16);
    let (registry, probe) = deferred_registry();
    let p = Pipeline::new(Device::with_registry(registry, "CUDA").unwrap(), &a, &b);
    let out = p.output();
    p.add.call(&args![16, &p.a, &p.b, &out]).unwrap();
    assert_eq!(probe.pending(p.device.stream().handle()), 1);
    assert!(out.read_host::<f32>().is_err());

    let mut host = vec![0.0f32; 16];
    out.copy_to(&mut host[..], &CopyOptions::new()).unwrap();
    let expected: Vec<f32> = a.iter().zip(&b).map(|(a, b)| a + b).collect();
    assert_eq!(host, expected);
}

#[test]
fn test_deferred_fault_surfaces_at_finish() {
    let (registry, _probe) = deferred_registry();
    let device = Device::with_registry(registry, "CUDA").unwrap();
    let path = kernel_path("addVectors.okl");
    let add = device.build_kernel_from_file(&path, "addVectors", &Properties::new()).unwrap();
    let small = device.allocate::<f32>(4, &Properties::new()).unwrap();

    // entries exceeds every buffer: the launch queues fine and faults later
    add.call(&args![1024, &small, &small, &small]).unwrap();
    let err = device.finish().unwrap_err();
    assert!(matches!(err, Error::Backend(_)), "{err}");

    // the stream stays usable
    device.finish().unwrap();
}

#[test]
fn test_async_copies_into_pinned_memory_complete_per_stream() {
    let (a, b) = inputs(256);
    let (registry, _probe) = deferred_registry();
    let p = Pipeline::new(Device::with_registry(registry, "CUDA").unwrap(), &a, &b);
    let (o_z, o_p) = (p.output(), p.output());
    let pinned = Properties::new().with("host", true);
    let h_z = p.device.allocate::<f32>(256, &pinned).unwrap();
    let h_p = p.device.allocate::<f32>(256, &pinned).unwrap();
    h_p.copy_from_slice(&vec![0.0f32; 256]).unwrap();
    let async_copy = CopyOptions::new().asynchronous(true);

    let stream1 = p.device.stream();
    let stream2 = p.device.create_stream().unwrap();

    p.device.set_stream(&stream2).unwrap();
    p.add.call(&args![256, &p.a, &p.b, &o_z]).unwrap();
    h_z.copy_from(&o_z, &async_copy).unwrap();

    p.device.set_stream(&stream1).unwrap();
    p.mult.call(&args![256, &p.a, &p.b, &o_p]).unwrap();
    h_p.copy_from(&o_p, &async_copy).unwrap();

    p.device.set_stream(&stream2).unwrap();
    p.device.finish().unwrap();
    let sum: Vec<f32> = a.iter().zip(&b).map(|(a, b)| a + b).collect();
    assert_eq!(h_z.read_host::<f32>().unwrap(), sum);
    // stream1 has not been finished
    assert_eq!(h_p.read_host::<f32>().unwrap(), vec![0.0; 256]);

    p.device.set_stream(&stream1).unwrap();
    p.device.finish().unwrap();
    let product: Vec<f32> = a.iter().zip(&b).map(|(a, b)| a * b).collect();
    assert_eq!(h_p.read_host::<f32>().unwrap(), product);
}

#[test]
fn test_fault_survives_a_memory_release() {
    let (registry, probe) = deferred_registry();
    let device = Device::with_registry(registry, "CUDA").unwrap();
    let add = device
        .build_kernel_from_file(kernel_path("addVectors.okl"), "addVectors", &Properties::new())
        .unwrap();
    let small = device.allocate::<f32>(4, &Properties::new()).unwrap();

    add.call(&args![1024, &small, &small, &small]).unwrap();
    // freeing a buffer drains the queue that faults
    drop(device.allocate::<f32>(1, &Properties::new()).unwrap());
    assert_eq!(probe.pending(device.stream().handle()), 0);

    let err = device.finish().unwrap_err();
    assert!(matches!(err, Error::Backend(_)), "{err}");
    device.finish().unwrap();
}

#[test]
fn test_finish_all_reports_a_fault_kept_for_another_stream() {
    let (registry, _probe) = deferred_registry();
    let device = Device::with_registry(registry, "CUDA").unwrap();
    let add = device
        .build_kernel_from_file(kernel_path("addVectors.okl"), "addVectors", &Properties::new())
        .unwrap();
    let small = device.allocate::<f32>(4, &Properties::new()).unwrap();
    let other = device.create_stream().unwrap();

    add.launch_on(&other, &args![1024, &small, &small, &small]).unwrap();
    drop(device.allocate::<f32>(1, &Properties::new()).unwrap());

    // the fault belongs to `other`, not the current stream
    device.finish().unwrap();
    assert!(matches!(device.finish_all(), Err(Error::Backend(_))));
    device.finish_all().unwrap();
}

#[test]
fn test_dropped_stream_is_finished_first() {
    let (a, b) = inputs(48);
    let (registry, probe) = deferred_registry();
    let p = Pipeline::new(Device::with_registry(registry, "CUDA").unwrap(), &a, &b);
    let out = p.output();

    let stream = p.device.create_stream().unwrap();
    let handle = stream.handle();
    p.add.launch_on(&stream, &args![48, &p.a, &p.b, &out]).unwrap();
    assert_eq!(probe.pending(handle), 1);

    drop(stream);
    assert_eq!(p.device.stream_count(), 1);
    assert_eq!(probe.pending(handle), 0);
    let expected: Vec<f32> = a.iter().zip(&b).map(|(a, b)| a + b).collect();
    assert_eq!(out.to_vec::<f32>().unwrap(), expected);
}

#[test]
fn test_synchronous_backends_complete_launches_immediately() {
    let (a, b) = inputs(128);
    let p = Pipeline::new(Device::new("OpenMP").unwrap(), &a, &b);
    let out = p.device.allocate::<f32>(128, &Properties::new().with("host", true)).unwrap();
    let other = p.device.create_stream().unwrap();
    p.mult.launch_on(&other, &args![128, &p.a, &p.b, &out]).unwrap();

    // no finish needed
    let expected: Vec<f32> = a.iter().zip(&b).map(|(a, b)| a * b).collect();
    assert_eq!(out.read_host::<f32>().unwrap(), expected);
}
