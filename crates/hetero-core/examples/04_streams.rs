//! Two streams, two kernels: each stream queues a kernel and an async copy
//! into pinned host memory, and `finish` drains only the current stream.
//!
//! On Serial and OpenMP every launch and copy is synchronous, so the
//! streams cannot overlap there.

use clap::Parser;
use hetero_core::{args, CopyOptions, Device, Properties};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Parser, Debug)]
#[command(about = "Queue work and async copies on separate streams")]
struct Args {
    #[arg(short, long, default_value = "{mode: 'Serial'}")]
    device: String,

    #[arg(short = 'n', long, default_value_t = 100_000)]
    entries: usize,
}

fn check(name: &str, got: &[f32], expected: impl Iterator<Item = f32>) -> Result<(), Box<dyn std::error::Error>> {
    for (i, (got, expected)) in got.iter().zip(expected).enumerate() {
        if got.to_bits() != expected.to_bits() {
            return Err(format!("{name}[{i}] = {got}, expected {expected}").into());
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    hetero_tracing::init_from_env()?;
    let cli = Args::parse();
    let n = cli.entries;

    let device = Device::new(&cli.device)?;
    let mut rng = StdRng::seed_from_u64(0);
    let mut x = Vec::with_capacity(n);
    let mut y = Vec::with_capacity(n);
    for _ in 0..n {
        x.push(rng.gen_range(-1.0f32..1.0));
        y.push(rng.gen_range(-1.0f32..1.0));
    }

    let o_x = device.allocate_from(&x, &Properties::new())?;
    let o_y = device.allocate_from(&y, &Properties::new())?;
    let o_z = device.allocate::<f32>(n, &Properties::new())?;
    let o_p = device.allocate::<f32>(n, &Properties::new())?;

    // pinned host buffers are the targets of the async copies
    let pinned = Properties::new().with("host", true);
    let h_z = device.allocate::<f32>(n, &pinned)?;
    let h_p = device.allocate::<f32>(n, &pinned)?;

    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/kernels/streams/kernels.okl");
    let add_vectors = device.build_kernel_from_file(path, "addVectors", &Properties::new())?;
    let mult_vectors = device.build_kernel_from_file(path, "multVectors", &Properties::new())?;

    let stream1 = device.stream();
    let stream2 = device.create_stream()?;
    let async_copy = CopyOptions::new()
        .bytes(n * std::mem::size_of::<f32>())
        .asynchronous(true);

    device.set_stream(&stream2)?;
    add_vectors.call(&args![n as i32, &o_x, &o_y, &o_z])?;
    h_z.copy_from(&o_z, &async_copy)?;

    device.set_stream(&stream1)?;
    mult_vectors.call(&args![n as i32, &o_x, &o_y, &o_p])?;
    h_p.copy_from(&o_p, &async_copy)?;

    device.set_stream(&stream2)?;
    device.finish()?;
    check("z", &h_z.read_host::<f32>()?, x.iter().zip(&y).map(|(x, y)| x + y))?;

    device.set_stream(&stream1)?;
    device.finish()?;
    check("p", &h_p.read_host::<f32>()?, x.iter().zip(&y).map(|(x, y)| x * y))?;

    println!("PASSED!");
    Ok(())
}
