//! Vector addition: build a kernel from a file, move data to the device,
//! launch and read the result back.
//!
//! ```text
//! cargo run --example 01_introduction -- --device "{mode: 'OpenMP'}" --entries 4096
//! ```

use clap::Parser;
use hetero_core::{args, Device, Properties};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Parser, Debug)]
#[command(about = "Add two vectors on a device")]
struct Args {
    /// Device descriptor, e.g. "{mode: 'CUDA', device_id: 0}"
    #[arg(short, long, default_value = "{mode: 'Serial'}")]
    device: String,

    #[arg(short = 'n', long, default_value_t = 1000)]
    entries: usize,

    /// Print the device and the result vector
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    hetero_tracing::init_from_env()?;
    let cli = Args::parse();

    let device = Device::new(&cli.device)?;
    if cli.verbose {
        println!("device: {device:?}");
    }

    let mut rng = StdRng::seed_from_u64(0);
    let mut a = Vec::with_capacity(cli.entries);
    let mut b = Vec::with_capacity(cli.entries);
    for _ in 0..cli.entries {
        a.push(rng.gen_range(-1.0f32..1.0));
        b.push(rng.gen_range(-1.0f32..1.0));
    }

    let o_a = device.allocate_from(&a, &Properties::new())?;
    let o_b = device.allocate_from(&b, &Properties::new())?;
    let o_ab = device.allocate::<f32>(cli.entries, &Properties::new())?;

    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/kernels/addVectors.okl");
    let add_vectors = device.build_kernel_from_file(path, "addVectors", &Properties::new())?;

    add_vectors.call(&args![cli.entries as i32, &o_a, &o_b, &o_ab])?;
    device.finish()?;

    let ab = o_ab.to_vec::<f32>()?;
    if cli.verbose {
        for (i, value) in ab.iter().enumerate() {
            println!("{i}: {value}");
        }
    }
    for (i, ((a, b), ab)) in a.iter().zip(&b).zip(&ab).enumerate() {
        if (a + b).to_bits() != ab.to_bits() {
            return Err(format!("addVectors mismatch at {i}: {a} + {b} != {ab}").into());
        }
    }
    println!("PASSED!");
    Ok(())
}
