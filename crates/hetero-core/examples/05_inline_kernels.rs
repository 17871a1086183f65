//! Inline kernels: the kernel signature comes from the names bound in a
//! [`Scope`], the body is written at the call site. The device is taken
//! from the memory bindings.

use clap::Parser;
use hetero_core::{Device, Properties, Scope};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const ADD_VECTORS: &str = "for (int i = 0; i < entries; ++i; @tile(TILE_SIZE, @outer, @inner)) {
  ab[i] = a[i] + b[i];
}";

#[derive(Parser, Debug)]
#[command(about = "Build and run a kernel from an inline body")]
struct Args {
    #[arg(short, long, default_value = "{mode: 'Serial'}")]
    device: String,

    #[arg(short = 'n', long, default_value_t = 1000)]
    entries: usize,

    /// Print the synthesized kernel source
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    hetero_tracing::init_from_env()?;
    let cli = Args::parse();
    let n = cli.entries;

    let device = Device::new(&cli.device)?;
    let mut rng = StdRng::seed_from_u64(0);
    let mut a = Vec::with_capacity(n);
    let mut b = Vec::with_capacity(n);
    for _ in 0..n {
        a.push(rng.gen_range(-1.0f32..1.0));
        b.push(rng.gen_range(-1.0f32..1.0));
    }

    let o_a = device.allocate_from(&a, &Properties::new())?;
    let o_b = device.allocate_from(&b, &Properties::new())?;
    let o_ab = device.allocate::<f32>(n, &Properties::new())?;

    let scope = Scope::new()
        .arg("entries", n as i32)
        .arg("a", &o_a)
        .arg("b", &o_b)
        .arg("ab", &o_ab)
        .define("TILE_SIZE", 256);

    if cli.verbose {
        println!("{}", scope.synthesize(ADD_VECTORS)?.source);
    }
    scope.run(ADD_VECTORS)?;

    let mut ab = vec![0.0f32; n];
    o_ab.copy_to_slice(&mut ab)?;
    for i in 0..n {
        if ab[i].to_bits() != (a[i] + b[i]).to_bits() {
            return Err(format!("ab[{i}] = {}, expected {}", ab[i], a[i] + b[i]).into());
        }
    }
    println!("PASSED!");
    Ok(())
}
