//! Block reduction with `@shared` scratch space and `@barrier`, finished on
//! the host.

use clap::Parser;
use hetero_core::{args, Device, Properties};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Parser, Debug)]
#[command(about = "Sum a vector of doubles")]
struct Args {
    #[arg(short, long, default_value = "{mode: 'Serial'}")]
    device: String,

    #[arg(short, long, default_value_t = 100_000)]
    entries: usize,

    #[arg(long, default_value_t = 256)]
    block_size: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    hetero_tracing::init_from_env()?;
    let cli = Args::parse();
    let blocks = cli.entries.div_ceil(cli.block_size).max(1);

    let device = Device::new(&cli.device)?;
    let mut rng = StdRng::seed_from_u64(0);
    let values: Vec<f64> = (0..cli.entries).map(|_| rng.gen_range(0.0..1.0)).collect();

    let vec = device.allocate_from(&values, &Properties::new())?;
    let block_sum = device.allocate::<f64>(blocks, &Properties::new())?;

    let props = Properties::new()
        .define("MAX_BLOCKS", blocks)
        .define("BLOCK_SIZE", cli.block_size);
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/kernels/sum.okl");
    let sum = device.build_kernel_from_file(path, "sum", &props)?;

    sum.call(&args![cli.entries as i32, &vec, &block_sum])?;
    device.finish()?;

    let total: f64 = block_sum.to_vec::<f64>()?.iter().sum();
    let (expected, host_us) = hetero_tracing::timed_block!("host_reference", { values.iter().sum::<f64>() });
    let tolerance = 1e-10 * cli.entries.max(1) as f64;
    if (total - expected).abs() > tolerance {
        return Err(format!("sum = {total}, expected {expected}").into());
    }
    println!("sum = {total} (host reference took {host_us} us)");
    println!("PASSED!");
    Ok(())
}
