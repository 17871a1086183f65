//! Interop with native code: a backend-native kernel launched over an
//! explicit grid, operating on caller-owned host memory.

use clap::Parser;
use hetero_core::{args, BlockDim, Device, GridDim, Properties};

#[derive(Parser, Debug)]
#[command(about = "Launch a native kernel on wrapped host memory")]
struct Args {
    #[arg(short, long, default_value = "{mode: 'Serial'}")]
    device: String,

    #[arg(short, long, default_value_t = 1000)]
    entries: usize,

    #[arg(short, long, default_value_t = 256)]
    block: u32,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    hetero_tracing::init_from_env()?;
    let cli = Args::parse();
    let n = cli.entries;

    let device = Device::new(&cli.device)?;
    let mut a: Vec<f32> = (0..n).map(|i| i as f32).collect();
    let mut b: Vec<f32> = (0..n).map(|i| (n - i) as f32).collect();
    let mut ab = vec![0.0f32; n];

    // SAFETY: the three vectors outlive every memory object wrapping them,
    // which are all dropped at the end of this block.
    {
        let o_a = unsafe { device.wrap(a.as_mut_ptr(), n) }?;
        let o_b = unsafe { device.wrap(b.as_mut_ptr(), n) }?;
        let o_ab = unsafe { device.wrap(ab.as_mut_ptr(), n) }?;

        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/kernels/addVectors.cpp");
        let native = Properties::parse("{okl: {enabled: false}}")?;
        let add = device.build_kernel_from_file(path, "addVectors", &native)?;

        let blocks = (n as u32).div_ceil(cli.block);
        add.set_run_dims(GridDim::linear(blocks), BlockDim::linear(cli.block))?;
        add.call(&args![n as i32, &o_a, &o_b, &o_ab])?;
        device.finish()?;
    }

    if ab.iter().any(|&value| value != n as f32) {
        return Err("native addVectors produced a wrong sum".into());
    }
    println!("{} blocks of {} threads on {}", (n as u32).div_ceil(cli.block), cli.block, device.mode_name());
    println!("PASSED!");
    Ok(())
}
