//! Tiled matrix multiplication: a two-level `@outer`/`@inner` loop nest with
//! the tile size supplied as a compile-time define.

use clap::Parser;
use hetero_core::{args, Device, Properties};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Parser, Debug)]
#[command(about = "Multiply two matrices with a tiled kernel")]
struct Args {
    #[arg(short, long, default_value = "{mode: 'OpenMP'}")]
    device: String,

    #[arg(long, default_value_t = 100)]
    rows: usize,

    #[arg(long, default_value_t = 80)]
    inner: usize,

    #[arg(long, default_value_t = 90)]
    cols: usize,

    /// Tile edge used for both loop levels
    #[arg(long, default_value_t = 16)]
    tile: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    hetero_tracing::init_from_env()?;
    let Args {
        device,
        rows,
        inner,
        cols,
        tile,
    } = Args::parse();

    let device = Device::new(&device)?;
    let mut rng = StdRng::seed_from_u64(0);
    let a: Vec<f64> = (0..rows * inner).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let b: Vec<f64> = (0..inner * cols).map(|_| rng.gen_range(-1.0..1.0)).collect();

    let o_a = device.allocate_from(&a, &Properties::new())?;
    let o_b = device.allocate_from(&b, &Properties::new())?;
    let o_c = device.allocate::<f64>(rows * cols, &Properties::new())?;

    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/kernels/matrixMultiply.okl");
    let multiply = device.build_kernel_from_file(path, "matrixMultiply", &Properties::new().define("TILE", tile))?;
    multiply.call(&args![rows as i32, inner as i32, cols as i32, &o_a, &o_b, &o_c])?;
    device.finish()?;

    let c = o_c.to_vec::<f64>()?;
    for r in 0..rows {
        for col in 0..cols {
            let expected: f64 = (0..inner).map(|k| a[r * inner + k] * b[k * cols + col]).sum();
            let got = c[r * cols + col];
            if (expected - got).abs() > 1e-10 {
                return Err(format!("C[{r}][{col}] = {got}, expected {expected}").into());
            }
        }
    }
    println!("{rows}x{inner} * {inner}x{cols} on {}", device.mode_name());
    println!("PASSED!");
    Ok(())
}
