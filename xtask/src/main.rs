//! Repo automation entry point (`cargo run -p xtask -- <command>`).
//! Nearly empty for now; grows commands as the repo needs them.

use anyhow::{bail, Result};

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some(other) => bail!("unknown xtask command: {other}"),
        None => {
            println!("usage: cargo run -p xtask -- <command>");
            Ok(())
        }
    }
}
