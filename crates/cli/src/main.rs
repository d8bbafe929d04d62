//! The main entrypoint for ipu-boot, which just performs global initialization, and then
//! calls out into the library.

use std::io::Write as _;

use anyhow::Result;
use owo_colors::OwoColorize;

fn run() -> Result<()> {
    ipu_boot_utils::initialize_tracing();
    tracing::trace!("starting {}", env!("CARGO_PKG_NAME"));
    // As you can see, the role of this file is mainly to just be a shim
    // to call into the code that lives in the internal shared library.
    ipu_boot_lib::cli::run_from_iter(std::env::args())
}

fn main() {
    // In order to print the error in a custom format (with :#) our
    // main simply invokes a run() where all the work is done.
    // This code just captures any errors.
    if let Err(e) = run() {
        let mut stderr = anstream::stderr();
        // Don't panic if writing fails
        let _ = writeln!(stderr, "{}{:#}", "error: ".red(), e);
        std::process::exit(1);
    }
}
