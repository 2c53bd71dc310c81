//! Compute worker entry point.

use cw_cli::cli::Cli;
use cw_node::launch_node;

fn main() {
    if let Err(err) = Cli::parse_args().run(launch_node) {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}
