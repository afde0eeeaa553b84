//! Dockhand CLI: run a container backup recipe.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "dockhand",
    version,
    about = "Run ordered container lifecycle and streaming Postgres backup recipes"
)]
struct Cli {
    #[command(flatten)]
    args: dockhand::cli::RunArgs,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = dockhand::cli::dispatch(cli.args) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
