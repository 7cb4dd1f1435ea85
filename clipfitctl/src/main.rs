use clap::Parser;

fn main() {
    let cli = clipfitctl::Cli::parse();
    clipfitctl::init_tracing(&cli.log_level);
    if let Err(err) = clipfitctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
