use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = stiled::Cli::parse();
    if let Err(err) = stiled::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
