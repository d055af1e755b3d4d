//! mdv-install - explicit install, update and maintenance commands.

use clap::Parser;

use mdv_cli::InstallCli;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = InstallCli::parse();

    let code = match cli.run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("mdv-install: {e:#}");
            1
        }
    };

    std::process::exit(code);
}
