//! mdv launcher - installs the mdv binary on demand and runs it.

use std::ffi::OsString;

use mdv_install::{InstallConfig, Launcher, PackageEnv};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let config = InstallConfig::from_env();
    mdv_cli::init_logging(config.debug);

    let launcher = Launcher::new(config, PackageEnv::from_env());
    let args: Vec<OsString> = std::env::args_os().skip(1).collect();

    let code = match launcher.run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("mdv: {e}");
            1
        }
    };

    std::process::exit(code);
}
