// SPDX-License-Identifier: Apache-2.0

use libos_run::cli::Cli;
use libos_run::launch;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::from_args();

    match launch::run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            use colorful::Colorful;
            eprintln!("{} [ Launcher ] {:#}", "✗".red(), e);
            std::process::exit(1);
        }
    }
}
