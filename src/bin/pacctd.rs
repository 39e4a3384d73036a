//! Writer daemon entry point: `pacctd [-v | -V | <root>]`.
//!
//! Deliberately hand-parses its one positional argument rather than pulling in `clap`
//! (unlike [`pacctctl`]/[`pacctconv`]): the exact usage contract — `-v`/`-V` prints a
//! version line to stdout and exits 0, any other flag is a bare usage error exiting 1,
//! a non-flag argument overrides the default root — does not survive translation
//! through a general-purpose argument parser's own `--help`/exit-2-on-error behavior.

use pacct_shadow::core::config::Config;
use pacct_shadow::daemon;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_version() {
    println!("Version: {VERSION} - pacctd");
}

fn print_usage() {
    eprintln!("usage: pacctd [-v | -V | <root>]");
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let root_override = match args.as_slice() {
        [] => None,
        [flag] if flag == "-v" || flag == "-V" => {
            print_version();
            std::process::exit(0);
        }
        [arg] if !arg.starts_with('-') => Some(std::path::PathBuf::from(arg)),
        _ => {
            print_usage();
            std::process::exit(i32::from(daemon::ExitCode::Usage));
        }
    };

    let mut config = match Config::load(None) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("[pacctd] {err}");
            std::process::exit(i32::from(daemon::ExitCode::DirectoryValidation));
        }
    };
    if let Some(root) = root_override {
        config.paths.root_dir = root;
    }

    let code = daemon::run(config);
    std::process::exit(i32::from(code));
}
