//! spawntree
//!
//! Runs one node of a synthetic load tree. The root is the invocation without
//! `--ischild`; every other node is spawned by its parent.

use std::process::ExitCode;

#[tokio::main]
#[allow(clippy::print_stderr)]
async fn main() -> ExitCode {
    let result = match spawntree::launcher::utf8_args(std::env::args_os().skip(1)) {
        Ok(argv) => spawntree::launcher::launch(argv).await,
        Err(e) => Err(e.into()),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = e
                .downcast_ref::<spawntree_core::Error>()
                .map_or(1, spawntree_core::Error::exit_code);
            eprintln!("{e:#}");
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}
