use std::process::ExitCode;

fn main() -> ExitCode {
    match leafdoc_lib::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Leafdoc failed");
            eprintln!("leafdoc: {e}");
            ExitCode::FAILURE
        }
    }
}
