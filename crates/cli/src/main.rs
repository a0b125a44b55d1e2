use std::process::ExitCode;

fn main() -> ExitCode {
    renta_cli::run()
}
