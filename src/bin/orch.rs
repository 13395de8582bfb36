use std::process::ExitCode;

use orch::server::driver;

#[tokio::main]
async fn main() -> ExitCode {
    driver::run().await
}
