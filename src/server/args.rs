use argh::FromArgs;

#[derive(FromArgs, PartialEq, Debug)]
/// A durable workflow orchestrator backed by Postgres.
pub struct OrchOptions {
    #[argh(subcommand)]
    pub command: Command,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
pub enum Command {
    Server(ServerOpts),
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "server")]
/// Start the API server and the tick loop.
pub struct ServerOpts {
    #[argh(option, default = "8080")]
    /// port for the API server
    pub port: u16,
}
