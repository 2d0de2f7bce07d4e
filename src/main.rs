use broadcast_tree::{config::Config, run, setup_logger};

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    setup_logger();
    let config = Config::from_env();
    if let Err(err) = run(config).await {
        tracing::error!(%err, "server exited with an error");
        std::process::exit(1);
    }
}
