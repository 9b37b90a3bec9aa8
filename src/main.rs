#[tokio::main]
async fn main() -> anyhow::Result<()> {
    llm_monitor_lib::run().await
}
