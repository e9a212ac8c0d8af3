#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tasktape_lib::run().await
}
