#[tokio::main]
async fn main() -> anyhow::Result<()> {
    event_calendar_lib::run().await
}
