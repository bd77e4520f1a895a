#[tokio::main]
async fn main() -> anyhow::Result<()> {
    backoffice_tenancy::server::run().await
}
