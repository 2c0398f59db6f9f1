use anyhow::Result;
use othello_chat::ProviderKind;

#[tokio::main]
async fn main() -> Result<()> {
    othello_chat::run(ProviderKind::Local).await
}
