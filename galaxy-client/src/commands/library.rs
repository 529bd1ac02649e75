//! `library`: list owned product ids

use std::path::PathBuf;

use crate::commands::{authenticated_client, CommandResult};

pub async fn handle(limit: Option<usize>, auth_file: Option<PathBuf>) -> CommandResult {
    let client = authenticated_client(auth_file).await?;
    let mut owned = client.owned_games().await?;
    if let Some(limit) = limit {
        owned.truncate(limit);
    }
    for product_id in owned {
        println!("{product_id}");
    }
    Ok(())
}
