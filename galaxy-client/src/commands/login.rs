//! `login`: exchange an OAuth code for stored credentials

use std::path::PathBuf;

use crate::auth::AuthStore;
use crate::commands::CommandResult;

const AUTH_URL: &str = "https://auth.gog.com/auth?client_id=46899977096215655\
&redirect_uri=https%3A%2F%2Fembed.gog.com%2Fon_login_success%3Forigin%3Dclient\
&response_type=code&layout=client2";

pub async fn handle(code: Option<String>, auth_file: Option<PathBuf>) -> CommandResult {
    let Some(code) = code else {
        println!("To authenticate:");
        println!();
        println!("  1. Open this URL in a browser and log in:");
        println!("     {AUTH_URL}");
        println!("  2. After login you land on a blank page whose URL contains");
        println!("     `code=...`; copy the whole code.");
        println!("  3. Run: galaxy-dl login --code <CODE>");
        return Err("no authorization code given".into());
    };

    let store = AuthStore::open(auth_file)?;
    store.login_with_code(&code).await?;
    println!("Authenticated; credentials saved to {}", store.path().display());
    Ok(())
}
