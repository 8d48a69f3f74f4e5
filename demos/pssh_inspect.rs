use anyhow::Context;
use emebridge::pssh::{extract_widevine_pssh_b64, flip_kid_hex, Pssh};

fn main() -> anyhow::Result<()> {
    let input = std::env::args()
        .nth(1)
        .context("Usage: pssh_inspect <init_data_base64>")?;

    let widevine = extract_widevine_pssh_b64(&input);
    if widevine != input {
        println!("widevine_box: {}", widevine);
    }

    let pssh = Pssh::from_base64(&widevine)?;
    println!("version: {}", pssh.version);
    println!("flags: {}", pssh.flags);
    println!("system_id: {}", pssh.system_id);

    let key_ids = pssh.key_ids()?;
    if key_ids.is_empty() {
        println!("key_ids: <none>");
    } else {
        for kid in key_ids {
            let hex = kid.as_simple().to_string();
            println!("kid: {} (playready order {})", hex, flip_kid_hex(&hex)?);
        }
    }

    Ok(())
}
