#![cfg(feature = "cli")]
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};

use emebridge::backend::Backend;
use emebridge::bus::{self, Bus, ChallengeRequest, LicenseRequestBody, Message, Sender};
use emebridge::config::Config;
use emebridge::key::ContentKey;
use emebridge::logs::LogIndex;
use emebridge::playready::header::{challenge_from_key_message, extract_wrm_header, wrm_header_kids};
use emebridge::profile::{is_playready, DrmKind};
use emebridge::pssh::{extract_widevine_pssh, is_pssh_box, Pssh};
use emebridge::storage::{JsonFileStorage, MemoryStorage, Storage};
use emebridge::utils::{b64_decode, b64_encode, random_hex_upper};

#[cfg(feature = "chrono")]
use chrono::Datelike;

use tracing::{error, info, Level};

#[derive(Parser)]
#[command(name = "emebridge", version, disable_version_flag = true, about = "emebridge CLI")]
struct Cli {
    #[arg(short = 'v', long = "version", action = ArgAction::SetTrue)]
    version: bool,

    #[arg(short = 'd', long = "debug", action = ArgAction::SetTrue)]
    debug: bool,

    /// Configuration file (profiles, devices, remotes, storage).
    #[arg(short = 'c', long = "config", default_value = "emebridge.yml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Run a full license exchange for init data through the configured backend.
    ///
    /// The challenge is POSTed to the license server as-is (PlayReady as a
    /// SOAP request) and the response is handed back to the backend.
    License {
        /// Base64 init data (PSSH box or PlayReady object).
        init_data: String,
        server: String,
        #[arg(short = 'k', long = "key-system", default_value = "com.widevine.alpha")]
        key_system: String,
        /// Page URL the exchange is attributed to; selects the profile.
        #[arg(short = 'u', long = "url", default_value = "https://localhost/")]
        url: String,
        /// Extra license request header, as `Name: value`.
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
        #[arg(short = 'p', long = "persistent", action = ArgAction::SetTrue)]
        persistent: bool,
    },
    /// Inspect init data and pull out the Widevine box.
    Pssh { init_data: String },
    /// List or clear the exchange logs.
    Logs {
        #[arg(long = "clear", action = ArgAction::SetTrue)]
        clear: bool,
        #[arg(long = "json", action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Show the profile a page would receive.
    Profile {
        host: Option<String>,
        #[arg(long = "origin")]
        origin: Option<String>,
        #[arg(long = "incognito", action = ArgAction::SetTrue)]
        incognito: bool,
    },
    /// Serve the backend over HTTP.
    Serve {
        #[arg(short = 'h', long = "host")]
        host: Option<String>,
        #[arg(short = 'p', long = "port")]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    info!(
        "emebridge version {} Copyright (c) 2025-{}",
        env!("CARGO_PKG_VERSION"),
        current_year()
    );

    if cli.version {
        return Ok(());
    }

    match cli.command {
        Some(Commands::License {
            init_data,
            server,
            key_system,
            url,
            headers,
            persistent,
        }) => {
            let config = load_config(&cli.config)?;
            run_license(&config, &init_data, &server, &key_system, &url, &headers, persistent).await
        }
        Some(Commands::Pssh { init_data }) => run_pssh(&init_data),
        Some(Commands::Logs { clear, json }) => {
            let config = load_config(&cli.config)?;
            run_logs(&config, clear, json).await
        }
        Some(Commands::Profile {
            host,
            origin,
            incognito,
        }) => {
            let config = load_config(&cli.config)?;
            run_profile(&config, host.as_deref(), origin.as_deref(), incognito)
        }
        Some(Commands::Serve { host, port }) => {
            let mut config = load_config(&cli.config)?;
            if let Some(host) = host {
                config.serve.host = host;
            }
            if let Some(port) = port {
                config.serve.port = port;
            }
            run_serve(&config).await
        }
        None => Ok(()),
    }
}

fn current_year() -> i64 {
    #[cfg(feature = "chrono")]
    {
        chrono::Local::now().year().into()
    }
    #[cfg(not(feature = "chrono"))]
    {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() / 31_536_000 + 1970)
            .unwrap_or(2025) as i64
    }
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    Config::load(path).with_context(|| format!("Failed to load config {}", path.display()))
}

async fn run_license(
    config: &Config,
    init_data: &str,
    server: &str,
    key_system: &str,
    page_url: &str,
    headers: &[String],
    persistent: bool,
) -> anyhow::Result<()> {
    let backend = Arc::new(Backend::from_config(config).await.context("Failed to load backend")?);
    let (connector, inbox) = bus::channel(16);
    tokio::spawn(backend.clone().serve(inbox));

    let url = reqwest::Url::parse(page_url).context("Invalid page URL")?;
    let client = connector.client(Sender {
        tab_id: Some(1),
        url: Some(url.to_string()),
        origin: Some(url.origin().ascii_serialization()),
        incognito: false,
        title: None,
    });

    let session_id = random_hex_upper(32);
    let challenge = client
        .request(Message::Request(Some(ChallengeRequest {
            key_system: key_system.to_string(),
            session_id: session_id.clone(),
            init_data_type: "cenc".to_string(),
            init_data: init_data.to_string(),
            server_cert: None,
        })))
        .await?
        .context("Backend produced no challenge")?;
    info!("[+] Created License Request Message (Challenge)");

    let http = reqwest::Client::new();
    let mut request = if DrmKind::for_request(key_system) == DrmKind::Playready || is_playready(key_system) {
        http.post(server)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header(
                "SOAPAction",
                "\"http://schemas.microsoft.com/DRM/2007/03/protocols/AcquireLicense\"",
            )
            .body(challenge_from_key_message(&challenge)?)
    } else {
        http.post(server).body(b64_decode(&challenge)?)
    };
    for header in headers {
        let (name, value) = header
            .split_once(':')
            .with_context(|| format!("Header '{}' is not 'Name: value'", header))?;
        request = request.header(name.trim(), value.trim());
    }

    let response = request.send().await.context("Failed to send challenge")?;
    if !response.status().is_success() {
        error!(
            "[-] Failed to send challenge: [{}] {}",
            response.status(),
            response.text().await.unwrap_or_default()
        );
        return Ok(());
    }
    let license = response.bytes().await.context("Failed to read license")?;
    info!("[+] Got License Message");

    let reply = client
        .request(Message::Response(LicenseRequestBody {
            key_system: key_system.to_string(),
            session_id,
            license: b64_encode(&license),
            persistent,
        }))
        .await?
        .context("Backend could not parse the license")?;
    info!("[+] License Parsed Successfully");

    let reply: serde_json::Value = serde_json::from_str(&reply)?;
    let keys: Vec<ContentKey> = serde_json::from_value(reply["keys"].clone())?;
    for key in keys {
        info!("[CONTENT] {}:{}", key.kid, key.k);
    }
    Ok(())
}

fn run_pssh(init_data: &str) -> anyhow::Result<()> {
    let data = b64_decode(init_data).context("Init data is not base64")?;

    if is_pssh_box(&data) {
        let widevine = extract_widevine_pssh(&data);
        if widevine != data {
            info!("Widevine box: {}", b64_encode(&widevine));
        }
        let pssh = Pssh::from_bytes(&widevine)?;
        info!("System ID: {}", pssh.system_id);
        info!("Version: {} Flags: {}", pssh.version, pssh.flags);
        for kid in pssh.key_ids()? {
            info!("KID: {}", kid.as_simple());
        }
    }

    match extract_wrm_header(&data) {
        Ok(header) => {
            info!("WRM header: {}", header);
            for kid in wrm_header_kids(&header)? {
                info!("PlayReady KID: {}", hex::encode(kid));
            }
        }
        Err(_) if is_pssh_box(&data) => {}
        Err(e) => anyhow::bail!("Unrecognised init data: {}", e),
    }
    Ok(())
}

async fn run_logs(config: &Config, clear: bool, json: bool) -> anyhow::Result<()> {
    let storage: Arc<dyn Storage> = match &config.storage.path {
        Some(path) => Arc::new(JsonFileStorage::open(path).await.context("Failed to open log storage")?),
        None => Arc::new(MemoryStorage::new()),
    };
    let logs = LogIndex::new(storage);

    if clear {
        logs.clear().await?;
        info!("Cleared exchange logs");
        return Ok(());
    }

    let records = logs.all().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    for record in &records {
        info!(
            "[{}] {} {}",
            record.kind,
            record.origin.as_deref().unwrap_or("null"),
            record.title.as_deref().unwrap_or("")
        );
        info!("  PSSH: {}", record.pssh);
        for key in &record.keys {
            info!("  {}:{}", key.kid, key.k);
        }
        for manifest in &record.manifests {
            info!("  {:?} {}", manifest.kind, manifest.url);
        }
    }
    info!("{} records", records.len());
    Ok(())
}

fn run_profile(config: &Config, host: Option<&str>, origin: Option<&str>, incognito: bool) -> anyhow::Result<()> {
    let view = config.profile_for(host).effective(origin, incognito);
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

async fn run_serve(config: &Config) -> anyhow::Result<()> {
    let backend = Arc::new(Backend::from_config(config).await.context("Failed to load backend")?);
    emebridge::serve::run(backend, &config.serve).await?;
    Ok(())
}
