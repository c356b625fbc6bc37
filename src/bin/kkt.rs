use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use tracing_subscriber::EnvFilter;

use keepkey_transport::{
    events,
    messages::schema,
    path::parse_derivation_path,
    ConfirmationKind, DeviceClient, MessageType, ProtocolMessage, TransportConfig, TransportKind,
};

#[derive(Parser)]
#[command(name = "kkt", version, about = "Talk to a KeepKey over any supported transport")]
struct Cli {
    /// usb, webusb, bridge or desktop (overrides config and KEEPKEY_TRANSPORT)
    #[arg(short, long)]
    transport: Option<TransportKind>,

    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Device path or serial to select
    #[arg(short, long)]
    device: Option<String>,

    #[arg(long)]
    bridge_url: Option<String>,

    #[arg(long)]
    desktop_url: Option<String>,

    /// Debug logging unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List devices visible to the transport
    List,
    /// Show device features
    Features,
    Ping {
        #[arg(default_value = "hello")]
        message: String,
        /// Require a button press on the device
        #[arg(long)]
        button: bool,
    },
    /// Fetch random bytes from the device
    Entropy {
        #[arg(default_value_t = 32)]
        size: u32,
    },
    /// Derive an address, prompting for PIN/passphrase when the device asks
    Address {
        #[arg(default_value = "m/84'/0'/0'/0/0")]
        path: String,
        #[arg(long, default_value = "Bitcoin")]
        coin: String,
        #[arg(long, default_value = "SPENDWITNESS")]
        script_type: String,
        /// Also show the address on the device screen
        #[arg(long)]
        show: bool,
    },
    /// Print device events from the bridge until interrupted
    Listen,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(io::stderr)
        .init();
    keepkey_transport::announce_license();

    let mut config = match &cli.config {
        Some(path) => TransportConfig::from_file(path)?,
        None => TransportConfig::default(),
    }
    .apply_env()?;
    if let Some(kind) = cli.transport {
        config.kind = kind;
    }
    if cli.device.is_some() {
        config.device_path = cli.device.clone();
    }
    if let Some(url) = cli.bridge_url.clone() {
        config.bridge_url = url;
    }
    if let Some(url) = cli.desktop_url.clone() {
        config.desktop_url = url;
    }

    let mut client = DeviceClient::new(config)?;
    if let Command::List = cli.command {
        return list(&mut client).await;
    }

    client.connect().await.context("connecting to device")?;
    let result = run(&mut client, cli.command).await;
    client.disconnect().await;
    result
}

async fn list(client: &mut DeviceClient) -> Result<()> {
    let devices = client.list_devices().await?;
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["Path", "Serial", "VID:PID", "Session"]);
    for d in &devices {
        let ids = match (d.vendor, d.product) {
            (Some(v), Some(p)) => format!("{v:04x}:{p:04x}"),
            _ => "-".into(),
        };
        table.add_row([
            d.path.clone(),
            d.serial_number.clone().unwrap_or_else(|| "<unknown>".into()),
            ids,
            d.session.clone().unwrap_or_else(|| "-".into()),
        ]);
    }
    println!("{table}");
    Ok(())
}

async fn run(client: &mut DeviceClient, command: Command) -> Result<()> {
    match command {
        Command::List => return list(client).await,
        Command::Features => {
            let f = client.get_features().await?;
            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(["Field", "Value"]);
            table.add_row(["Label".to_string(), f.label]);
            table.add_row(["Device ID".to_string(), f.device_id]);
            table.add_row(["Firmware".to_string(), f.version.to_string()]);
            table.add_row(["Model".to_string(), f.model]);
            table.add_row(["Initialized".to_string(), f.initialized.to_string()]);
            table.add_row(["PIN protection".to_string(), f.pin_protection.to_string()]);
            table.add_row(["Passphrase".to_string(), f.passphrase_protection.to_string()]);
            table.add_row(["Bootloader mode".to_string(), f.bootloader_mode.to_string()]);
            println!("{table}");
        }
        Command::Ping { message, button } => {
            println!("{}", client.ping(&message, button).await?);
        }
        Command::Entropy { size } => {
            println!("{}", hex::encode(client.get_entropy(size).await?));
        }
        Command::Address {
            path,
            coin,
            script_type,
            show,
        } => {
            let request = ProtocolMessage::with_payload(
                MessageType::GetAddress,
                &schema::GetAddress {
                    address_n: parse_derivation_path(&path)?,
                    coin_name: Some(coin),
                    show_display: Some(show),
                    script_type: Some(
                        schema::input_script_type::value_of(&script_type)
                            .with_context(|| format!("unknown script type {script_type}"))?,
                    ),
                },
            )?;
            let mut response = client.call(request).await?;
            while let Some(pending) = client.pending_confirmation().map(|p| p.kind) {
                response = match pending {
                    ConfirmationKind::Button => {
                        eprintln!("Confirm on device...");
                        client.send_button_ack().await?
                    }
                    ConfirmationKind::Pin => {
                        let pin = prompt("PIN (matrix positions, 7 8 9 / 4 5 6 / 1 2 3)")?;
                        client.send_pin(&pin).await?
                    }
                    ConfirmationKind::Passphrase => {
                        let passphrase = prompt("Passphrase")?;
                        client.send_passphrase(&passphrase, false).await?
                    }
                    ConfirmationKind::Word => bail!("device asked for a recovery word"),
                };
            }
            let address = response.expect(MessageType::Address)?;
            println!("{}", address.get_str("address").unwrap_or_default());
        }
        Command::Listen => {
            for name in [
                events::BUTTON_REQUEST,
                events::PIN_REQUEST,
                events::PASSPHRASE_REQUEST,
                events::WORD_REQUEST,
                events::DEVICE_FAILURE,
                events::DEVICE_SUCCESS,
            ] {
                client.on_event(name, move |payload| println!("{name} {payload}"));
            }
            client.listen().await?;
            eprintln!("Listening; press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            client.stop_listening().await;
        }
    }
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    eprint!("{label}: ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
