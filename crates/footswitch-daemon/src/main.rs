//! footswitchd
//!
//! Grabs a dedicated foot switch, watches the real keyboards, and re-emits
//! pedal presses as modifier and shortcut keys through a virtual keyboard.

mod device;
mod error;
mod event_loop;
mod injector;
mod reader;
mod remapper;

use clap::{Parser, ValueEnum};
use evdev::Key;
use tracing_subscriber::EnvFilter;

use crate::device::SwitchId;
use crate::error::DaemonError;
use crate::event_loop::EventLoop;
use crate::injector::VirtualKeyboard;
use crate::remapper::{MappingTable, PedalRemapper};

/// Which modifier the right pedal button holds; both bindings exist in the
/// wild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RightModifier {
    Shift,
    Alt,
}

impl RightModifier {
    fn key(self) -> Key {
        match self {
            RightModifier::Shift => Key::KEY_LEFTSHIFT,
            RightModifier::Alt => Key::KEY_LEFTALT,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "footswitchd")]
#[command(about = "Foot switch to keyboard remapping daemon")]
struct Args {
    /// Vendor id of the foot switch, in hex
    #[arg(long, default_value = "07b4", value_parser = parse_hex_id)]
    vendor: u16,

    /// Product id of the foot switch, in hex
    #[arg(long, default_value = "0218", value_parser = parse_hex_id)]
    product: u16,

    /// Modifier held by the right pedal button
    #[arg(long, value_enum, default_value = "shift")]
    right_modifier: RightModifier,

    /// Name the virtual keyboard registers under
    #[arg(long, default_value = "footswitchd")]
    output_name: String,
}

fn parse_hex_id(value: &str) -> Result<u16, String> {
    let digits = value.trim_start_matches("0x");
    u16::from_str_radix(digits, 16).map_err(|e| format!("invalid hex id '{}': {}", value, e))
}

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if let Err(e) = run(&args) {
        tracing::error!("{}", e);
        std::process::exit(e.exit_code());
    }
}

fn run(args: &Args) -> Result<(), DaemonError> {
    let switch_id = SwitchId {
        vendor: args.vendor,
        product: args.product,
    };
    let mapping = MappingTable::standard(args.right_modifier.key());

    let registrations = device::scan_devices(switch_id)?;
    tracing::info!("monitoring {} device(s)", registrations.len());

    let mut output = VirtualKeyboard::create(&args.output_name, &mapping.capability_keys())?;
    let mut remapper = PedalRemapper::new(mapping);

    EventLoop::new(registrations)?.run(&mut remapper, &mut output)
}
