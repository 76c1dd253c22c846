use anyhow::{anyhow, Context, Result};
use asim_core::screen::{ScreenWorker, ACK_MASK};
use asim_core::{
    CancelToken, Encoding, Engine, Frame, FrameMailbox, Listing, MockEngine, Rgb, Session, SessionConfig,
};
use clap::{Parser, Subcommand};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON session configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load an S-record image and report its entry point
    Load { image: PathBuf },
    /// Print the line map and symbols of a listing file
    Listing { file: PathBuf },
    /// Load an image and decode watched addresses (ADDR[:ENCODING])
    Watch {
        image: PathBuf,
        #[arg(required = true)]
        watches: Vec<String>,
    },
    /// Dump memory around an address
    Dump {
        image: PathBuf,
        address: String,
        #[arg(default_value_t = 8)]
        rows: usize,
    },
    /// Single-step a loaded image
    Step {
        image: PathBuf,
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
        /// Listing used for line numbers
        #[arg(short, long)]
        listing: Option<PathBuf>,
    },
    /// Compose one screen frame and write it as a PPM image
    Screen {
        image: PathBuf,
        #[arg(short, long, default_value = "screen.ppm")]
        out: PathBuf,
        #[arg(long)]
        frame_swap: bool,
    },
}

/// Accepts `0x8000`, `$8000` or bare hex.
fn parse_address(s: &str) -> Result<u32> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .or_else(|| s.strip_prefix('$'))
        .unwrap_or(s);
    u32::from_str_radix(digits, 16).with_context(|| format!("Invalid address '{}'", s))
}

fn parse_watch(arg: &str) -> Result<(u32, Encoding)> {
    match arg.split_once(':') {
        Some((address, encoding)) => Ok((parse_address(address)?, encoding.parse()?)),
        None => Ok((parse_address(arg)?, Encoding::default())),
    }
}

fn load_config(path: Option<&Path>) -> Result<SessionConfig> {
    match path {
        Some(path) => SessionConfig::load(path).with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(SessionConfig::default()),
    }
}

fn open_session(image: &Path, config: SessionConfig) -> Result<Session> {
    let mut session = Session::new(|| Arc::new(MockEngine::new()) as Arc<dyn Engine>, config);
    session
        .load_binary(image)
        .with_context(|| format!("Failed to load {}", image.display()))?;
    Ok(session)
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Load { image } => {
            let session = open_session(&image, config)?;
            let regs = session.engine().read_registers();
            println!("Entry: 0x{:08X}", regs.pc);
            println!("Stack: 0x{:08X}", regs.sp());
            for bp in session.breakpoints() {
                println!("BP {}: 0x{:08X} (mask 0x{:02X})", bp.slot, bp.address, bp.access_mask.bits());
            }
        }
        Commands::Listing { file } => {
            let listing =
                Listing::from_file(&file).with_context(|| format!("Failed to read listing {}", file.display()))?;
            let mut lines: Vec<_> = listing.line_map.iter().collect();
            lines.sort();
            for (address, line) in lines {
                println!("0x{:08X} -> line {}", address, line);
            }
            if !listing.symbols.is_empty() {
                println!();
                for (name, address) in &listing.symbols {
                    println!("{:<24} 0x{:08X}", name, address);
                }
            }
        }
        Commands::Watch { image, watches } => {
            let session = open_session(&image, config)?;
            for arg in &watches {
                let (address, encoding) = parse_watch(arg)?;
                session.add_watch(address, None, encoding);
            }
            for var in session.watches() {
                println!("{:<12} 0x{:08X} {:<24} {}", var.name, var.address, var.encoding.label(), var.last_value);
            }
        }
        Commands::Dump { image, address, rows } => {
            let session = open_session(&image, config)?;
            for line in session.dump(parse_address(&address)?, rows) {
                println!("{}", line.render());
            }
        }
        Commands::Step { image, count, listing } => {
            let mut session = open_session(&image, config)?;
            if let Some(listing) = listing {
                session.attach_listing(&listing, false);
            }
            for _ in 0..count {
                let delta = session.step()?;
                println!(
                    "PC=0x{:08X} SR={} line {}",
                    delta.registers.pc,
                    delta.sr_flags,
                    delta.current_line_label()
                );
            }
        }
        Commands::Screen { image, out, frame_swap } => {
            let mut screen_config = config.screen.clone();
            screen_config.frame_swap |= frame_swap;
            let session = open_session(&image, config)?;
            let engine = session.engine();

            let mailbox = Arc::new(FrameMailbox::new(Frame::filled(
                screen_config.width,
                screen_config.height,
                Rgb::BLACK,
            )));
            let mut worker = ScreenWorker::new(Arc::clone(&engine), screen_config.clone(), Arc::clone(&mailbox), None);
            if worker.tick(&CancelToken::new()).is_none() {
                let status = engine.read_byte(screen_config.base_address + asim_core::screen::STATUS_OFFSET)?;
                return Err(anyhow!(
                    "No frame composed (status 0x{:02X}, ACK {})",
                    status,
                    if status & ACK_MASK != 0 { "set" } else { "clear" }
                ));
            }

            let frame = mailbox.latest();
            std::fs::write(&out, frame.to_ppm()).with_context(|| format!("Failed to write {}", out.display()))?;
            info!("Wrote {}x{} frame to {}", frame.width, frame.height, out.display());
            println!("{}", out.display());
        }
    }

    Ok(())
}
