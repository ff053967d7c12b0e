use anyhow::{Context, bail};
use bytes::Bytes;
use clap::Parser;
use framecast::config::StreamConfig;
use framecast::constants::RATE_WINDOW_FRAMES;
use framecast::engine::SendingSocket;
use framecast::transmission::real::RealUdpSocket;
use framecast::util::{file::read_frame, frame_digest, generate_random, rate::FrameRateMeter};
use flume::TrySendError;
use humansize::{BINARY, format_size};
use log::{debug, warn};
use owo_colors::OwoColorize;
use std::{net::SocketAddr, path::PathBuf};
use tokio::time::{Duration, Instant, MissedTickBehavior, interval};

#[derive(Parser, Debug)]
#[command(author, version, about = "Stream frames to a receiver over UDP", long_about = None)]
struct Args {
    /// Socket Addr of the receiver
    #[arg(short, long, value_name = "DESTINATION")]
    destination: SocketAddr,

    /// Local address to send from
    #[arg(short, long, value_name = "BIND", default_value = "0.0.0.0:0")]
    bind: SocketAddr,

    /// Stream settings (TOML format).
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `max_payload` from the config.
    #[arg(long, value_name = "BYTES")]
    max_payload: Option<usize>,

    /// Overrides `id_bits` from the config.
    #[arg(long, value_name = "BITS")]
    id_bits: Option<u8>,

    /// Frames per second to pace the stream at.
    #[arg(long, default_value_t = 30.0)]
    fps: f64,

    /// Send random frames of this many bytes instead of files.
    #[arg(long, value_name = "BYTES", conflicts_with = "frames")]
    synthetic: Option<usize>,

    /// Frames to send; the list repeats until `--count` is reached.
    #[arg(short = 'n', long)]
    count: Option<u64>,

    /// Identifier of the first frame.
    #[arg(long, default_value_t = 0)]
    start_id: u16,

    /// Frame files (e.g. encoded JPEG pictures), sent in order.
    #[arg(value_name = "FRAME")]
    frames: Vec<PathBuf>,
}

enum Source {
    Files(Vec<Bytes>),
    Synthetic(usize),
}

impl Source {
    fn frame(&self, n: u64) -> Bytes {
        match self {
            Source::Files(frames) => frames[(n % frames.len() as u64) as usize].clone(),
            Source::Synthetic(size) => Bytes::from(generate_random(*size)),
        }
    }
}

fn load_source(args: &Args) -> anyhow::Result<Source> {
    if let Some(size) = args.synthetic {
        return Ok(Source::Synthetic(size));
    }
    if args.frames.is_empty() {
        bail!("Nothing to send: pass frame files or --synthetic <BYTES>.");
    }
    let frames = args
        .frames
        .iter()
        .map(|path| read_frame(path).with_context(|| format!("reading {}", path.display())))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let total: usize = frames.iter().map(Bytes::len).sum();
    println!(
        "Loaded {} frames, {} in total.",
        frames.len().yellow(),
        format_size(total, BINARY).blue()
    );
    Ok(Source::Files(frames))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if !(args.fps > 0.0 && args.fps.is_finite()) {
        bail!("--fps must be a positive number");
    }

    let mut config = match &args.config {
        Some(path) => StreamConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => StreamConfig::default(),
    };
    if let Some(max_payload) = args.max_payload {
        config.max_payload = max_payload;
    }
    if let Some(id_bits) = args.id_bits {
        config.id_bits = id_bits;
    }
    let fragmenter = config.fragmenter()?;
    let source = load_source(&args)?;

    let socket = RealUdpSocket::bind(args.bind, None)
        .await
        .with_context(|| format!("binding {}", args.bind))?;
    let sender = SendingSocket::new(socket, args.destination, fragmenter).starting_at(args.start_id);

    let (frames_tx, frames_rx) = flume::bounded::<Bytes>(config.queue_depth);
    let sending = tokio::spawn(sender.run(frames_rx));

    let mut ticker = interval(Duration::from_secs_f64(1.0 / args.fps));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut meter = FrameRateMeter::new(RATE_WINDOW_FRAMES, Instant::now());
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut produced = 0u64;
    let mut skipped = 0u64;
    let mut signal_failed = false;
    while args.count.is_none_or(|count| produced < count) {
        tokio::select! {
            signal = &mut ctrl_c, if !signal_failed => match signal {
                Ok(()) => {
                    println!("{}", "Interrupted".yellow());
                    break;
                }
                Err(err) => {
                    warn!("Cannot listen for ctrl-c, sending until --count is reached: {err}");
                    signal_failed = true;
                }
            },
            _ = ticker.tick() => {
                let frame = source.frame(produced);
                produced += 1;
                debug!("Queue frame #{produced}: {} bytes, {}", frame.len(), frame_digest(&frame));
                match frames_tx.try_send(frame) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        skipped += 1;
                        warn!("Socket lagging, skipped frame #{produced}");
                        continue;
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }
                if let Some(fps) = meter.tick(Instant::now()) {
                    println!("Sender FPS: {}", format!("{fps:.1}").green());
                }
            },
        }
    }

    drop(frames_tx);
    let summary = sending.await?;
    println!(
        "Sent {} frames as {} packets ({}), {} with send failures, {} rejected, {} skipped.",
        summary.frames.green(),
        summary.packets.blue(),
        format_size(summary.bytes, BINARY).blue(),
        summary.incomplete.red(),
        summary.rejected.red(),
        skipped.yellow(),
    );
    Ok(())
}
