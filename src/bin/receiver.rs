use anyhow::{Context, anyhow};
use clap::Parser;
use framecast::config::StreamConfig;
use framecast::constants::RATE_WINDOW_FRAMES;
use framecast::engine::ReceivingSocket;
use framecast::protocol::CompletedFrame;
use framecast::transmission::real::RealUdpSocket;
use framecast::util::{
    file::{check_output_dir, write_frame},
    frame_digest,
    rate::FrameRateMeter,
};
use humansize::{BINARY, format_size};
use log::{debug, warn};
use owo_colors::OwoColorize;
use std::{net::SocketAddr, path::PathBuf};
use tokio::time::Instant;

#[derive(Parser, Debug)]
#[command(author, version, about = "Receive and reassemble frames from UDP", long_about = None)]
struct Args {
    /// Listening addr
    #[arg(short, long, value_name = "LISTEN")]
    listen: SocketAddr,

    /// Stream settings (TOML format).
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `id_bits` from the config.
    #[arg(long, value_name = "BITS")]
    id_bits: Option<u8>,

    /// Kernel receive buffer size for the socket.
    #[arg(long, value_name = "BYTES")]
    recv_buffer: Option<usize>,

    /// Folder to write every delivered frame into (optional).
    #[arg(short, long, value_name = "OUTPUT_DIR")]
    output: Option<PathBuf>,
}

struct ConsumerReport {
    frames: u64,
    bytes: usize,
}

// Runs on its own thread so slow disks never hold up packet intake.
fn consume(frames: flume::Receiver<CompletedFrame>, output: Option<PathBuf>) -> ConsumerReport {
    let mut report = ConsumerReport {
        frames: 0,
        bytes: 0,
    };
    let mut meter = FrameRateMeter::new(RATE_WINDOW_FRAMES, Instant::now());

    while let Ok(frame) = frames.recv() {
        report.frames += 1;
        report.bytes += frame.data.len();
        debug!(
            "Frame {} delivered: {} bytes, {}",
            frame.frame_id,
            frame.data.len(),
            frame_digest(&frame.data)
        );

        if let Some(dir) = &output
            && let Err(err) = write_frame(dir, report.frames, frame.frame_id, &frame.data)
        {
            warn!("Failed to write frame {}: {err}", frame.frame_id);
        }

        if let Some(fps) = meter.tick(Instant::now()) {
            println!(
                "Client FPS: {} (last frame {})",
                format!("{fps:.1}").green(),
                frame.frame_id.bright_blue()
            );
        }
    }
    report
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => StreamConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => StreamConfig::default(),
    };
    if let Some(id_bits) = args.id_bits {
        config.id_bits = id_bits;
    }
    let reassembler = config.reassembler()?;

    if let Some(dir) = &args.output {
        if check_output_dir(dir)? {
            println!("Writing frames into existing {}.", dir.display());
        } else {
            println!("Created {} for frames.", dir.display());
        }
    }

    let socket = RealUdpSocket::bind(args.listen, args.recv_buffer)
        .await
        .with_context(|| format!("binding {}", args.listen))?;

    let (frames_tx, frames_rx) = flume::bounded(config.queue_depth);
    let (stop_tx, stop_rx) = flume::bounded::<()>(1);
    let receiver = ReceivingSocket::new(socket, reassembler, frames_tx, config.sweep_interval());
    let mut receiving = tokio::spawn(receiver.run(stop_rx));

    let output = args.output.clone();
    let consumer = std::thread::spawn(move || consume(frames_rx, output));

    let summary = tokio::select! {
        finished = &mut receiving => finished??,
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => {
                    println!("{}", "Interrupted".yellow());
                    stop_tx.send_async(()).await.ok();
                }
                Err(err) => warn!("Cannot listen for ctrl-c, receiving until the socket fails: {err}"),
            }
            (&mut receiving).await??
        },
    };
    drop(stop_tx);
    let consumed = consumer
        .join()
        .map_err(|_| anyhow!("consumer thread panicked"))?;

    println!(
        "Shown {} frames ({}). {} stale, {} evicted, {} malformed, {} inconsistent, {} dropped for a slow consumer.",
        consumed.frames.green(),
        format_size(consumed.bytes, BINARY).blue(),
        summary.stats.stale.yellow(),
        summary.stats.evicted.yellow(),
        summary.stats.malformed.red(),
        summary.stats.inconsistent.red(),
        summary.overflowed.red(),
    );
    Ok(())
}
