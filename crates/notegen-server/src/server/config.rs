use anyhow::bail;
use clap::{Parser, ValueEnum};
use core::time::Duration;
use notegen_core::types::{BEATS_PER_BAR, FRAMES_PER_BEAT};
use std::path::PathBuf;

/// What a client sees when the model call fails mid-stream.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// The failure is logged and the stream simply ends, exactly like a
    /// successful generation.
    #[default]
    Silent,
    /// A single `{"error": "..."}` record is written before the stream ends.
    ErrorRecord,
}

/// Runtime configuration for the `notegen-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file is loaded first), with defaults suitable for running next to a
/// locally built frontend.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "notegen-server",
    version,
    about = "A local HTTP server that streams notes from a generative music model"
)]
pub struct CliArgs {
    /// Address to listen on (TCP or Unix socket path; use --uds for Unix socket).
    ///
    /// Example: "127.0.0.1:8000" or "/tmp/notegen.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("127.0.0.1:8000"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,

    /// Root of the static frontend bundle served on every non-API path.
    ///
    /// Environment variable: `FRONTEND_DIR`
    #[arg(long, env = "FRONTEND_DIR", default_value = "ui/dist")]
    pub frontend_dir: PathBuf,

    /// Directory of bundled example MIDI files.
    ///
    /// Environment variable: `ASSETS_DIR`
    #[arg(long, env = "ASSETS_DIR", default_value = "default_assets")]
    pub assets_dir: PathBuf,

    /// Root exposed through `/api/resource` and `/api/resource_ls`.
    ///
    /// Environment variable: `RESOURCE_DIR`
    #[arg(long, env = "RESOURCE_DIR", default_value = "resource")]
    pub resource_dir: PathBuf,

    /// Largest accepted multipart upload, in bytes.
    ///
    /// Environment variable: `MAX_UPLOAD_BYTES`
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = 16 * 1024 * 1024)]
    pub max_upload_bytes: usize,

    /// How a failed model call is reported on the stream.
    ///
    /// Environment variable: `FAILURE_POLICY`
    #[arg(long, env = "FAILURE_POLICY", value_enum, default_value_t = FailurePolicy::Silent)]
    pub failure_policy: FailurePolicy,

    /// Seconds to wait for in-flight sessions to drain on shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,

    /// Artificial per-note delay of the built-in replay model, in
    /// milliseconds.
    ///
    /// Environment variable: `NOTE_DELAY_MS`
    #[arg(long, env = "NOTE_DELAY_MS", default_value_t = 0)]
    pub note_delay_ms: u64,

    /// Pianoroll resolution.
    ///
    /// Environment variable: `FRAMES_PER_BEAT`
    #[arg(long, env = "FRAMES_PER_BEAT", default_value_t = FRAMES_PER_BEAT)]
    pub frames_per_beat: u32,

    /// Bar length used to convert beat ranges into bars.
    ///
    /// Environment variable: `BEATS_PER_BAR`
    #[arg(long, env = "BEATS_PER_BAR", default_value_t = BEATS_PER_BAR)]
    pub beats_per_bar: u32,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub uds: bool,
    pub frontend_dir: PathBuf,
    pub assets_dir: PathBuf,
    pub resource_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub failure_policy: FailurePolicy,
    pub shutdown_timeout: Duration,
    pub note_delay: Duration,
    pub frames_per_beat: u32,
    pub beats_per_bar: u32,
}

impl ServerConfig {
    /// A configuration rooted at `root`, with `ui/dist`, `default_assets` and
    /// `resource` beneath it. Useful for tests and embedding.
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            server_addr: String::from("127.0.0.1:0"),
            uds: false,
            frontend_dir: root.join("ui/dist"),
            assets_dir: root.join("default_assets"),
            resource_dir: root.join("resource"),
            max_upload_bytes: 16 * 1024 * 1024,
            failure_policy: FailurePolicy::Silent,
            shutdown_timeout: Duration::from_secs(3),
            note_delay: Duration::ZERO,
            frames_per_beat: FRAMES_PER_BEAT,
            beats_per_bar: BEATS_PER_BAR,
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.max_upload_bytes == 0 {
            bail!("MAX_UPLOAD_BYTES must be greater than 0");
        }

        if args.frames_per_beat == 0 {
            bail!("FRAMES_PER_BEAT must be greater than 0");
        }

        if args.beats_per_bar == 0 {
            bail!("BEATS_PER_BAR must be greater than 0");
        }

        if args.frames_per_beat.checked_mul(args.beats_per_bar).is_none() {
            bail!(
                "FRAMES_PER_BEAT ({}) * BEATS_PER_BAR ({}) overflows",
                args.frames_per_beat,
                args.beats_per_bar
            );
        }

        Ok(Self {
            server_addr: args.server_addr,
            uds: args.uds,
            frontend_dir: args.frontend_dir,
            assets_dir: args.assets_dir,
            resource_dir: args.resource_dir,
            max_upload_bytes: args.max_upload_bytes,
            failure_policy: args.failure_policy,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            note_delay: Duration::from_millis(args.note_delay_ms),
            frames_per_beat: args.frames_per_beat,
            beats_per_bar: args.beats_per_bar,
        })
    }
}
