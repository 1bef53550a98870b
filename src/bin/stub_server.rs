//! Stand-in for the database binary.
//!
//! Understands `create`, `serve` and `proxy` and writes the same log lines the
//! real server does, so the harness can be exercised without it.
//!
//! Extra flags:
//! - `--stub-never-ready`: never log the ready line
//! - `--stub-exit-code <n>`: exit code used when asked to terminate

use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use cluster_harness::file_io::open_file_for_append;
use rand::Rng;
use tokio::net::TcpListener;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;

const MARKER_FILE: &str = "metadata";

#[derive(Parser, Debug)]
#[command(about = "Stand-in server for cluster-harness tests", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialises a data directory
    #[command(args_override_self = true)]
    Create {
        #[arg(long)]
        server_name: String,

        #[arg(long)]
        directory: PathBuf,

        #[arg(long)]
        log_file: PathBuf,

        #[arg(long)]
        server_tag: Vec<String>,
    },
    #[command(args_override_self = true)]
    Serve(ServeArgs),
    #[command(args_override_self = true)]
    Proxy(ServeArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long)]
    log_file: PathBuf,

    /// Required by `serve`, never passed to `proxy`
    #[arg(long)]
    directory: Option<PathBuf>,

    #[arg(long, default_value_t = 0)]
    cluster_port: u16,

    #[arg(long, default_value_t = 0)]
    driver_port: u16,

    #[arg(long, default_value_t = 0)]
    http_port: u16,

    #[arg(long)]
    join: Vec<String>,

    #[command(flatten)]
    _accepted: AcceptedArgs,

    #[arg(long, default_value_t = false)]
    stub_never_ready: bool,

    #[arg(long, default_value_t = 0)]
    stub_exit_code: u8,
}

/// Flags the real server takes that the stub accepts and ignores
#[derive(Args, Debug)]
#[allow(dead_code)]
struct AcceptedArgs {
    #[arg(long)]
    bind: Option<String>,

    #[arg(long)]
    cache_size: Option<u64>,

    #[arg(long)]
    client_port: Option<u16>,

    #[arg(long)]
    http_tls_key: Option<PathBuf>,

    #[arg(long)]
    http_tls_cert: Option<PathBuf>,

    #[arg(long)]
    driver_tls_key: Option<PathBuf>,

    #[arg(long)]
    driver_tls_cert: Option<PathBuf>,

    #[arg(long)]
    cluster_tls_key: Option<PathBuf>,

    #[arg(long)]
    cluster_tls_cert: Option<PathBuf>,

    #[arg(long)]
    cluster_tls_ca: Option<PathBuf>,

    #[arg(long)]
    tls_min_protocol: Option<String>,

    #[arg(long)]
    tls_ciphers: Option<String>,
}

fn random_uuid() -> String {
    let mut rng = rand::thread_rng();
    let hex = |n: usize, rng: &mut rand::rngs::ThreadRng| -> String {
        (0..n).map(|_| format!("{:x}", rng.gen_range(0..16u8))).collect()
    };
    format!(
        "{}-{}-{}-{}-{}",
        hex(8, &mut rng),
        hex(4, &mut rng),
        hex(4, &mut rng),
        hex(4, &mut rng),
        hex(12, &mut rng)
    )
}

struct Log(std::fs::File);

impl Log {
    fn open(path: &Path) -> Result<Self, String> {
        open_file_for_append(path).map(Log).map_err(|e| e.to_string())
    }

    fn notice(
        &mut self,
        text: &str,
    ) -> Result<(), String> {
        writeln!(self.0, "stub notice: {text}").map_err(|e| e.to_string())
    }
}

fn create(
    server_name: &str,
    directory: &Path,
    log_file: &Path,
    server_tags: &[String],
) -> Result<(), String> {
    std::fs::create_dir_all(directory).map_err(|e| e.to_string())?;
    std::fs::write(directory.join(MARKER_FILE), server_name).map_err(|e| e.to_string())?;

    let mut log = Log::open(log_file)?;
    log.notice(&format!("Initializing directory {}", directory.display()))?;
    if !server_tags.is_empty() {
        log.notice(&format!("Server tags: {}", server_tags.join(", ")))?;
    }
    Ok(())
}

/// `name` is the server name for `serve`, `None` for `proxy`
async fn run(
    args: &ServeArgs,
    name: Option<String>,
) -> Result<u8, String> {
    let mut log = Log::open(&args.log_file)?;
    log.notice("Running stub server")?;
    for peer in &args.join {
        log.notice(&format!("Attempting connection to {peer}"))?;
    }

    let mut listeners = vec![];
    for (port, kind) in [
        (args.cluster_port, "intracluster"),
        (args.driver_port, "client driver"),
        (args.http_port, "administrative HTTP"),
    ] {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.map_err(|e| e.to_string())?;
        let port = listener.local_addr().map_err(|e| e.to_string())?.port();
        log.notice(&format!("Listening for {kind} connections on port {port}"))?;
        listeners.push(listener);
    }

    let uuid = random_uuid();
    if !args.stub_never_ready {
        match &name {
            Some(name) => {
                log.notice(&format!("Our server ID is {uuid}"))?;
                log.notice(&format!("Server ready, \"{name}\" {uuid}"))?;
            }
            None => log.notice(&format!("Proxy ready, proxy-{uuid}"))?,
        }
    }

    let mut sigterm = signal(SignalKind::terminate()).map_err(|e| e.to_string())?;
    let mut sigint = signal(SignalKind::interrupt()).map_err(|e| e.to_string())?;
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
    log.notice("Shutting down")?;
    drop(listeners);
    Ok(args.stub_exit_code)
}

fn server_name(args: &ServeArgs) -> Result<String, String> {
    let directory = args.directory.as_ref().ok_or("--directory is required")?;
    std::fs::read_to_string(directory.join(MARKER_FILE))
        .map_err(|e| format!("{} is not initialised: {e}", directory.display()))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Create {
            server_name,
            directory,
            log_file,
            server_tag,
        } => create(server_name, directory, log_file, server_tag).map(|_| 0),
        Commands::Serve(args) => match server_name(args) {
            Ok(name) => run(args, Some(name)).await,
            Err(e) => Err(e),
        },
        Commands::Proxy(args) => run(args, None).await,
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(2)
        }
    }
}
