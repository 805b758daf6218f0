//! rkv-cli: send one command to a RESP server and print the reply.
//!
//! ```text
//! rkv-cli --url tcp://127.0.0.1:6379 SET greeting hello
//! rkv-cli --shape str GET greeting
//! rkv-cli --shape ints --url unix:///tmp/kv.sock SMISMEMBER set a b
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `warn`).

use std::time::Duration;

use anyhow::{bail, Context as _};
use bytes::Bytes;
use clap::{Parser, ValueEnum};
use rkv_client::{
    Arg, CancellationToken, ClientConfig, Config, Context, KVClient, Reply, Shape, Value,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_URL: &str = "tcp://127.0.0.1:6379";

#[derive(Parser, Debug)]
#[command(name = "rkv-cli", version, about)]
struct Args {
    /// Server endpoint: tcp://host[:port], redis://host[:port] or unix:///path
    #[arg(short, long, env = "RKV_URL", default_value = DEFAULT_URL)]
    url: String,

    /// Reply shape to decode
    #[arg(short, long, value_enum, default_value_t = ShapeArg::Str)]
    shape: ShapeArg,

    /// Overall deadline for connecting and the call, in milliseconds
    #[arg(short, long, default_value_t = 5000)]
    timeout_ms: u64,

    /// Command name followed by its arguments
    #[arg(required = true, num_args = 1..)]
    command: Vec<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ShapeArg {
    Status,
    Int,
    Ints,
    Float,
    Str,
    Strs,
}

impl From<ShapeArg> for Shape {
    fn from(arg: ShapeArg) -> Self {
        match arg {
            ShapeArg::Status => Shape::Status,
            ShapeArg::Int => Shape::Int,
            ShapeArg::Ints => Shape::Ints,
            ShapeArg::Float => Shape::Float,
            ShapeArg::Str => Shape::Str,
            ShapeArg::Strs => Shape::Strs,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if args.timeout_ms == 0 {
        bail!("--timeout-ms must be positive");
    }

    let endpoint =
        Config::parse_url(&args.url).with_context(|| format!("invalid url {}", args.url))?;
    info!(network = endpoint.network.as_str(), address = %endpoint.address, "connecting");

    // Ctrl-C aborts the pending call instead of killing the process mid-write.
    let token = CancellationToken::new();
    let interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });
    let ctx = Context::background()
        .with_cancellation(token)
        .with_timeout(Duration::from_millis(args.timeout_ms));

    let mut config = ClientConfig::new(endpoint);
    config.max_idle = 1;
    config.prefill = false;
    let client = KVClient::with_config(&ctx, config).await?;

    let words: Vec<Arg<'_>> = args.command.iter().map(Arg::from).collect();
    let req = client.command(&words);
    debug!(frame = ?Bytes::copy_from_slice(req.as_bytes()), "sending");

    let reply = client
        .call(&ctx, req, args.shape.into())
        .await
        .with_context(|| format!("{} failed", args.command[0]))?;
    print_reply(&reply);
    client.close();
    Ok(())
}

fn print_reply(reply: &Reply<Value>) {
    match reply {
        Reply::Ok => println!("OK"),
        Reply::Null => println!("(nil)"),
        Reply::Value(Value::Status(text)) | Reply::Value(Value::Str(text)) => {
            println!("{}", String::from_utf8_lossy(text))
        }
        Reply::Value(Value::Int(n)) => println!("(integer) {}", n),
        Reply::Value(Value::Float(f)) => println!("(double) {}", f),
        Reply::Value(Value::Ints(values)) => {
            for (i, n) in values.iter().enumerate() {
                println!("{}) (integer) {}", i + 1, n);
            }
        }
        Reply::Value(Value::Strs(values)) => {
            for (i, text) in values.iter().enumerate() {
                println!("{}) {:?}", i + 1, String::from_utf8_lossy(text));
            }
        }
    }
}
