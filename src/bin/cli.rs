//! couchlink CLI
//!
//! Runs delete, unlock and HTTP requests against a simulated cluster seeded
//! from a JSON fixture, printing results as JSON.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use couchlink::native::Fixture;
use couchlink::result::ResultCallback;
use couchlink::{
    Bucket, Config, CouchError, HttpOptions, HttpReply, KeyBatch, MockCluster, OperationKind,
    OperationResult, Outcome, Result,
};
use serde_json::{json, Value};
use tracing_subscriber::{fmt, EnvFilter};

/// couchlink CLI
#[derive(Parser, Debug)]
#[command(name = "couchlink-cli")]
#[command(about = "Batch key operations and HTTP requests against a simulated cluster")]
#[command(version)]
struct Args {
    /// JSON fixture with documents and HTTP routes
    #[arg(short, long)]
    fixture: Option<PathBuf>,

    /// Run in asynchronous mode, printing one line per callback
    #[arg(short, long = "async")]
    async_mode: bool,

    /// Report missing keys as false instead of failing
    #[arg(short, long)]
    quiet: bool,

    /// Key prefix applied to every key
    #[arg(short, long)]
    prefix: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Delete one or more keys
    Delete {
        /// Keys to delete
        #[arg(required = true)]
        keys: Vec<String>,

        /// CAS applied to every key
        #[arg(long)]
        cas: Option<u64>,
    },

    /// Unlock keys locked by get-and-lock
    Unlock {
        /// `key=cas` pairs
        #[arg(required = true)]
        pairs: Vec<String>,
    },

    /// Perform a view or management request
    Http {
        /// Request path, e.g. `/_design/docs/_view/all`
        path: String,

        /// GET, POST, PUT or DELETE
        #[arg(short, long, default_value = "GET")]
        method: String,

        /// `view` or `management`
        #[arg(short = 't', long = "type", default_value = "view")]
        kind: String,

        /// Stream the body in chunks
        #[arg(long)]
        chunked: bool,

        /// Print status and headers along with the body
        #[arg(long)]
        extended: bool,

        /// Request body
        #[arg(short, long)]
        body: Option<String>,
    },
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,couchlink=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    tracing::debug!("couchlink CLI v{}", couchlink::VERSION);

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let cluster = MockCluster::new();
    if let Some(path) = &args.fixture {
        Fixture::load(path)?.apply(&cluster)?;
        tracing::info!("Loaded fixture {} ({} documents)", path.display(), cluster.len());
    }

    let mut builder = Config::builder().quiet(args.quiet);
    if let Some(prefix) = &args.prefix {
        builder = builder.key_prefix(prefix.clone());
    }
    let bucket = Bucket::connect(builder.build(), cluster.transport());

    match args.command {
        Commands::Delete { keys, cas } => {
            let mut batch = KeyBatch::keys(keys);
            if let Some(cas) = cas {
                batch = batch.cas(cas);
            }
            execute(&bucket, args.async_mode, OperationKind::Delete, &batch)
        }
        Commands::Unlock { pairs } => {
            let batch = KeyBatch::with_cas(parse_pairs(&pairs)?);
            execute(&bucket, args.async_mode, OperationKind::Unlock, &batch)
        }
        Commands::Http {
            path,
            method,
            kind,
            chunked,
            extended,
            body,
        } => {
            let mut options = HttpOptions::new()
                .method(method.parse()?)
                .kind(kind.parse()?)
                .chunked(chunked)
                .extended(extended);
            if let Some(body) = body {
                options = options.body(body);
            }

            let mut request = bucket.make_http_request(path, options, None);
            request.on_body(|reply| println!("{}", reply_json(&reply)));
            if args.async_mode {
                bucket.run(|_| request.perform().map(|_| ()))
            } else {
                request.perform().map(|_| ())
            }
        }
    }
}

fn execute(bucket: &Bucket, async_mode: bool, operation: OperationKind, batch: &KeyBatch) -> Result<()> {
    if async_mode {
        return bucket.run(|b| {
            let callback: ResultCallback =
                Box::new(|result: OperationResult| println!("{}", result_json(&result)));
            match operation {
                OperationKind::Unlock => b.unlock(batch, Some(callback))?,
                _ => b.delete(batch, Some(callback))?,
            };
            Ok(())
        });
    }

    let reply = match operation {
        OperationKind::Unlock => bucket.unlock(batch, None)?,
        _ => bucket.delete(batch, None)?,
    };
    if let Some(outcome) = reply.outcome() {
        println!("{}", outcome_json(&outcome));
    }
    Ok(())
}

fn parse_pairs(pairs: &[String]) -> Result<Vec<(String, u64)>> {
    pairs
        .iter()
        .map(|pair| {
            let (key, cas) = pair
                .split_once('=')
                .ok_or_else(|| CouchError::Argument(format!("expected key=cas, got {:?}", pair)))?;
            let cas = cas
                .parse()
                .map_err(|_| CouchError::Argument(format!("invalid CAS in {:?}", pair)))?;
            Ok((key.to_string(), cas))
        })
        .collect()
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn outcome_json(outcome: &Outcome) -> Value {
    match outcome {
        Outcome::Single(ok) => json!(ok),
        Outcome::Batch(map) => map
            .iter()
            .map(|(key, ok)| (lossy(key), Value::Bool(*ok)))
            .collect::<serde_json::Map<_, _>>()
            .into(),
    }
}

fn result_json(result: &OperationResult) -> Value {
    json!({
        "operation": result.operation.to_string(),
        "key": lossy(&result.key),
        "success": result.is_success(),
        "error": result.error.as_ref().map(|e| e.to_string()),
    })
}

fn reply_json(reply: &HttpReply) -> Value {
    match reply {
        HttpReply::Body(body) => json!({ "body": body.as_deref().map(lossy) }),
        HttpReply::Extended(result) => json!({
            "path": result.path,
            "status": result.status,
            "headers": result.headers,
            "completed": result.completed,
            "value": result.value.as_deref().map(lossy),
            "error": result.error.as_ref().map(|e| e.to_string()),
        }),
    }
}
