//! # chanrpc loopback demo
//!
//! Wires two engines back to back over the in-memory channel pair and
//! exercises each calling style: a plain call, a remote error, a remote
//! generator, a notification and a batch.
//!
//! ## Usage
//!
//! ```bash
//! # Default run
//! loopback
//!
//! # Count further and move JSON text over the channel
//! loopback --count 10 --json
//!
//! # Show the engine's own traffic
//! RUST_LOG=chanrpc=debug loopback
//! ```

use anyhow::Result;
use argh::FromArgs;
use chanrpc::{Engine, LogLevel, Service, ServiceError};
use chanrpc_common::transport::{memory, Channel, JsonSerialization};
use futures_util::StreamExt;
use serde_json::{json, Value};

#[derive(FromArgs)]
/// Two chanrpc engines talking over an in-memory channel
struct Args {
    /// how many values the remote generator yields
    #[argh(option, short = 'n', default = "5")]
    count: i64,

    /// serialize envelopes to JSON text on the channel
    #[argh(switch)]
    json: bool,

    /// log every call the server serves
    #[argh(switch, short = 'v')]
    verbose: bool,
}

fn service() -> Service {
    Service::builder()
        .typed_method("add", |(a, b): (i64, i64)| async move { Ok(a + b) })
        .method("fail", |_| async {
            Err(ServiceError::range_error("nothing to see here"))
        })
        .method("log", |args| async move {
            tracing::info!("server got notification: {:?}", args);
            Ok(Value::Null)
        })
        .stream("count", |args| {
            let to = args.first().and_then(Value::as_i64).unwrap_or(3);
            futures_util::stream::iter((1..=to).map(|n| Ok::<_, ServiceError>(json!(n))))
        })
        .build()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Args = argh::from_env();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let (left, right) = memory::pair();
    let mut server = Engine::builder()
        .implementation(service())
        .channel(Channel::event(right))
        .log(if args.verbose { LogLevel::All } else { LogLevel::Default });
    let mut client = Engine::builder().channel(Channel::event(left));
    if args.json {
        server = server.serializer(JsonSerialization);
        client = client.serializer(JsonSerialization);
    }
    let _server = server.build()?;
    let client = client.build()?;

    let sum = client.method("add").call(vec![json!(1), json!(3)]).await?;
    tracing::info!("add(1, 3) = {}", sum);

    match client.invoke("fail", vec![]).await {
        Ok(value) => tracing::warn!("fail() unexpectedly returned {}", value),
        Err(err) => tracing::info!("fail() rejected: {}", err),
    }

    let values: Vec<Value> = client
        .generator("count")
        .call(vec![json!(args.count)])
        .into_stream()
        .filter_map(|item| async move { item.ok() })
        .collect()
        .await;
    tracing::info!("count({}) yielded {:?}", args.count, values);

    client.notify().invoke("log", vec![json!("hello from the client")]).await?;

    let batch = client.batch();
    let add = batch.method("add");
    let first = add.call(vec![json!(2), json!(2)]);
    let second = add.call(vec![json!(40), json!(2)]);
    tracing::info!("flushing {} queued calls", batch.len());
    batch.flush().await?;
    tracing::info!("batch results: {} and {}", first.await?, second.await?);

    Ok(())
}
