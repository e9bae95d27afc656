//! commbridge-demo: broadcast one value across an in-process loopback world.
//!
//! Every rank runs on its own thread and blocks in `sync_wait` on its share of
//! the broadcast. Exit code 1 means the broadcast failed under the recoverable
//! policy; under the fatal policy a failure aborts the process.

use std::process;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, anyhow};

use commbridge::native::Status;
use commbridge::native::loopback::{self, Buffer, Comm, Request};
use commbridge::{
    AdaptsSelf, ErrorPolicy, Operation, Poller, PollingConfig, PollingMode, just,
};

struct Options {
    ranks: usize,
    root: i32,
    value: i32,
    policy: ErrorPolicy,
    mode: PollingMode,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            ranks: 4,
            root: 0,
            value: 42,
            policy: ErrorPolicy::Recoverable,
            mode: PollingMode::Cooperative,
        }
    }
}

/// One rank's share of a single-element broadcast.
struct Broadcast {
    buf: Buffer,
    root: i32,
    comm: Comm,
}

impl AdaptsSelf for Broadcast {
    type Output = i32;

    fn adapt(self, poller: &Arc<Poller>) -> Operation<i32> {
        let Broadcast { buf, root, comm } = self;
        let out = buf.clone();
        poller.transform_then(
            just((buf, comm)),
            move |(buf, comm): (Buffer, Comm), request: &mut Request| {
                loopback::ibcast(&buf, 1, root, &comm, request)
            },
            move |_: Status| out.get(0).ok_or_else(|| "broadcast buffer is empty".into()),
        )
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let options = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!(
                "Usage: commbridge-demo [--ranks N] [--root R] [--value V] [--policy P] [--mode M]"
            );
            eprintln!();
            eprintln!("Options:");
            eprintln!("  --ranks <n>      Number of loopback ranks [default: 4]");
            eprintln!("  --root <rank>    Broadcast root [default: 0]");
            eprintln!("  --value <v>      Value broadcast from the root [default: 42]");
            eprintln!("  --policy <p>     Error policy: recoverable or fatal [default: recoverable]");
            eprintln!("  --mode <m>       Polling mode: background or cooperative [default: cooperative]");
            process::exit(2);
        }
    };

    commbridge::init_tracing();

    if let Err(e) = run(&options) {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut options = Options::default();

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        let flag = args[i].as_str();
        if matches!(flag, "--help" | "-h") {
            return Err(String::new());
        }
        if !flag.starts_with('-') {
            return Err(format!("unexpected argument: {flag}"));
        }

        i += 1;
        let value = args
            .get(i)
            .ok_or_else(|| format!("{flag} requires a value"))?;
        match flag {
            "--ranks" => {
                options.ranks = value
                    .parse::<usize>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| format!("invalid rank count '{value}'"))?;
            }
            "--root" => {
                options.root = value
                    .parse()
                    .map_err(|_| format!("invalid root '{value}'"))?;
            }
            "--value" => {
                options.value = value
                    .parse()
                    .map_err(|_| format!("invalid value '{value}'"))?;
            }
            "--policy" => options.policy = value.parse()?,
            "--mode" => options.mode = value.parse()?,
            _ => return Err(format!("unknown flag: {flag}")),
        }
        i += 1;
    }

    Ok(options)
}

fn run(options: &Options) -> anyhow::Result<()> {
    let poller = Poller::new(PollingConfig::default());
    let _polling = poller.enable_polling(options.mode, options.policy);

    tracing::info!(
        ranks = options.ranks,
        root = options.root,
        policy = options.policy.as_str(),
        mode = options.mode.as_str(),
        "Starting broadcast"
    );

    let mut ranks = Vec::with_capacity(options.ranks);
    for comm in loopback::world(options.ranks) {
        let rank = comm.rank();
        let buf = Buffer::new(1);
        if rank == options.root {
            buf.set(0, options.value);
        }
        let op = poller.transform_value(Broadcast {
            buf,
            root: options.root,
            comm,
        });

        let poller = Arc::clone(&poller);
        let handle = thread::Builder::new()
            .name(format!("rank-{rank}"))
            .spawn(move || poller.sync_wait(op))
            .with_context(|| format!("failed to spawn thread for rank {rank}"))?;
        ranks.push((rank, handle));
    }

    let mut failure = None;
    for (rank, handle) in ranks {
        let result = handle
            .join()
            .map_err(|_| anyhow!("rank {rank} thread panicked"))?;
        match result {
            Ok(value) => println!("rank {rank}: {value}"),
            Err(e) => {
                tracing::error!(rank, error = %e, "Broadcast failed");
                if failure.is_none() {
                    failure = Some(anyhow::Error::new(e).context(format!("rank {rank}")));
                }
            }
        }
    }

    tracing::info!(
        stats = %serde_json::to_string(&poller.stats())?,
        "Broadcast finished"
    );

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
