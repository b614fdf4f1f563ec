use std::collections::HashMap;
use std::io::Write;

use log::{error, info};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};

use storesync::storesync::config::NodeConfig;
use storesync::storesync::start;
use storesync::{ObservableStore, Subscription};

fn init_logger() {
    env_logger::Builder::from_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}:{}] {} - {}",
                buf.timestamp_millis(),
                record.module_path().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.level(),
                record.args()
            )
        })
        .init();
}

const HELP: &str = "commands: get <key> | set <key> <json> | rm <key> | clear | keys | watch <key> | unwatch <key> | quit";

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_logger();

    info!("storesync starting up");

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = match NodeConfig::from_toml_file(&config_path) {
        Ok(config) => {
            info!("Configuration loaded from {}", config_path);
            config
        },
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
        }
    };

    let node = match start(config).await {
        Ok(node) => node,
        Err(e) => {
            error!("Failed to start node: {}", e);
            return Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
        }
    };

    println!("{}", HELP);
    let mut watches: HashMap<String, Subscription> = HashMap::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
        };

        if !run_command(&node.store, &mut watches, line.trim()) {
            break;
        }
    }

    for (_, subscription) in watches.drain() {
        subscription.unsubscribe();
    }
    node.shutdown().await;
    Ok(())
}

/// Executes one console command; returns false to quit
fn run_command(store: &ObservableStore, watches: &mut HashMap<String, Subscription>, line: &str) -> bool {
    let mut parts = line.splitn(3, ' ');
    let command = parts.next().unwrap_or_default();
    let key = parts.next().map(str::trim).filter(|key| !key.is_empty());
    let rest = parts.next().map(str::trim);

    match (command, key) {
        ("", _) => {},
        ("quit" | "exit", _) => return false,
        ("keys", _) => println!("{}", store.keys().join(", ")),
        ("clear", _) => store.clear(),
        ("get", Some(key)) => match store.get(key) {
            Some(value) => println!("{}", value),
            None => println!("(absent)"),
        },
        ("set", Some(key)) => match rest.map(|json| serde_json::from_str::<Value>(json)) {
            Some(Ok(value)) => store.set(key, &value),
            Some(Err(e)) => println!("invalid JSON: {}", e),
            None => println!("usage: set <key> <json>"),
        },
        ("rm", Some(key)) => store.remove(key),
        ("watch", Some(key)) => {
            if watches.contains_key(key) {
                println!("already watching '{}'", key);
            } else {
                let name = key.to_string();
                let subscription = store.subscribe(key, move |value| match value {
                    Some(value) => println!("[{}] = {}", name, value),
                    None => println!("[{}] removed", name),
                });
                watches.insert(key.to_string(), subscription);
            }
        },
        ("unwatch", Some(key)) => match watches.remove(key) {
            Some(subscription) => subscription.unsubscribe(),
            None => println!("not watching '{}'", key),
        },
        _ => println!("{}", HELP),
    }
    true
}
