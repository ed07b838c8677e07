use std::sync::Arc;

use serde_json::Value;
use tracing_subscriber::EnvFilter;

use yardos::admin::{AdminGate, AdminState, TerminalPrompt};
use yardos::config::Config;
use yardos::display::load_display_config;
use yardos::storage::FileStore;
use yardos::text;
use yardos::toast::{StderrSurface, Toaster};
use yardos::{client, Params};


#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = std::env::args().collect::<Vec<_>>();
    let args_ref = args.iter().map(|s| s.as_str()).collect::<Vec<_>>();

    match &args_ref[1..] {
        ["help", "get"] => {
            usage("get action [key=value ...]");
        },
        ["get", action, extra @ ..] => {
            let mut params = Params::new().with("action", *action);
            params.merge(pairs(extra));

            let transport = client::transport(&config());
            match transport.get(params).await {
                Ok(envelope) => print_json(&envelope.into_value()),
                Err(err) => fail(&err.to_string()),
            }
        },
        ["help", "post"] => {
            usage("post action payload_json [key=value ...]");
        },
        ["post", action, payload, extra @ ..] => {
            let payload : Value = match serde_json::from_str(payload) {
                Ok(v) => v,
                Err(err) => fail(&format!("payload is not json: {}", err)),
            };

            let transport = client::transport(&config());
            match transport.post(action, &payload, pairs(extra)).await {
                Ok(envelope) => print_json(&envelope.into_value()),
                Err(err) => fail(&err.to_string()),
            }
        },
        ["help", "config"] => {
            usage("config");
        },
        ["config"] => {
            let transport = client::transport(&config());
            let display = load_display_config(&transport).await;
            print_json(&display);
        },
        ["help", "unlock"] => {
            usage("unlock");
        },
        ["unlock"] => {
            if !gate(&config()).unlock() {
                std::process::exit(1);
            }
        },
        ["help", "lock"] => {
            usage("lock");
        },
        ["lock"] => {
            gate(&config()).lock();
        },
        ["help", "status"] => {
            usage("status");
        },
        ["status"] => {
            match gate(&config()).status() {
                AdminState::Locked => println!("locked"),
                AdminState::Unlocked { until } => println!("unlocked until {}", until),
            }
        },
        ["help", "sellable"] => {
            usage("sellable status");
        },
        ["sellable", status] => {
            println!("{}", text::is_sellable_status(Some(*status)));
        },
        ["help", "escape"] => {
            usage("escape text");
        },
        ["escape", s] => {
            println!("{}", text::escape_html(s));
        },
        args => {
            eprintln!("invalid args: {:?}", args);
            eprintln!("try `./yardos help cmd` where cmd is:");

            let cmds = &[
                "get",
                "post",
                "config",
                "unlock",
                "lock",
                "status",
                "sellable",
                "escape",
            ];

            for cmd in cmds.iter() {
                eprintln!("{}", cmd);
            }

            std::process::exit(1);
        }
    }
}

fn config() -> Config {
    match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err);
            eprintln!(concat!(
                "could not load config, set YARDOS_CONFIG ",
                "or write a file to config.json"
            ));
            std::process::exit(1);
        },
    }
}

fn gate(config : &Config) -> AdminGate {
    let toaster = Arc::new(Toaster::new(StderrSurface));
    AdminGate::new(config, FileStore::new(&config.store_path), TerminalPrompt, toaster)
}

fn pairs(args : &[&str]) -> Params {
    args.iter().map(|a| Params::parse_pair(a)).collect()
}

fn print_json<T : serde::Serialize>(value : &T) {
    match text::pretty_json(value) {
        Ok(s) => println!("{}", s),
        Err(err) => fail(&err.to_string()),
    }
}

fn fail(msg : &str) -> ! {
    eprintln!("error: {}", msg);
    std::process::exit(1)
}

fn usage(s : &str) -> ! {
    println!("usage: ./yardos {}", s);
    std::process::exit(0)
}
